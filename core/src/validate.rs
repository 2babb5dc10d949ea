//! Column definition and field value validation.
//!
//! Validates column definitions before they enter the schema log, and
//! coerces caller-supplied values into the column's storage type while
//! checking the definition's constraints. Uniqueness is not checked here;
//! it needs the storage backend.
//!
//! # Examples
//!
//! ```
//! use invman_core::*;
//!
//! let col = ColumnDefinition::new("qty", ColumnType::Int).with_range(Some(0.0), None);
//! assert!(validate_definition(&col).is_empty());
//!
//! assert_eq!(coerce_value(&col, &FieldValue::from("12")), Ok(FieldValue::Integer(12)));
//! assert!(coerce_value(&col, &FieldValue::from("-1")).is_err());
//! ```

use thiserror::Error;

use crate::{CURRENT_TIMESTAMP, ColumnDefinition, ColumnType, FieldValue};

/// Longest accepted column name.
pub const MAX_COLUMN_NAME_LEN: usize = 64;

/// Column names reserved for the bookkeeping columns of the inventory table.
pub const RESERVED_COLUMNS: [&str; 4] = ["id", "created_at", "updated_at", "deleted_at"];

/// Definition and value validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Column name is empty, too long, or uses characters outside `[a-z0-9_]`.
    #[error("invalid column name '{0}': use lowercase letters, digits and underscores, starting with a letter")]
    InvalidColumnName(String),
    /// Column name collides with a bookkeeping column.
    #[error("column name '{0}' is reserved")]
    ReservedColumnName(String),
    /// `min_length` exceeds `max_length`.
    #[error("min_length cannot be larger than max_length")]
    LengthBoundsInverted,
    /// `min` exceeds `max`.
    #[error("min cannot be larger than max")]
    RangeInverted,
    /// Bound is NaN or infinite.
    #[error("numeric bounds must be finite")]
    NonFiniteBound,
    /// VARCHAR column without a positive `max_length`.
    #[error("VARCHAR columns require a max_length greater than 0")]
    VarcharWithoutLength,
    /// Default literal does not satisfy the definition.
    #[error("default value is invalid: {0}")]
    InvalidDefault(String),
    /// Value cannot be represented in the column type.
    #[error("expected a {expected} value, got '{got}'")]
    TypeMismatch { expected: ColumnType, got: String },
    /// NULL supplied for a NOT NULL column.
    #[error("value is required")]
    Required,
    /// String shorter than `min_length`.
    #[error("length {len} is below the minimum of {min}")]
    TooShort { len: usize, min: u32 },
    /// String longer than `max_length`.
    #[error("length {len} exceeds the maximum of {max}")]
    TooLong { len: usize, max: u32 },
    /// Number below `min`.
    #[error("{value} is below the minimum of {min}")]
    BelowMinimum { value: f64, min: f64 },
    /// Number above `max`.
    #[error("{value} exceeds the maximum of {max}")]
    AboveMaximum { value: f64, max: f64 },
}

/// Validates a column name.
///
/// # Examples
///
/// ```
/// use invman_core::validate_column_name;
///
/// assert!(validate_column_name("part_number").is_ok());
/// assert!(validate_column_name("Part").is_err());
/// assert!(validate_column_name("id").is_err());
/// ```
pub fn validate_column_name(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !starts_with_letter || !rest_ok || name.len() > MAX_COLUMN_NAME_LEN {
        return Err(ValidationError::InvalidColumnName(name.to_string()));
    }
    if RESERVED_COLUMNS.contains(&name) {
        return Err(ValidationError::ReservedColumnName(name.to_string()));
    }
    Ok(())
}

/// Validates a column definition.
///
/// Returns every problem found; an empty vector means the definition is
/// acceptable.
pub fn validate_definition(def: &ColumnDefinition) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Err(err) = validate_column_name(&def.name) {
        errors.push(err);
    }

    if let (Some(min), Some(max)) = (def.min_length, def.max_length) {
        if min > max {
            errors.push(ValidationError::LengthBoundsInverted);
        }
    }

    let bounds = [def.min, def.max];
    if bounds.iter().flatten().any(|b| !b.is_finite()) {
        errors.push(ValidationError::NonFiniteBound);
    } else if let (Some(min), Some(max)) = (def.min, def.max) {
        if min > max {
            errors.push(ValidationError::RangeInverted);
        }
    }

    if def.column_type == ColumnType::Varchar && def.max_length.unwrap_or(0) == 0 {
        errors.push(ValidationError::VarcharWithoutLength);
    }

    if errors.is_empty() {
        if let Some(default) = &def.default {
            if default == CURRENT_TIMESTAMP {
                if !def.column_type.is_textual() {
                    errors.push(ValidationError::InvalidDefault(format!(
                        "{CURRENT_TIMESTAMP} requires a TEXT or VARCHAR column"
                    )));
                }
            } else if let Err(err) = coerce_value(def, &FieldValue::Text(default.clone())) {
                errors.push(ValidationError::InvalidDefault(err.to_string()));
            }
        }
    }

    errors
}

/// Coerces a value into the column's type and checks its constraints.
///
/// Strings are parsed for numeric and boolean columns; numbers are rendered
/// for string columns. NULL is accepted only by nullable columns.
pub fn coerce_value(def: &ColumnDefinition, value: &FieldValue) -> Result<FieldValue, ValidationError> {
    let coerced = coerce_type(def.column_type, value)?;
    check_constraints(def, &coerced)?;
    Ok(coerced)
}

/// Resolves the default value of a column at insertion time `now`.
///
/// Returns `Ok(None)` when the column has no default.
pub fn resolve_default(def: &ColumnDefinition, now: &str) -> Result<Option<FieldValue>, ValidationError> {
    match def.default.as_deref() {
        None => Ok(None),
        Some(CURRENT_TIMESTAMP) if def.column_type.is_textual() => {
            Ok(Some(FieldValue::Text(now.to_string())))
        }
        Some(literal) => coerce_value(def, &FieldValue::Text(literal.to_string())).map(Some),
    }
}

fn coerce_type(column_type: ColumnType, value: &FieldValue) -> Result<FieldValue, ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        expected: column_type,
        got: value.to_string(),
    };

    match (column_type, value) {
        (_, FieldValue::Null) => Ok(FieldValue::Null),
        (ColumnType::Text | ColumnType::Varchar, FieldValue::Text(s)) => Ok(FieldValue::Text(s.clone())),
        (ColumnType::Text | ColumnType::Varchar, other) => Ok(FieldValue::Text(other.to_string())),
        (ColumnType::Int, FieldValue::Integer(i)) => Ok(FieldValue::Integer(*i)),
        (ColumnType::Int, FieldValue::Real(r)) => {
            if r.fract() == 0.0 && *r >= i64::MIN as f64 && *r < i64::MAX as f64 {
                Ok(FieldValue::Integer(*r as i64))
            } else {
                Err(mismatch())
            }
        }
        (ColumnType::Int, FieldValue::Text(s)) => s.trim().parse::<i64>().map(FieldValue::Integer).map_err(|_| mismatch()),
        (ColumnType::Real, FieldValue::Real(r)) if r.is_finite() => Ok(to_real(*r)),
        (ColumnType::Real, FieldValue::Integer(i)) => Ok(to_real(*i as f64)),
        (ColumnType::Real, FieldValue::Text(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|r| r.is_finite())
            .map(to_real)
            .ok_or_else(mismatch),
        (ColumnType::Bool, FieldValue::Bool(b)) => Ok(FieldValue::Bool(*b)),
        (ColumnType::Bool, FieldValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(FieldValue::Bool(true)),
            "false" => Ok(FieldValue::Bool(false)),
            _ => Err(mismatch()),
        },
        _ => Err(mismatch()),
    }
}

/// SQLite stores `-0.0` as integer 0, so negative zero is folded into `0.0`.
fn to_real(r: f64) -> FieldValue {
    FieldValue::Real(if r == 0.0 { 0.0 } else { r })
}

fn check_constraints(def: &ColumnDefinition, value: &FieldValue) -> Result<(), ValidationError> {
    match value {
        FieldValue::Null => {
            if def.nullable {
                Ok(())
            } else {
                Err(ValidationError::Required)
            }
        }
        FieldValue::Text(s) => {
            let len = s.chars().count();
            if let Some(min) = def.min_length {
                if len < min as usize {
                    return Err(ValidationError::TooShort { len, min });
                }
            }
            if let Some(max) = def.max_length {
                if len > max as usize {
                    return Err(ValidationError::TooLong { len, max });
                }
            }
            Ok(())
        }
        FieldValue::Integer(i) => check_range(def, *i as f64),
        FieldValue::Real(r) => check_range(def, *r),
        FieldValue::Bool(_) => Ok(()),
    }
}

fn check_range(def: &ColumnDefinition, value: f64) -> Result<(), ValidationError> {
    if let Some(min) = def.min {
        if value < min {
            return Err(ValidationError::BelowMinimum { value, min });
        }
    }
    if let Some(max) = def.max {
        if value > max {
            return Err(ValidationError::AboveMaximum { value, max });
        }
    }
    Ok(())
}
