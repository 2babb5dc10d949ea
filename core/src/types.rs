//! Domain type definitions for the inventory model.
//!
//! This module defines the data model shared by every storage backend:
//! column definitions for the dynamic inventory schema, typed field values,
//! the action enumerations recorded in the transaction logs, and the log
//! records themselves. The types are designed for serialization with
//! [`serde`] so the CLI layer can render them directly.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Row identifier of an inventory entity.
pub type EntityId = i64;

/// Row identifier of a user.
pub type UserId = i64;

/// Default-value token that resolves to the insertion time.
pub const CURRENT_TIMESTAMP: &str = "CURRENT_TIMESTAMP";

/// Storage type of an inventory column.
///
/// # Examples
///
/// ```
/// use invman_core::ColumnType;
///
/// let ty: ColumnType = "real".parse().unwrap();
/// assert_eq!(ty, ColumnType::Real);
/// assert_eq!(ty.to_string(), "REAL");
/// assert!(ColumnType::Varchar.is_textual());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    /// Text of arbitrary length (the default).
    #[default]
    Text,
    /// Text bounded by `max_length`.
    Varchar,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit floating point number.
    Real,
    /// `true` or `false`.
    Bool,
}

impl ColumnType {
    /// Returns `true` for the string-valued types.
    pub fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Varchar)
    }

    /// Returns `true` for the types that honour `min`/`max` bounds.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Real)
    }

    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Varchar => "VARCHAR",
            Self::Int => "INT",
            Self::Real => "REAL",
            Self::Bool => "BOOL",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Ok(Self::Text),
            "VARCHAR" => Ok(Self::Varchar),
            "INT" | "INTEGER" => Ok(Self::Int),
            "REAL" | "FLOAT" => Ok(Self::Real),
            "BOOL" | "BOOLEAN" => Ok(Self::Bool),
            other => Err(format!("unknown column type: {other}")),
        }
    }
}

/// Definition of one inventory column.
///
/// Definitions are stored as JSON in the schema transaction log (`from_val`
/// / `to_val`) and in the column projection. Use [`ColumnDefinition::new`]
/// and the `with_*` builders to construct one.
///
/// # Examples
///
/// ```
/// use invman_core::{ColumnDefinition, ColumnType};
///
/// let col = ColumnDefinition::new("part_number", ColumnType::Varchar)
///     .with_length(None, Some(32))
///     .required()
///     .unique();
/// assert_eq!(col.display_name, "Part number");
/// assert!(!col.nullable);
/// assert!(col.unique);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column tag, `[a-z][a-z0-9_]*`.
    pub name: String,
    /// Human-readable label used for printing.
    pub display_name: String,
    /// Storage type.
    pub column_type: ColumnType,
    /// Whether NULL is accepted.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Whether values must be unique among live entities.
    #[serde(default)]
    pub unique: bool,
    /// Literal default applied on create, or [`CURRENT_TIMESTAMP`].
    #[serde(default)]
    pub default: Option<String>,
    /// Minimum length in characters (string types).
    #[serde(default)]
    pub min_length: Option<u32>,
    /// Maximum length in characters (string types).
    #[serde(default)]
    pub max_length: Option<u32>,
    /// Inclusive lower bound (numeric types).
    #[serde(default)]
    pub min: Option<f64>,
    /// Inclusive upper bound (numeric types).
    #[serde(default)]
    pub max: Option<f64>,
    /// Presentation hint for external applications.
    #[serde(default)]
    pub hint: String,
    /// Layout information for external applications.
    #[serde(default)]
    pub layout: String,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDefinition {
    /// Creates a nullable, non-unique column with a derived display name.
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            display_name: derive_display_name(name),
            column_type,
            nullable: true,
            unique: false,
            default: None,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            hint: String::new(),
            layout: String::new(),
        }
    }

    /// Overrides the derived display name.
    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    /// Marks the column as NOT NULL.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the column as unique among live entities.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the default literal.
    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    /// Sets character length bounds.
    pub fn with_length(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    /// Sets numeric bounds.
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Sets the presentation hint.
    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hint = hint.to_string();
        self
    }

    /// Sets the layout information.
    pub fn with_layout(mut self, layout: &str) -> Self {
        self.layout = layout.to_string();
        self
    }
}

/// Derives a display name from a column tag: `part_number` → `Part number`.
pub fn derive_display_name(name: &str) -> String {
    let spaced = name.replace(['-', '_'], " ");
    let mut chars = spaced.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first
            .to_uppercase()
            .chain(chars.map(|c| c.to_ascii_lowercase()))
            .collect(),
    }
}

/// A typed value held by one field of an entity.
///
/// Serializes untagged, so JSON output shows plain scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    /// Absent value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Real(f64),
    /// String value.
    Text(String),
}

impl FieldValue {
    /// Returns `true` for [`FieldValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Canonical serialized form used in the transaction log.
    ///
    /// # Examples
    ///
    /// ```
    /// use invman_core::FieldValue;
    ///
    /// assert_eq!(FieldValue::Real(2.5).to_canonical().as_deref(), Some("2.5"));
    /// assert_eq!(FieldValue::Bool(true).to_canonical().as_deref(), Some("true"));
    /// assert_eq!(FieldValue::Null.to_canonical(), None);
    /// ```
    pub fn to_canonical(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Real(r) if *r == 0.0 => Some("0".to_string()),
            Self::Real(r) => Some(r.to_string()),
            Self::Text(s) => Some(s.clone()),
        }
    }

    /// Parses a canonical serialized value back into the given column type.
    ///
    /// Returns `None` when the text is not a canonical value of that type.
    pub fn from_canonical(column_type: ColumnType, raw: Option<&str>) -> Option<Self> {
        let Some(raw) = raw else {
            return Some(Self::Null);
        };
        match column_type {
            ColumnType::Text | ColumnType::Varchar => Some(Self::Text(raw.to_string())),
            ColumnType::Int => raw.parse::<i64>().ok().map(Self::Integer),
            ColumnType::Real => raw
                .parse::<f64>()
                .ok()
                .filter(|r| r.is_finite())
                .map(Self::Real),
            ColumnType::Bool => match raw {
                "true" => Some(Self::Bool(true)),
                "false" => Some(Self::Bool(false)),
                _ => None,
            },
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_canonical() {
            Some(s) => f.write_str(&s),
            None => f.write_str("NULL"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Action recorded in the schema transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaAction {
    /// A column was added (or re-added after removal).
    Add = 1,
    /// A live column's definition changed.
    Edit = 2,
    /// A column was logically removed.
    Remove = 3,
}

impl SchemaAction {
    /// Numeric action code stored in `action_no`.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Resolves a stored action code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Add),
            2 => Some(Self::Edit),
            3 => Some(Self::Remove),
            _ => None,
        }
    }
}

/// Action recorded in the inventory transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityAction {
    /// Entity created.
    Create = 1,
    /// Field value changed.
    Update = 2,
    /// Entity soft-deleted.
    Delete = 3,
}

impl EntityAction {
    /// Numeric action code stored in `action_no`.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Resolves a stored action code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Create),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// High-level lifecycle action recorded in the event log.
///
/// Codes are grouped by hundreds per area; other layers may append their
/// own codes, which is why [`Event`] stores the raw number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventAction {
    UserRegister = 100,
    UserLogin = 101,
    UserDeactivate = 102,
    InventoryCreate = 200,
    InventoryUpdate = 201,
    InventoryDelete = 202,
    SchemaAdd = 300,
    SchemaEdit = 301,
    SchemaRemove = 302,
    PermissionGrant = 400,
    PermissionRevoke = 401,
    ConfigSet = 500,
}

impl EventAction {
    const ALL: [Self; 12] = [
        Self::UserRegister,
        Self::UserLogin,
        Self::UserDeactivate,
        Self::InventoryCreate,
        Self::InventoryUpdate,
        Self::InventoryDelete,
        Self::SchemaAdd,
        Self::SchemaEdit,
        Self::SchemaRemove,
        Self::PermissionGrant,
        Self::PermissionRevoke,
        Self::ConfigSet,
    ];

    /// Numeric action code stored in `action_no`.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Resolves a stored action code.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.code() == code)
    }
}

impl From<SchemaAction> for EventAction {
    fn from(action: SchemaAction) -> Self {
        match action {
            SchemaAction::Add => Self::SchemaAdd,
            SchemaAction::Edit => Self::SchemaEdit,
            SchemaAction::Remove => Self::SchemaRemove,
        }
    }
}

impl From<EntityAction> for EventAction {
    fn from(action: EntityAction) -> Self {
        match action {
            EntityAction::Create => Self::InventoryCreate,
            EntityAction::Update => Self::InventoryUpdate,
            EntityAction::Delete => Self::InventoryDelete,
        }
    }
}

/// One row of the schema transaction log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaTransaction {
    pub id: i64,
    pub dispatcher: UserId,
    pub column: String,
    pub action: SchemaAction,
    /// Per-column action sequence number, starting at 1.
    pub seq: i64,
    pub from_val: Option<ColumnDefinition>,
    pub to_val: Option<ColumnDefinition>,
    pub created_at: String,
}

/// One row of the inventory transaction log.
///
/// Field-level rows carry `field` and `schema_id`; row-level rows (the
/// create marker of an entity without values, and soft deletes) leave both
/// empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryTransaction {
    pub id: i64,
    pub dispatcher: UserId,
    pub schema_id: Option<i64>,
    pub inventory_id: EntityId,
    pub field: Option<String>,
    pub action: EntityAction,
    /// Per-entity action sequence number; rows written by one operation share it.
    pub seq: i64,
    pub from_val: Option<String>,
    pub to_val: Option<String>,
    pub created_at: String,
}

/// One row of the event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: i64,
    pub action_no: u32,
    pub dispatcher: Option<UserId>,
    pub target: Option<i64>,
    pub reason: Option<String>,
    pub created_at: String,
}

impl Event {
    /// Resolves the action code, if it is one this crate defines.
    pub fn action(&self) -> Option<EventAction> {
        EventAction::from_code(self.action_no)
    }
}

/// A live (or soft-deleted) inventory row keyed by the current schema.
///
/// Fields keep the order of the schema. Serializes as a flat JSON object
/// with the bookkeeping columns first.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    pub fields: Vec<(String, FieldValue)>,
}

impl Entity {
    /// Returns the value of a field, if the column is part of the row.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Returns `true` if the entity has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4 + self.fields.len()))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("created_at", &self.created_at)?;
        map.serialize_entry("updated_at", &self.updated_at)?;
        map.serialize_entry("deleted_at", &self.deleted_at)?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
