use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use invman_config::{AppConfig, LogConfig, LogFormat};
use invman_core::{
    ColumnDefinition, ColumnType, Entity, EntityId, Event, EventAction, FieldValue, InventoryTransaction,
    Principal, SCHEMA_READ, SchemaTransaction,
};
use invman_sqlite::{
    EntityQuery, HashingParams, Inventory, Migration, RawFilter, Setting, StoreError, StoreOptions, UserInfo,
    authorize,
};
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Plain,
}

#[derive(Debug, Parser)]
#[command(name = "invman")]
#[command(about = "Inventory tracking with a versioned schema and a full audit trail")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// YAML configuration file (defaults to $INVMAN_CONFIG, then built-in defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Database file, overriding the configured one.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Log in for this one command.
    #[arg(long, global = true, value_name = "USER:PASS", conflicts_with = "token")]
    auth: Option<String>,
    /// Session token returned by `user login`.
    #[arg(long, global = true)]
    token: Option<String>,
    /// Output format.
    #[arg(long, global = true, value_enum, default_value = "json")]
    output: OutputFormat,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accounts, sessions and role permissions.
    User(UserArgs),
    /// Inventory entities and the column schema.
    Inventory(InventoryArgs),
    /// The lifecycle event log.
    Events(EventsArgs),
    /// Instance settings stored in the database.
    Config(ConfigArgs),
    /// Replay every log and compare it with the live tables.
    Verify,
    /// Database table lifecycle.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args)]
struct UserArgs {
    #[command(subcommand)]
    operation: UserOperation,
}

#[derive(Debug, Subcommand)]
enum UserOperation {
    /// Create an account. The first account becomes the administrator.
    Register { username: String, password: String },
    /// Start a session and print its token.
    Login { username: String, password: String },
    /// End the session given with --token.
    Logout,
    /// Change the password of the authenticated user.
    Passwd { old: String, new: String },
    /// Deactivate an account and end its sessions.
    Deactivate { username: String },
    /// List all accounts.
    List,
    /// Grant a permission to a role.
    Grant { role: String, permission: String },
    /// Revoke a permission from a role.
    Revoke { role: String, permission: String },
}

#[derive(Debug, Args)]
struct InventoryArgs {
    #[command(subcommand)]
    operation: InventoryOperation,
}

#[derive(Debug, Subcommand)]
enum InventoryOperation {
    /// Create an entity from name=value pairs.
    Add {
        /// Field assignments; an empty value means NULL.
        #[arg(value_name = "NAME=VALUE")]
        fields: Vec<String>,
    },
    /// Change fields of an entity.
    Edit {
        #[arg(short, long)]
        id: EntityId,
        /// Field assignment; repeat for several fields.
        #[arg(short, long = "set", value_name = "NAME=VALUE", required = true)]
        set: Vec<String>,
    },
    /// Soft-delete an entity.
    Remove {
        #[arg(short, long)]
        id: EntityId,
    },
    /// List entities in id order.
    List {
        /// Maximum number of entities.
        #[arg(short, long)]
        limit: Option<u64>,
        /// Include soft-deleted entities.
        #[arg(long)]
        all: bool,
        /// SQL condition over the inventory columns.
        #[arg(short, long, value_name = "SQL")]
        raw: Option<String>,
        /// Positional parameter of the raw condition; repeat in order.
        #[arg(short, long = "param", value_name = "PARAM", requires = "raw")]
        param: Vec<String>,
    },
    /// Show one entity, deleted or not.
    Get {
        #[arg(short, long)]
        id: EntityId,
    },
    /// Show the transaction history of one entity.
    History {
        #[arg(short, long)]
        id: EntityId,
    },
    /// Inspect or change the column schema.
    Schema(SchemaArgs),
}

#[derive(Debug, Args)]
struct SchemaArgs {
    #[command(subcommand)]
    operation: SchemaOperation,
}

#[derive(Debug, Subcommand)]
enum SchemaOperation {
    /// Add a column, or re-add a removed one.
    Add(ColumnArgs),
    /// Replace the definition of a live column.
    Edit(ColumnArgs),
    /// Remove a column. Its data is kept.
    Remove { name: String },
    /// List the live columns.
    List,
    /// Show schema transactions, for one column or all.
    History { name: Option<String> },
}

#[derive(Debug, Args)]
struct ColumnArgs {
    /// Column name.
    #[arg(long)]
    name: String,
    /// TEXT, VARCHAR, INT, REAL or BOOL.
    #[arg(long)]
    column_type: ColumnType,
    #[arg(long)]
    display_name: Option<String>,
    /// Reject NULL values.
    #[arg(long)]
    required: bool,
    /// Reject duplicates among live entities.
    #[arg(long)]
    unique: bool,
    /// Default value, or CURRENT_TIMESTAMP.
    #[arg(long)]
    default: Option<String>,
    #[arg(long)]
    min_length: Option<u32>,
    #[arg(long)]
    max_length: Option<u32>,
    #[arg(long, allow_negative_numbers = true)]
    min: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    max: Option<f64>,
    /// Input hint shown by front ends.
    #[arg(long)]
    hint: Option<String>,
    /// Layout hint shown by front ends.
    #[arg(long)]
    layout: Option<String>,
}

#[derive(Debug, Args)]
struct EventsArgs {
    #[command(subcommand)]
    operation: EventsOperation,
}

#[derive(Debug, Subcommand)]
enum EventsOperation {
    /// List events in id order.
    List {
        /// Only events with this action number.
        #[arg(long)]
        action: Option<u32>,
    },
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    operation: ConfigOperation,
}

#[derive(Debug, Subcommand)]
enum ConfigOperation {
    /// List every setting.
    List,
    /// Show one setting.
    Get { name: String },
    /// Create or replace a setting.
    Set { name: String, value: String },
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[command(subcommand)]
    operation: MigrateOperation,
}

#[derive(Debug, Subcommand)]
enum MigrateOperation {
    /// Create tables and seed roles and settings.
    Up,
    /// Drop every table.
    Down,
    /// Show table status and row counts.
    Status,
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = AppConfig::resolve(cli.global.config.as_deref())
        .map_err(|e| format!("Failed to load configuration: {e}"))?;
    init_logging(&config.log);
    let ctx = Context::new(cli.global, config);

    match cli.command {
        Command::User(args) => run_user(&ctx, args.operation),
        Command::Inventory(args) => run_inventory(&ctx, args.operation),
        Command::Events(args) => run_events(&ctx, args.operation),
        Command::Config(args) => run_config(&ctx, args.operation),
        Command::Verify => run_verify(&ctx),
        Command::Migrate(args) => run_migrate(&ctx, args.operation),
    }
}

/// Installs the stderr subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match log.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

struct Context {
    config: AppConfig,
    db: PathBuf,
    auth: Option<String>,
    token: Option<String>,
    output: OutputFormat,
}

impl Context {
    fn new(global: GlobalArgs, config: AppConfig) -> Self {
        let db = global.db.unwrap_or_else(|| config.database.clone());
        Self {
            config,
            db,
            auth: global.auth,
            token: global.token,
            output: global.output,
        }
    }

    fn store_options(&self) -> StoreOptions {
        StoreOptions {
            prefix: self.config.table_prefix.clone(),
            page_size: self.config.page_size,
            busy_timeout: Duration::from_millis(self.config.busy_timeout_ms),
            hashing: HashingParams {
                memory_kib: self.config.password.memory_kib,
                iterations: self.config.password.iterations,
                parallelism: self.config.password.parallelism,
            },
        }
    }

    fn open(&self) -> Result<Inventory, String> {
        debug!(db = %self.db.display(), "opening inventory");
        Inventory::open(&self.db, self.store_options())
            .map_err(|e| format!("Failed to open database '{}': {e}", self.db.display()))
    }

    /// Runs `f` as the caller named by --token or --auth.
    ///
    /// A session opened for --auth is revoked afterwards.
    fn with_principal<T>(
        &self,
        inv: &Inventory,
        f: impl FnOnce(&Principal) -> Result<T, String>,
    ) -> Result<T, String> {
        if let Some(token) = &self.token {
            let principal = inv.sessions().validate_session(token).map_err(|e| e.to_string())?;
            return f(&principal);
        }
        let Some(auth) = &self.auth else {
            return Err("authentication required: pass --auth USER:PASS or --token TOKEN".to_string());
        };
        let (username, password) = auth
            .split_once(':')
            .ok_or_else(|| "--auth expects USER:PASS".to_string())?;
        let session = inv
            .identity()
            .authenticate(username, password)
            .map_err(|e| e.to_string())?;

        let result = inv
            .sessions()
            .validate_session(&session.token)
            .map_err(|e| e.to_string())
            .and_then(|principal| f(&principal));
        if let Err(err) = inv.sessions().revoke_session(&session.token) {
            warn!(%err, "failed to revoke command session");
        }
        result
    }
}

// ---------------------------------------------------------------------------
// user command
// ---------------------------------------------------------------------------

fn run_user(ctx: &Context, operation: UserOperation) -> Result<(), String> {
    let inv = ctx.open()?;
    match operation {
        UserOperation::Register { username, password } => {
            let id = inv
                .identity()
                .register(&username, &password)
                .map_err(|e| e.to_string())?;
            emit(ctx.output, &serde_json::json!({ "user_id": id, "username": username }), |_| {
                format!("Registered '{username}' with id {id}.")
            })
        }
        UserOperation::Login { username, password } => {
            let session = inv
                .identity()
                .authenticate(&username, &password)
                .map_err(|e| e.to_string())?;
            emit(ctx.output, &session, |s| s.token.clone())
        }
        UserOperation::Logout => {
            let token = ctx
                .token
                .as_deref()
                .ok_or_else(|| "logout requires --token".to_string())?;
            inv.sessions().revoke_session(token).map_err(|e| e.to_string())?;
            emit(ctx.output, &serde_json::json!({ "revoked": true }), |_| "Logged out.".to_string())
        }
        UserOperation::Passwd { old, new } => ctx.with_principal(&inv, |p| {
            inv.identity()
                .change_password(p, &old, &new)
                .map_err(|e| e.to_string())?;
            emit(ctx.output, &serde_json::json!({ "changed": true }), |_| "Password changed.".to_string())
        }),
        UserOperation::Deactivate { username } => ctx.with_principal(&inv, |p| {
            inv.identity()
                .deactivate_user(p, &username)
                .map_err(|e| e.to_string())?;
            emit(ctx.output, &serde_json::json!({ "deactivated": username }), |_| {
                format!("Deactivated '{username}'.")
            })
        }),
        UserOperation::List => ctx.with_principal(&inv, |p| {
            let users = inv.identity().list_users(p).map_err(|e| e.to_string())?;
            emit(ctx.output, &users, |users| lines(users.iter().map(plain_user)))
        }),
        UserOperation::Grant { role, permission } => ctx.with_principal(&inv, |p| {
            let changed = inv
                .identity()
                .grant_permission(p, &role, &permission)
                .map_err(|e| e.to_string())?;
            emit(ctx.output, &serde_json::json!({ "role": role, "permission": permission, "changed": changed }), |_| {
                if changed {
                    format!("Granted '{permission}' to '{role}'.")
                } else {
                    format!("'{role}' already has '{permission}'.")
                }
            })
        }),
        UserOperation::Revoke { role, permission } => ctx.with_principal(&inv, |p| {
            let changed = inv
                .identity()
                .revoke_permission(p, &role, &permission)
                .map_err(|e| e.to_string())?;
            emit(ctx.output, &serde_json::json!({ "role": role, "permission": permission, "changed": changed }), |_| {
                if changed {
                    format!("Revoked '{permission}' from '{role}'.")
                } else {
                    format!("'{role}' does not have '{permission}'.")
                }
            })
        }),
    }
}

// ---------------------------------------------------------------------------
// inventory command
// ---------------------------------------------------------------------------

fn run_inventory(ctx: &Context, operation: InventoryOperation) -> Result<(), String> {
    let inv = ctx.open()?;
    ctx.with_principal(&inv, |p| match operation {
        InventoryOperation::Add { fields } => {
            let fields = parse_assignments(&fields)?;
            let id = inv.entities().create_entity(p, fields).map_err(|e| e.to_string())?;
            emit(ctx.output, &serde_json::json!({ "id": id }), |_| format!("Created entity {id}."))
        }
        InventoryOperation::Edit { id, set } => {
            let fields = parse_assignments(&set)?;
            let changed = inv
                .entities()
                .edit_entity(p, id, fields)
                .map_err(|e| e.to_string())?;
            emit(ctx.output, &serde_json::json!({ "id": id, "changed": changed }), |_| {
                format!("Entity {id}: {changed} field(s) changed.")
            })
        }
        InventoryOperation::Remove { id } => {
            inv.entities().soft_delete_entity(p, id).map_err(|e| e.to_string())?;
            emit(ctx.output, &serde_json::json!({ "id": id, "deleted": true }), |_| {
                format!("Deleted entity {id}.")
            })
        }
        InventoryOperation::List { limit, all, raw, param } => {
            let query = EntityQuery {
                filter: raw.map(|sql| RawFilter::new(sql, param.into_iter().map(FieldValue::Text).collect())),
                limit,
                include_deleted: all,
            };
            let entities = inv.entities().list_entities(p, query).map_err(|e| e.to_string())?;
            emit_all(ctx.output, entities, plain_entity)
        }
        InventoryOperation::Get { id } => {
            let entity = inv.entities().get_entity(p, id).map_err(|e| e.to_string())?;
            emit(ctx.output, &entity, plain_entity)
        }
        InventoryOperation::History { id } => {
            let history = inv.entities().entity_history(p, id).map_err(|e| e.to_string())?;
            emit_all(ctx.output, history, plain_inventory_tx)
        }
        InventoryOperation::Schema(args) => run_schema(ctx, &inv, p, args.operation),
    })
}

fn run_schema(ctx: &Context, inv: &Inventory, p: &Principal, operation: SchemaOperation) -> Result<(), String> {
    let change = match operation {
        SchemaOperation::Add(args) => invman_sqlite::SchemaChange::Add(column_definition(args)),
        SchemaOperation::Edit(args) => invman_sqlite::SchemaChange::Edit(column_definition(args)),
        SchemaOperation::Remove { name } => invman_sqlite::SchemaChange::Remove(name),
        SchemaOperation::List => {
            require_schema_read(p)?;
            let columns = inv.registry().current_schema().map_err(|e| e.to_string())?;
            return emit(ctx.output, &columns, |columns| lines(columns.iter().map(plain_column)));
        }
        SchemaOperation::History { name } => {
            require_schema_read(p)?;
            let history = inv
                .registry()
                .schema_history(name.as_deref())
                .map_err(|e| e.to_string())?;
            return emit_all(ctx.output, history, plain_schema_tx);
        }
    };

    let version = inv
        .registry()
        .apply_schema_change(p, change)
        .map_err(|e| e.to_string())?;
    emit(ctx.output, &version, |v| {
        format!("{:?} '{}' recorded as schema transaction {} (seq {}).", v.action, v.column, v.id, v.seq)
    })
}

fn require_schema_read(p: &Principal) -> Result<(), String> {
    if authorize(p, SCHEMA_READ) {
        Ok(())
    } else {
        Err(StoreError::PermissionDenied(SCHEMA_READ.to_string()).to_string())
    }
}

fn column_definition(args: ColumnArgs) -> ColumnDefinition {
    let mut def = ColumnDefinition::new(&args.name, args.column_type);
    if let Some(display_name) = &args.display_name {
        def = def.with_display_name(display_name);
    }
    if args.required {
        def = def.required();
    }
    if args.unique {
        def = def.unique();
    }
    if let Some(default) = &args.default {
        def = def.with_default(default);
    }
    if args.min_length.is_some() || args.max_length.is_some() {
        def = def.with_length(args.min_length, args.max_length);
    }
    if args.min.is_some() || args.max.is_some() {
        def = def.with_range(args.min, args.max);
    }
    if let Some(hint) = &args.hint {
        def = def.with_hint(hint);
    }
    if let Some(layout) = &args.layout {
        def = def.with_layout(layout);
    }
    def
}

// ---------------------------------------------------------------------------
// events, config and verify commands
// ---------------------------------------------------------------------------

fn run_events(ctx: &Context, operation: EventsOperation) -> Result<(), String> {
    let EventsOperation::List { action } = operation;
    let action = action
        .map(|code| EventAction::from_code(code).ok_or_else(|| format!("unknown event action {code}")))
        .transpose()?;
    let inv = ctx.open()?;
    ctx.with_principal(&inv, |p| {
        let events = inv.events().list_events(p, action).map_err(|e| e.to_string())?;
        emit_all(ctx.output, events, plain_event)
    })
}

fn run_config(ctx: &Context, operation: ConfigOperation) -> Result<(), String> {
    let inv = ctx.open()?;
    match operation {
        ConfigOperation::List => {
            let settings = inv.settings().list_settings().map_err(|e| e.to_string())?;
            emit(ctx.output, &settings, |settings| lines(settings.iter().map(plain_setting)))
        }
        ConfigOperation::Get { name } => {
            let setting = inv
                .settings()
                .get_setting(&name)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("setting '{name}' not found"))?;
            emit(ctx.output, &setting, plain_setting)
        }
        ConfigOperation::Set { name, value } => ctx.with_principal(&inv, |p| {
            inv.settings()
                .set_setting(p, &name, &value)
                .map_err(|e| e.to_string())?;
            emit(ctx.output, &serde_json::json!({ "name": name, "value": value }), |_| {
                format!("{name}={value}")
            })
        }),
    }
}

fn run_verify(ctx: &Context) -> Result<(), String> {
    let inv = ctx.open()?;
    let report = inv.verify_integrity().map_err(|e| e.to_string())?;
    emit(ctx.output, &report, |r| {
        format!(
            "OK: {} columns, {} entities, {} transactions checked.",
            r.columns_checked, r.entities_checked, r.transactions_checked
        )
    })
}

// ---------------------------------------------------------------------------
// migrate command
// ---------------------------------------------------------------------------

fn run_migrate(ctx: &Context, operation: MigrateOperation) -> Result<(), String> {
    let prefix = &ctx.config.table_prefix;
    let conn = rusqlite::Connection::open(&ctx.db)
        .map_err(|e| format!("Failed to open database '{}': {e}", ctx.db.display()))?;
    let mut migration =
        Migration::new(conn, prefix.as_str()).map_err(|e| format!("Failed to initialize migration: {e}"))?;

    match operation {
        MigrateOperation::Up => {
            migration.up().map_err(|e| format!("Migration up failed: {e}"))?;
            emit(ctx.output, &serde_json::json!({ "migrated": "up" }), |_| {
                format!(
                    "Migration up complete. Tables created with prefix '{prefix}' in '{}'.",
                    ctx.db.display()
                )
            })
        }
        MigrateOperation::Down => {
            migration.down().map_err(|e| format!("Migration down failed: {e}"))?;
            emit(ctx.output, &serde_json::json!({ "migrated": "down" }), |_| {
                format!(
                    "Migration down complete. Tables with prefix '{prefix}' dropped from '{}'.",
                    ctx.db.display()
                )
            })
        }
        MigrateOperation::Status => {
            let status = migration
                .status()
                .map_err(|e| format!("Failed to get migration status: {e}"))?;
            emit(ctx.output, &status, |s| {
                [
                    "Migration Status:".to_string(),
                    format!("  Tables exist: {}", if s.tables_exist { "yes" } else { "no" }),
                    format!("  Users: {}", s.user_count),
                    format!("  Live columns: {}", s.column_count),
                    format!("  Live entities: {}", s.entity_count),
                    format!("  Schema transactions: {}", s.schema_transaction_count),
                    format!("  Inventory transactions: {}", s.inventory_transaction_count),
                    format!("  Events: {}", s.event_count),
                ]
                .join("\n")
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parses `name=value` arguments. An empty value is NULL; everything else
/// is passed as text and coerced by the column type.
fn parse_assignments(raw: &[String]) -> Result<Vec<(String, FieldValue)>, String> {
    raw.iter()
        .map(|item| {
            let (name, value) = item
                .split_once('=')
                .ok_or_else(|| format!("expected NAME=VALUE, got '{item}'"))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(format!("missing field name in '{item}'"));
            }
            let value = if value.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(value.to_string())
            };
            Ok((name.to_string(), value))
        })
        .collect()
}

fn emit<T: Serialize>(output: OutputFormat, value: &T, plain: impl FnOnce(&T) -> String) -> Result<(), String> {
    match output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value).map_err(|e| format!("Failed to serialize output: {e}"))?;
            println!("{json}");
        }
        OutputFormat::Plain => println!("{}", plain(value)),
    }
    Ok(())
}

/// Writes a lazy listing: as one JSON array, or one plain line per row.
fn emit_all<T: Serialize>(
    output: OutputFormat,
    rows: impl Iterator<Item = invman_sqlite::Result<T>>,
    plain: impl Fn(&T) -> String,
) -> Result<(), String> {
    match output {
        OutputFormat::Json => {
            let items = rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())?;
            emit(output, &items, |_| String::new())
        }
        OutputFormat::Plain => {
            for row in rows {
                println!("{}", plain(&row.map_err(|e| e.to_string())?));
            }
            Ok(())
        }
    }
}

fn lines(items: impl Iterator<Item = String>) -> String {
    items.collect::<Vec<_>>().join("\n")
}

fn or_null(value: Option<&str>) -> &str {
    value.unwrap_or("NULL")
}

fn plain_entity(entity: &Entity) -> String {
    let mut line = entity.id.to_string();
    for (name, value) in &entity.fields {
        line.push_str(&format!(" {name}={value}"));
    }
    if entity.is_deleted() {
        line.push_str(" [deleted]");
    }
    line
}

fn plain_inventory_tx(tx: &InventoryTransaction) -> String {
    format!(
        "#{} seq {} {:?} {}: {} -> {} by {} at {}",
        tx.id,
        tx.seq,
        tx.action,
        tx.field.as_deref().unwrap_or("-"),
        or_null(tx.from_val.as_deref()),
        or_null(tx.to_val.as_deref()),
        tx.dispatcher,
        tx.created_at
    )
}

fn plain_column(def: &ColumnDefinition) -> String {
    let mut line = format!("{} {}", def.name, def.column_type);
    if !def.nullable {
        line.push_str(" required");
    }
    if def.unique {
        line.push_str(" unique");
    }
    if let Some(default) = &def.default {
        line.push_str(&format!(" default={default}"));
    }
    line
}

fn plain_schema_tx(tx: &SchemaTransaction) -> String {
    let shape = tx
        .to_val
        .as_ref()
        .map(plain_column)
        .unwrap_or_else(|| "(removed)".to_string());
    format!(
        "#{} {} seq {} {:?}: {} by {} at {}",
        tx.id, tx.column, tx.seq, tx.action, shape, tx.dispatcher, tx.created_at
    )
}

fn plain_event(event: &Event) -> String {
    let action = event
        .action()
        .map(|a| format!("{a:?}"))
        .unwrap_or_else(|| event.action_no.to_string());
    let mut line = format!("#{} {action}", event.id);
    if let Some(dispatcher) = event.dispatcher {
        line.push_str(&format!(" by {dispatcher}"));
    }
    if let Some(target) = event.target {
        line.push_str(&format!(" target {target}"));
    }
    if let Some(reason) = &event.reason {
        line.push_str(&format!(" ({reason})"));
    }
    line.push_str(&format!(" at {}", event.created_at));
    line
}

fn plain_user(user: &UserInfo) -> String {
    let mut line = format!("{} {} {}", user.id, user.username, user.role);
    if user.deleted_at.is_some() {
        line.push_str(" [deactivated]");
    }
    line
}

fn plain_setting(setting: &Setting) -> String {
    format!("{}={}", setting.name, setting.value)
}
