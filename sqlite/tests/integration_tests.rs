//! Integration tests for the invman-sqlite crate.

use invman_core::{
    ColumnDefinition, ColumnType, CURRENT_TIMESTAMP, EntityAction, EventAction, FieldValue, INVENTORY_READ,
    INVENTORY_WRITE, Principal, SchemaAction, replay_entity, replay_schema,
};
use invman_sqlite::{
    ALLOW_REGISTRATION, EntityQuery, HashingParams, Inventory, Migration, RawFilter, SESSION_TTL_SECS,
    SchemaChange, StoreError, StoreOptions,
};
use rusqlite::Connection;

fn options() -> StoreOptions {
    StoreOptions {
        prefix: "iv_".to_string(),
        page_size: 2,
        hashing: HashingParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        },
        ..StoreOptions::default()
    }
}

fn login(inv: &Inventory, username: &str, password: &str) -> Principal {
    let session = inv.identity().authenticate(username, password).unwrap();
    inv.sessions().validate_session(&session.token).unwrap()
}

/// An in-memory inventory with an admin principal.
fn setup() -> (Inventory, Principal) {
    let inv = Inventory::open_in_memory(options()).unwrap();
    inv.identity().register("admin", "admin-pw").unwrap();
    let admin = login(&inv, "admin", "admin-pw");
    (inv, admin)
}

fn add(inv: &Inventory, admin: &Principal, def: ColumnDefinition) {
    inv.registry().apply_schema_change(admin, SchemaChange::Add(def)).unwrap();
}

fn fields(pairs: &[(&str, FieldValue)]) -> Vec<(String, FieldValue)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn column_names(inv: &Inventory) -> Vec<String> {
    inv.registry()
        .current_schema()
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect()
}

fn count(inv: &Inventory, sql: &str) -> i64 {
    inv.connection().query_row(sql, [], |row| row.get(0)).unwrap()
}

// ============================================================================
// Schema registry
// ============================================================================

#[test]
fn test_current_schema_equals_replayed_history() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    add(&inv, &admin, ColumnDefinition::new("qty", ColumnType::Int));
    add(&inv, &admin, ColumnDefinition::new("weight", ColumnType::Real));
    inv.registry()
        .apply_schema_change(
            &admin,
            SchemaChange::Edit(ColumnDefinition::new("qty", ColumnType::Int).with_range(Some(0.0), None)),
        )
        .unwrap();
    inv.registry()
        .apply_schema_change(&admin, SchemaChange::Remove("name".into()))
        .unwrap();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Varchar).with_length(None, Some(40)));

    let history: Vec<_> = inv
        .registry()
        .schema_history(None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(history.len(), 6);

    let replayed: Vec<ColumnDefinition> = replay_schema(&history)
        .unwrap()
        .into_iter()
        .map(|c| c.definition)
        .collect();
    assert_eq!(replayed, inv.registry().current_schema().unwrap());
    // A re-added column moves to the end.
    assert_eq!(column_names(&inv), vec!["qty", "weight", "name"]);
}

#[test]
fn test_weight_add_remove_keeps_history() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("weight", ColumnType::Real));
    assert_eq!(column_names(&inv), vec!["weight"]);

    let version = inv
        .registry()
        .apply_schema_change(&admin, SchemaChange::Remove("weight".into()))
        .unwrap();
    assert_eq!(version.action, SchemaAction::Remove);
    assert_eq!(version.seq, 2);
    assert!(column_names(&inv).is_empty());

    let history: Vec<_> = inv
        .registry()
        .schema_history(Some("weight"))
        .unwrap()
        .map(|tx| tx.unwrap())
        .collect();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].action, SchemaAction::Add);
    assert!(history[0].from_val.is_none());
    assert_eq!(history[1].action, SchemaAction::Remove);
    assert!(history[1].to_val.is_none());
    assert_eq!(history[1].from_val.as_ref().map(|d| d.name.as_str()), Some("weight"));
}

#[test]
fn test_schema_change_errors() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));

    let err = inv
        .registry()
        .apply_schema_change(&admin, SchemaChange::Add(ColumnDefinition::new("name", ColumnType::Int)))
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateColumn(c) if c == "name"));

    let err = inv
        .registry()
        .apply_schema_change(&admin, SchemaChange::Edit(ColumnDefinition::new("ghost", ColumnType::Int)))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownColumn(_)));

    let err = inv
        .registry()
        .apply_schema_change(&admin, SchemaChange::Remove("ghost".into()))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownColumn(_)));

    let err = inv
        .registry()
        .apply_schema_change(&admin, SchemaChange::Add(ColumnDefinition::new("id", ColumnType::Int)))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidDefinition(_)));

    let err = inv
        .registry()
        .apply_schema_change(&admin, SchemaChange::Add(ColumnDefinition::new("code", ColumnType::Varchar)))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidDefinition(_)));

    assert_eq!(count(&inv, "SELECT COUNT(*) FROM iv_schema_transactions"), 1);
}

#[test]
fn test_edit_retypes_retained_values() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("qty", ColumnType::Text));
    let a = inv
        .entities()
        .create_entity(&admin, fields(&[("qty", "5".into())]))
        .unwrap();
    inv.entities()
        .create_entity(&admin, fields(&[("qty", FieldValue::Null)]))
        .unwrap();

    inv.registry()
        .apply_schema_change(&admin, SchemaChange::Edit(ColumnDefinition::new("qty", ColumnType::Int)))
        .unwrap();
    let entity = inv.entities().get_entity(&admin, a).unwrap();
    assert_eq!(entity.get("qty"), Some(&FieldValue::Integer(5)));
    assert_eq!(
        count(&inv, "SELECT COUNT(*) FROM iv_inventory WHERE typeof(qty) = 'integer'"),
        1
    );
    inv.verify_integrity().unwrap();
}

#[test]
fn test_edit_rejecting_retained_values_changes_nothing() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("qty", ColumnType::Text));
    inv.entities()
        .create_entity(&admin, fields(&[("qty", "plenty".into())]))
        .unwrap();

    let err = inv
        .registry()
        .apply_schema_change(&admin, SchemaChange::Edit(ColumnDefinition::new("qty", ColumnType::Int)))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidValue { ref column, .. } if column == "qty"));

    let schema = inv.registry().current_schema().unwrap();
    assert_eq!(schema[0].column_type, ColumnType::Text);
    assert_eq!(count(&inv, "SELECT COUNT(*) FROM iv_schema_transactions"), 1);
}

#[test]
fn test_readd_checks_values_kept_by_removed_column() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("grade", ColumnType::Text));
    let id = inv
        .entities()
        .create_entity(&admin, fields(&[("grade", "A".into())]))
        .unwrap();
    inv.registry()
        .apply_schema_change(&admin, SchemaChange::Remove("grade".into()))
        .unwrap();

    let err = inv
        .registry()
        .apply_schema_change(&admin, SchemaChange::Add(ColumnDefinition::new("grade", ColumnType::Real)))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidValue { .. }));

    add(&inv, &admin, ColumnDefinition::new("grade", ColumnType::Varchar).with_length(None, Some(2)));
    let entity = inv.entities().get_entity(&admin, id).unwrap();
    assert_eq!(entity.get("grade"), Some(&FieldValue::from("A")));
}

#[test]
fn test_required_column_needs_empty_inventory() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("sku", ColumnType::Text).required());
    inv.entities()
        .create_entity(&admin, fields(&[("sku", "B-1".into())]))
        .unwrap();

    let err = inv
        .registry()
        .apply_schema_change(&admin, SchemaChange::Add(ColumnDefinition::new("bin", ColumnType::Text).required()))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidValue { .. }));
    // A default does not backfill existing rows.
    let err = inv
        .registry()
        .apply_schema_change(
            &admin,
            SchemaChange::Add(ColumnDefinition::new("bin", ColumnType::Text).required().with_default("A1")),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidValue { ref column, .. } if column == "bin"));
    assert_eq!(column_names(&inv), vec!["sku"]);

    let err = inv
        .entities()
        .create_entity(&admin, fields(&[]))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidValue { ref column, .. } if column == "sku"));
}

#[test]
fn test_corrupt_projection_is_detected() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    inv.connection()
        .execute(
            "UPDATE iv_inventory_columns SET definition = ?1 WHERE name = 'name'",
            [serde_json::to_string(&ColumnDefinition::new("name", ColumnType::Int)).unwrap()],
        )
        .unwrap();

    let err = inv.registry().current_schema().unwrap_err();
    assert!(matches!(err, StoreError::StorageCorrupt(_)));
}

// ============================================================================
// Entity store
// ============================================================================

#[test]
fn test_bolt_then_screw() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));

    let id = inv
        .entities()
        .create_entity(&admin, fields(&[("name", "bolt".into())]))
        .unwrap();
    let history: Vec<_> = inv
        .entities()
        .entity_history(&admin, id)
        .unwrap()
        .map(|tx| tx.unwrap())
        .collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, EntityAction::Create);
    assert_eq!(history[0].field.as_deref(), Some("name"));
    assert_eq!(history[0].from_val, None);
    assert_eq!(history[0].to_val.as_deref(), Some("bolt"));
    assert_eq!(history[0].dispatcher, admin.user_id);

    let changed = inv
        .entities()
        .edit_entity(&admin, id, fields(&[("name", "screw".into())]))
        .unwrap();
    assert_eq!(changed, 1);

    let history: Vec<_> = inv
        .entities()
        .entity_history(&admin, id)
        .unwrap()
        .map(|tx| tx.unwrap())
        .collect();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action, EntityAction::Update);
    assert_eq!(history[1].from_val.as_deref(), Some("bolt"));
    assert_eq!(history[1].to_val.as_deref(), Some("screw"));
    assert_eq!(history[1].seq, 2);

    let listed: Vec<_> = inv
        .entities()
        .list_entities(&admin, EntityQuery::default())
        .unwrap()
        .map(|e| e.unwrap())
        .collect();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("name"), Some(&FieldValue::from("screw")));
}

#[test]
fn test_history_replays_to_live_values() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    add(&inv, &admin, ColumnDefinition::new("qty", ColumnType::Int).with_default("0"));
    add(&inv, &admin, ColumnDefinition::new("fragile", ColumnType::Bool));

    let id = inv
        .entities()
        .create_entity(&admin, fields(&[("name", "vase".into())]))
        .unwrap();
    inv.entities()
        .edit_entity(&admin, id, fields(&[("qty", "12".into()), ("fragile", true.into())]))
        .unwrap();
    inv.entities()
        .edit_entity(&admin, id, fields(&[("name", FieldValue::Null), ("qty", 11i64.into())]))
        .unwrap();

    let history: Vec<_> = inv
        .entities()
        .entity_history(&admin, id)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let snapshot = replay_entity(&history);
    let entity = inv.entities().get_entity(&admin, id).unwrap();
    for (name, value) in &entity.fields {
        assert_eq!(snapshot.value(name), value.to_canonical().as_deref(), "field {name}");
    }
    assert_eq!(entity.get("qty"), Some(&FieldValue::Integer(11)));
    assert_eq!(entity.get("fragile"), Some(&FieldValue::Bool(true)));
    assert_eq!(entity.get("name"), Some(&FieldValue::Null));
}

#[test]
fn test_negative_zero_is_logged_as_stored() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("weight", ColumnType::Real));

    let id = inv
        .entities()
        .create_entity(&admin, fields(&[("weight", FieldValue::Real(-0.0))]))
        .unwrap();
    let history: Vec<_> = inv
        .entities()
        .entity_history(&admin, id)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(history[0].to_val.as_deref(), Some("0"));
    inv.verify_integrity().unwrap();

    // 0 -> -0 is not a change.
    let changed = inv
        .entities()
        .edit_entity(&admin, id, fields(&[("weight", FieldValue::Real(-0.0))]))
        .unwrap();
    assert_eq!(changed, 0);

    inv.entities()
        .edit_entity(&admin, id, fields(&[("weight", FieldValue::Real(2.5))]))
        .unwrap();
    inv.entities()
        .edit_entity(&admin, id, fields(&[("weight", "-0.0".into())]))
        .unwrap();
    let last = inv
        .entities()
        .entity_history(&admin, id)
        .unwrap()
        .last()
        .unwrap()
        .unwrap();
    assert_eq!(last.from_val.as_deref(), Some("2.5"));
    assert_eq!(last.to_val.as_deref(), Some("0"));

    let report = inv.verify_integrity().unwrap();
    assert_eq!(report.entities_checked, 1);
}

#[test]
fn test_edit_without_changes_writes_nothing() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    let id = inv
        .entities()
        .create_entity(&admin, fields(&[("name", "bolt".into())]))
        .unwrap();
    let before = inv.entities().get_entity(&admin, id).unwrap();

    let changed = inv
        .entities()
        .edit_entity(&admin, id, fields(&[("name", "bolt".into())]))
        .unwrap();
    assert_eq!(changed, 0);
    assert_eq!(count(&inv, "SELECT COUNT(*) FROM iv_inventory_transactions"), 1);
    assert_eq!(inv.entities().get_entity(&admin, id).unwrap(), before);
}

#[test]
fn test_create_with_only_nulls_logs_row_marker() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("note", ColumnType::Text));
    let id = inv.entities().create_entity(&admin, Vec::new()).unwrap();

    let history: Vec<_> = inv
        .entities()
        .entity_history(&admin, id)
        .unwrap()
        .map(|tx| tx.unwrap())
        .collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, EntityAction::Create);
    assert_eq!(history[0].field, None);
    assert_eq!(history[0].schema_id, None);
}

#[test]
fn test_defaults_fill_unspecified_columns() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("qty", ColumnType::Int).with_default("1"));
    add(&inv, &admin, ColumnDefinition::new("stocked", ColumnType::Text).with_default(CURRENT_TIMESTAMP));

    let id = inv.entities().create_entity(&admin, Vec::new()).unwrap();
    let entity = inv.entities().get_entity(&admin, id).unwrap();
    assert_eq!(entity.get("qty"), Some(&FieldValue::Integer(1)));
    assert_eq!(entity.get("stocked"), Some(&FieldValue::Text(entity.created_at.clone())));
    assert_eq!(count(&inv, "SELECT COUNT(*) FROM iv_inventory_transactions"), 2);
}

#[test]
fn test_value_validation() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("qty", ColumnType::Int).with_range(Some(0.0), Some(100.0)));
    add(&inv, &admin, ColumnDefinition::new("code", ColumnType::Varchar).with_length(Some(2), Some(4)).unique());

    let cases = [
        fields(&[("qty", "many".into())]),
        fields(&[("qty", 101i64.into())]),
        fields(&[("code", "A".into())]),
        fields(&[("code", "ABCDE".into())]),
    ];
    for case in cases {
        let err = inv.entities().create_entity(&admin, case).unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { .. }), "{err}");
    }

    let err = inv
        .entities()
        .create_entity(&admin, fields(&[("colour", "red".into())]))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownColumn(c) if c == "colour"));

    let first = inv
        .entities()
        .create_entity(&admin, fields(&[("code", "AB".into())]))
        .unwrap();
    let err = inv
        .entities()
        .create_entity(&admin, fields(&[("code", "AB".into())]))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidValue { ref column, .. } if column == "code"));

    // A soft-deleted holder frees the value.
    inv.entities().soft_delete_entity(&admin, first).unwrap();
    inv.entities()
        .create_entity(&admin, fields(&[("code", "AB".into())]))
        .unwrap();
    assert_eq!(count(&inv, "SELECT COUNT(*) FROM iv_inventory"), 2);
}

#[test]
fn test_double_soft_delete() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    let id = inv
        .entities()
        .create_entity(&admin, fields(&[("name", "bolt".into())]))
        .unwrap();

    inv.entities().soft_delete_entity(&admin, id).unwrap();
    let err = inv.entities().soft_delete_entity(&admin, id).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(n) if n == id));

    let deletes: Vec<_> = inv
        .entities()
        .entity_history(&admin, id)
        .unwrap()
        .map(|tx| tx.unwrap())
        .filter(|tx| tx.action == EntityAction::Delete)
        .collect();
    assert_eq!(deletes.len(), 1);

    let entity = inv.entities().get_entity(&admin, id).unwrap();
    assert!(entity.is_deleted());
    assert_eq!(deletes[0].to_val, entity.deleted_at);

    let err = inv
        .entities()
        .edit_entity(&admin, id, fields(&[("name", "nut".into())]))
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn test_listing_hides_deleted_unless_asked() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    let ids: Vec<i64> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|n| {
            inv.entities()
                .create_entity(&admin, fields(&[("name", (*n).into())]))
                .unwrap()
        })
        .collect();
    inv.entities().soft_delete_entity(&admin, ids[1]).unwrap();
    inv.entities().soft_delete_entity(&admin, ids[3]).unwrap();

    let live: Vec<i64> = inv
        .entities()
        .list_entities(&admin, EntityQuery::default())
        .unwrap()
        .map(|e| e.unwrap().id)
        .collect();
    assert_eq!(live, vec![ids[0], ids[2], ids[4]]);

    let all: Vec<i64> = inv
        .entities()
        .list_entities(
            &admin,
            EntityQuery {
                include_deleted: true,
                ..EntityQuery::default()
            },
        )
        .unwrap()
        .map(|e| e.unwrap().id)
        .collect();
    assert_eq!(all, ids);
}

#[test]
fn test_raw_filter_and_limit() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    add(&inv, &admin, ColumnDefinition::new("qty", ColumnType::Int));
    for (name, qty) in [("bolt", 3i64), ("nut", 30), ("washer", 300), ("screw", 3000)] {
        inv.entities()
            .create_entity(&admin, fields(&[("name", name.into()), ("qty", qty.into())]))
            .unwrap();
    }

    let query = EntityQuery {
        filter: Some(RawFilter::new("qty > ?1 AND name <> ?2", vec![10i64.into(), "washer".into()])),
        ..EntityQuery::default()
    };
    let names: Vec<FieldValue> = inv
        .entities()
        .list_entities(&admin, query)
        .unwrap()
        .map(|e| e.unwrap().get("name").cloned().unwrap())
        .collect();
    assert_eq!(names, vec![FieldValue::from("nut"), FieldValue::from("screw")]);

    let query = EntityQuery {
        filter: Some(RawFilter::new("qty >= ?", vec![3i64.into()])),
        limit: Some(3),
        ..EntityQuery::default()
    };
    assert_eq!(inv.entities().list_entities(&admin, query).unwrap().count(), 3);

    // Injection attempts stay bound as data.
    let query = EntityQuery {
        filter: Some(RawFilter::new("name = ?", vec!["bolt' OR '1'='1".into()])),
        ..EntityQuery::default()
    };
    assert_eq!(inv.entities().list_entities(&admin, query).unwrap().count(), 0);

    let query = EntityQuery {
        filter: Some(RawFilter::new("qty > ? AND qty < ?", vec![1i64.into()])),
        ..EntityQuery::default()
    };
    let err = inv.entities().list_entities(&admin, query).err().unwrap();
    assert!(matches!(err, StoreError::InvalidInput(_)));
}

#[test]
fn test_get_and_history_of_missing_entity() {
    let (inv, admin) = setup();
    assert!(matches!(
        inv.entities().get_entity(&admin, 42).unwrap_err(),
        StoreError::NotFound(42)
    ));
    assert!(matches!(
        inv.entities().entity_history(&admin, 42).err().unwrap(),
        StoreError::NotFound(42)
    ));
}

// ============================================================================
// Atomicity
// ============================================================================

#[test]
fn test_failed_log_append_rolls_back_entity() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    let id = inv
        .entities()
        .create_entity(&admin, fields(&[("name", "bolt".into())]))
        .unwrap();
    let events_before = count(&inv, "SELECT COUNT(*) FROM iv_events");

    inv.connection()
        .execute_batch(
            "CREATE TRIGGER fail_log BEFORE INSERT ON iv_inventory_transactions
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
        )
        .unwrap();

    assert!(
        inv.entities()
            .create_entity(&admin, fields(&[("name", "nut".into())]))
            .is_err()
    );
    assert!(
        inv.entities()
            .edit_entity(&admin, id, fields(&[("name", "screw".into())]))
            .is_err()
    );
    assert!(inv.entities().soft_delete_entity(&admin, id).is_err());

    assert_eq!(count(&inv, "SELECT COUNT(*) FROM iv_inventory"), 1);
    assert_eq!(count(&inv, "SELECT COUNT(*) FROM iv_events"), events_before);
    let entity = inv.entities().get_entity(&admin, id).unwrap();
    assert_eq!(entity.get("name"), Some(&FieldValue::from("bolt")));
    assert!(!entity.is_deleted());

    inv.connection().execute_batch("DROP TRIGGER fail_log;").unwrap();
    inv.verify_integrity().unwrap();
}

#[test]
fn test_failed_schema_log_append_rolls_back_column() {
    let (inv, admin) = setup();
    inv.connection()
        .execute_batch(
            "CREATE TRIGGER fail_schema BEFORE INSERT ON iv_schema_transactions
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
        )
        .unwrap();

    let result = inv
        .registry()
        .apply_schema_change(&admin, SchemaChange::Add(ColumnDefinition::new("weight", ColumnType::Real)));
    assert!(matches!(result, Err(StoreError::Storage(_))));
    assert!(column_names(&inv).is_empty());
    assert_eq!(
        count(&inv, "SELECT COUNT(*) FROM pragma_table_info('iv_inventory') WHERE name = 'weight'"),
        0
    );
}

// ============================================================================
// Identity, sessions and permissions
// ============================================================================

#[test]
fn test_first_user_is_admin_and_later_users_are_guests() {
    let (inv, admin) = setup();
    assert_eq!(admin.role, "admin");
    assert!(admin.authorize("anything.at.all"));

    inv.identity().register("bob", "bob-pw").unwrap();
    let bob = login(&inv, "bob", "bob-pw");
    assert_eq!(bob.role, "guest");
    assert!(bob.permissions.is_empty());

    let err = inv.identity().register("bob", "other").unwrap_err();
    assert!(matches!(err, StoreError::DuplicateUsername(_)));
}

#[test]
fn test_denied_caller_never_learns_whether_target_exists() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    inv.identity().register("bob", "bob-pw").unwrap();
    let bob = login(&inv, "bob", "bob-pw");

    let missing = inv.entities().get_entity(&bob, 999).unwrap_err();
    assert!(matches!(missing, StoreError::PermissionDenied(ref p) if p == INVENTORY_READ));
    let err = inv
        .entities()
        .create_entity(&bob, fields(&[("name", "bolt".into())]))
        .unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied(_)));
    let err = inv
        .registry()
        .apply_schema_change(&bob, SchemaChange::Remove("name".into()))
        .unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied(_)));
    assert!(matches!(inv.events().list_events(&bob, None).err().unwrap(), StoreError::PermissionDenied(_)));
}

#[test]
fn test_grant_and_revoke_permission() {
    let (inv, admin) = setup();
    inv.identity().register("bob", "bob-pw").unwrap();

    assert!(inv.identity().grant_permission(&admin, "guest", INVENTORY_READ).unwrap());
    assert!(!inv.identity().grant_permission(&admin, "guest", INVENTORY_READ).unwrap());
    let bob = login(&inv, "bob", "bob-pw");
    assert!(inv.entities().list_entities(&bob, EntityQuery::default()).is_ok());

    assert!(inv.identity().revoke_permission(&admin, "guest", INVENTORY_READ).unwrap());
    let bob = login(&inv, "bob", "bob-pw");
    assert!(inv.entities().list_entities(&bob, EntityQuery::default()).is_err());

    let err = inv
        .identity()
        .grant_permission(&admin, "auditors", INVENTORY_READ)
        .unwrap_err();
    assert!(matches!(err, StoreError::RoleNotFound(_)));

    let grants = inv
        .events()
        .list_events(&admin, Some(EventAction::PermissionGrant))
        .unwrap()
        .count();
    assert_eq!(grants, 1);
}

#[test]
fn test_wrong_password_and_unknown_user_look_alike() {
    let (inv, _) = setup();
    let wrong = inv.identity().authenticate("admin", "nope").unwrap_err();
    let unknown = inv.identity().authenticate("nobody", "nope").unwrap_err();
    assert!(matches!(wrong, StoreError::InvalidCredentials));
    assert!(matches!(unknown, StoreError::InvalidCredentials));
    assert_eq!(wrong.to_string(), unknown.to_string());
}

#[test]
fn test_session_expiry_revocation_and_purge() {
    let (inv, _) = setup();
    let session = inv.identity().authenticate("admin", "admin-pw").unwrap();
    inv.sessions().validate_session(&session.token).unwrap();

    inv.connection()
        .execute("UPDATE iv_sessions SET valid_until = '2000-01-01 00:00:00.000'", [])
        .unwrap();
    assert!(matches!(
        inv.sessions().validate_session(&session.token).unwrap_err(),
        StoreError::SessionExpired
    ));
    assert!(inv.sessions().purge_expired_sessions().unwrap() >= 1);

    let session = inv.identity().authenticate("admin", "admin-pw").unwrap();
    inv.sessions().revoke_session(&session.token).unwrap();
    inv.sessions().revoke_session(&session.token).unwrap();
    assert!(matches!(
        inv.sessions().validate_session(&session.token).unwrap_err(),
        StoreError::SessionExpired
    ));
    assert!(matches!(
        inv.sessions().validate_session("not-a-token").unwrap_err(),
        StoreError::SessionExpired
    ));
}

#[test]
fn test_session_ttl_setting() {
    let (inv, admin) = setup();
    inv.settings().set_setting(&admin, SESSION_TTL_SECS, "60").unwrap();
    let session = inv.identity().authenticate("admin", "admin-pw").unwrap();
    let stored: String = inv
        .connection()
        .query_row(
            "SELECT strftime('%s', valid_until) - strftime('%s', created_at) FROM iv_sessions
             ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get::<_, i64>(0).map(|s| s.to_string()),
        )
        .unwrap();
    assert_eq!(stored, "60");
    assert!(!session.valid_until.is_empty());

    let err = inv.settings().set_setting(&admin, SESSION_TTL_SECS, "0").unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));
}

#[test]
fn test_deactivated_user_is_locked_out() {
    let (inv, admin) = setup();
    inv.identity().register("bob", "bob-pw").unwrap();
    let session = inv.identity().authenticate("bob", "bob-pw").unwrap();

    inv.identity().deactivate_user(&admin, "bob").unwrap();
    assert!(matches!(
        inv.sessions().validate_session(&session.token).unwrap_err(),
        StoreError::SessionExpired
    ));
    assert!(matches!(
        inv.identity().authenticate("bob", "bob-pw").unwrap_err(),
        StoreError::InvalidCredentials
    ));
    assert!(matches!(
        inv.identity().deactivate_user(&admin, "bob").unwrap_err(),
        StoreError::UserNotFound(_)
    ));

    let users = inv.identity().list_users(&admin).unwrap();
    let bob = users.iter().find(|u| u.username == "bob").unwrap();
    assert!(bob.deleted_at.is_some());
}

#[test]
fn test_stale_or_altered_principal_cannot_write() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    inv.identity().register("bob", "bob-pw").unwrap();
    let mut bob = login(&inv, "bob", "bob-pw");

    bob.permissions = ["*"].into_iter().collect();
    let err = inv
        .entities()
        .create_entity(&bob, fields(&[("name", "bolt".into())]))
        .unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied(ref p) if p == INVENTORY_WRITE));
    let err = inv.identity().grant_permission(&bob, "guest", "*").unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied(_)));

    inv.identity().grant_permission(&admin, "guest", INVENTORY_WRITE).unwrap();
    let bob = login(&inv, "bob", "bob-pw");
    inv.entities()
        .create_entity(&bob, fields(&[("name", "bolt".into())]))
        .unwrap();

    inv.identity().deactivate_user(&admin, "bob").unwrap();
    let err = inv
        .entities()
        .create_entity(&bob, fields(&[("name", "nut".into())]))
        .unwrap_err();
    assert!(matches!(err, StoreError::SessionExpired));
    assert!(matches!(
        inv.identity().change_password(&bob, "bob-pw", "new-pw").unwrap_err(),
        StoreError::SessionExpired
    ));
    assert_eq!(count(&inv, "SELECT COUNT(*) FROM iv_inventory"), 1);
}

#[test]
fn test_change_password() {
    let (inv, admin) = setup();
    let err = inv.identity().change_password(&admin, "wrong", "new-pw").unwrap_err();
    assert!(matches!(err, StoreError::InvalidCredentials));

    inv.identity().change_password(&admin, "admin-pw", "new-pw").unwrap();
    assert!(inv.identity().authenticate("admin", "admin-pw").is_err());
    inv.identity().authenticate("admin", "new-pw").unwrap();
}

#[test]
fn test_registration_can_be_closed() {
    let (inv, admin) = setup();
    inv.settings().set_setting(&admin, ALLOW_REGISTRATION, "false").unwrap();
    assert!(matches!(
        inv.identity().register("eve", "eve-pw").unwrap_err(),
        StoreError::RegistrationDisabled
    ));

    let setting = inv.settings().get_setting(ALLOW_REGISTRATION).unwrap().unwrap();
    assert_eq!(setting.value, "false");
    let reasons: Vec<Option<String>> = inv
        .events()
        .list_events(&admin, Some(EventAction::ConfigSet))
        .unwrap()
        .map(|e| e.unwrap().reason)
        .collect();
    assert_eq!(reasons, vec![Some("allow_registration=false".to_string())]);
}

// ============================================================================
// Events, integrity and persistence
// ============================================================================

#[test]
fn test_events_track_lifecycle() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    let id = inv
        .entities()
        .create_entity(&admin, fields(&[("name", "bolt".into())]))
        .unwrap();
    inv.entities().soft_delete_entity(&admin, id).unwrap();

    let actions: Vec<Option<EventAction>> = inv
        .events()
        .list_events(&admin, None)
        .unwrap()
        .map(|e| e.unwrap().action())
        .collect();
    assert_eq!(
        actions,
        vec![
            Some(EventAction::UserRegister),
            Some(EventAction::UserLogin),
            Some(EventAction::SchemaAdd),
            Some(EventAction::InventoryCreate),
            Some(EventAction::InventoryDelete),
        ]
    );

    let deletes: Vec<_> = inv
        .events()
        .list_events(&admin, Some(EventAction::InventoryDelete))
        .unwrap()
        .map(|e| e.unwrap())
        .collect();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].target, Some(id));
    assert_eq!(deletes[0].dispatcher, Some(admin.user_id));
}

#[test]
fn test_verify_integrity_detects_tampering() {
    let (inv, admin) = setup();
    add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
    add(&inv, &admin, ColumnDefinition::new("qty", ColumnType::Int));
    for name in ["bolt", "nut", "washer"] {
        inv.entities()
            .create_entity(&admin, fields(&[("name", name.into()), ("qty", 1i64.into())]))
            .unwrap();
    }
    inv.entities()
        .edit_entity(&admin, 2, fields(&[("qty", 7i64.into())]))
        .unwrap();
    inv.entities().soft_delete_entity(&admin, 3).unwrap();

    let report = inv.verify_integrity().unwrap();
    assert_eq!(report.columns_checked, 2);
    assert_eq!(report.entities_checked, 3);
    assert_eq!(report.transactions_checked, 2 + 6 + 1 + 1);

    inv.connection()
        .execute("UPDATE iv_inventory SET name = 'nail' WHERE id = 1", [])
        .unwrap();
    assert!(matches!(inv.verify_integrity().unwrap_err(), StoreError::StorageCorrupt(_)));

    inv.connection()
        .execute("UPDATE iv_inventory SET name = 'bolt' WHERE id = 1", [])
        .unwrap();
    inv.connection()
        .execute("UPDATE iv_inventory SET deleted_at = NULL WHERE id = 3", [])
        .unwrap();
    assert!(matches!(inv.verify_integrity().unwrap_err(), StoreError::StorageCorrupt(_)));
}

#[test]
fn test_file_backed_inventory_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.db");

    {
        let (inv, admin) = {
            let inv = Inventory::open(&path, options()).unwrap();
            inv.identity().register("admin", "admin-pw").unwrap();
            let admin = login(&inv, "admin", "admin-pw");
            (inv, admin)
        };
        add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
        inv.entities()
            .create_entity(&admin, fields(&[("name", "bolt".into())]))
            .unwrap();
    }

    let inv = Inventory::open(&path, options()).unwrap();
    let admin = login(&inv, "admin", "admin-pw");
    assert_eq!(column_names(&inv), vec!["name"]);
    let listed: Vec<_> = inv
        .entities()
        .list_entities(&admin, EntityQuery::default())
        .unwrap()
        .map(|e| e.unwrap())
        .collect();
    assert_eq!(listed.len(), 1);
    inv.verify_integrity().unwrap();
}

#[test]
fn test_prefixes_isolate_inventories() {
    let conn = Connection::open_in_memory().unwrap();
    let mut migration = Migration::new(conn, "a_").unwrap();
    migration.up().unwrap();
    let inv_a = Inventory::from_connection(migration.into_connection(), StoreOptions {
        prefix: "a_".into(),
        ..options()
    })
    .unwrap();
    inv_a.identity().register("admin", "pw").unwrap();

    let conn = Connection::open_in_memory().unwrap();
    let inv_b = Inventory::from_connection(conn, options()).unwrap();
    assert!(inv_b.identity().authenticate("admin", "pw").is_err());

    let err = Inventory::open_in_memory(StoreOptions {
        prefix: "bad-prefix".into(),
        ..options()
    })
    .err()
    .unwrap();
    assert!(matches!(err, StoreError::InvalidPrefix(_)));
}

#[test]
fn test_migration_status_counts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.db");
    {
        let inv = Inventory::open(&path, options()).unwrap();
        inv.identity().register("admin", "admin-pw").unwrap();
        let admin = login(&inv, "admin", "admin-pw");
        add(&inv, &admin, ColumnDefinition::new("name", ColumnType::Text));
        add(&inv, &admin, ColumnDefinition::new("tmp", ColumnType::Text));
        inv.registry()
            .apply_schema_change(&admin, SchemaChange::Remove("tmp".into()))
            .unwrap();
        let id = inv
            .entities()
            .create_entity(&admin, fields(&[("name", "bolt".into())]))
            .unwrap();
        inv.entities()
            .create_entity(&admin, fields(&[("name", "nut".into())]))
            .unwrap();
        inv.entities().soft_delete_entity(&admin, id).unwrap();
    }

    let mut migration = Migration::new(Connection::open(&path).unwrap(), "iv_").unwrap();
    let status = migration.status().unwrap();
    assert!(status.tables_exist);
    assert_eq!(status.user_count, 1);
    assert_eq!(status.column_count, 1);
    assert_eq!(status.entity_count, 1);
    assert_eq!(status.schema_transaction_count, 3);
    assert_eq!(status.inventory_transaction_count, 3);

    migration.down().unwrap();
    assert_eq!(migration.status().unwrap(), Default::default());

    let fresh = Migration::new(Connection::open_in_memory().unwrap(), "iv_").unwrap();
    assert!(!fresh.status().unwrap().tables_exist);
}
