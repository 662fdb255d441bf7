//! Model lifecycle, hooks, scopes and transactions against in-memory DuckDB.

mod common;

use chronicle_db::{
    AmbientTransactions, BulkOptions, DataType, Database, DbError, DbValue, FieldDefinition,
    Filter, FindOptions, HookKind, ModelDefinition, Order, Record, WriteOptions,
};
use common::{define_task, init_test_logging};
use std::cell::RefCell;
use std::rc::Rc;

fn task(title: &str) -> Record {
    Record::new().with("title", title)
}

fn record_hooks(model: &chronicle_db::Model) -> Rc<RefCell<Vec<String>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    for kind in HookKind::ALL {
        let log = Rc::clone(&log);
        model.add_hook(kind, move |ctx| {
            log.borrow_mut()
                .push(format!("{}:{}", ctx.kind, ctx.instances.len()));
            Ok(())
        });
    }
    log
}

// ============================================================================
// Create / update / destroy
// ============================================================================

#[test]
fn test_create_assigns_ids_and_defaults() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);

    let first = tasks.create(task("write"), WriteOptions::new()).unwrap();
    let second = tasks.create(task("read"), WriteOptions::new()).unwrap();

    assert_eq!(first.get_as::<i64>("id").unwrap(), 1);
    assert_eq!(second.get_as::<i64>("id").unwrap(), 2);
    assert_eq!(first.get_as::<String>("status").unwrap(), "open");
    assert_eq!(first.get("points"), Some(DbValue::Null));
    assert_eq!(first.primary_key(), Record::new().with("id", 1_i64));
}

#[test]
fn test_create_ignores_unknown_fields() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);

    let created = tasks
        .create(task("write").with("nonexistent", 5_i64), WriteOptions::new())
        .unwrap();
    assert!(created.get_raw("nonexistent").is_none());
}

#[test]
fn test_single_row_hooks_fire_in_order() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);
    let log = record_hooks(&tasks);

    let created = tasks.create(task("write"), WriteOptions::new()).unwrap();
    let updated = created
        .update(Record::new().with("points", 3_i64), WriteOptions::new())
        .unwrap();
    updated.destroy(WriteOptions::new()).unwrap();

    assert_eq!(
        *log.borrow(),
        vec![
            "after_create:1",
            "after_save:1",
            "after_update:1",
            "after_save:1",
            "after_destroy:1",
        ]
    );
    assert_eq!(tasks.count(FindOptions::new()).unwrap(), 0);
}

#[test]
fn test_update_returns_refreshed_instance() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);

    let created = tasks.create(task("write"), WriteOptions::new()).unwrap();
    let updated = created
        .update(
            Record::new().with("title", "rewrite").with("status", "done"),
            WriteOptions::new(),
        )
        .unwrap();

    assert_eq!(updated.get_as::<String>("title").unwrap(), "rewrite");
    assert_eq!(updated.get_as::<String>("status").unwrap(), "done");
    assert_eq!(updated.get_as::<i64>("id").unwrap(), 1);

    let stored = tasks
        .find_one(FindOptions::new().where_eq("id", 1_i64))
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_as::<String>("title").unwrap(), "rewrite");
}

#[test]
fn test_update_without_known_changes_is_noop() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);
    let log = record_hooks(&tasks);

    let created = tasks.create(task("write"), WriteOptions::new()).unwrap();
    log.borrow_mut().clear();

    let same = created
        .update(Record::new().with("unknown", 1_i64), WriteOptions::new())
        .unwrap();
    assert_eq!(same.values(), created.values());
    assert!(log.borrow().is_empty());
}

#[test]
fn test_destroy_missing_row_is_not_found() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);

    let created = tasks.create(task("write"), WriteOptions::new()).unwrap();
    created.destroy(WriteOptions::new()).unwrap();

    let err = created.destroy(WriteOptions::new()).unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)));
}

// ============================================================================
// Bulk operations
// ============================================================================

#[test]
fn test_bulk_create_fires_one_bulk_hook() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);
    let log = record_hooks(&tasks);

    let created = tasks
        .bulk_create(vec![task("a"), task("b"), task("c")], WriteOptions::new())
        .unwrap();

    assert_eq!(created.len(), 3);
    let ids: Vec<i64> = created
        .iter()
        .map(|i| i.get_as::<i64>("id").unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(*log.borrow(), vec!["after_bulk_create:3"]);
}

#[test]
fn test_bulk_update_without_individual_hooks() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);
    tasks
        .bulk_create(vec![task("a"), task("b"), task("c")], WriteOptions::new())
        .unwrap();
    let log = record_hooks(&tasks);

    let affected = tasks
        .bulk_update(
            Record::new().with("status", "done"),
            BulkOptions::new(Filter::new().eq("status", "open")),
        )
        .unwrap();

    assert_eq!(affected, 3);
    assert_eq!(*log.borrow(), vec!["after_bulk_update:0"]);
    assert_eq!(
        tasks
            .count(FindOptions::new().where_eq("status", "done"))
            .unwrap(),
        3
    );
}

#[test]
fn test_bulk_update_with_individual_hooks() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);
    tasks
        .bulk_create(vec![task("a"), task("b"), task("c")], WriteOptions::new())
        .unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        tasks.add_hook(HookKind::AfterUpdate, move |ctx| {
            for instance in ctx.instances {
                seen.borrow_mut()
                    .push(instance.get_as::<String>("status").unwrap());
            }
            Ok(())
        });
    }

    let affected = tasks
        .bulk_update(
            Record::new().with("status", "done"),
            BulkOptions::new(Filter::new().eq("title", "b")).individual_hooks(),
        )
        .unwrap();

    assert_eq!(affected, 1);
    assert_eq!(*seen.borrow(), vec!["done".to_string()]);
}

#[test]
fn test_bulk_destroy_with_individual_hooks() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);
    tasks
        .bulk_create(vec![task("a"), task("b"), task("c")], WriteOptions::new())
        .unwrap();
    let log = record_hooks(&tasks);

    let affected = tasks
        .bulk_destroy(BulkOptions::new(Filter::new()).individual_hooks())
        .unwrap();

    assert_eq!(affected, 3);
    assert_eq!(
        *log.borrow(),
        vec![
            "after_destroy:1",
            "after_destroy:1",
            "after_destroy:1",
            "after_bulk_destroy:0",
        ]
    );
}

#[test]
fn test_upsert_inserts_then_updates() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);
    let log = record_hooks(&tasks);

    tasks
        .upsert(task("first").with("id", 10_i64), WriteOptions::new())
        .unwrap();
    tasks
        .upsert(task("second").with("id", 10_i64), WriteOptions::new())
        .unwrap();

    let rows = tasks.find_all(FindOptions::new()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_as::<String>("title").unwrap(), "second");
    assert_eq!(*log.borrow(), vec!["after_upsert:0", "after_upsert:0"]);
}

#[test]
fn test_upsert_requires_primary_key_value() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);

    let err = tasks.upsert(task("no id"), WriteOptions::new()).unwrap_err();
    assert!(matches!(err, DbError::InvalidInput(_)));
}

// ============================================================================
// Queries and scopes
// ============================================================================

#[test]
fn test_find_all_orders_by_primary_key_by_default() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);
    tasks
        .bulk_create(vec![task("c"), task("a"), task("b")], WriteOptions::new())
        .unwrap();

    let by_id: Vec<String> = tasks
        .find_all(FindOptions::new())
        .unwrap()
        .iter()
        .map(|i| i.get_as::<String>("title").unwrap())
        .collect();
    assert_eq!(by_id, vec!["c", "a", "b"]);

    let by_title: Vec<String> = tasks
        .find_all(FindOptions::new().order_by(Order::desc("title")).limit(2))
        .unwrap()
        .iter()
        .map(|i| i.get_as::<String>("title").unwrap())
        .collect();
    assert_eq!(by_title, vec!["c", "b"]);
}

#[test]
fn test_null_filter_matches_is_null() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);
    tasks.create(task("a"), WriteOptions::new()).unwrap();
    tasks
        .create(task("b").with("points", 5_i64), WriteOptions::new())
        .unwrap();

    let unscored = tasks
        .find_all(FindOptions::new().where_eq("points", DbValue::Null))
        .unwrap();
    assert_eq!(unscored.len(), 1);
    assert_eq!(unscored[0].get_as::<String>("title").unwrap(), "a");
}

#[test]
fn test_unknown_filter_field_is_rejected() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);

    let err = tasks
        .find_all(FindOptions::new().where_eq("missing", 1_i64))
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput(_)));
}

#[test]
fn test_scope_composes_with_caller_filter() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);
    tasks
        .bulk_create(
            vec![
                task("a"),
                task("b").with("status", "done"),
                task("c").with("status", "done"),
            ],
            WriteOptions::new(),
        )
        .unwrap();
    tasks.add_scope("done", Filter::new().eq("status", "done"));

    let done = tasks.scope("done").unwrap();
    assert_eq!(done.count(FindOptions::new()).unwrap(), 2);

    let narrowed = done
        .find_all(FindOptions::new().where_eq("title", "c"))
        .unwrap();
    assert_eq!(narrowed.len(), 1);

    // Caller conditions on the scoped field win.
    let overridden = done
        .find_all(FindOptions::new().where_eq("status", "open"))
        .unwrap();
    assert_eq!(overridden.len(), 1);
    assert_eq!(overridden[0].get_as::<String>("title").unwrap(), "a");

    let first = done.find_one(FindOptions::new()).unwrap().unwrap();
    let all = done.find_all(FindOptions::new()).unwrap();
    assert_eq!(first.values(), all[0].values());
}

#[test]
fn test_unknown_scope_errors() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);

    let err = tasks.scope("archived").unwrap_err();
    assert!(matches!(err, DbError::UnknownScope { .. }));
    assert!(tasks.scope_names().is_empty());
}

// ============================================================================
// Getters, setters, timestamps
// ============================================================================

#[test]
fn test_setter_on_write_and_getter_on_read() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tags = db
        .define(
            ModelDefinition::new("tag").with_fields([
                FieldDefinition::new("id", DataType::BigInt)
                    .primary_key()
                    .auto_increment(),
                FieldDefinition::new("label", DataType::Text)
                    .setter(|v| match v {
                        DbValue::Text(s) => DbValue::Text(s.to_lowercase()),
                        other => other.clone(),
                    })
                    .getter(|v| match v {
                        DbValue::Text(s) => DbValue::Text(format!("#{}", s)),
                        other => other.clone(),
                    }),
            ]),
        )
        .unwrap();
    tags.sync(false).unwrap();

    let tag = tags
        .create(Record::new().with("label", "Rust"), WriteOptions::new())
        .unwrap();
    assert_eq!(tag.get_raw("label"), Some(&DbValue::from("rust")));
    assert_eq!(tag.get("label"), Some(DbValue::from("#rust")));
    assert_eq!(tag.to_json()["label"], "#rust");

    let raw = tags
        .create(Record::new().with("label", "Raw"), WriteOptions::new().raw())
        .unwrap();
    assert_eq!(raw.get_raw("label"), Some(&DbValue::from("Raw")));
}

#[test]
fn test_timestamps_are_maintained() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let notes = db
        .define(
            ModelDefinition::new("note")
                .with_timestamps(true)
                .with_fields([
                    FieldDefinition::new("id", DataType::BigInt)
                        .primary_key()
                        .auto_increment(),
                    FieldDefinition::new("body", DataType::Text),
                ]),
        )
        .unwrap();
    notes.sync(false).unwrap();
    assert!(notes.field("created_at").is_some());
    assert!(notes.field("updated_at").is_some());

    let note = notes
        .create(Record::new().with("body", "draft"), WriteOptions::new())
        .unwrap();
    let created_at = note
        .get_as::<chronicle_db::DbTimestamp>("created_at")
        .unwrap();

    let edited = note
        .update(Record::new().with("body", "final"), WriteOptions::new())
        .unwrap();
    let updated_at = edited
        .get_as::<chronicle_db::DbTimestamp>("updated_at")
        .unwrap();
    assert_eq!(
        edited
            .get_as::<chronicle_db::DbTimestamp>("created_at")
            .unwrap(),
        created_at
    );
    assert!(updated_at >= created_at);
}

#[test]
fn test_duplicate_field_names_rejected() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let err = db
        .define(
            ModelDefinition::new("dup")
                .with_field(FieldDefinition::new("a", DataType::Text))
                .with_field(FieldDefinition::new("a", DataType::Integer)),
        )
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput(_)));
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn test_hook_error_rolls_back_enclosing_transaction() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);
    tasks.add_hook(HookKind::AfterCreate, |_| Err("rejected".into()));

    let result: Result<(), DbError> = db.transaction(|tx| {
        tasks.create(task("doomed"), WriteOptions::new().transaction(tx))?;
        Ok(())
    });

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        DbError::Hook {
            hook: HookKind::AfterCreate,
            ..
        }
    ));
    assert_eq!(tasks.count(FindOptions::new()).unwrap(), 0);
}

#[test]
fn test_uncommitted_rows_visible_only_inside_transaction() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);

    let tx = db.begin().unwrap();
    tasks
        .create(task("pending"), WriteOptions::new().transaction(&tx))
        .unwrap();
    assert_eq!(
        tasks.count(FindOptions::new().transaction(&tx)).unwrap(),
        1
    );
    assert_eq!(tasks.count(FindOptions::new()).unwrap(), 0);
    tx.commit().unwrap();

    assert_eq!(tasks.count(FindOptions::new()).unwrap(), 1);
}

#[test]
fn test_ambient_transaction_is_joined() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let ambient = AmbientTransactions::new();
    db.use_namespace(Rc::new(ambient.clone()));
    let tasks = define_task(&db);

    let seen_tx = Rc::new(RefCell::new(None));
    {
        let seen_tx = Rc::clone(&seen_tx);
        tasks.add_hook(HookKind::AfterCreate, move |ctx| {
            *seen_tx.borrow_mut() = ctx.transaction.map(|tx| tx.id());
            Ok(())
        });
    }

    let result: Result<(), DbError> = db.transaction(|tx| {
        assert_eq!(ambient.depth(), 1);
        tasks.create(task("implicit"), WriteOptions::new())?;
        assert_eq!(*seen_tx.borrow(), Some(tx.id()));
        Err(DbError::invalid_state("abort"))
    });

    assert!(result.is_err());
    assert_eq!(ambient.depth(), 0);
    assert_eq!(tasks.count(FindOptions::new()).unwrap(), 0);
}

#[test]
fn test_transaction_from_other_database_rejected() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();
    let other = Database::open_in_memory().unwrap();
    let tasks = define_task(&db);

    let foreign = other.begin().unwrap();
    let err = tasks
        .create(task("x"), WriteOptions::new().transaction(&foreign))
        .unwrap_err();
    assert!(matches!(err, DbError::ForeignTransaction { .. }));
    foreign.rollback().unwrap();
}

#[test]
fn test_file_backed_database_persists_rows() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("tasks.duckdb");

    {
        let db = Database::open(&path).unwrap();
        let tasks = define_task(&db);
        tasks.create(task("kept"), WriteOptions::new()).unwrap();
    }

    let db = Database::open(&path).unwrap();
    let tasks = db
        .define(
            ModelDefinition::new("task").with_fields([
                FieldDefinition::new("id", DataType::BigInt)
                    .primary_key()
                    .auto_increment(),
                FieldDefinition::new("title", DataType::Text),
                FieldDefinition::new("status", DataType::Text),
                FieldDefinition::new("points", DataType::Integer),
            ]),
        )
        .unwrap();
    let rows = tasks.find_all(FindOptions::new()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_as::<String>("title").unwrap(), "kept");
}

// ============================================================================
// Column conversion
// ============================================================================

#[test]
fn test_unsigned_bigint_converts_when_in_range() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();

    let row = db
        .query_one("SELECT CAST(42 AS UBIGINT)", &[])
        .unwrap();
    assert_eq!(row.get_raw(0), Some(&DbValue::Integer(42)));
}

#[test]
fn test_unsigned_bigint_out_of_range_is_rejected() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();

    let err = db
        .query_one("SELECT CAST(18446744073709551615 AS UBIGINT)", &[])
        .unwrap_err();
    assert!(matches!(err, DbError::TypeConversion(_)));
}

#[test]
fn test_second_precision_timestamps_convert() {
    init_test_logging();
    let db = Database::open_in_memory().unwrap();

    let row = db
        .query_one("SELECT CAST(TIMESTAMP '2024-01-02 03:04:05' AS TIMESTAMP_S)", &[])
        .unwrap();
    match row.get_raw(0) {
        Some(DbValue::Timestamp(ts)) => assert_eq!(ts.to_rfc3339(), "2024-01-02T03:04:05+00:00"),
        other => panic!("expected timestamp, got {:?}", other),
    }
}
