//! End-to-end tests through the public ORM surface: registration,
//! dual-store CRUD, deferred batching, sharding and schema upgrades.

use std::sync::Arc;
use std::time::Duration;

use tandem_core::query::build_insert;
use tandem_core::{
    BackendKind, Condition, Context, FacetKind, FieldDef, FieldType, Filter, MemoryDriver,
    ModelDef, Order, Orm, Row, Settings, StoreDriver, TandemError, Value,
};

fn test_settings() -> Settings {
    Settings {
        flush: tandem_core::FlushStrategy::Interval(Duration::from_secs(3600)),
        ..Settings::default()
    }
}

fn item_model(durable: BackendKind) -> ModelDef {
    ModelDef::new("Item")
        .field(FieldDef::new("id", FieldType::Number).primary().auto_increment())
        .field(FieldDef::new("item_id", FieldType::Number))
        .field(FieldDef::new("money", FieldType::Number).default_value(Value::Int(0)))
        .field(FieldDef::new("name", FieldType::String))
        .durable(durable, "item", "main")
        .build()
        .unwrap()
}

fn orm_with_driver(durable: BackendKind) -> (Orm, Arc<MemoryDriver>) {
    let context = Context::new(test_settings()).unwrap();
    let driver = Arc::new(MemoryDriver::new("main"));
    context.register_driver(driver.clone());
    let orm = Orm::new(context);
    orm.register(item_model(durable)).unwrap();
    (orm, driver)
}

#[test]
fn test_create_assigns_auto_increment_and_defaults() {
    let (orm, driver) = orm_with_driver(BackendKind::Sql);

    let item = orm.record("Item").unwrap();
    item.set("item_id", 100i64).unwrap();
    orm.create(&item).unwrap();

    assert_eq!(item.get("id"), Some(Value::Int(1)));
    assert_eq!(item.get("money"), Some(Value::Int(0)));
    assert!(item.is_loaded());
    assert_eq!(driver.table_len("item"), 1);
}

#[test]
fn test_late_creates_are_batched_into_one_round_trip() {
    let (orm, driver) = orm_with_driver(BackendKind::SqlLate);

    // Explicit primary keys keep the creates deferrable.
    for i in 1..=5i64 {
        let item = orm.record("Item").unwrap();
        item.set("id", i).unwrap();
        item.set("item_id", i * 10).unwrap();
        orm.create(&item).unwrap();
    }
    assert_eq!(orm.count("Item", &[]).unwrap(), 0);

    orm.flush_all();
    assert_eq!(orm.count("Item", &[]).unwrap(), 5);

    let batches = driver.batch_log();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 5);
}

#[test]
fn test_deferred_updates_coalesce_to_final_value() {
    let (orm, driver) = orm_with_driver(BackendKind::SqlLate);

    let item = orm.record("Item").unwrap();
    item.set("item_id", 1i64).unwrap();
    orm.create(&item).unwrap(); // sync: auto key pending
    let statements_after_create = driver.statement_log().len();

    for money in [10i64, 20, 30, 40, 50] {
        item.set("money", money).unwrap();
        orm.update(&item).unwrap();
    }
    orm.flush_all();

    // Five updates, one statement.
    assert_eq!(driver.statement_log().len(), statements_after_create + 1);
    let row = orm
        .find_one("Item", &Filter::new().eq("id", item.get("id").unwrap()))
        .unwrap()
        .unwrap();
    assert_eq!(row.get("money"), Some(&Value::Int(50)));
}

#[test]
fn test_load_prefers_cache_and_backfills_on_miss() {
    let context = Context::new(test_settings()).unwrap();
    let orm = Orm::new(context.clone());
    orm.register(
        ModelDef::new("Role")
            .field(FieldDef::new("role_id", FieldType::Number).primary())
            .field(FieldDef::new("name", FieldType::String))
            .durable(BackendKind::Sql, "role", "main")
            .cache(BackendKind::Cache, "role")
            .build()
            .unwrap(),
    )
    .unwrap();

    let role = orm.record("Role").unwrap();
    role.set("role_id", 7i64).unwrap();
    role.set("name", "warrior").unwrap();
    orm.create(&role).unwrap();

    // Fresh handle: this load is served by the cache.
    let probe = orm.record("Role").unwrap();
    probe.set("role_id", 7i64).unwrap();
    assert!(orm.load(&probe).unwrap());
    assert_eq!(probe.get("name"), Some(Value::Str("warrior".to_string())));
    assert!(context.cache().stats().hits >= 1);

    // Evict, then load again: durable fallback, then backfill.
    context.cache().clear();
    let probe = orm.record("Role").unwrap();
    probe.set("role_id", 7i64).unwrap();
    assert!(orm.load(&probe).unwrap());
    let misses_after_fallback = context.cache().stats().misses;
    assert!(misses_after_fallback >= 1);

    let probe = orm.record("Role").unwrap();
    probe.set("role_id", 7i64).unwrap();
    assert!(orm.load(&probe).unwrap());
    assert_eq!(context.cache().stats().misses, misses_after_fallback);
}

#[test]
fn test_version_stamps_converge_after_load() {
    let context = Context::new(test_settings()).unwrap();
    let orm = Orm::new(context.clone());
    orm.register(
        ModelDef::new("Role")
            .field(FieldDef::new("role_id", FieldType::Number).primary())
            .field(FieldDef::new("name", FieldType::String))
            .durable(BackendKind::Sql, "role", "main")
            .cache(BackendKind::Cache, "role")
            .build()
            .unwrap(),
    )
    .unwrap();

    let role = orm.record("Role").unwrap();
    role.set("role_id", 3i64).unwrap();
    role.set("name", "mage").unwrap();
    orm.create(&role).unwrap();

    // Cache-hit path.
    let probe = orm.record("Role").unwrap();
    probe.set("role_id", 3i64).unwrap();
    assert!(orm.load(&probe).unwrap());
    assert!(!probe.is_modified(FacetKind::Durable));
    assert!(!probe.is_modified(FacetKind::Cache));
    assert_eq!(probe.facet_version(FacetKind::Durable), probe.version());
    assert_eq!(probe.facet_version(FacetKind::Cache), probe.version());

    // Durable-fallback path converges the same way.
    context.cache().clear();
    let probe = orm.record("Role").unwrap();
    probe.set("role_id", 3i64).unwrap();
    assert!(orm.load(&probe).unwrap());
    assert!(!probe.is_modified(FacetKind::Durable));
    assert!(!probe.is_modified(FacetKind::Cache));
    assert_eq!(probe.facet_version(FacetKind::Durable), probe.version());
    assert_eq!(probe.facet_version(FacetKind::Cache), probe.version());

    // Only the next field mutation re-diverges the stamps.
    probe.set("name", "archmage").unwrap();
    assert!(probe.is_modified(FacetKind::Durable));
    assert!(probe.is_modified(FacetKind::Cache));
}

#[test]
fn test_empty_connection_uses_main_partition() {
    let settings = Settings {
        main_db: "primary".to_string(),
        ..test_settings()
    };
    let context = Context::new(settings).unwrap();
    let driver = Arc::new(MemoryDriver::new("primary"));
    context.register_driver(driver.clone());
    let orm = Orm::new(context);
    orm.register(
        ModelDef::new("Note")
            .field(FieldDef::new("id", FieldType::Number).primary())
            .durable(BackendKind::Sql, "note", "")
            .build()
            .unwrap(),
    )
    .unwrap();

    let note = orm.record("Note").unwrap();
    note.set("id", 1i64).unwrap();
    orm.create(&note).unwrap();
    assert_eq!(driver.table_len("note"), 1);
}

#[test]
fn test_load_miss_leaves_record_unloaded() {
    let (orm, _driver) = orm_with_driver(BackendKind::Sql);
    let probe = orm.record("Item").unwrap();
    probe.set("id", 404i64).unwrap();
    assert!(!orm.load(&probe).unwrap());
    assert!(!probe.is_loaded());
}

#[test]
fn test_remove_clears_both_stores() {
    let context = Context::new(test_settings()).unwrap();
    let orm = Orm::new(context.clone());
    orm.register(
        ModelDef::new("Role")
            .field(FieldDef::new("role_id", FieldType::Number).primary())
            .durable(BackendKind::Sql, "role", "main")
            .cache(BackendKind::Cache, "role")
            .build()
            .unwrap(),
    )
    .unwrap();

    let role = orm.record("Role").unwrap();
    role.set("role_id", 1i64).unwrap();
    orm.create(&role).unwrap();
    orm.remove(&role).unwrap();

    assert!(!role.is_loaded());
    assert_eq!(orm.count("Role", &[]).unwrap(), 0);
    let probe = orm.record("Role").unwrap();
    probe.set("role_id", 1i64).unwrap();
    assert!(!orm.load(&probe).unwrap());
}

#[test]
fn test_find_with_filter_order_and_projection() {
    let (orm, _driver) = orm_with_driver(BackendKind::Sql);
    for (i, money) in [(1i64, 300i64), (2, 100), (3, 200)] {
        let item = orm.record("Item").unwrap();
        item.set("item_id", i).unwrap();
        item.set("money", money).unwrap();
        orm.create(&item).unwrap();
    }

    let rows = orm
        .find(
            "Item",
            &Filter::new()
                .field("money", Condition::Gte(Value::Int(150)))
                .order("money", Order::Desc)
                .select(&["item_id", "money"]),
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("money"), Some(&Value::Int(300)));
    assert!(rows[0].get("id").is_none());
}

#[test]
fn test_update_all_and_remove_all() {
    let (orm, _driver) = orm_with_driver(BackendKind::Sql);
    for i in 1..=4i64 {
        let item = orm.record("Item").unwrap();
        item.set("item_id", i).unwrap();
        orm.create(&item).unwrap();
    }

    let affected = orm
        .update_all(
            "Item",
            &Filter::new()
                .field("item_id", Condition::Lte(Value::Int(2)))
                .assign("money", 99i64),
        )
        .unwrap();
    assert_eq!(affected, 2);
    assert_eq!(
        orm.count("Item", &[("money".to_string(), Condition::Eq(Value::Int(99)))])
            .unwrap(),
        2
    );

    let removed = orm
        .remove_all(
            "Item",
            &[("money".to_string(), Condition::Eq(Value::Int(99)))],
        )
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(orm.count("Item", &[]).unwrap(), 2);
}

#[test]
fn test_sharded_model_spreads_and_static_ops_fan_out() {
    let settings = Settings {
        shard_count: 4,
        shard_format: "game_shard_{}".to_string(),
        ..test_settings()
    };
    let context = Context::new(settings).unwrap();
    let orm = Orm::new(context.clone());
    orm.register(
        ModelDef::new("Equip")
            .field(FieldDef::new("id", FieldType::Number).primary())
            .field(FieldDef::new("role_id", FieldType::Number).shard_key())
            .field(FieldDef::new("slot", FieldType::String))
            .durable(BackendKind::SqlShard, "equip", "main")
            .build()
            .unwrap(),
    )
    .unwrap();

    for i in 1..=20i64 {
        let equip = orm.record("Equip").unwrap();
        equip.set("id", i).unwrap();
        equip.set("role_id", i * 31).unwrap();
        equip.set("slot", "head").unwrap();
        orm.create(&equip).unwrap();
    }
    orm.flush_all();
    assert_eq!(orm.count("Equip", &[]).unwrap(), 20);

    // Same shard key must keep landing on the same partition: a reload
    // through a fresh handle finds the row.
    let probe = orm.record("Equip").unwrap();
    probe.set("id", 5i64).unwrap();
    probe.set("role_id", 5 * 31i64).unwrap();
    assert!(orm.load(&probe).unwrap());
    assert_eq!(probe.get("slot"), Some(Value::Str("head".to_string())));
}

#[test]
fn test_schema_upgrade_runs_on_load() {
    let context = Context::new(test_settings()).unwrap();
    let driver = Arc::new(MemoryDriver::new("main"));
    context.register_driver(driver.clone());
    let orm = Orm::new(context);
    orm.register(
        ModelDef::new("Save")
            .field(FieldDef::new("id", FieldType::Number).primary())
            .field(FieldDef::new("level", FieldType::Number))
            .durable(BackendKind::Sql, "save", "main")
            .version(2)
            .upgrade(2, |row| {
                row.insert("level".to_string(), Value::Int(1));
                Ok(())
            })
            .build()
            .unwrap(),
    )
    .unwrap();

    // Seed a version-1 row directly, bypassing the ORM.
    let mut raw = Row::new();
    raw.insert("id".to_string(), Value::Int(1));
    raw.insert("__version".to_string(), Value::Int(1));
    driver
        .execute(&build_insert("save", &raw, None).unwrap())
        .unwrap();

    let save = orm.record("Save").unwrap();
    save.set("id", 1i64).unwrap();
    assert!(orm.load(&save).unwrap());
    assert_eq!(save.get("level"), Some(Value::Int(1)));
    assert!(save.get("__version").is_none());
}

#[test]
fn test_type_mismatch_is_synchronous() {
    let (orm, _driver) = orm_with_driver(BackendKind::SqlLate);
    let item = orm.record("Item").unwrap();
    let err = item.set("money", "lots").unwrap_err();
    assert!(matches!(err, TandemError::TypeMismatch { .. }));
}

#[test]
fn test_unknown_model_is_an_error() {
    let context = Context::new(test_settings()).unwrap();
    let orm = Orm::new(context);
    assert!(matches!(
        orm.record("Ghost").unwrap_err(),
        TandemError::ModelNotFound(_)
    ));
}

#[test]
fn test_duplicate_registration_is_fatal() {
    let (orm, _driver) = orm_with_driver(BackendKind::Sql);
    let err = orm.register(item_model(BackendKind::Sql)).unwrap_err();
    assert!(matches!(err, TandemError::Configuration(_)));
}

#[test]
fn test_sharded_model_requires_shard_settings() {
    let context = Context::new(test_settings()).unwrap(); // shard_count = 0
    let orm = Orm::new(context);
    let err = orm
        .register(
            ModelDef::new("Equip")
                .field(FieldDef::new("id", FieldType::Number).primary())
                .field(FieldDef::new("role_id", FieldType::Number).shard_key())
                .durable(BackendKind::SqlShard, "equip", "main")
                .build()
                .unwrap(),
        )
        .unwrap_err();
    assert!(matches!(err, TandemError::Configuration(_)));
}

#[test]
fn test_stop_drains_pending_deferred_writes() {
    let (orm, _driver) = orm_with_driver(BackendKind::SqlLate);
    let item = orm.record("Item").unwrap();
    item.set("id", 1i64).unwrap();
    item.set("item_id", 10i64).unwrap();
    orm.create(&item).unwrap();
    assert_eq!(orm.count("Item", &[]).unwrap(), 0);

    orm.stop();
    assert_eq!(orm.count("Item", &[]).unwrap(), 1);
}

#[test]
fn test_subscriber_sees_deferred_completion() {
    let (orm, _driver) = orm_with_driver(BackendKind::SqlLate);
    let item = orm.record("Item").unwrap();
    item.set("id", 1i64).unwrap();
    let rx = item.subscribe();
    orm.create(&item).unwrap();
    assert!(rx.try_recv().is_err()); // nothing flushed yet

    orm.flush_all();
    let event = rx.try_recv().unwrap();
    assert!(event.is_success());
    assert_eq!(event.model, "Item");
}

#[test]
fn test_document_backend_round_trip() {
    let context = Context::new(test_settings()).unwrap();
    let orm = Orm::new(context);
    orm.register(
        ModelDef::new("Profile")
            .field(FieldDef::new("user_id", FieldType::Number).primary())
            .field(FieldDef::new("tags", FieldType::Array))
            .durable(BackendKind::Document, "profile", "main")
            .build()
            .unwrap(),
    )
    .unwrap();

    let profile = orm.record("Profile").unwrap();
    profile.set("user_id", 9i64).unwrap();
    profile
        .set("tags", Value::Array(vec![Value::Str("a".into()), Value::Str("b".into())]))
        .unwrap();
    orm.create(&profile).unwrap();

    let probe = orm.record("Profile").unwrap();
    probe.set("user_id", 9i64).unwrap();
    assert!(orm.load(&probe).unwrap());
    match probe.get("tags") {
        Some(Value::Array(tags)) => assert_eq!(tags.len(), 2),
        other => panic!("expected array, got {other:?}"),
    }
}
