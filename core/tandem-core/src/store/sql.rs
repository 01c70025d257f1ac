//! Synchronous persistence backends: SQL-style, document, in-process
//! memory and the no-op backend.
//!
//! The SQL backend also hosts the flush-time query materialization the
//! deferred write scheduler calls: the query is built from the record's
//! CURRENT memory state, never from the state at enqueue time.

use crate::error::{TandemError, TandemResult};
use crate::query::{Condition, Filter, Query, build_delete, build_insert, build_select, build_update};
use crate::record::{FacetKind, Record};
use crate::schema::ModelDef;
use crate::store::{ExecResult, Persistable, StoreDriver, WriteDisposition};
use crate::upgrade::{VERSION_FIELD, apply_upgrades, stamp_version};
use crate::value::{Row, Value, decode_wire, encode_wire, json_to_value, value_to_json};
use std::sync::Arc;
use tracing::warn;

/// Kind of statement a persist materializes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Update,
}

/// Primary-key equality conditions for a record, wire-encoded.
pub(crate) fn pk_conditions(
    model: &ModelDef,
    record: &Record,
    op: &str,
) -> TandemResult<Vec<(String, Condition)>> {
    let mut conditions = Vec::new();
    for (name, value) in record.pk_values() {
        if value.is_null() {
            return Err(TandemError::store(
                op,
                &model.name,
                format!("primary key field '{name}' is unset"),
            ));
        }
        conditions.push((name, Condition::Eq(encode_wire(&value)?)));
    }
    Ok(conditions)
}

/// Materializes the persist query for a record's current state.
///
/// Insert-style when the durable facet is not yet saved, update-style
/// otherwise. Returns the query, the memory snapshot it was built from
/// and the captured version, which the caller stamps onto the durable
/// facet once the statement lands.
pub(crate) fn build_record_query(
    model: &ModelDef,
    record: &Record,
) -> TandemResult<(Query, Row, u64, WriteOp)> {
    let (values, version) = record.snapshot();
    if record.facet_saved(FacetKind::Durable) {
        let assign: Vec<(String, Value)> = values
            .iter()
            .filter(|(name, _)| model.field(name).map(|f| !f.primary).unwrap_or(false))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let conditions = pk_conditions(model, record, "update")?;
        let query = build_update(&model.durable.table, &assign, &conditions)?;
        Ok((query, values, version, WriteOp::Update))
    } else {
        let mut row = values.clone();
        stamp_version(model, &mut row);
        let auto_key = model
            .primary_fields()
            .find(|f| f.auto_increment)
            .map(|f| f.name.clone());
        let query = build_insert(&model.durable.table, &row, auto_key.as_deref())?;
        Ok((query, values, version, WriteOp::Insert))
    }
}

/// Applies a successful persist to the durable facet: store-generated
/// keys are written back, the snapshot is adopted and the version stamp
/// advances to the captured version.
pub(crate) fn finalize_persist(
    model: &ModelDef,
    record: &Record,
    op: WriteOp,
    result: &ExecResult,
    values: Row,
    version: u64,
) {
    record.mark_facet_saved(FacetKind::Durable, values, version);
    if op == WriteOp::Insert {
        if let Some(id) = result.last_insert_id {
            if let Some(field) = model.primary_fields().find(|f| f.auto_increment) {
                record.adopt_generated(&field.name, Value::Int(id));
            }
        }
    }
}

/// Decodes a raw stored field map into declared in-memory values,
/// running pending schema upgrades first. Unknown columns are dropped.
pub(crate) fn decode_raw(model: &ModelDef, mut raw: Row) -> TandemResult<Row> {
    apply_upgrades(model, &mut raw)?;
    let mut out = Row::new();
    for (name, value) in raw {
        if let Some(field) = model.field(&name) {
            out.insert(name, decode_wire(&field.ty, &value)?);
        }
    }
    Ok(out)
}

/// Encodes a record's values as a JSON payload for cache/document
/// stores, stamped with the model version.
pub(crate) fn encode_payload(model: &ModelDef, values: &Row) -> TandemResult<String> {
    let mut map = serde_json::Map::new();
    for (name, value) in values {
        map.insert(name.clone(), value_to_json(value)?);
    }
    if model.version > 0 {
        map.insert(
            VERSION_FIELD.to_string(),
            serde_json::Value::Number(model.version.into()),
        );
    }
    Ok(serde_json::to_string(&map)?)
}

/// Reverses [`encode_payload`], applying pending upgrades.
pub(crate) fn decode_payload(model: &ModelDef, payload: &str) -> TandemResult<Row> {
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(payload)?;
    let raw: Row = map
        .into_iter()
        .map(|(name, json)| (name, json_to_value(json)))
        .collect();
    decode_raw(model, raw)
}

// ════════════════════════════════════════════
// SQL backend
// ════════════════════════════════════════════

/// Synchronous SQL-style durable backend.
pub struct SqlBackend {
    model: Arc<ModelDef>,
    driver: Arc<dyn StoreDriver>,
}

impl SqlBackend {
    pub fn new(model: Arc<ModelDef>, driver: Arc<dyn StoreDriver>) -> Self {
        Self { model, driver }
    }

    pub(crate) fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    /// One immediate persist round trip for the record's current state.
    pub(crate) fn persist_now(&self, record: &Record) -> TandemResult<()> {
        let (query, values, version, op) = build_record_query(&self.model, record)?;
        let result = self.driver.execute(&query).map_err(|err| {
            warn!(model = %self.model.name, error = %err, "durable persist failed");
            TandemError::store("persist", &self.model.name, err.to_string())
        })?;
        finalize_persist(&self.model, record, op, &result, values, version);
        Ok(())
    }
}

impl Persistable for SqlBackend {
    fn create(&self, record: &Record) -> TandemResult<WriteDisposition> {
        self.persist_now(record)?;
        Ok(WriteDisposition::Applied)
    }

    fn load(&self, record: &Record) -> TandemResult<Option<Row>> {
        let conditions = pk_conditions(&self.model, record, "load")?;
        let filter = Filter {
            conditions,
            limit: Some(1),
            ..Filter::default()
        };
        let query = build_select(&self.model.durable.table, &filter);
        let result = self
            .driver
            .execute(&query)
            .map_err(|err| TandemError::store("load", &self.model.name, err.to_string()))?;
        match result.rows.into_iter().next() {
            Some(raw) => decode_raw(&self.model, raw).map(Some),
            None => Ok(None),
        }
    }

    fn update(&self, record: &Record) -> TandemResult<WriteDisposition> {
        self.persist_now(record)?;
        Ok(WriteDisposition::Applied)
    }

    fn remove(&self, record: &Record) -> TandemResult<()> {
        let conditions = pk_conditions(&self.model, record, "remove")?;
        let query = build_delete(&self.model.durable.table, &conditions);
        self.driver
            .execute(&query)
            .map_err(|err| TandemError::store("remove", &self.model.name, err.to_string()))?;
        record.mark_removed(FacetKind::Durable);
        Ok(())
    }
}

// ════════════════════════════════════════════
// Document backend
// ════════════════════════════════════════════

/// Document-store durable backend: whole-record JSON payloads keyed by
/// the colon-joined primary-key values.
pub struct DocumentBackend {
    model: Arc<ModelDef>,
    driver: Arc<dyn StoreDriver>,
}

impl DocumentBackend {
    pub fn new(model: Arc<ModelDef>, driver: Arc<dyn StoreDriver>) -> Self {
        Self { model, driver }
    }

    fn key(&self, record: &Record) -> TandemResult<String> {
        let mut key = self.model.durable.table.clone();
        for (name, value) in record.pk_values() {
            if value.is_null() {
                return Err(TandemError::store(
                    "doc-key",
                    &self.model.name,
                    format!("primary key field '{name}' is unset"),
                ));
            }
            key.push(':');
            key.push_str(&value.key_segment()?);
        }
        Ok(key)
    }

    fn put(&self, record: &Record) -> TandemResult<WriteDisposition> {
        let key = self.key(record)?;
        let (values, version) = record.snapshot();
        let payload = encode_payload(&self.model, &values)?;
        let query = Query {
            sql: format!("KV PUT {key}"),
            params: vec![Value::Str(payload.clone())],
            plan: crate::query::Plan::KvPut { key, payload },
        };
        self.driver
            .execute(&query)
            .map_err(|err| TandemError::store("persist", &self.model.name, err.to_string()))?;
        record.mark_facet_saved(FacetKind::Durable, values, version);
        Ok(WriteDisposition::Applied)
    }
}

impl Persistable for DocumentBackend {
    fn create(&self, record: &Record) -> TandemResult<WriteDisposition> {
        self.put(record)
    }

    fn load(&self, record: &Record) -> TandemResult<Option<Row>> {
        let key = self.key(record)?;
        let query = Query {
            sql: format!("KV GET {key}"),
            params: vec![],
            plan: crate::query::Plan::KvGet { key },
        };
        let result = self
            .driver
            .execute(&query)
            .map_err(|err| TandemError::store("load", &self.model.name, err.to_string()))?;
        match result.rows.into_iter().next() {
            Some(row) => match row.get("payload") {
                Some(Value::Str(payload)) => decode_payload(&self.model, payload).map(Some),
                _ => Err(TandemError::Serialization(
                    "document payload missing".to_string(),
                )),
            },
            None => Ok(None),
        }
    }

    fn update(&self, record: &Record) -> TandemResult<WriteDisposition> {
        self.put(record)
    }

    fn remove(&self, record: &Record) -> TandemResult<()> {
        let key = self.key(record)?;
        let query = Query {
            sql: format!("KV DEL {key}"),
            params: vec![],
            plan: crate::query::Plan::KvDelete { key },
        };
        self.driver
            .execute(&query)
            .map_err(|err| TandemError::store("remove", &self.model.name, err.to_string()))?;
        record.mark_removed(FacetKind::Durable);
        Ok(())
    }
}

// ════════════════════════════════════════════
// Memory and no-op backends
// ════════════════════════════════════════════

/// In-process durable backend: the facet snapshot IS the store.
pub struct MemoryBackend;

impl Persistable for MemoryBackend {
    fn create(&self, record: &Record) -> TandemResult<WriteDisposition> {
        let (values, version) = record.snapshot();
        record.mark_facet_saved(FacetKind::Durable, values, version);
        Ok(WriteDisposition::Applied)
    }

    fn load(&self, record: &Record) -> TandemResult<Option<Row>> {
        if record.facet_saved(FacetKind::Durable) {
            Ok(Some(record.facet_values(FacetKind::Durable)))
        } else {
            Ok(None)
        }
    }

    fn update(&self, record: &Record) -> TandemResult<WriteDisposition> {
        self.create(record)
    }

    fn remove(&self, record: &Record) -> TandemResult<()> {
        record.mark_removed(FacetKind::Durable);
        Ok(())
    }
}

/// No backing store: writes succeed without effect, loads always miss.
pub struct NoneBackend;

impl Persistable for NoneBackend {
    fn create(&self, _record: &Record) -> TandemResult<WriteDisposition> {
        Ok(WriteDisposition::Applied)
    }

    fn load(&self, _record: &Record) -> TandemResult<Option<Row>> {
        Ok(None)
    }

    fn update(&self, _record: &Record) -> TandemResult<WriteDisposition> {
        Ok(WriteDisposition::Applied)
    }

    fn remove(&self, _record: &Record) -> TandemResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use crate::store::{BackendKind, MemoryDriver};
    use crate::value::FieldType;

    fn model() -> Arc<ModelDef> {
        Arc::new(
            ModelDef::new("Item")
                .field(FieldDef::new("id", FieldType::Number).primary().auto_increment())
                .field(FieldDef::new("item_id", FieldType::Number))
                .field(FieldDef::new("name", FieldType::String))
                .durable(BackendKind::Sql, "item", "main")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_sql_create_adopts_generated_key() {
        let model = model();
        let driver = Arc::new(MemoryDriver::new("main"));
        let backend = SqlBackend::new(model.clone(), driver);
        let record = Record::new(model);
        record.set("item_id", 100i64).unwrap();

        backend.create(&record).unwrap();
        assert_eq!(record.get("id"), Some(Value::Int(1)));
        assert!(record.facet_saved(FacetKind::Durable));
        assert!(!record.is_modified(FacetKind::Durable));
    }

    #[test]
    fn test_sql_load_round_trip() {
        let model = model();
        let driver = Arc::new(MemoryDriver::new("main"));
        let backend = SqlBackend::new(model.clone(), driver);

        let record = Record::new(model.clone());
        record.set("item_id", 100i64).unwrap();
        backend.create(&record).unwrap();
        let id = record.get("id").unwrap();

        let probe = Record::new(model);
        probe.set("id", id).unwrap();
        let loaded = backend.load(&probe).unwrap().unwrap();
        assert_eq!(loaded.get("item_id"), Some(&Value::Int(100)));
    }

    #[test]
    fn test_sql_update_targets_primary_key() {
        let model = model();
        let driver = Arc::new(MemoryDriver::new("main"));
        let backend = SqlBackend::new(model.clone(), driver.clone());

        let record = Record::new(model);
        record.set("item_id", 100i64).unwrap();
        backend.create(&record).unwrap();

        record.set("name", "sword").unwrap();
        backend.update(&record).unwrap();

        let log = driver.statement_log();
        assert!(log.last().unwrap().starts_with("UPDATE item SET"));
        assert!(log.last().unwrap().contains("WHERE id = ?"));
    }

    #[test]
    fn test_sql_remove_marks_tombstone() {
        let model = model();
        let driver = Arc::new(MemoryDriver::new("main"));
        let backend = SqlBackend::new(model.clone(), driver.clone());

        let record = Record::new(model);
        record.set("item_id", 100i64).unwrap();
        backend.create(&record).unwrap();
        backend.remove(&record).unwrap();

        assert!(record.is_removed());
        assert_eq!(driver.table_len("item"), 0);
    }

    #[test]
    fn test_document_round_trip() {
        let model = model();
        let driver = Arc::new(MemoryDriver::new("main"));
        let backend = DocumentBackend::new(model.clone(), driver);

        let record = Record::new(model.clone());
        record.set("id", 7i64).unwrap();
        record.set("name", "shield").unwrap();
        backend.create(&record).unwrap();

        let probe = Record::new(model);
        probe.set("id", 7i64).unwrap();
        let loaded = backend.load(&probe).unwrap().unwrap();
        assert_eq!(loaded.get("name"), Some(&Value::Str("shield".to_string())));
    }

    #[test]
    fn test_none_backend_is_inert() {
        let backend = NoneBackend;
        let record = Record::new(model());
        assert_eq!(backend.create(&record).unwrap(), WriteDisposition::Applied);
        assert!(backend.load(&record).unwrap().is_none());
        assert!(backend.remove(&record).is_ok());
    }

    #[test]
    fn test_update_without_pk_is_a_store_error() {
        let model = model();
        let driver = Arc::new(MemoryDriver::new("main"));
        let backend = SqlBackend::new(model.clone(), driver);
        let record = Record::new(model);
        record.set("item_id", 1i64).unwrap();
        // Force the update path without a saved pk.
        record.mark_facet_saved(FacetKind::Durable, Row::new(), 0);
        record.set("name", "x").unwrap();
        assert!(backend.update(&record).is_err());
    }
}
