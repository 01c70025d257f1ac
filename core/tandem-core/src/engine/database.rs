//! The ORM entry point.
//!
//! An [`Orm`] owns the model registry and, per registered model, a
//! runtime wiring of backends built from the model's declared backend
//! kinds: the durable facet backend, the optional cache facet backend,
//! and the partition drivers static operations fan out over. Deferred
//! backends share one scheduler per store connection.

use crate::batch::DeferredWriteScheduler;
use crate::engine::context::Context;
use crate::engine::orchestrator;
use crate::error::{TandemError, TandemResult};
use crate::query::{Condition, Filter, build_count, build_delete, build_select, build_update};
use crate::record::Record;
use crate::schema::{ModelDef, ModelRegistry};
use crate::shard::ShardRouter;
use crate::store::sql::decode_raw;
use crate::store::{
    BackendKind, CacheBackend, DocumentBackend, MemoryBackend, NoneBackend, Persistable,
    SqlBackend, SqlLateBackend, SqlShardBackend, StoreDriver,
};
use crate::value::Row;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Backend wiring for one registered model.
pub(crate) struct ModelRuntime {
    pub(crate) model: Arc<ModelDef>,
    pub(crate) durable: Box<dyn Persistable>,
    pub(crate) cache: Option<Box<dyn Persistable>>,
    /// Partition drivers static operations fan out over, in shard
    /// order. Empty for backend kinds without a queryable store.
    pub(crate) partitions: Vec<Arc<dyn StoreDriver>>,
}

/// One ORM instance: models bound to stores through a shared context.
pub struct Orm {
    context: Arc<Context>,
    registry: ModelRegistry,
    runtimes: DashMap<String, Arc<ModelRuntime>>,
    schedulers: DashMap<String, Arc<DeferredWriteScheduler>>,
}

impl Orm {
    pub fn new(context: Arc<Context>) -> Self {
        Self {
            context,
            registry: ModelRegistry::new(),
            runtimes: DashMap::new(),
            schedulers: DashMap::new(),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Registers a model and wires its backends. Fatal on duplicate
    /// names or a binding the settings cannot satisfy.
    pub fn register(&self, model: ModelDef) -> TandemResult<()> {
        let model = self.registry.register(model)?;
        let runtime = self.build_runtime(model)?;
        info!(model = %runtime.model.name, "model registered");
        self.runtimes
            .insert(runtime.model.name.clone(), Arc::new(runtime));
        Ok(())
    }

    fn scheduler_for(&self, connection: &str) -> Arc<DeferredWriteScheduler> {
        let settings = self.context.settings();
        self.schedulers
            .entry(connection.to_string())
            .or_insert_with(|| {
                DeferredWriteScheduler::start(
                    self.context.driver(connection),
                    settings.batch_size,
                    settings.flush.clone(),
                )
            })
            .clone()
    }

    fn build_runtime(&self, model: Arc<ModelDef>) -> TandemResult<ModelRuntime> {
        let settings = self.context.settings();
        // Models without an explicit connection live on the main
        // partition.
        let connection = if model.durable.connection.is_empty() {
            settings.main_partition().to_string()
        } else {
            model.durable.connection.clone()
        };

        let mut partitions: Vec<Arc<dyn StoreDriver>> = Vec::new();
        let durable: Box<dyn Persistable> = match model.durable.kind {
            BackendKind::Memory => Box::new(MemoryBackend),
            BackendKind::None => Box::new(NoneBackend),
            BackendKind::Sql => {
                let driver = self.context.driver(&connection);
                partitions.push(driver.clone());
                Box::new(SqlBackend::new(model.clone(), driver))
            }
            BackendKind::SqlLate => {
                let driver = self.context.driver(&connection);
                partitions.push(driver.clone());
                Box::new(SqlLateBackend::new(
                    SqlBackend::new(model.clone(), driver),
                    self.scheduler_for(&connection),
                ))
            }
            BackendKind::SqlShard => {
                if settings.shard_count == 0 {
                    return Err(TandemError::Configuration(format!(
                        "model '{}' is sharded but shard_count is 0",
                        model.name
                    )));
                }
                let router = Arc::new(ShardRouter::new(settings.shard_count)?);
                let mut shards = Vec::with_capacity(settings.shard_count);
                for index in router.partitions() {
                    let name = settings.shard_name(index);
                    let driver = self.context.driver(&name);
                    partitions.push(driver.clone());
                    shards.push(SqlLateBackend::new(
                        SqlBackend::new(model.clone(), driver),
                        self.scheduler_for(&name),
                    ));
                }
                Box::new(SqlShardBackend::new(router, shards))
            }
            BackendKind::Document => {
                let driver = self.context.driver(&connection);
                Box::new(DocumentBackend::new(model.clone(), driver))
            }
            BackendKind::Cache | BackendKind::CacheTtl => {
                return Err(TandemError::Configuration(format!(
                    "model '{}' binds a cache kind as its durable store",
                    model.name
                )));
            }
        };

        let cache: Option<Box<dyn Persistable>> = match &model.cache {
            None => None,
            Some(binding) => {
                let ttl = match binding.kind {
                    BackendKind::Cache => None,
                    BackendKind::CacheTtl => Some(settings.cache_expire),
                    other => {
                        return Err(TandemError::Configuration(format!(
                            "model '{}' binds {other:?} as its cache store",
                            model.name
                        )));
                    }
                };
                Some(Box::new(CacheBackend::new(
                    model.clone(),
                    self.context.cache().clone(),
                    &settings.cache_prefix,
                    &binding.namespace,
                    ttl,
                )))
            }
        };

        Ok(ModelRuntime {
            model,
            durable,
            cache,
            partitions,
        })
    }

    fn runtime(&self, model: &str) -> TandemResult<Arc<ModelRuntime>> {
        self.runtimes
            .get(model)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TandemError::ModelNotFound(model.to_string()))
    }

    // ════════════════════════════════════════════
    // Record operations
    // ════════════════════════════════════════════

    /// A fresh, unloaded record of the model.
    pub fn record(&self, model: &str) -> TandemResult<Record> {
        Ok(Record::new(self.registry.get_model(model)?))
    }

    /// Persists a new record to both stores, applying field defaults.
    pub fn create(&self, record: &Record) -> TandemResult<()> {
        let runtime = self.runtime(&record.model().name)?;
        orchestrator::create(&runtime, record)
    }

    /// Loads the record by its identity key, cache first. `false` means
    /// a miss in both stores.
    pub fn load(&self, record: &Record) -> TandemResult<bool> {
        let runtime = self.runtime(&record.model().name)?;
        orchestrator::load(&runtime, record)
    }

    /// Writes the record's current state to both stores.
    pub fn update(&self, record: &Record) -> TandemResult<()> {
        let runtime = self.runtime(&record.model().name)?;
        orchestrator::update(&runtime, record)
    }

    /// Removes the record from both stores.
    pub fn remove(&self, record: &Record) -> TandemResult<()> {
        let runtime = self.runtime(&record.model().name)?;
        orchestrator::remove(&runtime, record)
    }

    // ════════════════════════════════════════════
    // Static operations (fan out over all partitions)
    // ════════════════════════════════════════════

    /// Rows matching the filter across all partitions, decoded to
    /// in-memory values. The first partition error aborts the fan-out.
    pub fn find(&self, model: &str, filter: &Filter) -> TandemResult<Vec<Row>> {
        let runtime = self.runtime(model)?;
        let query = build_select(&runtime.model.durable.table, filter);
        let mut rows = Vec::new();
        for driver in &runtime.partitions {
            let result = driver.execute(&query)?;
            for raw in result.rows {
                rows.push(decode_raw(&runtime.model, raw)?);
            }
        }
        Ok(rows)
    }

    /// First matching row, if any.
    pub fn find_one(&self, model: &str, filter: &Filter) -> TandemResult<Option<Row>> {
        let runtime = self.runtime(model)?;
        let mut filter = filter.clone();
        filter.limit = Some(1);
        let query = build_select(&runtime.model.durable.table, &filter);
        for driver in &runtime.partitions {
            let result = driver.execute(&query)?;
            if let Some(raw) = result.rows.into_iter().next() {
                return Ok(Some(decode_raw(&runtime.model, raw)?));
            }
        }
        Ok(None)
    }

    /// Number of matching rows across all partitions.
    pub fn count(&self, model: &str, conditions: &[(String, Condition)]) -> TandemResult<u64> {
        let runtime = self.runtime(model)?;
        let query = build_count(&runtime.model.durable.table, conditions);
        let mut total = 0;
        for driver in &runtime.partitions {
            total += driver.execute(&query)?.affected;
        }
        Ok(total)
    }

    /// Applies the filter's assignments to every matching row, on every
    /// partition. Returns the number of rows changed.
    pub fn update_all(&self, model: &str, filter: &Filter) -> TandemResult<u64> {
        let runtime = self.runtime(model)?;
        let query = build_update(
            &runtime.model.durable.table,
            &filter.update,
            &filter.conditions,
        )?;
        let mut affected = 0;
        for driver in &runtime.partitions {
            affected += driver.execute(&query)?.affected;
        }
        Ok(affected)
    }

    /// Deletes every matching row on every partition. Live record
    /// handles are not touched.
    pub fn remove_all(
        &self,
        model: &str,
        conditions: &[(String, Condition)],
    ) -> TandemResult<u64> {
        let runtime = self.runtime(model)?;
        let query = build_delete(&runtime.model.durable.table, conditions);
        let mut affected = 0;
        for driver in &runtime.partitions {
            affected += driver.execute(&query)?.affected;
        }
        Ok(affected)
    }

    // ════════════════════════════════════════════
    // Lifecycle
    // ════════════════════════════════════════════

    /// Flushes every deferred write scheduler now, regardless of its
    /// flush strategy.
    pub fn flush_all(&self) {
        for entry in self.schedulers.iter() {
            entry.value().flush();
        }
    }

    /// Stops all schedulers, draining their queues. Idempotent.
    pub fn stop(&self) {
        for entry in self.schedulers.iter() {
            entry.value().stop();
        }
    }
}

impl Drop for Orm {
    fn drop(&mut self) {
        self.stop();
    }
}
