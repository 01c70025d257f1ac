//! Deferred SQL backends: writes go through the batch scheduler unless
//! the write itself demands an immediate round trip.
//!
//! A write must bypass the batcher when the caller cannot proceed
//! without the store's answer: a create whose auto-increment key is
//! still unset, or a write touching a field declared `unique` or
//! `must_sync`. Everything else is enqueued and the control flow
//! returns before the store has seen the statement.

use crate::batch::DeferredWriteScheduler;
use crate::error::TandemResult;
use crate::record::Record;
use crate::schema::ModelDef;
use crate::shard::ShardRouter;
use crate::store::sql::{SqlBackend, WriteOp};
use crate::store::{Persistable, WriteDisposition};
use crate::value::Row;
use std::sync::Arc;
use tracing::trace;

/// Whether this write needs a synchronous durable round trip.
pub fn requires_sync(model: &ModelDef, record: &Record, op: WriteOp) -> bool {
    match op {
        WriteOp::Insert => {
            let generated_key_pending = model
                .primary_fields()
                .any(|f| f.auto_increment && record.get(&f.name).map_or(true, |v| v.is_null()));
            if generated_key_pending {
                return true;
            }
            record
                .dirty_fields()
                .iter()
                .any(|name| model.field(name).map_or(false, |f| f.forces_sync()))
        }
        WriteOp::Update => record
            .dirty_fields()
            .iter()
            .any(|name| model.field(name).map_or(false, |f| f.forces_sync())),
    }
}

/// Deferred variant of the SQL backend.
pub struct SqlLateBackend {
    inner: SqlBackend,
    scheduler: Arc<DeferredWriteScheduler>,
}

impl SqlLateBackend {
    pub fn new(inner: SqlBackend, scheduler: Arc<DeferredWriteScheduler>) -> Self {
        Self { inner, scheduler }
    }

    fn write(&self, record: &Record, op: WriteOp) -> TandemResult<WriteDisposition> {
        if requires_sync(self.inner.model(), record, op) {
            trace!(model = %self.inner.model().name, "write forces a synchronous round trip");
            self.inner.persist_now(record)?;
            return Ok(WriteDisposition::Applied);
        }
        self.scheduler.enqueue(record);
        Ok(WriteDisposition::Deferred)
    }
}

impl Persistable for SqlLateBackend {
    fn create(&self, record: &Record) -> TandemResult<WriteDisposition> {
        self.write(record, WriteOp::Insert)
    }

    fn load(&self, record: &Record) -> TandemResult<Option<Row>> {
        self.inner.load(record)
    }

    fn update(&self, record: &Record) -> TandemResult<WriteDisposition> {
        self.write(record, WriteOp::Update)
    }

    fn remove(&self, record: &Record) -> TandemResult<()> {
        // Removal is always synchronous; any still-queued job for this
        // record is tombstoned and skipped at flush time.
        self.inner.remove(record)
    }
}

/// Sharded deferred SQL backend: one [`SqlLateBackend`] (with its own
/// scheduler) per partition, routed by shard key.
pub struct SqlShardBackend {
    router: Arc<ShardRouter>,
    shards: Vec<SqlLateBackend>,
}

impl SqlShardBackend {
    pub fn new(router: Arc<ShardRouter>, shards: Vec<SqlLateBackend>) -> Self {
        debug_assert_eq!(router.count(), shards.len());
        Self { router, shards }
    }

    fn shard(&self, record: &Record) -> TandemResult<&SqlLateBackend> {
        let index = self.router.route(record)?;
        Ok(&self.shards[index])
    }
}

impl Persistable for SqlShardBackend {
    fn create(&self, record: &Record) -> TandemResult<WriteDisposition> {
        self.shard(record)?.create(record)
    }

    fn load(&self, record: &Record) -> TandemResult<Option<Row>> {
        self.shard(record)?.load(record)
    }

    fn update(&self, record: &Record) -> TandemResult<WriteDisposition> {
        self.shard(record)?.update(record)
    }

    fn remove(&self, record: &Record) -> TandemResult<()> {
        self.shard(record)?.remove(record)
    }
}
