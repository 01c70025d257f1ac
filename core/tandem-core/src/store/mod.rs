//! Store drivers and per-backend persistence capabilities.
//!
//! [`StoreDriver`] is the narrow seam to a physical backend: execute one
//! query, or a multi-statement batch in one round trip. [`Persistable`]
//! is the capability a record operation talks to, one variant per backend
//! kind — a closed tagged set, not open inheritance.

mod cache;
mod late;
mod memory;
pub(crate) mod sql;

pub use cache::{CacheBackend, CacheStats, CacheStore};
pub use late::{SqlLateBackend, SqlShardBackend, requires_sync};
pub use memory::MemoryDriver;
pub use sql::{DocumentBackend, MemoryBackend, NoneBackend, SqlBackend, WriteOp};

use crate::error::TandemResult;
use crate::query::Query;
use crate::record::Record;
use crate::value::Row;

/// Result of one executed statement.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub rows: Vec<Row>,
    pub affected: u64,
    /// Store-generated key for inserts into auto-increment tables.
    pub last_insert_id: Option<i64>,
}

/// Narrow driver contract per physical backend.
///
/// Backend errors are surfaced verbatim; the durable SQL-style driver
/// must support multi-statement batches.
pub trait StoreDriver: Send + Sync {
    /// Connection name, used in logs and shard descriptors.
    fn name(&self) -> &str;

    /// Executes one statement.
    fn execute(&self, query: &Query) -> TandemResult<ExecResult>;

    /// Executes a multi-statement batch in one round trip. The batch
    /// fails as a whole if any statement is invalid.
    fn execute_batch(&self, queries: &[Query]) -> TandemResult<Vec<ExecResult>>;
}

/// Whether a write was applied immediately or handed to the batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    Applied,
    Deferred,
}

/// Backend selector for a model's durable or cache binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process only, no external store.
    Memory,
    /// SQL-style durable store, synchronous writes.
    Sql,
    /// SQL-style durable store with deferred batched writes.
    SqlLate,
    /// Sharded SQL-style durable store, one batcher per shard.
    SqlShard,
    /// Document store keyed by colon-joined primary values.
    Document,
    /// LRU cache store.
    Cache,
    /// LRU cache store with per-entry TTL.
    CacheTtl,
    /// No backing store.
    None,
}

/// Persistence capability for one facet of a record.
pub trait Persistable: Send + Sync {
    /// Persists a new record. Deferred backends may enqueue instead.
    fn create(&self, record: &Record) -> TandemResult<WriteDisposition>;

    /// Loads the record's values by its identity key; `None` on miss.
    fn load(&self, record: &Record) -> TandemResult<Option<Row>>;

    /// Persists the current field values of an existing record.
    fn update(&self, record: &Record) -> TandemResult<WriteDisposition>;

    /// Removes the record from this store.
    fn remove(&self, record: &Record) -> TandemResult<()>;
}
