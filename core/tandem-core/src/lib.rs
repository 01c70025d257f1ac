//! # Tandem — Dual-Store ORM Core
//!
//! Tandem binds logical records to a durable store and a cache at the
//! same time, and defers most durable writes through a coalescing batch
//! scheduler: writes between flushes collapse to one statement per
//! record, materialized from the record's state at flush time.
//!
//! ## Quick start
//!
//! ```rust
//! use tandem_core::{
//!     BackendKind, Context, FieldDef, FieldType, ModelDef, Orm, Settings,
//! };
//!
//! # fn main() -> tandem_core::TandemResult<()> {
//! let context = Context::new(Settings::default())?;
//! let orm = Orm::new(context);
//!
//! orm.register(
//!     ModelDef::new("Item")
//!         .field(FieldDef::new("id", FieldType::Number).primary().auto_increment())
//!         .field(FieldDef::new("name", FieldType::String))
//!         .durable(BackendKind::SqlLate, "item", "main")
//!         .cache(BackendKind::CacheTtl, "item")
//!         .build()?,
//! )?;
//!
//! let item = orm.record("Item")?;
//! item.set("name", "sword")?;
//! orm.create(&item)?;
//!
//! orm.flush_all();
//! orm.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`engine`] — the [`Orm`] entry point, [`Context`] and CRUD
//!   orchestration across both stores
//! - [`record`] — record handles and their memory/durable/cache facets
//! - [`schema`] — model definitions and the registry
//! - [`store`] — store drivers and per-backend persistence
//! - [`batch`] — the deferred write scheduler and flush strategies
//! - [`query`] — structured filters and query building
//! - [`shard`] — deterministic key-to-partition routing
//! - [`upgrade`] — `__version`-stamped schema migrations

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod record;
pub mod schema;
pub mod shard;
pub mod store;
pub mod upgrade;
pub mod value;

// Logging utilities
pub mod logging;

// Re-export commonly used types
pub use batch::{CronExpr, DeferredWriteScheduler, FlushStrategy};
pub use config::Settings;
pub use engine::{Context, Orm};
pub use error::{TandemError, TandemResult};
pub use query::{Condition, Filter, Order};
pub use record::{FacetKind, Record, UpdateEvent};
pub use schema::{CacheBinding, DefaultSpec, DurableBinding, FieldDef, ModelDef};
pub use shard::ShardRouter;
pub use store::{BackendKind, MemoryDriver, StoreDriver, WriteDisposition};
pub use value::{FieldType, Row, Value};
