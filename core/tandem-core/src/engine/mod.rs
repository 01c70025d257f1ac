//! ORM engine: the context, the entry point and CRUD orchestration.

mod context;
pub(crate) mod database;
mod orchestrator;

pub use context::Context;
pub use database::Orm;
