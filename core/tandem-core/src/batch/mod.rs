//! Deferred write batching: jobs, flush strategies and the scheduler.

mod job;
mod scheduler;
mod strategy;

pub use scheduler::DeferredWriteScheduler;
pub use strategy::{CronExpr, FlushClock, FlushStrategy};
