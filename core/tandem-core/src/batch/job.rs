//! Pending write jobs held by the deferred write scheduler.

use crate::record::{Record, UpdateEvent, WeakRecord};
use crossbeam_channel::{Receiver, Sender, unbounded};

/// One enqueued write. Holds only a weak handle to the record (a record
/// dropped before its flush is detached and the job is skipped, same for
/// records removed after enqueue) plus the sending half of the per-job
/// completion channel handed back by `enqueue`.
pub(crate) struct PendingWrite {
    record: WeakRecord,
    completion: Sender<UpdateEvent>,
}

impl PendingWrite {
    pub(crate) fn new(record: &Record) -> (Self, Receiver<UpdateEvent>) {
        let (completion, rx) = unbounded();
        (
            Self {
                record: record.downgrade(),
                completion,
            },
            rx,
        )
    }

    /// The live record this job targets plus its completion sender, or
    /// `None` when the job is detached or tombstoned.
    pub(crate) fn resolve(self) -> Option<(Record, Sender<UpdateEvent>)> {
        let record = self.record.upgrade()?;
        if record.is_removed() {
            return None;
        }
        Some((record, self.completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FacetKind;
    use crate::schema::{FieldDef, ModelDef};
    use crate::store::BackendKind;
    use crate::value::FieldType;
    use std::sync::Arc;

    fn record() -> Record {
        Record::new(Arc::new(
            ModelDef::new("Item")
                .field(FieldDef::new("id", FieldType::Number).primary())
                .durable(BackendKind::SqlLate, "item", "main")
                .build()
                .unwrap(),
        ))
    }

    #[test]
    fn test_resolve_live_record() {
        let record = record();
        let (job, _rx) = PendingWrite::new(&record);
        assert!(job.resolve().is_some());
    }

    #[test]
    fn test_dropped_record_detaches_job() {
        let record = record();
        let (job, _rx) = PendingWrite::new(&record);
        drop(record);
        assert!(job.resolve().is_none());
    }

    #[test]
    fn test_removed_record_skipped() {
        let record = record();
        let (job, _rx) = PendingWrite::new(&record);
        record.mark_removed(FacetKind::Durable);
        assert!(job.resolve().is_none());
    }
}
