//! Facet state: the three synchronized views of one record.

use crate::value::Row;

/// Which non-memory facet an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetKind {
    Durable,
    Cache,
}

/// The authoritative in-process view.
#[derive(Debug, Default, Clone)]
pub struct MemoryFacet {
    /// Current field values.
    pub values: Row,
    /// True once the record reflects a persisted row.
    pub loaded: bool,
    /// Monotonic counter bumped on every field mutation.
    pub version: u64,
}

/// Last-known state of a backing store (durable or cache).
#[derive(Debug, Default, Clone)]
pub struct StoreFacet {
    /// Field snapshot as of the last successful sync.
    pub values: Row,
    /// True once the store holds this record.
    pub saved: bool,
    /// Memory version this facet was last synced at.
    pub synced_version: u64,
    /// Tombstone: set when the record was removed from this store.
    pub removed: bool,
}

impl StoreFacet {
    /// A facet is modified iff its stamp lags the memory version.
    pub fn is_modified(&self, memory_version: u64) -> bool {
        self.synced_version != memory_version
    }

    /// Records a successful sync at `version` with `values`.
    pub fn mark_saved(&mut self, values: Row, version: u64) {
        self.values = values;
        self.saved = true;
        self.synced_version = version;
        self.removed = false;
    }
}
