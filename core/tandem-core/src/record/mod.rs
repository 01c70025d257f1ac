//! Record instances and their three facets.
//!
//! A `Record` is one logical business object backed by a memory facet
//! (authoritative field values plus a monotonic version counter), a
//! durable facet and a cache facet (each a last-synced snapshot with a
//! version stamp). Two `Record`s referring to the same logical row share
//! no state; consistency between them only flows through the stores.

mod facet;
mod events;

pub use events::{UpdateEvent, UpdateListeners};
pub use facet::{FacetKind, MemoryFacet, StoreFacet};

use crate::error::{TandemError, TandemResult};
use crate::schema::ModelDef;
use crate::value::{Row, Value};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

#[derive(Debug, Default)]
pub(crate) struct RecordState {
    pub memory: MemoryFacet,
    pub durable: StoreFacet,
    pub cache: StoreFacet,
    /// Fields written since the last durable sync; drives the
    /// sync-required decision for deferred backends.
    pub dirty: BTreeSet<String>,
}

/// Cloneable handle to one record instance.
#[derive(Clone, Debug)]
pub struct Record {
    model: Arc<ModelDef>,
    state: Arc<RwLock<RecordState>>,
    listeners: Arc<UpdateListeners>,
}

/// Weak handle held by pending write jobs; a record dropped before its
/// flush is treated as detached and skipped.
#[derive(Clone)]
pub struct WeakRecord {
    model: Arc<ModelDef>,
    state: Weak<RwLock<RecordState>>,
    listeners: Weak<UpdateListeners>,
}

impl WeakRecord {
    pub fn upgrade(&self) -> Option<Record> {
        Some(Record {
            model: self.model.clone(),
            state: self.state.upgrade()?,
            listeners: self.listeners.upgrade()?,
        })
    }
}

impl Record {
    pub fn new(model: Arc<ModelDef>) -> Self {
        Self {
            model,
            state: Arc::new(RwLock::new(RecordState::default())),
            listeners: Arc::new(UpdateListeners::default()),
        }
    }

    pub fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    /// Stable identity of this record instance, used by the batcher to
    /// de-duplicate pending writes.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.state) as usize
    }

    pub fn downgrade(&self) -> WeakRecord {
        WeakRecord {
            model: self.model.clone(),
            state: Arc::downgrade(&self.state),
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    // ════════════════════════════════════════════
    // Field access
    // ════════════════════════════════════════════

    /// Sets one field, validating against the declared type and bumping
    /// the memory version.
    ///
    /// Reassigning an already-set primary-key field to a different
    /// non-null value is a programming error.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> TandemResult<()> {
        let value = value.into();
        let def = self.model.require_field(field)?;
        def.ty.check(&self.model.name, field, &value)?;

        let mut state = self.state.write();
        if def.primary && !value.is_null() {
            if let Some(current) = state.memory.values.get(field) {
                if !current.is_null() && *current != value {
                    return Err(TandemError::InvariantViolation(format!(
                        "primary key '{}.{}' is already set and cannot be reassigned",
                        self.model.name, field
                    )));
                }
            }
        }
        state.memory.values.insert(field.to_string(), value);
        state.memory.version += 1;
        state.dirty.insert(field.to_string());
        Ok(())
    }

    /// Sets several fields; each write validates and bumps the version.
    pub fn set_many(&self, values: Row) -> TandemResult<()> {
        for (field, value) in values {
            self.set(&field, value)?;
        }
        Ok(())
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.state.read().memory.values.get(field).cloned()
    }

    pub fn get_all(&self) -> Row {
        self.state.read().memory.values.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().memory.loaded
    }

    pub fn version(&self) -> u64 {
        self.state.read().memory.version
    }

    /// Whether `facet`'s version stamp lags the memory facet.
    pub fn is_modified(&self, facet: FacetKind) -> bool {
        let state = self.state.read();
        let facet_state = match facet {
            FacetKind::Durable => &state.durable,
            FacetKind::Cache => &state.cache,
        };
        facet_state.is_modified(state.memory.version)
    }

    /// Last-synced version stamp of a store facet. Equals [`version`]
    /// (memory) for both facets after a successful load.
    ///
    /// [`version`]: Record::version
    pub fn facet_version(&self, facet: FacetKind) -> u64 {
        let state = self.state.read();
        match facet {
            FacetKind::Durable => state.durable.synced_version,
            FacetKind::Cache => state.cache.synced_version,
        }
    }

    /// Primary-key values in declaration order.
    pub fn pk_values(&self) -> Vec<(String, Value)> {
        let state = self.state.read();
        self.model
            .primary_fields()
            .map(|f| {
                let value = state.memory.values.get(&f.name).cloned().unwrap_or(Value::Null);
                (f.name.clone(), value)
            })
            .collect()
    }

    /// Cache/document identity key values (shard keys, else primaries).
    pub fn key_values(&self) -> Vec<(String, Value)> {
        let state = self.state.read();
        self.model
            .key_fields()
            .iter()
            .map(|f| {
                let value = state.memory.values.get(&f.name).cloned().unwrap_or(Value::Null);
                (f.name.clone(), value)
            })
            .collect()
    }

    // ════════════════════════════════════════════
    // Facet bookkeeping (crate-internal)
    // ════════════════════════════════════════════

    pub(crate) fn mark_loaded(&self, loaded: bool) {
        self.state.write().memory.loaded = loaded;
    }

    /// Replaces the memory values wholesale (load path); does not bump
    /// the version.
    pub(crate) fn replace_memory(&self, values: Row) {
        let mut state = self.state.write();
        state.memory.values = values;
        state.memory.loaded = true;
    }

    pub(crate) fn snapshot(&self) -> (Row, u64) {
        let state = self.state.read();
        (state.memory.values.clone(), state.memory.version)
    }

    pub(crate) fn mark_facet_saved(&self, facet: FacetKind, values: Row, version: u64) {
        let mut state = self.state.write();
        match facet {
            FacetKind::Durable => {
                state.durable.mark_saved(values, version);
                state.dirty.clear();
            }
            FacetKind::Cache => state.cache.mark_saved(values, version),
        }
    }

    pub(crate) fn facet_saved(&self, facet: FacetKind) -> bool {
        let state = self.state.read();
        match facet {
            FacetKind::Durable => state.durable.saved,
            FacetKind::Cache => state.cache.saved,
        }
    }

    pub(crate) fn facet_values(&self, facet: FacetKind) -> Row {
        let state = self.state.read();
        match facet {
            FacetKind::Durable => state.durable.values.clone(),
            FacetKind::Cache => state.cache.values.clone(),
        }
    }

    pub(crate) fn mark_removed(&self, facet: FacetKind) {
        let mut state = self.state.write();
        let facet_state = match facet {
            FacetKind::Durable => &mut state.durable,
            FacetKind::Cache => &mut state.cache,
        };
        facet_state.removed = true;
        facet_state.saved = false;
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.state.read().durable.removed
    }

    /// Fields written since the last durable sync.
    pub(crate) fn dirty_fields(&self) -> BTreeSet<String> {
        self.state.read().dirty.clone()
    }

    /// Writes a store-generated value (e.g. an auto-increment key) into
    /// both the memory facet and the durable snapshot without bumping
    /// the version.
    pub(crate) fn adopt_generated(&self, field: &str, value: Value) {
        let mut state = self.state.write();
        state.memory.values.insert(field.to_string(), value.clone());
        state.durable.values.insert(field.to_string(), value);
    }

    // ════════════════════════════════════════════
    // Events
    // ════════════════════════════════════════════

    /// Subscribes to this record's "updated" events.
    pub fn subscribe(&self) -> Receiver<UpdateEvent> {
        self.listeners.subscribe()
    }

    pub(crate) fn emit_updated(&self, result: Result<(), TandemError>) {
        self.listeners.emit(UpdateEvent {
            model: self.model.name.clone(),
            result,
        });
    }
}
