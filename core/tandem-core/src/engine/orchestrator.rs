//! Per-record CRUD orchestration across the durable and cache facets.
//!
//! The durable store is authoritative: it is written first and read
//! second (the cache is only a faster path to the same answer). Writes
//! apply to both stores with no rollback; a failure between them leaves
//! the facet version stamps diverged, which `is_modified` surfaces.

use crate::engine::database::ModelRuntime;
use crate::error::{TandemError, TandemResult};
use crate::record::{FacetKind, Record};
use crate::schema::DefaultSpec;
use tracing::warn;

/// Fills unset fields with their declared defaults, in declaration
/// order. A failing generator aborts the create; later defaults do not
/// run.
fn apply_defaults(record: &Record) -> TandemResult<()> {
    let model = record.model().clone();
    for field in &model.fields {
        let unset = record.get(&field.name).map_or(true, |v| v.is_null());
        if !unset {
            continue;
        }
        let value = match &field.default {
            None => continue,
            Some(DefaultSpec::Value(value)) => value.clone(),
            Some(DefaultSpec::Generator(generator)) => {
                generator().map_err(|err| TandemError::DefaultFailed {
                    field: field.name.clone(),
                    message: err.to_string(),
                })?
            }
        };
        record.set(&field.name, value)?;
    }
    Ok(())
}

/// Creates the record after applying defaults: durable first, then a
/// best-effort cache write. A cache failure is logged, never rolls back
/// the durable write, and does not fail the create.
pub(crate) fn create(runtime: &ModelRuntime, record: &Record) -> TandemResult<()> {
    apply_defaults(record)?;
    runtime.durable.create(record)?;
    record.mark_loaded(true);
    if let Some(cache) = &runtime.cache {
        if let Err(err) = cache.create(record) {
            warn!(model = %record.model().name, error = %err, "cache create failed");
        }
    }
    Ok(())
}

/// Loads the record by its identity key, cache first. A cache error
/// falls through to the durable store like a miss. Returns false on a
/// miss in both stores; the record stays unloaded.
pub(crate) fn load(runtime: &ModelRuntime, record: &Record) -> TandemResult<bool> {
    if let Some(cache) = &runtime.cache {
        match cache.load(record) {
            Ok(Some(values)) => {
                let version = record.version();
                record.replace_memory(values.clone());
                record.mark_facet_saved(FacetKind::Cache, values.clone(), version);
                // A cache hit is as good as a durable read; both facets
                // are considered in sync with what was loaded.
                record.mark_facet_saved(FacetKind::Durable, values, version);
                return Ok(true);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(model = %record.model().name, error = %err, "cache load failed");
            }
        }
    }
    if record.is_loaded() {
        return Ok(true);
    }

    match runtime.durable.load(record)? {
        Some(values) => {
            let version = record.version();
            record.replace_memory(values.clone());
            record.mark_facet_saved(FacetKind::Durable, values, version);
            if let Some(cache) = &runtime.cache {
                // Backfill; a cache failure must not lose the loaded row.
                if let Err(err) = cache.update(record) {
                    warn!(model = %record.model().name, error = %err, "cache backfill failed");
                }
            }
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Writes the record's current state to both stores. Both sides are
/// always attempted; either failure fails the call, but whatever the
/// other side applied stands (no rollback).
pub(crate) fn update(runtime: &ModelRuntime, record: &Record) -> TandemResult<()> {
    let durable = runtime.durable.update(record);
    let cache = match &runtime.cache {
        Some(cache) => cache.update(record).map(|_| ()),
        None => Ok(()),
    };
    durable?;
    cache
}

/// Removes the record from both stores. Both sides are attempted; the
/// record only transitions to unloaded when both removals succeed. A
/// partial removal leaves it loaded, the documented inconsistency
/// window.
pub(crate) fn remove(runtime: &ModelRuntime, record: &Record) -> TandemResult<()> {
    let durable = runtime.durable.remove(record);
    let cache = match &runtime.cache {
        Some(cache) => cache.remove(record),
        None => Ok(()),
    };
    durable?;
    cache?;
    record.mark_loaded(false);
    Ok(())
}
