//! Schema upgrade pipeline.
//!
//! Records loaded from a store may carry a `__version` stamp older than
//! the model's declared version. The pipeline applies each registered
//! upgrade function strictly ascending and strips the stamp before the
//! data is handed back. Nothing is persisted back automatically; callers
//! re-save if they want the upgraded shape stored.
//!
//! Upgrade functions see the store-side representation of the field map
//! (dates as epoch-millisecond integers, arrays/objects as JSON text).

use crate::error::{TandemError, TandemResult};
use crate::schema::ModelDef;
use crate::value::{Row, Value};
use tracing::debug;

/// Field under which the schema version travels in stored payloads.
pub const VERSION_FIELD: &str = "__version";

/// Stamps the current model version onto an outgoing row.
pub fn stamp_version(model: &ModelDef, row: &mut Row) {
    if model.version > 0 {
        row.insert(VERSION_FIELD.to_string(), Value::Int(model.version as i64));
    }
}

/// Applies pending upgrades to a raw stored field map, in place.
///
/// A stored map without a stamp is treated as version 1. Any upgrade
/// failure aborts the load; the `__version` key is always removed on
/// success.
pub fn apply_upgrades(model: &ModelDef, raw: &mut Row) -> TandemResult<()> {
    let stored = match raw.remove(VERSION_FIELD) {
        Some(Value::Int(v)) if v >= 1 => v as u32,
        Some(other) => {
            return Err(TandemError::Serialization(format!(
                "bad {VERSION_FIELD} stamp: {other:?}"
            )));
        }
        None => 1,
    };
    if model.version == 0 || stored >= model.version {
        return Ok(());
    }

    for target in (stored + 1)..=model.version {
        if let Some(upgrade) = model.upgrades.get(&target) {
            debug!(model = %model.name, from = target - 1, to = target, "applying upgrade");
            upgrade(raw).map_err(|err| TandemError::UpgradeFailed {
                version: target,
                message: err.to_string(),
            })?;
        }
    }
    Ok(())
}
