//! The explicit runtime context.
//!
//! Everything an ORM instance needs — settings, store connections, the
//! shared cache store — lives here and is passed around explicitly.
//! There is no process-global registry; two contexts in one process do
//! not see each other's state.

use crate::config::Settings;
use crate::error::TandemResult;
use crate::store::{CacheStore, MemoryDriver, StoreDriver};
use dashmap::DashMap;
use std::sync::Arc;

/// Shared runtime state for one ORM instance.
pub struct Context {
    settings: Settings,
    drivers: DashMap<String, Arc<dyn StoreDriver>>,
    cache: Arc<CacheStore>,
}

impl Context {
    pub fn new(settings: Settings) -> TandemResult<Arc<Self>> {
        settings.validate()?;
        let cache = Arc::new(CacheStore::new(settings.cache_capacity)?);
        Ok(Arc::new(Self {
            settings,
            drivers: DashMap::new(),
            cache,
        }))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registers a driver under its connection name, replacing any
    /// driver previously bound to that name.
    pub fn register_driver(&self, driver: Arc<dyn StoreDriver>) {
        self.drivers.insert(driver.name().to_string(), driver);
    }

    /// Resolves a connection name to its driver. Unregistered names get
    /// a fresh in-memory driver, which keeps tests and single-process
    /// setups free of boilerplate.
    pub fn driver(&self, name: &str) -> Arc<dyn StoreDriver> {
        self.drivers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryDriver::new(name)))
            .clone()
    }

    /// The shared LRU cache store backing all cache facets.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }
}
