//! Schema registry: globally unique model names mapped to definitions.

use crate::error::{TandemError, TandemResult};
use crate::schema::ModelDef;
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent registry of model definitions.
///
/// Registering a duplicate name is a fatal configuration error.
#[derive(Default)]
pub struct ModelRegistry {
    models: DashMap<String, Arc<ModelDef>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model. The definition is validated first.
    pub fn register(&self, model: ModelDef) -> TandemResult<Arc<ModelDef>> {
        model.validate()?;
        let name = model.name.clone();
        let arc = Arc::new(model);
        match self.models.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TandemError::Configuration(
                format!("model '{name}' is already registered"),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(arc.clone());
                Ok(arc)
            }
        }
    }

    pub fn get_model(&self, name: &str) -> TandemResult<Arc<ModelDef>> {
        self.models
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TandemError::ModelNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
