//! Model definitions and the schema registry.

mod model;
mod registry;

pub use model::{
    CacheBinding, DefaultSpec, DurableBinding, FieldDef, ModelDef, ModelDefBuilder, UpgradeFn,
};
pub use registry::ModelRegistry;
