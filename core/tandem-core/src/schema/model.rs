//! Model definitions: the static, immutable description of one logical
//! record type — its ordered field map, store bindings, schema version and
//! upgrade functions.

use crate::error::{TandemError, TandemResult};
use crate::store::BackendKind;
use crate::value::{FieldType, Row, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Default value for an unset field at create time.
#[derive(Clone)]
pub enum DefaultSpec {
    /// A literal value.
    Value(Value),
    /// A generator closure, run sequentially in declaration order during
    /// create. A failure aborts the create; later defaults do not run.
    Generator(Arc<dyn Fn() -> TandemResult<Value> + Send + Sync>),
}

impl fmt::Debug for DefaultSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultSpec::Value(v) => write!(f, "Value({v:?})"),
            DefaultSpec::Generator(_) => write!(f, "Generator(..)"),
        }
    }
}

/// One field of a model.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub primary: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub indexed: bool,
    pub shard_key: bool,
    pub must_sync: bool,
    pub default: Option<DefaultSpec>,
}

impl FieldDef {
    pub fn new(name: &str, ty: FieldType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            primary: false,
            auto_increment: false,
            unique: false,
            indexed: false,
            shard_key: false,
            must_sync: false,
            default: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn shard_key(mut self) -> Self {
        self.shard_key = true;
        self
    }

    /// Writes to this field can never be deferred.
    pub fn must_sync(mut self) -> Self {
        self.must_sync = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(DefaultSpec::Value(value));
        self
    }

    pub fn default_with<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> TandemResult<Value> + Send + Sync + 'static,
    {
        self.default = Some(DefaultSpec::Generator(Arc::new(generator)));
        self
    }

    /// Whether a write touching this field forces a synchronous durable
    /// round trip (uniqueness must be checked now, or the caller needs
    /// the value).
    pub fn forces_sync(&self) -> bool {
        self.unique || self.must_sync
    }
}

/// Durable store binding of a model.
#[derive(Debug, Clone)]
pub struct DurableBinding {
    pub kind: BackendKind,
    /// Table (SQL) or collection (document) name.
    pub table: String,
    /// Connection name resolved through the context.
    pub connection: String,
}

/// Cache store binding of a model.
#[derive(Debug, Clone)]
pub struct CacheBinding {
    pub kind: BackendKind,
    /// Key namespace, usually the model name.
    pub namespace: String,
}

/// Upgrade function migrating a raw stored field map to the keyed version.
pub type UpgradeFn = Arc<dyn Fn(&mut Row) -> TandemResult<()> + Send + Sync>;

/// Static description of one record type. Immutable once registered.
#[derive(Clone)]
pub struct ModelDef {
    pub name: String,
    /// Declaration-ordered fields.
    pub fields: Vec<FieldDef>,
    pub durable: DurableBinding,
    pub cache: Option<CacheBinding>,
    /// Current schema version. 0 means unversioned.
    pub version: u32,
    /// Upgrade functions keyed by TARGET version: the entry for `v`
    /// migrates a record from `v - 1` to `v`.
    pub upgrades: BTreeMap<u32, UpgradeFn>,
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("durable", &self.durable)
            .field("cache", &self.cache)
            .field("version", &self.version)
            .field("upgrades", &self.upgrades.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelDef {
    pub fn new(name: &str) -> ModelDefBuilder {
        ModelDefBuilder {
            name: name.to_string(),
            fields: Vec::new(),
            durable: None,
            cache: None,
            version: 0,
            upgrades: BTreeMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn require_field(&self, name: &str) -> TandemResult<&FieldDef> {
        self.field(name).ok_or_else(|| TandemError::FieldNotFound {
            model: self.name.clone(),
            field: name.to_string(),
        })
    }

    pub fn primary_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.primary)
    }

    pub fn shard_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.shard_key)
    }

    /// Fields whose values form cache/document identity keys: declared
    /// shard-key fields when present, primary-key fields otherwise.
    pub fn key_fields(&self) -> Vec<&FieldDef> {
        let shard: Vec<&FieldDef> = self.shard_fields().collect();
        if shard.is_empty() {
            self.primary_fields().collect()
        } else {
            shard
        }
    }

    /// Registration-time validation.
    pub fn validate(&self) -> TandemResult<()> {
        if self.primary_fields().next().is_none() {
            return Err(TandemError::Configuration(format!(
                "model '{}' has no primary field",
                self.name
            )));
        }
        if self.durable.kind == BackendKind::SqlShard {
            let mut shard_fields = self.shard_fields().peekable();
            if shard_fields.peek().is_none() {
                return Err(TandemError::Configuration(format!(
                    "sharded model '{}' declares no shard-key field",
                    self.name
                )));
            }
            for field in shard_fields {
                if !field.ty.is_scalar() {
                    return Err(TandemError::Configuration(format!(
                        "shard-key field '{}.{}' must be scalar, got {}",
                        self.name,
                        field.name,
                        field.ty.name()
                    )));
                }
            }
        }
        for target in self.upgrades.keys() {
            if *target > self.version || *target < 2 {
                return Err(TandemError::Configuration(format!(
                    "model '{}' registers an upgrade to version {} outside 2..={}",
                    self.name, target, self.version
                )));
            }
        }
        Ok(())
    }
}

/// Builder returned by [`ModelDef::new`].
pub struct ModelDefBuilder {
    name: String,
    fields: Vec<FieldDef>,
    durable: Option<DurableBinding>,
    cache: Option<CacheBinding>,
    version: u32,
    upgrades: BTreeMap<u32, UpgradeFn>,
}

impl ModelDefBuilder {
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn durable(mut self, kind: BackendKind, table: &str, connection: &str) -> Self {
        self.durable = Some(DurableBinding {
            kind,
            table: table.to_string(),
            connection: connection.to_string(),
        });
        self
    }

    pub fn cache(mut self, kind: BackendKind, namespace: &str) -> Self {
        self.cache = Some(CacheBinding {
            kind,
            namespace: namespace.to_string(),
        });
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Registers the upgrade migrating `target - 1` → `target`.
    pub fn upgrade<F>(mut self, target: u32, f: F) -> Self
    where
        F: Fn(&mut Row) -> TandemResult<()> + Send + Sync + 'static,
    {
        self.upgrades.insert(target, Arc::new(f));
        self
    }

    pub fn build(self) -> TandemResult<ModelDef> {
        let durable = self.durable.ok_or_else(|| {
            TandemError::Configuration(format!("model '{}' has no durable binding", self.name))
        })?;
        let model = ModelDef {
            name: self.name,
            fields: self.fields,
            durable,
            cache: self.cache,
            version: self.version,
            upgrades: self.upgrades,
        };
        model.validate()?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ModelDefBuilder {
        ModelDef::new("Item")
            .field(FieldDef::new("id", FieldType::Number).primary().auto_increment())
            .field(FieldDef::new("name", FieldType::String))
    }

    #[test]
    fn test_build_minimal_model() {
        let model = base().durable(BackendKind::Sql, "item", "main").build().unwrap();
        assert_eq!(model.name, "Item");
        assert_eq!(model.fields.len(), 2);
        assert!(model.field("id").unwrap().primary);
    }

    #[test]
    fn test_primary_field_required() {
        let err = ModelDef::new("NoPk")
            .field(FieldDef::new("name", FieldType::String))
            .durable(BackendKind::Sql, "no_pk", "main")
            .build()
            .unwrap_err();
        assert!(matches!(err, TandemError::Configuration(_)));
    }

    #[test]
    fn test_sharded_model_requires_scalar_shard_key() {
        let err = ModelDef::new("Sharded")
            .field(FieldDef::new("id", FieldType::Number).primary())
            .durable(BackendKind::SqlShard, "sharded", "main")
            .build()
            .unwrap_err();
        assert!(matches!(err, TandemError::Configuration(_)));

        let err = ModelDef::new("Sharded")
            .field(FieldDef::new("id", FieldType::Number).primary())
            .field(FieldDef::new("tags", FieldType::Array).shard_key())
            .durable(BackendKind::SqlShard, "sharded", "main")
            .build()
            .unwrap_err();
        assert!(matches!(err, TandemError::Configuration(_)));
    }

    #[test]
    fn test_upgrade_targets_validated() {
        let err = base()
            .durable(BackendKind::Sql, "item", "main")
            .version(2)
            .upgrade(5, |_| Ok(()))
            .build()
            .unwrap_err();
        assert!(matches!(err, TandemError::Configuration(_)));
    }

    #[test]
    fn test_key_fields_fall_back_to_primary() {
        let model = base().durable(BackendKind::Sql, "item", "main").build().unwrap();
        let keys: Vec<&str> = model.key_fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(keys, vec!["id"]);
    }
}
