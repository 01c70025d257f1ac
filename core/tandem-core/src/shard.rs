//! Shard routing.
//!
//! A sharded model's records are distributed over a fixed set of
//! physical partitions. The route is a pure function of the record's
//! shard-key values: the colon-joined key segments are crc32-hashed and
//! reduced modulo the shard count, so the same key always lands on the
//! same partition and rebalancing is not supported.

use crate::error::{TandemError, TandemResult};
use crate::record::Record;

/// Deterministic key-to-partition router.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    count: usize,
}

impl ShardRouter {
    pub fn new(count: usize) -> TandemResult<Self> {
        if count == 0 {
            return Err(TandemError::Configuration(
                "shard count must be at least 1".to_string(),
            ));
        }
        Ok(Self { count })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Partition index for a raw key string.
    pub fn route_key(&self, key: &str) -> usize {
        crc32fast::hash(key.as_bytes()) as usize % self.count
    }

    /// Partition index for a record, from its shard-key values in
    /// declaration order. Unset key fields are an error: routing before
    /// the key is known would scatter the record.
    pub fn route(&self, record: &Record) -> TandemResult<usize> {
        let mut key = String::new();
        for (name, value) in record.key_values() {
            if value.is_null() {
                return Err(TandemError::store(
                    "route",
                    &record.model().name,
                    format!("shard-key field '{name}' is unset"),
                ));
            }
            if !key.is_empty() {
                key.push(':');
            }
            key.push_str(&value.key_segment()?);
        }
        Ok(self.route_key(&key))
    }

    /// All partition indices, for fan-out operations.
    pub fn partitions(&self) -> impl Iterator<Item = usize> {
        0..self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, ModelDef};
    use crate::store::BackendKind;
    use crate::value::FieldType;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn sharded_model() -> Arc<ModelDef> {
        Arc::new(
            ModelDef::new("Equip")
                .field(FieldDef::new("id", FieldType::Number).primary())
                .field(FieldDef::new("role_id", FieldType::Number).shard_key())
                .durable(BackendKind::SqlShard, "equip", "main")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_zero_shards_rejected() {
        assert!(ShardRouter::new(0).is_err());
    }

    #[test]
    fn test_route_is_stable() {
        let router = ShardRouter::new(4).unwrap();
        let record = Record::new(sharded_model());
        record.set("role_id", 42i64).unwrap();
        let first = router.route(&record).unwrap();
        for _ in 0..10 {
            assert_eq!(router.route(&record).unwrap(), first);
        }
    }

    #[test]
    fn test_route_requires_key() {
        let router = ShardRouter::new(4).unwrap();
        let record = Record::new(sharded_model());
        assert!(router.route(&record).is_err());
    }

    #[test]
    fn test_single_shard_takes_everything() {
        let router = ShardRouter::new(1).unwrap();
        for key in ["a", "b", "c", "1:2:3"] {
            assert_eq!(router.route_key(key), 0);
        }
    }

    proptest! {
        #[test]
        fn test_route_always_in_range(key in ".*", count in 1usize..64) {
            let router = ShardRouter::new(count).unwrap();
            prop_assert!(router.route_key(&key) < count);
        }

        #[test]
        fn test_same_key_same_shard(key in ".*", count in 1usize..64) {
            let router = ShardRouter::new(count).unwrap();
            prop_assert_eq!(router.route_key(&key), router.route_key(&key));
        }
    }
}
