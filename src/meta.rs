use std::path::Path;
use std::sync::Arc;

use crate::errors::EngineResult;
use crate::hash::partition_for_key;
use crate::ids::{StoreTier, TableId};
use crate::storage::StorageHandleCache;
use crate::value::Value;

/// Fixed partition count of the well-known meta table.
const META_PARTITIONS: u64 = 10;

/// Registry of `(tier, namespace, name) -> partitionCount` mappings.
///
/// This is itself a regular partitioned table -- `tier=Persistent`,
/// `namespace="__META__"`, `name="__META__"` -- but it is bootstrapped
/// directly against the storage layer rather than through `Table`, since
/// every `Table` registers itself here on construction.
pub struct MetaRegistry {
    data_dir: std::path::PathBuf,
    cache: Arc<StorageHandleCache>,
    id: TableId,
}

impl MetaRegistry {
    pub fn open(data_dir: &Path, cache: Arc<StorageHandleCache>) -> MetaRegistry {
        MetaRegistry {
            data_dir: data_dir.to_path_buf(),
            cache,
            id: TableId::new(StoreTier::Persistent, "__META__", "__META__"),
        }
    }

    /// Registers `table`'s partition count if it isn't already registered,
    /// returning the partition count now on file (the caller's count if
    /// this was the first registration, otherwise whatever was already
    /// there).
    pub fn register(&self, table: &TableId, partitions: u64) -> EngineResult<u64> {
        let key = table.meta_key();
        let store = self.store_for_key(key.as_bytes())?;
        let encoded = Value::Int(partitions as i64).encode()?;
        store.put_if_absent(key.as_bytes(), &encoded)?;
        let current = store
            .get(key.as_bytes())?
            .expect("just wrote this key via put_if_absent");
        match Value::decode(&current)? {
            Value::Int(n) => Ok(n as u64),
            other => unreachable!("meta registry holds a non-integer value: {other:?}"),
        }
    }

    pub fn unregister(&self, table: &TableId) -> EngineResult<()> {
        let key = table.meta_key();
        let store = self.store_for_key(key.as_bytes())?;
        store.delete(key.as_bytes())
    }

    pub fn lookup(&self, table: &TableId) -> EngineResult<Option<u64>> {
        let key = table.meta_key();
        let store = self.store_for_key(key.as_bytes())?;
        match store.get(key.as_bytes())? {
            None => Ok(None),
            Some(bytes) => match Value::decode(&bytes)? {
                Value::Int(n) => Ok(Some(n as u64)),
                other => unreachable!("meta registry holds a non-integer value: {other:?}"),
            },
        }
    }

    fn store_for_key(&self, key: &[u8]) -> EngineResult<Arc<crate::storage::PartitionStore>> {
        let partition = partition_for_key(key, META_PARTITIONS)?;
        let path = self.id.partition_dir(&self.data_dir, partition);
        self.cache.get_or_open(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, MetaRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(StorageHandleCache::new(16));
        let registry = MetaRegistry::open(dir.path(), cache);
        (dir, registry)
    }

    #[test]
    fn first_registration_wins() {
        let (_dir, registry) = registry();
        let table = TableId::new(StoreTier::Persistent, "ns", "t1");
        assert_eq!(registry.register(&table, 4).unwrap(), 4);
        assert_eq!(registry.register(&table, 99).unwrap(), 4);
        assert_eq!(registry.lookup(&table).unwrap(), Some(4));
    }

    #[test]
    fn unknown_table_is_unregistered() {
        let (_dir, registry) = registry();
        let table = TableId::new(StoreTier::InMemory, "ns", "missing");
        assert_eq!(registry.lookup(&table).unwrap(), None);
    }
}
