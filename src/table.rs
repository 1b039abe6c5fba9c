use std::path::{Path, PathBuf};
use std::sync::Arc;

use itertools::Itertools;

use crate::collect::MergeCollector;
use crate::errors::{EngineError, EngineResult};
use crate::hash::partition_for_key;
use crate::ids::{Operand, StoreTier, TableId};
use crate::meta::MetaRegistry;
use crate::observability::metrics;
use crate::storage::{PartitionStore, StorageHandleCache};
use crate::value::{self, Value};

/// Input to `EngineContext::parallelize`: either caller-supplied `(key,
/// value)` pairs (`include_key = true`), or bare values that get synthetic
/// integer keys assigned by enumeration (`include_key = false`).
pub enum ParallelizeInput {
    Keyed(Vec<(Value, Value)>),
    Values(Vec<Value>),
}

impl ParallelizeInput {
    pub(crate) fn into_entries(self) -> Vec<(Value, Value)> {
        match self {
            ParallelizeInput::Keyed(pairs) => pairs,
            ParallelizeInput::Values(values) => values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i as i64), v))
                .collect(),
        }
    }
}

/// A partitioned key-value table: the unit every operator reads from and
/// writes to.
///
/// Partition count is fixed at construction and recorded in the meta
/// registry the first time a given `(tier, namespace, name)` is opened;
/// later callers requesting a different count for the same table are
/// silently handed back the registered count, matching `put_if_absent`
/// semantics on the meta table.
#[derive(Clone)]
pub struct Table {
    data_dir: PathBuf,
    cache: Arc<StorageHandleCache>,
    meta: Arc<MetaRegistry>,
    id: TableId,
    partitions: u64,
    /// Default batch size for the convenience `put_all` overload; set from
    /// `Options::chunk_size` at construction.
    chunk_size: usize,
}

impl Table {
    pub fn open(
        data_dir: &Path,
        cache: Arc<StorageHandleCache>,
        meta: Arc<MetaRegistry>,
        name: impl Into<String>,
        namespace: impl Into<String>,
        partitions: u64,
        persistent: bool,
        chunk_size: usize,
    ) -> EngineResult<Table> {
        if partitions < 1 {
            return Err(EngineError::InvalidArgument(
                "partitions must be a positive number".to_string(),
            ));
        }
        let tier = if persistent {
            StoreTier::Persistent
        } else {
            StoreTier::InMemory
        };
        let id = TableId::new(tier, namespace, name);
        let partitions = meta.register(&id, partitions)?;
        metrics::TABLES_OPENED.inc();
        log::debug!("opened table {}.{}.{} ({partitions} partitions)", id.tier, id.namespace, id.name);
        Ok(Table {
            data_dir: data_dir.to_path_buf(),
            cache,
            meta,
            id,
            partitions,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn id(&self) -> &TableId {
        &self.id
    }

    pub fn partitions(&self) -> u64 {
        self.partitions
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn operand(&self, partition: u64) -> Operand {
        Operand::new(self.id.clone(), partition)
    }

    pub(crate) fn store_for_partition(&self, p: u64) -> EngineResult<Arc<PartitionStore>> {
        let path = self.id.partition_dir(&self.data_dir, p);
        self.cache.get_or_open(&path)
    }

    fn store_for_key(&self, key_bytes: &[u8]) -> EngineResult<(u64, Arc<PartitionStore>)> {
        let p = partition_for_key(key_bytes, self.partitions)?;
        Ok((p, self.store_for_partition(p)?))
    }

    pub fn put(&self, key: &Value, val: &Value, use_serialize: bool) -> EngineResult<()> {
        let k = value::encode(key, use_serialize)?;
        let v = value::encode(val, use_serialize)?;
        let (_, store) = self.store_for_key(&k)?;
        store.put(&k, &v)
    }

    /// Returns whether the value was written (i.e. `key` was absent).
    pub fn put_if_absent(&self, key: &Value, val: &Value, use_serialize: bool) -> EngineResult<bool> {
        let k = value::encode(key, use_serialize)?;
        let v = value::encode(val, use_serialize)?;
        let (_, store) = self.store_for_key(&k)?;
        store.put_if_absent(&k, &v)
    }

    pub fn get(&self, key: &Value, use_serialize: bool) -> EngineResult<Option<Value>> {
        let k = value::encode(key, use_serialize)?;
        let (_, store) = self.store_for_key(&k)?;
        store
            .get(&k)?
            .map(|bytes| value::decode(&bytes, use_serialize))
            .transpose()
    }

    pub fn delete(&self, key: &Value, use_serialize: bool) -> EngineResult<Option<Value>> {
        let k = value::encode(key, use_serialize)?;
        let (_, store) = self.store_for_key(&k)?;
        let old = store.get(&k)?;
        store.delete(&k)?;
        old.map(|bytes| value::decode(&bytes, use_serialize)).transpose()
    }

    pub fn count(&self) -> EngineResult<u64> {
        let mut total = 0;
        for p in 0..self.partitions {
            total += self.store_for_partition(p)?.count()?;
        }
        Ok(total)
    }

    /// Bulk ingest, convenience overload that batches at this table's
    /// configured `Options::chunk_size` (see [`Table::put_all_chunked`]).
    pub fn put_all<I>(&self, entries: I, use_serialize: bool) -> EngineResult<()>
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        self.put_all_chunked(entries, self.chunk_size, use_serialize)
    }

    /// Bulk ingest. The input is consumed in batches of at most
    /// `chunk_size` entries so memory stays bounded even for an iterator
    /// backed by a large external source; each batch is bucketed by
    /// destination partition and flushed to that partition's store as one
    /// transaction. A hashing/encoding failure aborts before any partition
    /// in the current batch is touched, but once writing starts each
    /// partition commits independently: a best-effort all-or-nothing, not a
    /// cross-partition atomic commit.
    pub fn put_all_chunked<I>(&self, entries: I, chunk_size: usize, use_serialize: bool) -> EngineResult<()>
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        let chunk_size = chunk_size.max(1);
        let iter = entries.into_iter();
        for chunk in &iter.chunks(chunk_size) {
            let mut buckets: Vec<Vec<(Vec<u8>, Vec<u8>)>> =
                (0..self.partitions).map(|_| Vec::new()).collect();
            for (k, v) in chunk {
                let k_bytes = value::encode(&k, use_serialize)?;
                let v_bytes = value::encode(&v, use_serialize)?;
                let p = partition_for_key(&k_bytes, self.partitions)? as usize;
                buckets[p].push((k_bytes, v_bytes));
            }
            for (p, batch) in buckets.into_iter().enumerate() {
                if batch.is_empty() {
                    continue;
                }
                self.store_for_partition(p as u64)?.put_all(batch)?;
            }
        }
        Ok(())
    }

    /// Ascending-key union of every partition, decoded lazily.
    pub fn collect(
        &self,
        use_serialize: bool,
    ) -> EngineResult<impl Iterator<Item = EngineResult<(Value, Value)>>> {
        let mut cursors = Vec::with_capacity(self.partitions as usize);
        for p in 0..self.partitions {
            cursors.push(self.store_for_partition(p)?.cursor()?);
        }
        Ok(MergeCollector::new(cursors).map(move |(k, v)| {
            Ok((
                value::decode(&k, use_serialize)?,
                value::decode(&v, use_serialize)?,
            ))
        }))
    }

    pub fn take(&self, n: usize, use_serialize: bool) -> EngineResult<Vec<(Value, Value)>> {
        let n = n.max(1);
        let mut out = Vec::with_capacity(n);
        for item in self.collect(use_serialize)? {
            out.push(item?);
            if out.len() == n {
                break;
            }
        }
        Ok(out)
    }

    pub fn first(&self, use_serialize: bool) -> EngineResult<Option<(Value, Value)>> {
        Ok(self.take(1, use_serialize)?.into_iter().next())
    }

    /// Copies this table's contents into a new persistent table, optionally
    /// repartitioned.
    pub fn save_as(
        &self,
        name: impl Into<String>,
        namespace: impl Into<String>,
        partitions: Option<u64>,
        use_serialize: bool,
    ) -> EngineResult<Table> {
        let partitions = partitions.unwrap_or(self.partitions);
        let dup = Table::open(
            &self.data_dir,
            Arc::clone(&self.cache),
            Arc::clone(&self.meta),
            name,
            namespace,
            partitions,
            true,
            self.chunk_size,
        )?;
        let entries: Vec<(Value, Value)> = self.collect(use_serialize)?.collect::<EngineResult<_>>()?;
        dup.put_all(entries, use_serialize)?;
        Ok(dup)
    }

    /// Drops every partition's storage and this table's meta registration.
    pub fn destroy(self) -> EngineResult<()> {
        for p in 0..self.partitions {
            let path = self.id.partition_dir(&self.data_dir, p);
            self.cache.evict(&path);
            if path.exists() {
                std::fs::remove_dir_all(&path)
                    .map_err(|e| EngineError::Io { path: path.clone(), source: e })?;
            }
        }
        self.meta.unregister(&self.id)?;
        let table_dir = self.id.table_dir(&self.data_dir);
        if table_dir.exists() {
            let _ = std::fs::remove_dir_all(&table_dir);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness() -> (tempfile::TempDir, Arc<StorageHandleCache>, Arc<MetaRegistry>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(StorageHandleCache::new(64));
        let meta = Arc::new(MetaRegistry::open(dir.path(), Arc::clone(&cache)));
        (dir, cache, meta)
    }

    #[test]
    fn put_get_delete_round_trip_through_serialization() {
        let (dir, cache, meta) = harness();
        let table = Table::open(dir.path(), cache, meta, "t1", "ns", 4, true, 100_000).unwrap();
        let key = Value::Str("hello".into());
        let val = Value::Int(42);
        table.put(&key, &val, true).unwrap();
        assert_eq!(table.get(&key, true).unwrap(), Some(val.clone()));
        assert_eq!(table.delete(&key, true).unwrap(), Some(val));
        assert_eq!(table.get(&key, true).unwrap(), None);
    }

    #[test]
    fn reopening_same_identity_keeps_original_partition_count() {
        let (dir, cache, meta) = harness();
        let a = Table::open(dir.path(), Arc::clone(&cache), Arc::clone(&meta), "t1", "ns", 4, true, 100_000).unwrap();
        let b = Table::open(dir.path(), cache, meta, "t1", "ns", 999, true, 100_000).unwrap();
        assert_eq!(a.partitions(), 4);
        assert_eq!(b.partitions(), 4);
    }

    #[test]
    fn collect_returns_entries_in_ascending_key_order_across_partitions() {
        let (dir, cache, meta) = harness();
        let table = Table::open(dir.path(), cache, meta, "t1", "ns", 4, true, 100_000).unwrap();
        let entries: Vec<(Value, Value)> = (0..20)
            .map(|i| (Value::Int(i), Value::Int(i * 10)))
            .collect();
        table.put_all(entries, true).unwrap();
        let collected: Vec<i64> = table
            .collect(true)
            .unwrap()
            .map(|r| match r.unwrap().0 {
                Value::Int(n) => n,
                _ => unreachable!(),
            })
            .collect();
        let mut sorted = collected.clone();
        sorted.sort();
        assert_eq!(collected, sorted);
        assert_eq!(collected.len(), 20);
    }

    #[test]
    fn destroy_removes_meta_registration() {
        let (dir, cache, meta) = harness();
        let table = Table::open(dir.path(), cache, Arc::clone(&meta), "t1", "ns", 2, true, 100_000).unwrap();
        let id = table.id().clone();
        table.destroy().unwrap();
        assert_eq!(meta.lookup(&id).unwrap(), None);
    }
}
