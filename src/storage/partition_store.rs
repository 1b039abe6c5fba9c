use std::path::{Path, PathBuf};

use fjall::{Config, PartitionCreateOptions, TransactionalKeyspace, TransactionalPartitionHandle};

use crate::errors::EngineResult;

const MAIN_PARTITION: &str = "main";

/// A single table partition backed by its own `fjall` keyspace directory.
///
/// Every logical partition (tier/namespace/name/index) owns one keyspace
/// on disk with a single `fjall` partition named `main`; the outer
/// partitioning is done at the filesystem level rather than by fjall.
pub struct PartitionStore {
    path: PathBuf,
    keyspace: TransactionalKeyspace,
    handle: TransactionalPartitionHandle,
}

impl PartitionStore {
    pub fn open(path: &Path) -> EngineResult<PartitionStore> {
        std::fs::create_dir_all(path).map_err(|e| {
            crate::errors::EngineError::InvalidEnvironment {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        let keyspace = Config::new(path).open_transactional()?;
        let handle = keyspace.open_partition(MAIN_PARTITION, PartitionCreateOptions::default())?;
        Ok(PartitionStore {
            path: path.to_path_buf(),
            keyspace,
            handle,
        })
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let mut tx = self.keyspace.write_tx();
        tx.insert(&self.handle, key, value);
        tx.commit()?;
        Ok(())
    }

    /// Inserts `key` only if absent. Returns whether the insert happened.
    pub fn put_if_absent(&self, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        let mut tx = self.keyspace.write_tx();
        if tx.get(&self.handle, key)?.is_some() {
            // Dropping the transaction without committing discards the read
            // lock without writing anything.
            return Ok(false);
        }
        tx.insert(&self.handle, key, value);
        tx.commit()?;
        Ok(true)
    }

    /// Inserts every entry in `entries` as one atomic transaction: either
    /// all of them land, or (on error) none do.
    pub fn put_all<I>(&self, entries: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let mut tx = self.keyspace.write_tx();
        for (key, value) in entries {
            tx.insert(&self.handle, key, value);
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let tx = self.keyspace.read_tx();
        Ok(tx.get(&self.handle, key)?.map(|v| v.to_vec()))
    }

    pub fn delete(&self, key: &[u8]) -> EngineResult<()> {
        let mut tx = self.keyspace.write_tx();
        tx.remove(&self.handle, key);
        tx.commit()?;
        Ok(())
    }

    pub fn count(&self) -> EngineResult<u64> {
        let tx = self.keyspace.read_tx();
        Ok(tx.len(&self.handle)? as u64)
    }

    /// Empties every entry from the partition without removing the
    /// keyspace itself from disk.
    pub fn clear(&self) -> EngineResult<()> {
        let mut tx = self.keyspace.write_tx();
        let keys: Vec<Vec<u8>> = tx
            .iter(&self.handle)
            .map(|kv| kv.map(|(k, _)| k.to_vec()))
            .collect::<Result<_, _>>()?;
        for key in keys {
            tx.remove(&self.handle, key);
        }
        tx.commit()?;
        Ok(())
    }

    /// A cursor over all entries in ascending key order.
    pub fn cursor(&self) -> EngineResult<PartitionCursor> {
        let tx = self.keyspace.read_tx();
        let mut entries = Vec::new();
        for kv in tx.iter(&self.handle) {
            let (k, v) = kv?;
            entries.push((k.to_vec(), v.to_vec()));
        }
        Ok(PartitionCursor {
            entries: entries.into_iter(),
        })
    }

    pub fn first(&self) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>> {
        let tx = self.keyspace.read_tx();
        Ok(tx
            .iter(&self.handle)
            .next()
            .transpose()?
            .map(|(k, v)| (k.to_vec(), v.to_vec())))
    }

    pub fn take(&self, n: usize) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let tx = self.keyspace.read_tx();
        let mut out = Vec::with_capacity(n);
        for kv in tx.iter(&self.handle).take(n) {
            let (k, v) = kv?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drops the partition's handles and removes it from disk.
    pub fn destroy(self) -> EngineResult<()> {
        let path = self.path.clone();
        drop(self);
        if path.exists() {
            std::fs::remove_dir_all(&path).map_err(|e| crate::errors::EngineError::Io {
                path,
                source: e,
            })?;
        }
        Ok(())
    }
}

/// Ascending iterator over a partition's entries, materialized at the
/// time the cursor is opened: a consistent read snapshot for the life of
/// the cursor.
pub struct PartitionCursor {
    entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for PartitionCursor {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::open(dir.path()).unwrap();
        store.put(b"k1", b"v1").unwrap();
        assert_eq!(store.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        store.delete(b"k1").unwrap();
        assert_eq!(store.get(b"k1").unwrap(), None);
    }

    #[test]
    fn put_if_absent_only_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::open(dir.path()).unwrap();
        assert!(store.put_if_absent(b"k1", b"v1").unwrap());
        assert!(!store.put_if_absent(b"k1", b"v2").unwrap());
        assert_eq!(store.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn cursor_yields_entries_in_ascending_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::open(dir.path()).unwrap();
        for k in ["c", "a", "b"] {
            store.put(k.as_bytes(), b"x").unwrap();
        }
        let keys: Vec<Vec<u8>> = store.cursor().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn put_all_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::open(dir.path()).unwrap();
        store
            .put_all(vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())])
            .unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn clear_empties_the_partition_without_removing_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::open(dir.path()).unwrap();
        store.put(b"a", b"1").unwrap();
        store.put(b"b", b"2").unwrap();
        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(dir.path().exists());
    }

    #[test]
    fn destroy_removes_the_partition_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p0");
        let store = PartitionStore::open(&path).unwrap();
        store.put(b"a", b"1").unwrap();
        store.destroy().unwrap();
        assert!(!path.exists());
    }
}
