use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::errors::{EngineError, EngineResult};
use crate::glob;
use crate::ids::{StoreTier, TableId};
use crate::meta::MetaRegistry;
use crate::options::Options;
use crate::scheduler::WorkerPool;
use crate::storage::StorageHandleCache;
use crate::table::{ParallelizeInput, Table};

static GLOBAL: OnceLock<Arc<EngineContext>> = OnceLock::new();

/// Process-wide engine handle: the storage cache, meta registry, and
/// worker pool every table and operator is built against.
///
/// Construction is always explicit (`EngineContext::new`); `install` is a
/// thin convenience layer on top for call sites that can't thread a
/// reference through (e.g. the CLI), not a requirement for using the
/// engine at all.
pub struct EngineContext {
    data_dir: PathBuf,
    job_id: String,
    host_name: String,
    host_ip: String,
    cache: Arc<StorageHandleCache>,
    meta: Arc<MetaRegistry>,
    pool: Arc<WorkerPool>,
    options: Options,
}

impl EngineContext {
    pub fn new(options: &Options) -> EngineResult<Arc<EngineContext>> {
        std::fs::create_dir_all(&options.data_dir).map_err(|e| EngineError::InvalidEnvironment {
            path: options.data_dir.clone(),
            reason: e.to_string(),
        })?;
        for tier in [StoreTier::Persistent, StoreTier::InMemory] {
            std::fs::create_dir_all(options.data_dir.join(tier.dir_tag())).map_err(|e| {
                EngineError::InvalidEnvironment {
                    path: options.data_dir.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        let cache = Arc::new(StorageHandleCache::new(options.storage_cache_capacity));
        let meta = Arc::new(MetaRegistry::open(&options.data_dir, Arc::clone(&cache)));
        let pool = Arc::new(WorkerPool::new(options.threads));
        let (host_name, host_ip) = resolve_host_identity();
        let job_id = options
            .job_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Arc::new(EngineContext {
            data_dir: options.data_dir.clone(),
            job_id,
            host_name,
            host_ip,
            cache,
            meta,
            pool,
            options: options.clone(),
        }))
    }

    /// Installs `self` as the process-wide default, returned unchanged so
    /// the caller can keep using the `Arc` it built.
    pub fn install(self: Arc<Self>) -> Arc<EngineContext> {
        let _ = GLOBAL.set(Arc::clone(&self));
        self
    }

    pub fn current() -> EngineResult<Arc<EngineContext>> {
        GLOBAL.get().cloned().ok_or(EngineError::NotInitialised)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn meta(&self) -> &Arc<MetaRegistry> {
        &self.meta
    }

    pub fn cache(&self) -> &Arc<StorageHandleCache> {
        &self.cache
    }

    pub fn table(
        &self,
        name: impl Into<String>,
        namespace: impl Into<String>,
        partitions: u64,
        persistent: bool,
    ) -> EngineResult<Table> {
        Table::open(
            &self.data_dir,
            Arc::clone(&self.cache),
            Arc::clone(&self.meta),
            name,
            namespace,
            partitions,
            persistent,
            self.options.chunk_size,
        )
    }

    /// Materialises `data` into a fresh table, one entry per input item.
    /// `ParallelizeInput::Values` synthesizes integer keys by enumeration;
    /// `ParallelizeInput::Keyed` uses the caller-supplied keys directly --
    /// the same `include_key` switch the engine's config exposes. `name`
    /// defaults to a fresh unique id, `namespace` to this context's job id,
    /// and `chunk_size` to `Options::chunk_size`.
    pub fn parallelize(
        &self,
        data: ParallelizeInput,
        name: Option<String>,
        namespace: Option<String>,
        partitions: u64,
        persistent: bool,
        chunk_size: Option<usize>,
        use_serialize: bool,
    ) -> EngineResult<Table> {
        let name = name.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let namespace = namespace.unwrap_or_else(|| self.job_id.clone());
        let table = self.table(name, namespace, partitions, persistent)?;
        let chunk_size = chunk_size.unwrap_or(self.options.chunk_size);
        table.put_all_chunked(data.into_entries(), chunk_size, use_serialize)?;
        Ok(table)
    }

    /// Produces a `_Engine_{jobId}_{host}_{hostIP}_{epochSeconds:.20f}_{rand}` identifier.
    pub fn generate_unique_id(&self) -> String {
        let mut rng = rand::rng();
        let suffix: u32 = rng.random_range(10_000..=99_999);
        let epoch_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        format!(
            "_Engine_{}_{}_{}_{:.20}_{}",
            self.job_id, self.host_name, self.host_ip, epoch_seconds, suffix
        )
    }

    /// Deletes every table directory under `{dataDir}/{tier}/{namespace}`
    /// whose name matches the glob `pattern`, including its meta
    /// registration.
    pub fn cleanup(&self, pattern: &str, namespace: &str, persistent: bool) -> EngineResult<()> {
        if namespace.is_empty() || pattern.is_empty() {
            return Err(EngineError::InvalidArgument(
                "neither name nor namespace can be blank".to_string(),
            ));
        }

        let tier = if persistent {
            StoreTier::Persistent
        } else {
            StoreTier::InMemory
        };
        let base_dir = self.data_dir.join(tier.dir_tag());
        if !base_dir.is_dir() {
            return Err(EngineError::InvalidEnvironment {
                path: base_dir,
                reason: "illegal data directory for engine".to_string(),
            });
        }
        let namespace_dir = base_dir.join(namespace);
        if !namespace_dir.is_dir() {
            return Err(EngineError::InvalidEnvironment {
                path: namespace_dir,
                reason: "namespace does not exist".to_string(),
            });
        }

        let entries = std::fs::read_dir(&namespace_dir).map_err(|e| EngineError::Io {
            path: namespace_dir.clone(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Io {
                path: namespace_dir.clone(),
                source: e,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !glob::matches(pattern, &name) {
                continue;
            }
            let table_dir = entry.path();
            self.meta
                .unregister(&TableId::new(tier, namespace, name))?;
            std::fs::remove_dir_all(&table_dir).map_err(|e| EngineError::Io {
                path: table_dir,
                source: e,
            })?;
        }
        Ok(())
    }
}

fn resolve_host_identity() -> (String, String) {
    let host_name = gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown".to_string());
    let host_ip = std::net::ToSocketAddrs::to_socket_addrs(&(host_name.as_str(), 0u16))
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    (host_name, host_ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn context() -> (tempfile::TempDir, Arc<EngineContext>) {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        options.data_dir = dir.path().to_path_buf();
        options.threads = 2;
        let ctx = EngineContext::new(&options).unwrap();
        (dir, ctx)
    }

    #[test]
    fn rejects_blank_name_or_namespace_on_cleanup() {
        let (_dir, ctx) = context();
        assert!(ctx.cleanup("*", "", true).is_err());
        assert!(ctx.cleanup("", "ns", true).is_err());
    }

    #[test]
    fn cleanup_removes_matching_tables_and_their_meta_entry() {
        let (_dir, ctx) = context();
        let table = ctx.table("job_1", "ns", 2, true).unwrap();
        let id = table.id().clone();
        ctx.cleanup("job_*", "ns", true).unwrap();
        assert_eq!(ctx.meta().lookup(&id).unwrap(), None);
        assert!(!table.data_dir().join("LMDB").join("ns").join("job_1").exists());
    }

    #[test]
    fn generate_unique_id_is_stable_in_shape_and_varies_per_call() {
        let (_dir, ctx) = context();
        let a = ctx.generate_unique_id();
        let b = ctx.generate_unique_id();
        assert!(a.starts_with("_Engine_"));
        assert_ne!(a, b);
    }

    #[test]
    fn parallelize_enumerates_bare_values() {
        let (_dir, ctx) = context();
        let values = vec![Value::Str("a".into()), Value::Str("b".into()), Value::Str("c".into())];
        let table = ctx
            .parallelize(ParallelizeInput::Values(values), None, None, 2, false, None, true)
            .unwrap();
        let mut entries: Vec<(Value, Value)> = table.collect(true).unwrap().map(|r| r.unwrap()).collect();
        entries.sort_by_key(|(k, _)| match k {
            Value::Int(n) => *n,
            _ => unreachable!(),
        });
        assert_eq!(
            entries,
            vec![
                (Value::Int(0), Value::Str("a".into())),
                (Value::Int(1), Value::Str("b".into())),
                (Value::Int(2), Value::Str("c".into())),
            ]
        );
    }

    #[test]
    fn parallelize_keeps_caller_supplied_keys() {
        let (_dir, ctx) = context();
        let pairs = vec![
            (Value::Str("x".into()), Value::Int(1)),
            (Value::Str("y".into()), Value::Int(2)),
        ];
        let table = ctx
            .parallelize(ParallelizeInput::Keyed(pairs), None, None, 2, false, None, true)
            .unwrap();
        assert_eq!(table.get(&Value::Str("x".into()), true).unwrap(), Some(Value::Int(1)));
        assert_eq!(table.get(&Value::Str("y".into()), true).unwrap(), Some(Value::Int(2)));
    }
}
