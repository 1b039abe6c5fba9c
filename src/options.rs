use std::path::PathBuf;

/// Engine-wide configuration, supplied once to `EngineContext::new`.
#[derive(Debug, Clone)]
pub struct Options {
    /// Root directory under which `LMDB/` and `IN_MEMORY/` table trees live.
    pub data_dir: PathBuf,
    /// Job identifier embedded in generated unique ids; a random one is
    /// assigned if left unset.
    pub job_id: Option<String>,
    /// Worker pool size for operator fan-out.
    pub threads: usize,
    /// Maximum number of open partition storage handles kept around.
    pub storage_cache_capacity: usize,
    /// Row batch size used when ingesting an iterator via `put_all`.
    pub chunk_size: usize,
    pub create_if_missing: bool,
    pub error_if_exist: bool,
    /// Whether `parallelize`-style ingestion treats its input as `(k, v)`
    /// pairs already, versus enumerating and synthesizing integer keys.
    pub include_key: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            data_dir: PathBuf::from("data"),
            job_id: None,
            threads: num_cpus::get(),
            storage_cache_capacity: 64,
            chunk_size: 100_000,
            create_if_missing: true,
            error_if_exist: false,
            include_key: false,
        }
    }
}
