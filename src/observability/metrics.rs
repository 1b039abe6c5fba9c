use prometheus::{register_counter, register_gauge};
use prometheus::{Counter, Gauge};

lazy_static! {
    pub static ref TABLES_OPENED: Counter =
        register_counter!("engine_tables_opened", "Number of Table::open calls").unwrap();
    pub static ref TASKS_SUBMITTED: Counter = register_counter!(
        "engine_tasks_submitted",
        "Number of per-partition worker tasks submitted"
    )
    .unwrap();
    pub static ref TASKS_FAILED: Counter = register_counter!(
        "engine_tasks_failed",
        "Number of per-partition worker tasks that returned an error"
    )
    .unwrap();
    pub static ref WORKER_POOL_THREADS: Gauge = register_gauge!(
        "engine_worker_pool_threads",
        "Configured size of the worker thread pool"
    )
    .unwrap();
    pub static ref STORAGE_CACHE_HITS: Counter = register_counter!(
        "engine_storage_cache_hits",
        "Storage handle cache lookups served from the cache"
    )
    .unwrap();
    pub static ref STORAGE_CACHE_MISSES: Counter = register_counter!(
        "engine_storage_cache_misses",
        "Storage handle cache lookups that opened a new handle"
    )
    .unwrap();
    pub static ref STORAGE_CACHE_EVICTIONS: Counter = register_counter!(
        "engine_storage_cache_evictions",
        "Storage handles closed to make room in the LRU cache"
    )
    .unwrap();
    pub static ref STORAGE_CACHE_SIZE: Gauge = register_gauge!(
        "engine_storage_cache_size",
        "Number of storage handles currently held open"
    )
    .unwrap();
}
