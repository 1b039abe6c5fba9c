//! Partitioned key-value compute engine: stable hash-partitioned tables
//! over an embedded transactional store, plus a set of parallel
//! per-partition operators (map, reduce, join, filter, union, ...) run
//! across an in-process worker pool.
//!
//! Entry point is [`EngineContext`]: it owns the data directory, the
//! meta registry, the storage handle cache and the worker pool that
//! every [`Table`] and operator in [`operators`] is built against.

#[macro_use]
extern crate lazy_static;

pub mod collect;
pub mod context;
pub mod errors;
mod glob;
pub mod hash;
pub mod ids;
pub mod meta;
pub mod observability;
pub mod operators;
pub mod options;
pub mod scheduler;
pub mod storage;
pub mod table;
pub mod value;

pub use context::EngineContext;
pub use errors::{EngineError, EngineResult};
pub use ids::{Operand, StoreTier, TableId};
pub use options::Options;
pub use table::{ParallelizeInput, Table};
pub use value::Value;
