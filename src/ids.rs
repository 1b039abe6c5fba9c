use std::fmt;
use std::path::{Path, PathBuf};

/// Persistence class of a table.
///
/// The on-disk tag strings (`LMDB` / `IN_MEMORY`) are preserved verbatim
/// for interoperability with existing datasets on disk, even though the
/// partition store itself is `fjall` rather than LMDB (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreTier {
    Persistent,
    InMemory,
}

impl StoreTier {
    pub fn dir_tag(self) -> &'static str {
        match self {
            StoreTier::Persistent => "LMDB",
            StoreTier::InMemory => "IN_MEMORY",
        }
    }
}

impl fmt::Display for StoreTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_tag())
    }
}

/// `(tier, namespace, name)` identity of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    pub tier: StoreTier,
    pub namespace: String,
    pub name: String,
}

impl TableId {
    pub fn new(tier: StoreTier, namespace: impl Into<String>, name: impl Into<String>) -> TableId {
        TableId {
            tier,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key under which this table's partition count is recorded in the
    /// meta registry: `"{tier}.{namespace}.{name}"`.
    pub fn meta_key(&self) -> String {
        format!("{}.{}.{}", self.tier.dir_tag(), self.namespace, self.name)
    }

    pub fn namespace_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(self.tier.dir_tag()).join(&self.namespace)
    }

    pub fn table_dir(&self, data_dir: &Path) -> PathBuf {
        self.namespace_dir(data_dir).join(&self.name)
    }

    pub fn partition_dir(&self, data_dir: &Path, partition: u64) -> PathBuf {
        self.table_dir(data_dir).join(partition.to_string())
    }
}

/// Addressing tuple `(tier, namespace, name, partitionIndex)` used by
/// worker kernels to locate a single partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operand {
    pub table: TableId,
    pub partition: u64,
}

impl Operand {
    pub fn new(table: TableId, partition: u64) -> Operand {
        Operand { table, partition }
    }

    pub fn path(&self, data_dir: &Path) -> PathBuf {
        self.table.partition_dir(data_dir, self.partition)
    }
}
