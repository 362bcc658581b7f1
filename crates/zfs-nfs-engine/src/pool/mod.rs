mod mock;
#[cfg(unix)]
mod zfs;

pub use mock::{EngineCall, MockPoolEngine};
#[cfg(unix)]
pub use zfs::ZfsCliEngine;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered property map, rendered as `-o key=value` in key order
pub type Properties = BTreeMap<String, String>;

/// Kind of a pool node as reported by `zfs list -o type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Filesystem,
    Snapshot,
    Volume,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Filesystem => "filesystem",
            DatasetKind::Snapshot => "snapshot",
            DatasetKind::Volume => "volume",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "filesystem" => Some(DatasetKind::Filesystem),
            "snapshot" => Some(DatasetKind::Snapshot),
            "volume" => Some(DatasetKind::Volume),
            _ => None,
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A node in the storage pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Full hierarchical name, e.g. "tank/data/pvc-1" or "tank/data/pvc-1@pvc-2"
    pub name: String,
    pub kind: DatasetKind,
    /// Mountpoint of a filesystem; `None` for snapshots, volumes and unmounted datasets
    pub mountpoint: Option<String>,
    /// Snapshot this dataset was cloned from
    pub origin: Option<String>,
    /// Properties set at creation time (only populated by engines that track them)
    #[serde(default)]
    pub properties: Properties,
}

impl Dataset {
    /// Whether this dataset is a clone of a snapshot
    pub fn is_clone(&self) -> bool {
        self.origin.is_some()
    }

    /// Trailing path segment of the dataset name.
    ///
    /// For snapshots this is the segment of the origin dataset, the `@name`
    /// part is available through [`Dataset::snapshot_name`].
    pub fn leaf_name(&self) -> &str {
        let base = self.name.split('@').next().unwrap_or(&self.name);
        base.rsplit('/').next().unwrap_or(base)
    }

    /// The part after `@` for snapshots
    pub fn snapshot_name(&self) -> Option<&str> {
        self.name.split_once('@').map(|(_, snap)| snap)
    }
}

/// Split a snapshot name into `(dataset, snapshot)`
pub fn split_snapshot(name: &str) -> Option<(&str, &str)> {
    name.split_once('@')
        .filter(|(ds, snap)| !ds.is_empty() && !snap.is_empty())
}

/// Pluggable storage pool backend
///
/// The real implementation is `ZfsCliEngine`, which drives the host `zfs`
/// command. `MockPoolEngine` keeps an in-memory pool for tests and records
/// every mutating call.
#[async_trait]
pub trait PoolEngine: Send + Sync {
    /// Look up a dataset, snapshot or volume. `Ok(None)` means it does not exist.
    ///
    /// A filesystem whose `mountpoint` is `none` or `legacy` comes back with
    /// `mountpoint: None`. Such a dataset cannot be exported, and children
    /// created below it inherit the setting, so callers that need a mount
    /// path should check the parent before creating anything.
    async fn get_dataset(&self, name: &str) -> Result<Option<Dataset>>;

    /// Create a filesystem dataset with the given properties.
    async fn create_filesystem(&self, name: &str, properties: &Properties) -> Result<Dataset>;

    /// Create `<dataset>@<snapshot_name>`.
    async fn snapshot(&self, dataset: &str, snapshot_name: &str, recursive: bool)
        -> Result<Dataset>;

    /// Create a writable clone of `snapshot` at `target`.
    async fn clone_snapshot(
        &self,
        snapshot: &str,
        target: &str,
        properties: &Properties,
    ) -> Result<Dataset>;

    /// Destroy a dataset or snapshot, optionally with all descendants.
    async fn destroy(&self, name: &str, recursive: bool) -> Result<()>;

    /// Direct children of `parent` (depth 1), the parent itself excluded.
    async fn list_children(&self, parent: &str) -> Result<Vec<Dataset>>;

    /// Read a single property in parsable form.
    async fn get_property(&self, name: &str, property: &str) -> Result<String>;

    /// Change the owner of a mountpoint. A `None` gid leaves the group unchanged.
    async fn set_mountpoint_owner(&self, mountpoint: &str, uid: u32, gid: Option<u32>)
        -> Result<()>;
}
