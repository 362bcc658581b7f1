use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Volume annotation recording the backing dataset
pub const ANN_DATASET: &str = "zfs.provisioner.io/dataset";
/// Volume annotation recording the snapshot a clone was created from
pub const ANN_SNAPSHOT: &str = "zfs.provisioner.io/snapshot";
/// Claim annotation overriding the storage class `owner` parameter
pub const ANN_OWNER: &str = "zfs.provisioner.io/owner";
/// Claim annotation naming the dataset (or sibling volume) to clone
pub const ANN_CLONE: &str = "zfs.provisioner.io/clone";

/// Storage class parameter keys
pub const PARAM_SERVER_HOSTNAME: &str = "serverHostname";
pub const PARAM_PARENT_DATASET: &str = "parentDataset";
pub const PARAM_SHARE_OPTIONS: &str = "shareOptions";
pub const PARAM_OVER_PROVISION: &str = "overProvision";
pub const PARAM_OWNER: &str = "owner";

/// A request to provision one volume, as handed over by the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequest {
    /// Unique volume identifier assigned by the orchestrator (e.g. "pvc-<uid>")
    pub volume_name: String,
    /// Requested capacity in bytes
    pub capacity_bytes: u64,
    #[serde(default)]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub reclaim_policy: Option<String>,
    #[serde(default)]
    pub storage_class_name: Option<String>,
    /// Annotations of the originating claim (clone source, owner override)
    #[serde(default)]
    pub claim_annotations: BTreeMap<String, String>,
    /// Raw storage class parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl VolumeRequest {
    pub fn clone_source(&self) -> Option<&str> {
        self.claim_annotations.get(ANN_CLONE).map(String::as_str)
    }

    pub fn owner_override(&self) -> Option<&str> {
        self.claim_annotations.get(ANN_OWNER).map(String::as_str)
    }
}

/// NFS export handed back to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfsExport {
    pub server: String,
    pub path: String,
    pub read_only: bool,
}

/// Outcome of a successful provision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResult {
    pub mountpoint: String,
    pub export: NfsExport,
    /// The only state the orchestrator must persist on the volume
    pub annotations: BTreeMap<String, String>,
}

impl ProvisionResult {
    pub fn dataset_path(&self) -> Option<&str> {
        self.annotations.get(ANN_DATASET).map(String::as_str)
    }

    pub fn origin_snapshot(&self) -> Option<&str> {
        self.annotations.get(ANN_SNAPSHOT).map(String::as_str)
    }
}

/// Previously persisted state handed back for deletion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionInput {
    pub volume_name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl DeletionInput {
    pub fn new(volume_name: impl Into<String>) -> Self {
        Self {
            volume_name: volume_name.into(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }
}

/// Tunables shared by the provisioner, deleter and metrics collector
#[derive(Debug, Clone, Default)]
pub struct ProvisionerConfig {
    /// Deadline applied to every pool engine call; `None` waits indefinitely
    pub engine_timeout: Option<Duration>,
}
