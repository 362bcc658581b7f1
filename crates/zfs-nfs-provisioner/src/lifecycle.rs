use crate::deleter::VolumeDeleter;
use crate::error::Result;
use crate::provisioner::VolumeProvisioner;
use crate::types::{DeletionInput, ProvisionResult, ProvisionerConfig, VolumeRequest};
use async_trait::async_trait;
use std::sync::Arc;
use zfs_nfs_engine::PoolEngine;

/// The capability set the orchestration loop drives
///
/// Implementations hold no per-volume state; the orchestrator persists the
/// returned annotations and hands them back for deletion. Concurrent calls
/// for distinct volumes are fine, concurrent calls for the same volume are not.
#[async_trait]
pub trait VolumeLifecycle: Send + Sync {
    /// Create the storage backing a volume request
    async fn provision(&self, request: &VolumeRequest) -> Result<ProvisionResult>;

    /// Tear down the storage recorded in a volume's annotations
    async fn delete(&self, input: &DeletionInput) -> Result<()>;
}

/// ZFS datasets exported over NFS
pub struct ZfsNfsProvisioner {
    provisioner: VolumeProvisioner,
    deleter: VolumeDeleter,
}

impl ZfsNfsProvisioner {
    pub fn new(engine: Arc<dyn PoolEngine>, config: ProvisionerConfig) -> Self {
        Self {
            provisioner: VolumeProvisioner::new(engine.clone(), config.clone()),
            deleter: VolumeDeleter::new(engine, config),
        }
    }
}

#[async_trait]
impl VolumeLifecycle for ZfsNfsProvisioner {
    async fn provision(&self, request: &VolumeRequest) -> Result<ProvisionResult> {
        self.provisioner.provision(request).await
    }

    async fn delete(&self, input: &DeletionInput) -> Result<()> {
        self.deleter.delete(input).await
    }
}
