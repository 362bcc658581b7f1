use crate::deadline::engine_call;
use crate::error::{ProvisionError, Result};
use crate::ownership::OwnerDirective;
use crate::params::StorageClassParameters;
use crate::path::build_path;
use crate::types::{
    NfsExport, ProvisionResult, ProvisionerConfig, VolumeRequest, ANN_DATASET, ANN_SNAPSHOT,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use zfs_nfs_engine::{Dataset, DatasetKind, EngineError, PoolEngine, Properties};

/// Turns volume requests into pool datasets
///
/// New volumes get a fresh filesystem with `refquota` (and, unless
/// over-provisioning, `refreservation`) set to the requested size. Claims
/// carrying a clone annotation get a clone of `<base>@<volume>` instead.
pub struct VolumeProvisioner {
    engine: Arc<dyn PoolEngine>,
    config: ProvisionerConfig,
}

impl VolumeProvisioner {
    pub fn new(engine: Arc<dyn PoolEngine>, config: ProvisionerConfig) -> Self {
        Self { engine, config }
    }

    /// Create (or converge on) the dataset backing `request`
    pub async fn provision(&self, request: &VolumeRequest) -> Result<ProvisionResult> {
        let params = StorageClassParameters::from_parameters(&request.parameters)?;
        let owner = OwnerDirective::resolve(request.owner_override(), params.owner.as_deref())?;
        let zfs_path = build_path(&params.parent_dataset, &request.volume_name);

        debug!(
            "Provisioning volume {} at {} ({} bytes)",
            request.volume_name, zfs_path, request.capacity_bytes
        );

        let mut annotations = BTreeMap::new();
        let dataset = match request.clone_source() {
            Some(source) => {
                let (dataset, snapshot) = self
                    .provision_clone(&params, source, &request.volume_name, &zfs_path)
                    .await?;
                annotations.insert(ANN_SNAPSHOT.to_string(), snapshot);
                dataset
            }
            None => {
                self.provision_filesystem(
                    &params,
                    request.capacity_bytes,
                    &request.volume_name,
                    &zfs_path,
                )
                .await?
            }
        };

        let mountpoint = dataset.mountpoint.clone().ok_or_else(|| {
            ProvisionError::provisioning_failed(
                format!("Resolving mountpoint of {}", zfs_path),
                EngineError::unexpected_output("zfs list", "dataset has no mountpoint"),
            )
        })?;

        if let Some(owner) = owner {
            engine_call(
                self.config.engine_timeout,
                format!("Setting ownership of {} to {}", mountpoint, owner),
                self.engine
                    .set_mountpoint_owner(&mountpoint, owner.uid, owner.gid),
            )
            .await?;
        }

        annotations.insert(ANN_DATASET.to_string(), zfs_path);

        info!("Created volume {} at {}", request.volume_name, mountpoint);

        Ok(ProvisionResult {
            export: NfsExport {
                server: params.server_hostname,
                path: mountpoint.clone(),
                read_only: false,
            },
            mountpoint,
            annotations,
        })
    }

    async fn provision_filesystem(
        &self,
        params: &StorageClassParameters,
        capacity_bytes: u64,
        volume_name: &str,
        zfs_path: &str,
    ) -> Result<Dataset> {
        if let Some(existing) = self.lookup(zfs_path).await? {
            if existing.kind != DatasetKind::Filesystem || existing.is_clone() {
                return Err(ProvisionError::integrity_error(&existing.name, volume_name));
            }
            info!("ZFS dataset {} already exists, reusing it", zfs_path);
            return Ok(existing);
        }

        self.ensure_parent_mounted(&params.parent_dataset).await?;

        let properties = filesystem_properties(params, capacity_bytes);
        engine_call(
            self.config.engine_timeout,
            format!("Creating ZFS dataset {}", zfs_path),
            self.engine.create_filesystem(zfs_path, &properties),
        )
        .await
    }

    /// Returns the clone and the name of the snapshot it was created from
    async fn provision_clone(
        &self,
        params: &StorageClassParameters,
        source: &str,
        volume_name: &str,
        zfs_path: &str,
    ) -> Result<(Dataset, String)> {
        let source_path = clone_source_path(&params.parent_dataset, source);
        let base = self
            .lookup(&source_path)
            .await?
            .filter(|ds| ds.kind != DatasetKind::Snapshot)
            .ok_or_else(|| ProvisionError::source_not_found(&source_path))?;

        let snapshot_path = format!("{}@{}", base.name, volume_name);

        // A conflicting dataset at the target must not leave a snapshot behind
        if let Some(existing) = self.lookup(zfs_path).await? {
            if existing.origin.as_deref() != Some(snapshot_path.as_str()) {
                return Err(ProvisionError::integrity_error(&existing.name, volume_name));
            }
            info!("ZFS clone {} already exists, reusing it", zfs_path);
            return Ok((existing, snapshot_path));
        }

        self.ensure_parent_mounted(&params.parent_dataset).await?;

        let snapshot = match self.lookup(&snapshot_path).await? {
            Some(existing) => {
                debug!("Reusing existing snapshot {}", snapshot_path);
                existing
            }
            None => {
                engine_call(
                    self.config.engine_timeout,
                    format!("Creating ZFS snapshot {}", snapshot_path),
                    self.engine.snapshot(&base.name, volume_name, false),
                )
                .await?
            }
        };

        // Clones get the export options only, no refquota or refreservation
        let mut properties = Properties::new();
        properties.insert("sharenfs".to_string(), params.share_options.clone());

        let dataset = engine_call(
            self.config.engine_timeout,
            format!("Creating ZFS clone {} from {}", zfs_path, snapshot.name),
            self.engine
                .clone_snapshot(&snapshot.name, zfs_path, &properties),
        )
        .await?;

        Ok((dataset, snapshot.name))
    }

    /// New datasets inherit the parent's mountpoint, so a parent with
    /// `mountpoint=none` or `legacy` would yield a volume that cannot be exported
    async fn ensure_parent_mounted(&self, parent_dataset: &str) -> Result<()> {
        let parent = self.lookup(parent_dataset).await?.ok_or_else(|| {
            ProvisionError::provisioning_failed(
                format!("Looking up parent dataset {}", parent_dataset),
                EngineError::dataset_not_found(parent_dataset),
            )
        })?;
        if parent.mountpoint.is_none() {
            return Err(ProvisionError::provisioning_failed(
                format!("Checking mountpoint of {}", parent_dataset),
                EngineError::unexpected_output(
                    format!("zfs list {}", parent_dataset),
                    "parent dataset has mountpoint none or legacy",
                ),
            ));
        }
        Ok(())
    }

    async fn lookup(&self, name: &str) -> Result<Option<Dataset>> {
        engine_call(
            self.config.engine_timeout,
            format!("Looking up ZFS dataset {}", name),
            self.engine.get_dataset(name),
        )
        .await
    }
}

/// Property set for a freshly created volume
pub fn filesystem_properties(params: &StorageClassParameters, capacity_bytes: u64) -> Properties {
    let bytes = capacity_bytes.to_string();
    let mut properties = Properties::new();
    properties.insert("sharenfs".to_string(), params.share_options.clone());
    properties.insert("refquota".to_string(), bytes.clone());
    if !params.over_provision {
        properties.insert("refreservation".to_string(), bytes);
    }
    properties
}

/// A clone source with a `/` is a full dataset name, a bare name is a sibling volume
pub fn clone_source_path(parent_dataset: &str, source: &str) -> String {
    if source.contains('/') {
        source.to_string()
    } else {
        build_path(parent_dataset, source)
    }
}
