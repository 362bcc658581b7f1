use crate::deadline::engine_call;
use crate::error::{ProvisionError, Result};
use crate::path::belongs_to_volume;
use crate::types::{DeletionInput, ProvisionerConfig, ANN_DATASET, ANN_SNAPSHOT};
use std::sync::Arc;
use tracing::{info, warn};
use zfs_nfs_engine::{Dataset, DatasetKind, PoolEngine};

/// Safety-checked teardown of provisioned volumes
///
/// Only destroys a dataset whose trailing path segment is the volume name,
/// so a stale or edited annotation cannot point deletion elsewhere.
pub struct VolumeDeleter {
    engine: Arc<dyn PoolEngine>,
    config: ProvisionerConfig,
}

impl VolumeDeleter {
    pub fn new(engine: Arc<dyn PoolEngine>, config: ProvisionerConfig) -> Self {
        Self { engine, config }
    }

    /// Destroy the dataset (and origin snapshot) recorded on a volume.
    ///
    /// Missing pool objects count as already deleted, so a retry after a
    /// partial failure picks up where the previous attempt stopped.
    pub async fn delete(&self, input: &DeletionInput) -> Result<()> {
        let volume = input.volume_name.as_str();
        let dataset_path = input
            .annotations
            .get(ANN_DATASET)
            .ok_or_else(|| ProvisionError::missing_annotation(ANN_DATASET, volume))?;

        match self.lookup(dataset_path).await? {
            Some(dataset) => {
                if !belongs_to_volume(&dataset.name, volume) || dataset.kind == DatasetKind::Snapshot
                {
                    return Err(ProvisionError::integrity_error(&dataset.name, volume));
                }
                engine_call(
                    self.config.engine_timeout,
                    format!("Deleting ZFS dataset {}", dataset.name),
                    self.engine.destroy(&dataset.name, true),
                )
                .await?;
            }
            None => warn!(
                "ZFS dataset {} for volume {} not found, assuming it was already deleted",
                dataset_path, volume
            ),
        }

        if let Some(snapshot) = input.annotations.get(ANN_SNAPSHOT) {
            self.delete_origin_snapshot(snapshot, volume).await?;
        }

        info!("Deleted volume {}", volume);
        Ok(())
    }

    async fn delete_origin_snapshot(&self, snapshot_path: &str, volume: &str) -> Result<()> {
        let snapshot = match self.lookup(snapshot_path).await? {
            Some(snapshot) => snapshot,
            None => {
                warn!(
                    "ZFS snapshot {} for volume {} not found, assuming it was already deleted",
                    snapshot_path, volume
                );
                return Ok(());
            }
        };

        if snapshot.kind != DatasetKind::Snapshot || snapshot.snapshot_name() != Some(volume) {
            return Err(ProvisionError::integrity_error(&snapshot.name, volume));
        }

        engine_call(
            self.config.engine_timeout,
            format!("Deleting ZFS snapshot {}", snapshot.name),
            self.engine.destroy(&snapshot.name, true),
        )
        .await
    }

    async fn lookup(&self, name: &str) -> Result<Option<Dataset>> {
        engine_call(
            self.config.engine_timeout,
            format!("Retrieving ZFS dataset {}", name),
            self.engine.get_dataset(name),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zfs_nfs_engine::{MockPoolEngine, Properties};

    async fn setup() -> (Arc<MockPoolEngine>, VolumeDeleter) {
        let engine = Arc::new(MockPoolEngine::new());
        engine.add_filesystem("tank").await;
        engine.add_filesystem("tank/data").await;
        let deleter = VolumeDeleter::new(engine.clone(), ProvisionerConfig::default());
        (engine, deleter)
    }

    async fn seed_clone(engine: &MockPoolEngine) {
        engine.add_filesystem("tank/data/pvc-1").await;
        engine.add_snapshot("tank/data/pvc-1@pvc-2").await;
        engine
            .clone_snapshot("tank/data/pvc-1@pvc-2", "tank/data/pvc-2", &Properties::new())
            .await
            .unwrap();
    }

    fn clone_input() -> DeletionInput {
        DeletionInput::new("pvc-2")
            .with_annotation(ANN_DATASET, "tank/data/pvc-2")
            .with_annotation(ANN_SNAPSHOT, "tank/data/pvc-1@pvc-2")
    }

    #[tokio::test]
    async fn test_delete_filesystem() {
        let (engine, deleter) = setup().await;
        engine.add_filesystem("tank/data/vol-123").await;

        let input = DeletionInput::new("vol-123").with_annotation(ANN_DATASET, "tank/data/vol-123");
        deleter.delete(&input).await.unwrap();

        assert!(!engine.contains("tank/data/vol-123").await);
        assert_eq!(engine.destroy_calls().await, vec!["tank/data/vol-123"]);
    }

    #[tokio::test]
    async fn test_missing_annotation() {
        let (engine, deleter) = setup().await;
        let err = deleter.delete(&DeletionInput::new("vol-123")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::MissingAnnotation { .. }));
        assert!(!err.is_retryable());
        assert!(engine.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_already_deleted_scenario_c() {
        let (engine, deleter) = setup().await;
        let input = DeletionInput::new("pvc-1").with_annotation(ANN_DATASET, "tank/data/pvc-1");
        deleter.delete(&input).await.unwrap();
        assert!(engine.destroy_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_dataset_is_not_destroyed() {
        let (engine, deleter) = setup().await;
        engine.add_filesystem("pool").await;
        engine.add_filesystem("pool/other").await;

        let input = DeletionInput::new("vol-123").with_annotation(ANN_DATASET, "pool/other");
        let err = deleter.delete(&input).await.unwrap_err();

        assert!(matches!(err, ProvisionError::IntegrityError { .. }));
        assert!(!err.is_retryable());
        assert!(engine.destroy_calls().await.is_empty());
        assert!(engine.contains("pool/other").await);
    }

    #[tokio::test]
    async fn test_prefix_match_is_not_enough() {
        let (engine, deleter) = setup().await;
        engine.add_filesystem("tank/data/pvc-10").await;

        let input = DeletionInput::new("pvc-1").with_annotation(ANN_DATASET, "tank/data/pvc-10");
        assert!(matches!(
            deleter.delete(&input).await.unwrap_err(),
            ProvisionError::IntegrityError { .. }
        ));
        assert!(engine.destroy_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_clone_and_origin_snapshot() {
        let (engine, deleter) = setup().await;
        seed_clone(&engine).await;

        deleter.delete(&clone_input()).await.unwrap();

        assert_eq!(
            engine.destroy_calls().await,
            vec!["tank/data/pvc-2", "tank/data/pvc-1@pvc-2"]
        );
        assert!(!engine.contains("tank/data/pvc-2").await);
        assert!(!engine.contains("tank/data/pvc-1@pvc-2").await);
        assert!(engine.contains("tank/data/pvc-1").await);
    }

    #[tokio::test]
    async fn test_snapshot_failure_then_retry_converges() {
        let (engine, deleter) = setup().await;
        seed_clone(&engine).await;
        engine.fail_on("destroy", "tank/data/pvc-1@pvc-2").await;

        let err = deleter.delete(&clone_input()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ProvisioningFailed { .. }));
        assert!(!engine.contains("tank/data/pvc-2").await);
        assert!(engine.contains("tank/data/pvc-1@pvc-2").await);

        engine.clear_failures().await;
        deleter.delete(&clone_input()).await.unwrap();
        assert!(!engine.contains("tank/data/pvc-1@pvc-2").await);
        assert_eq!(
            engine.destroy_calls().await,
            vec!["tank/data/pvc-2", "tank/data/pvc-1@pvc-2"]
        );
    }

    #[tokio::test]
    async fn test_snapshot_already_gone() {
        let (engine, deleter) = setup().await;
        engine.add_filesystem("tank/data/pvc-2").await;
        deleter.delete(&clone_input()).await.unwrap();
        assert_eq!(engine.destroy_calls().await, vec!["tank/data/pvc-2"]);
    }

    #[tokio::test]
    async fn test_foreign_snapshot_is_not_destroyed() {
        let (engine, deleter) = setup().await;
        engine.add_filesystem("tank/data/pvc-1").await;
        engine.add_snapshot("tank/data/pvc-1@daily").await;

        let input = DeletionInput::new("pvc-2")
            .with_annotation(ANN_DATASET, "tank/data/pvc-2")
            .with_annotation(ANN_SNAPSHOT, "tank/data/pvc-1@daily");
        let err = deleter.delete(&input).await.unwrap_err();

        assert!(matches!(err, ProvisionError::IntegrityError { .. }));
        assert!(engine.contains("tank/data/pvc-1@daily").await);
    }

    #[tokio::test]
    async fn test_snapshot_annotation_pointing_at_filesystem() {
        let (engine, deleter) = setup().await;
        engine.add_filesystem("tank/data/pvc-2").await;

        let input = DeletionInput::new("pvc-2")
            .with_annotation(ANN_DATASET, "tank/data/pvc-2")
            .with_annotation(ANN_SNAPSHOT, "tank/data");
        let err = deleter.delete(&input).await.unwrap_err();
        assert!(matches!(err, ProvisionError::IntegrityError { .. }));
        assert!(engine.contains("tank/data").await);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_retryable() {
        let (engine, deleter) = setup().await;
        engine.fail_on("get_dataset", "tank/data/pvc-1").await;

        let input = DeletionInput::new("pvc-1").with_annotation(ANN_DATASET, "tank/data/pvc-1");
        let err = deleter.delete(&input).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ProvisioningFailed { .. }));
        assert!(err.is_retryable());
    }
}
