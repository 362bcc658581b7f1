use crate::deadline::engine_call;
use crate::error::{ProvisionError, Result};
use crate::types::ProvisionerConfig;
use prometheus::{GaugeVec, Opts, Registry};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use zfs_nfs_engine::{Dataset, DatasetKind, EngineError, PoolEngine};

const CAPACITY_METRIC: &str = "zfs_provisioner_persistent_volume_capacity";
const USED_METRIC: &str = "zfs_provisioner_persistent_volume_used";
const VOLUME_LABEL: &str = "persistent_volume";

/// Capacity and usage gauges for the volumes under one parent dataset
///
/// Registered into a caller-supplied registry; the scrape endpoint belongs
/// to whoever owns that registry.
pub struct VolumeMetrics {
    engine: Arc<dyn PoolEngine>,
    config: ProvisionerConfig,
    parent_dataset: String,
    capacity: GaugeVec,
    used: GaugeVec,
    /// Label values published by the last collection
    published: Mutex<BTreeSet<String>>,
}

impl VolumeMetrics {
    pub fn new(
        registry: &Registry,
        engine: Arc<dyn PoolEngine>,
        config: ProvisionerConfig,
        parent_dataset: impl Into<String>,
        server_hostname: &str,
    ) -> Result<Self> {
        let parent_dataset = parent_dataset.into();
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .const_label("parent", parent_dataset.clone())
                .const_label("hostname", server_hostname)
        };

        let capacity = GaugeVec::new(
            opts(CAPACITY_METRIC, "Capacity of a zfs persistent volume."),
            &[VOLUME_LABEL],
        )
        .map_err(|source| ProvisionError::MetricsRegistration { source })?;
        let used = GaugeVec::new(
            opts(USED_METRIC, "Usage of a zfs persistent volume."),
            &[VOLUME_LABEL],
        )
        .map_err(|source| ProvisionError::MetricsRegistration { source })?;

        for gauge in [&capacity, &used] {
            registry
                .register(Box::new(gauge.clone()))
                .map_err(|source| ProvisionError::MetricsRegistration { source })?;
        }

        Ok(Self {
            engine,
            config,
            parent_dataset,
            capacity,
            used,
            published: Mutex::new(BTreeSet::new()),
        })
    }

    /// Refresh the gauges from the pool. Returns the number of volumes reported.
    ///
    /// Best effort: failures are logged and the affected volume is skipped.
    pub async fn collect(&self) -> usize {
        let children = match engine_call(
            self.config.engine_timeout,
            format!("Listing children of {}", self.parent_dataset),
            self.engine.list_children(&self.parent_dataset),
        )
        .await
        {
            Ok(children) => children,
            Err(e) => {
                error!("Collecting metrics failed: {}", e);
                return 0;
            }
        };

        // Gauges are only touched once every sample is in
        let mut samples = Vec::new();
        for child in children.iter().filter(|c| c.kind != DatasetKind::Snapshot) {
            match self.sample(child).await {
                Ok((capacity, used)) => samples.push((child.name.as_str(), capacity, used)),
                Err(e) => warn!("Skipping metrics for {}: {}", child.name, e),
            }
        }

        let mut published = self.published.lock().await;
        for &(name, capacity, used) in &samples {
            self.capacity.with_label_values(&[name]).set(capacity as f64);
            self.used.with_label_values(&[name]).set(used as f64);
        }

        let current: BTreeSet<String> = samples
            .iter()
            .map(|(name, _, _)| name.to_string())
            .collect();
        for stale in published.difference(&current) {
            // Series may be missing if the registry was reset elsewhere
            let _ = self.capacity.remove_label_values(&[stale.as_str()]);
            let _ = self.used.remove_label_values(&[stale.as_str()]);
        }
        *published = current;

        let reported = samples.len();
        debug!(
            "Collected metrics for {} of {} datasets under {}",
            reported,
            children.len(),
            self.parent_dataset
        );
        reported
    }

    async fn sample(&self, dataset: &Dataset) -> Result<(u64, u64)> {
        let capacity = self.numeric_property(dataset, "refquota").await?;
        let used = self.numeric_property(dataset, "usedbydataset").await?;
        Ok((capacity, used))
    }

    async fn numeric_property(&self, dataset: &Dataset, property: &str) -> Result<u64> {
        let raw = engine_call(
            self.config.engine_timeout,
            format!("Reading {} of {}", property, dataset.name),
            self.engine.get_property(&dataset.name, property),
        )
        .await?;
        parse_bytes(&raw).ok_or_else(|| {
            ProvisionError::provisioning_failed(
                format!("Reading {} of {}", property, dataset.name),
                EngineError::unexpected_output(
                    format!("zfs get -H -p -o value {} {}", property, dataset.name),
                    format!("expected a byte count, got '{}'", raw.trim()),
                ),
            )
        })
    }
}

/// Parse a `zfs get -p` value; `none` and `-` count as zero
fn parse_bytes(raw: &str) -> Option<u64> {
    match raw.trim() {
        "none" | "-" => Some(0),
        v => v.parse().ok(),
    }
}
