//! zfs-nfs-provisioner - Volume lifecycle engine for NFS-exported ZFS datasets
//!
//! This crate provides:
//! - Storage class parameter validation and dataset path derivation
//! - `VolumeProvisioner`: new filesystem or clone-from-snapshot, quota and
//!   ownership policy
//! - `VolumeDeleter`: safety-checked, idempotent teardown
//! - `VolumeMetrics`: capacity and usage gauges for an injected registry
//! - The `VolumeLifecycle` trait the orchestration loop drives

// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

mod deadline;
pub mod deleter;
pub mod error;
pub mod export;
pub mod lifecycle;
pub mod metrics;
pub mod ownership;
pub mod params;
pub mod path;
pub mod provisioner;
pub mod types;

// Re-export primary types
pub use deleter::VolumeDeleter;
pub use error::{ProvisionError, Result};
pub use export::persistent_volume;
pub use lifecycle::{VolumeLifecycle, ZfsNfsProvisioner};
pub use metrics::VolumeMetrics;
pub use ownership::OwnerDirective;
pub use params::StorageClassParameters;
pub use path::{belongs_to_volume, build_path};
pub use provisioner::VolumeProvisioner;
pub use types::{
    DeletionInput, NfsExport, ProvisionResult, ProvisionerConfig, VolumeRequest, ANN_CLONE,
    ANN_DATASET, ANN_OWNER, ANN_SNAPSHOT,
};
