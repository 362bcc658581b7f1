use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;
use zfs_nfs_engine::EngineError;

/// Error type for volume provisioning and deletion
///
/// Every variant is terminal for the call that produced it. Retrying is the
/// orchestrator's job; see [`ProvisionError::is_retryable`].
#[derive(Error, Debug, Diagnostic)]
pub enum ProvisionError {
    /// A required storage class parameter is absent
    #[error("Missing parameter {parameter} in storage class")]
    #[diagnostic(
        code(zfs_nfs::provisioner::missing_parameter),
        help("Add `{parameter}` to the parameters of the StorageClass")
    )]
    MissingParameter {
        #[allow(unused)]
        parameter: String,
    },

    /// A parameter or override annotation has an unusable value
    #[error("Invalid value '{value}' for {parameter}: {reason}")]
    #[diagnostic(code(zfs_nfs::provisioner::invalid_parameter), help("{reason}"))]
    InvalidParameter {
        #[allow(unused)]
        parameter: String,
        #[allow(unused)]
        value: String,
        #[allow(unused)]
        reason: String,
    },

    /// The dataset named as clone source does not exist
    #[error("Clone source dataset not found: {clone_source}")]
    #[diagnostic(
        code(zfs_nfs::provisioner::source_not_found),
        help("The claim annotation must name an existing dataset, or a volume under the same parentDataset")
    )]
    SourceNotFound {
        #[allow(unused)]
        clone_source: String,
    },

    /// A dataset or snapshot does not belong to the volume it was recorded for
    #[error("Dataset '{dataset}' does not belong to volume '{volume}'")]
    #[diagnostic(
        code(zfs_nfs::provisioner::integrity_error),
        help("The volume annotations point at a dataset this volume did not create. Nothing was destroyed; inspect the PersistentVolume annotations by hand")
    )]
    IntegrityError {
        #[allow(unused)]
        dataset: String,
        #[allow(unused)]
        volume: String,
    },

    /// The pool engine reported a failure
    #[error("{operation} failed: {detail}")]
    #[diagnostic(code(zfs_nfs::provisioner::provisioning_failed))]
    ProvisioningFailed {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        detail: String,
        #[source]
        #[diagnostic_source]
        source: EngineError,
    },

    /// A persisted annotation needed for deletion is absent
    #[error("Unable to find annotation {annotation} on volume '{volume}'")]
    #[diagnostic(
        code(zfs_nfs::provisioner::missing_annotation),
        help("Without `{annotation}` there is no record of which dataset backs this volume. Remove the dataset by hand")
    )]
    MissingAnnotation {
        #[allow(unused)]
        annotation: String,
        #[allow(unused)]
        volume: String,
    },

    /// A pool engine call did not finish within the configured deadline
    #[error("{operation} timed out after {timeout_secs}s")]
    #[diagnostic(
        code(zfs_nfs::provisioner::engine_timeout),
        help("The pool may be busy or hung. Check `zpool status` before retrying")
    )]
    EngineTimeout {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        timeout_secs: u64,
    },

    /// Metric descriptors could not be registered
    #[error("Failed to register metrics: {source}")]
    #[diagnostic(
        code(zfs_nfs::provisioner::metrics_registration),
        help("Each registry can hold the volume gauges only once")
    )]
    MetricsRegistration {
        #[source]
        source: prometheus::Error,
    },
}

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    pub fn missing_parameter(parameter: impl Into<String>) -> Self {
        Self::MissingParameter {
            parameter: parameter.into(),
        }
    }

    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn source_not_found(clone_source: impl Into<String>) -> Self {
        Self::SourceNotFound {
            clone_source: clone_source.into(),
        }
    }

    pub fn integrity_error(dataset: impl Into<String>, volume: impl Into<String>) -> Self {
        Self::IntegrityError {
            dataset: dataset.into(),
            volume: volume.into(),
        }
    }

    pub fn provisioning_failed(operation: impl Into<String>, source: EngineError) -> Self {
        Self::ProvisioningFailed {
            operation: operation.into(),
            detail: source.detail(),
            source,
        }
    }

    pub fn missing_annotation(annotation: impl Into<String>, volume: impl Into<String>) -> Self {
        Self::MissingAnnotation {
            annotation: annotation.into(),
            volume: volume.into(),
        }
    }

    pub fn engine_timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::EngineTimeout {
            operation: operation.into(),
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Whether the orchestrator may retry the call unchanged.
    ///
    /// Integrity and missing-annotation failures describe bad persisted
    /// state and need an operator.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::IntegrityError { .. } | Self::MissingAnnotation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(ProvisionError::missing_parameter("shareOptions").is_retryable());
        assert!(ProvisionError::source_not_found("tank/a").is_retryable());
        assert!(ProvisionError::engine_timeout("destroy", Duration::from_secs(5)).is_retryable());
        assert!(ProvisionError::provisioning_failed(
            "create dataset",
            EngineError::dataset_not_found("tank/a")
        )
        .is_retryable());
        assert!(!ProvisionError::integrity_error("pool/other", "vol-123").is_retryable());
        assert!(!ProvisionError::missing_annotation("zfs.provisioner.io/dataset", "v").is_retryable());
    }

    #[test]
    fn test_provisioning_failed_carries_engine_text() {
        let err = ProvisionError::provisioning_failed(
            "Creating ZFS dataset tank/data/pvc-1",
            EngineError::command_failed("zfs create tank/data/pvc-1", 1, "out of space"),
        );
        let text = err.to_string();
        assert_eq!(
            text,
            "Creating ZFS dataset tank/data/pvc-1 failed: out of space"
        );
    }

    #[test]
    fn test_invalid_parameter_names_field() {
        let err = ProvisionError::invalid_parameter("overProvision", "yes", "expected true or false");
        assert_eq!(
            err.to_string(),
            "Invalid value 'yes' for overProvision: expected true or false"
        );
    }
}
