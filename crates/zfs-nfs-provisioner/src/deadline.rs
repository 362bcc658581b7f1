use crate::error::{ProvisionError, Result};
use std::future::Future;
use std::time::Duration;

/// Run one pool engine call, bounded by `timeout` when set.
///
/// Engine failures become `ProvisioningFailed`, expiry becomes `EngineTimeout`.
pub(crate) async fn engine_call<T, F>(
    timeout: Option<Duration>,
    operation: impl Into<String>,
    call: F,
) -> Result<T>
where
    F: Future<Output = zfs_nfs_engine::Result<T>>,
{
    let operation = operation.into();
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| ProvisionError::engine_timeout(operation.clone(), limit))?,
        None => call.await,
    };
    result.map_err(|e| ProvisionError::provisioning_failed(operation, e))
}
