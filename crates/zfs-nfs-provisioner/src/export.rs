use crate::error::{ProvisionError, Result};
use crate::types::{DeletionInput, ProvisionResult, VolumeRequest};
use k8s_openapi::api::core::v1::{NFSVolumeSource, PersistentVolume, PersistentVolumeSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Build the PersistentVolume object the orchestrator should create
pub fn persistent_volume(request: &VolumeRequest, result: &ProvisionResult) -> PersistentVolume {
    let capacity = BTreeMap::from([(
        "storage".to_string(),
        Quantity(request.capacity_bytes.to_string()),
    )]);

    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(request.volume_name.clone()),
            labels: Some(BTreeMap::new()),
            annotations: Some(result.annotations.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            persistent_volume_reclaim_policy: request.reclaim_policy.clone(),
            access_modes: (!request.access_modes.is_empty()).then(|| request.access_modes.clone()),
            storage_class_name: request.storage_class_name.clone(),
            capacity: Some(capacity),
            nfs: Some(NFSVolumeSource {
                server: result.export.server.clone(),
                path: result.export.path.clone(),
                read_only: Some(result.export.read_only),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl DeletionInput {
    /// Recover the deletion input from a PersistentVolume this provisioner created
    pub fn from_persistent_volume(volume: &PersistentVolume) -> Result<Self> {
        let volume_name = volume
            .metadata
            .name
            .clone()
            .ok_or_else(|| ProvisionError::missing_parameter("metadata.name"))?;
        Ok(Self {
            volume_name,
            annotations: volume.metadata.annotations.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NfsExport, ANN_DATASET, ANN_SNAPSHOT};

    fn provisioned() -> (VolumeRequest, ProvisionResult) {
        let request = VolumeRequest {
            volume_name: "pvc-2".to_string(),
            capacity_bytes: 1_073_741_824,
            access_modes: vec!["ReadWriteMany".to_string()],
            reclaim_policy: Some("Retain".to_string()),
            storage_class_name: Some("zfs-nfs".to_string()),
            ..Default::default()
        };
        let result = ProvisionResult {
            mountpoint: "/tank/data/pvc-2".to_string(),
            export: NfsExport {
                server: "10.0.0.5".to_string(),
                path: "/tank/data/pvc-2".to_string(),
                read_only: false,
            },
            annotations: BTreeMap::from([
                (ANN_DATASET.to_string(), "tank/data/pvc-2".to_string()),
                (ANN_SNAPSHOT.to_string(), "tank/data/pvc-1@pvc-2".to_string()),
            ]),
        };
        (request, result)
    }

    #[test]
    fn test_persistent_volume_shape() {
        let (request, result) = provisioned();
        let pv = persistent_volume(&request, &result);

        assert_eq!(pv.metadata.name.as_deref(), Some("pvc-2"));
        let spec = pv.spec.as_ref().unwrap();
        let nfs = spec.nfs.as_ref().unwrap();
        assert_eq!(nfs.server, "10.0.0.5");
        assert_eq!(nfs.path, "/tank/data/pvc-2");
        assert_eq!(nfs.read_only, Some(false));
        assert_eq!(spec.persistent_volume_reclaim_policy.as_deref(), Some("Retain"));
        assert_eq!(
            spec.capacity.as_ref().unwrap().get("storage"),
            Some(&Quantity("1073741824".to_string()))
        );
        assert_eq!(spec.access_modes.as_ref().unwrap(), &vec!["ReadWriteMany".to_string()]);
    }

    #[test]
    fn test_deletion_input_from_persistent_volume() {
        let (request, result) = provisioned();
        let pv = persistent_volume(&request, &result);

        let input = DeletionInput::from_persistent_volume(&pv).unwrap();
        assert_eq!(input.volume_name, "pvc-2");
        assert_eq!(input.annotations, result.annotations);
    }

    #[test]
    fn test_deletion_input_requires_name() {
        let pv = PersistentVolume::default();
        assert!(matches!(
            DeletionInput::from_persistent_volume(&pv),
            Err(ProvisionError::MissingParameter { .. })
        ));
    }

    #[test]
    fn test_persistent_volume_json() {
        let (request, result) = provisioned();
        let json = serde_json::to_value(persistent_volume(&request, &result)).unwrap();
        assert_eq!(json["spec"]["nfs"]["server"], "10.0.0.5");
        assert_eq!(json["metadata"]["annotations"][ANN_DATASET], "tank/data/pvc-2");
    }
}
