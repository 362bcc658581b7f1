/// Derive the full dataset path for a volume.
///
/// `volume_name` is opaque and assumed sanitized by the orchestrator.
pub fn build_path(parent_dataset: &str, volume_name: &str) -> String {
    format!("{}/{}", parent_dataset, volume_name)
}

/// Whether `dataset` is a child dataset named exactly `volume_name`.
///
/// Compares the trailing path segment structurally, so a volume name is
/// never interpreted as a pattern.
pub fn belongs_to_volume(dataset: &str, volume_name: &str) -> bool {
    match dataset.rsplit_once('/') {
        Some((parent, leaf)) => !parent.is_empty() && !volume_name.is_empty() && leaf == volume_name,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_path() {
        assert_eq!(build_path("tank/data", "pvc-1"), "tank/data/pvc-1");
        assert_eq!(build_path("rpool/k8s/nfs", "pvc-abc"), "rpool/k8s/nfs/pvc-abc");
    }

    #[test]
    fn test_build_path_is_injective_in_volume_name() {
        let names = ["a", "ab", "a-b", "pvc-1", "pvc-10", "pvc-1.x"];
        let paths: std::collections::HashSet<String> =
            names.iter().map(|n| build_path("tank/data", n)).collect();
        assert_eq!(paths.len(), names.len());
    }

    #[test]
    fn test_belongs_to_volume() {
        assert!(belongs_to_volume("tank/data/vol-123", "vol-123"));
        assert!(!belongs_to_volume("pool/other", "vol-123"));
        assert!(!belongs_to_volume("vol-123", "vol-123"));
        assert!(!belongs_to_volume("/vol-123", "vol-123"));
        assert!(!belongs_to_volume("tank/data/pvc-10", "pvc-1"));
        assert!(!belongs_to_volume("tank/data/xpvc-1", "pvc-1"));
        assert!(!belongs_to_volume("tank/data/", ""));
    }

    #[test]
    fn test_belongs_to_volume_treats_name_literally() {
        assert!(!belongs_to_volume("tank/data/pvc-1", "pvc.1"));
        assert!(!belongs_to_volume("tank/data/anything", ".*"));
        assert!(belongs_to_volume("tank/data/.*", ".*"));
    }
}
