use crate::command::{exec, exec_unchecked};
use crate::error::{EngineError, Result};
use crate::pool::{Dataset, DatasetKind, PoolEngine, Properties};
use async_trait::async_trait;
use tracing::{debug, info};

const LIST_COLUMNS: &str = "name,type,mountpoint,origin";

/// Storage engine driving the host `zfs` command
///
/// All listings use `-H -p` so output is tab separated and numeric values
/// are exact byte counts.
pub struct ZfsCliEngine {
    zfs: String,
}

impl ZfsCliEngine {
    pub fn new(zfs_binary: impl Into<String>) -> Self {
        Self {
            zfs: zfs_binary.into(),
        }
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("{} {}", self.zfs, args.join(" "))
    }

    async fn require_dataset(&self, name: &str) -> Result<Dataset> {
        self.get_dataset(name)
            .await?
            .ok_or_else(|| EngineError::dataset_not_found(name))
    }
}

impl Default for ZfsCliEngine {
    fn default() -> Self {
        Self::new("zfs")
    }
}

fn property_args(properties: &Properties) -> Vec<String> {
    properties
        .iter()
        .flat_map(|(k, v)| ["-o".to_string(), format!("{}={}", k, v)])
        .collect()
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("dataset does not exist") || stderr.contains("could not find any snapshots")
}

fn optional_column(value: &str) -> Option<String> {
    match value {
        "" | "-" | "none" | "legacy" => None,
        v => Some(v.to_string()),
    }
}

/// Parse one line of `zfs list -H -p -o name,type,mountpoint,origin`
pub(crate) fn parse_list_line(command: &str, line: &str) -> Result<Dataset> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() != 4 {
        return Err(EngineError::unexpected_output(
            command,
            format!("expected 4 columns, got {}: {:?}", parts.len(), line),
        ));
    }

    let kind = DatasetKind::parse(parts[1]).ok_or_else(|| {
        EngineError::unexpected_output(command, format!("unknown dataset type '{}'", parts[1]))
    })?;

    Ok(Dataset {
        name: parts[0].to_string(),
        kind,
        mountpoint: optional_column(parts[2]),
        origin: optional_column(parts[3]),
        properties: Properties::new(),
    })
}

#[async_trait]
impl PoolEngine for ZfsCliEngine {
    async fn get_dataset(&self, name: &str) -> Result<Option<Dataset>> {
        let argv = args(&["list", "-H", "-p", "-t", "all", "-o", LIST_COLUMNS, name]);
        let output = exec_unchecked(&self.zfs, &argv).await?;

        if !output.success() {
            if is_missing(&output.stderr) {
                debug!("Dataset {} does not exist", name);
                return Ok(None);
            }
            return Err(EngineError::command_failed(
                self.command_line(&argv),
                output.exit_code,
                output.stderr.trim(),
            ));
        }

        match output.stdout.lines().find(|l| !l.trim().is_empty()) {
            Some(line) => parse_list_line(&self.command_line(&argv), line).map(Some),
            None => Ok(None),
        }
    }

    async fn create_filesystem(&self, name: &str, properties: &Properties) -> Result<Dataset> {
        info!("Creating ZFS filesystem: {}", name);
        let mut argv = vec!["create".to_string()];
        argv.extend(property_args(properties));
        argv.push(name.to_string());
        exec(&self.zfs, &argv).await?;

        let dataset = self.require_dataset(name).await?;
        info!("ZFS filesystem created: {}", name);
        Ok(dataset)
    }

    async fn snapshot(
        &self,
        dataset: &str,
        snapshot_name: &str,
        recursive: bool,
    ) -> Result<Dataset> {
        let snap = format!("{}@{}", dataset, snapshot_name);
        let mut argv = vec!["snapshot".to_string()];
        if recursive {
            argv.push("-r".to_string());
        }
        argv.push(snap.clone());
        exec(&self.zfs, &argv).await?;

        info!("ZFS snapshot created: {}", snap);
        self.require_dataset(&snap).await
    }

    async fn clone_snapshot(
        &self,
        snapshot: &str,
        target: &str,
        properties: &Properties,
    ) -> Result<Dataset> {
        info!("Cloning ZFS snapshot {} to {}", snapshot, target);
        let mut argv = vec!["clone".to_string()];
        argv.extend(property_args(properties));
        argv.push(snapshot.to_string());
        argv.push(target.to_string());
        exec(&self.zfs, &argv).await?;

        let dataset = self.require_dataset(target).await?;
        info!("ZFS clone created: {}", target);
        Ok(dataset)
    }

    async fn destroy(&self, name: &str, recursive: bool) -> Result<()> {
        info!("Destroying ZFS dataset: {}", name);
        let argv = if recursive {
            args(&["destroy", "-r", name])
        } else {
            args(&["destroy", name])
        };
        exec(&self.zfs, &argv).await?;
        info!("ZFS dataset destroyed: {}", name);
        Ok(())
    }

    async fn list_children(&self, parent: &str) -> Result<Vec<Dataset>> {
        let argv = args(&[
            "list", "-H", "-p", "-t", "all", "-d", "1", "-o", LIST_COLUMNS, parent,
        ]);
        let output = exec(&self.zfs, &argv).await?;
        let command = self.command_line(&argv);

        let mut children = Vec::new();
        for line in output.stdout.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let dataset = parse_list_line(&command, line)?;
            // Skip the parent dataset itself
            if dataset.name == parent {
                continue;
            }
            children.push(dataset);
        }

        Ok(children)
    }

    async fn get_property(&self, name: &str, property: &str) -> Result<String> {
        let argv = args(&["get", "-H", "-p", "-o", "value", property, name]);
        let output = exec(&self.zfs, &argv).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn set_mountpoint_owner(
        &self,
        mountpoint: &str,
        uid: u32,
        gid: Option<u32>,
    ) -> Result<()> {
        let path = mountpoint.to_string();
        tokio::task::spawn_blocking(move || std::os::unix::fs::chown(&path, Some(uid), gid))
            .await
            .map_err(|e| EngineError::ownership_failed(mountpoint, e.to_string()))?
            .map_err(|e| EngineError::ownership_failed(mountpoint, e.to_string()))?;

        match gid {
            Some(gid) => info!("Updated ownership of {} to {}:{}", mountpoint, uid, gid),
            None => info!("Updated ownership of {} to {}", mountpoint, uid),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_parse_filesystem_line() {
        let ds = parse_list_line("zfs list", "tank/data/pvc-1\tfilesystem\t/tank/data/pvc-1\t-")
            .unwrap();
        assert_eq!(ds.name, "tank/data/pvc-1");
        assert_eq!(ds.kind, DatasetKind::Filesystem);
        assert_eq!(ds.mountpoint.as_deref(), Some("/tank/data/pvc-1"));
        assert!(!ds.is_clone());
    }

    #[test]
    fn test_parse_clone_and_snapshot_lines() {
        let clone = parse_list_line(
            "zfs list",
            "tank/data/pvc-2\tfilesystem\t/tank/data/pvc-2\ttank/data/pvc-1@pvc-2",
        )
        .unwrap();
        assert_eq!(clone.origin.as_deref(), Some("tank/data/pvc-1@pvc-2"));

        let snap = parse_list_line("zfs list", "tank/data/pvc-1@pvc-2\tsnapshot\t-\t-").unwrap();
        assert_eq!(snap.kind, DatasetKind::Snapshot);
        assert!(snap.mountpoint.is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_line() {
        let err = parse_list_line("zfs list", "tank/data only-two").unwrap_err();
        assert!(matches!(err, EngineError::UnexpectedOutput { .. }));

        let err = parse_list_line("zfs list", "tank/data\tbookmark\t-\t-").unwrap_err();
        assert!(matches!(err, EngineError::UnexpectedOutput { .. }));
    }

    #[test]
    fn test_property_args_are_ordered() {
        let mut props = Properties::new();
        props.insert("sharenfs".to_string(), "rw".to_string());
        props.insert("refquota".to_string(), "1024".to_string());
        assert_eq!(
            property_args(&props),
            vec!["-o", "refquota=1024", "-o", "sharenfs=rw"]
        );
    }

    #[test]
    fn test_missing_dataset_detection() {
        assert!(is_missing("cannot open 'tank/x': dataset does not exist"));
        assert!(!is_missing("cannot open 'tank/x': permission denied"));
    }

    #[tokio::test]
    async fn test_chown_to_current_owner() {
        let dir = tempfile::tempdir().unwrap();
        let meta = std::fs::metadata(dir.path()).unwrap();
        let engine = ZfsCliEngine::default();

        engine
            .set_mountpoint_owner(dir.path().to_str().unwrap(), meta.uid(), None)
            .await
            .unwrap();
        engine
            .set_mountpoint_owner(dir.path().to_str().unwrap(), meta.uid(), Some(meta.gid()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_chown_missing_path_fails() {
        let engine = ZfsCliEngine::default();
        let err = engine
            .set_mountpoint_owner("/nonexistent/zfs-nfs/mountpoint", 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::OwnershipFailed { .. }));
    }

    #[tokio::test]
    async fn test_missing_zfs_binary_is_an_error() {
        let engine = ZfsCliEngine::new("/nonexistent/zfs");
        assert!(engine.get_dataset("tank/data").await.is_err());
    }
}
