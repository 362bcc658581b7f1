use crate::error::{EngineError, Result};
use crate::pool::{split_snapshot, Dataset, DatasetKind, PoolEngine, Properties};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A mutating call observed by `MockPoolEngine`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateFilesystem {
        name: String,
        properties: Properties,
    },
    Snapshot {
        name: String,
    },
    Clone {
        snapshot: String,
        target: String,
        properties: Properties,
    },
    Destroy {
        name: String,
        recursive: bool,
    },
    SetOwner {
        mountpoint: String,
        uid: u32,
        gid: Option<u32>,
    },
}

/// In-memory pool engine for tests
///
/// Tracks datasets in memory so tests can assert which pool objects were
/// created or destroyed without touching a real pool. Mountpoints follow
/// the zfs default of `/<dataset name>`.
#[derive(Default)]
pub struct MockPoolEngine {
    datasets: Arc<RwLock<BTreeMap<String, Dataset>>>,
    calls: Arc<RwLock<Vec<EngineCall>>>,
    failures: Arc<RwLock<HashSet<(String, String)>>>,
    hangs: Arc<RwLock<HashSet<(String, String)>>>,
}

impl MockPoolEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a filesystem without recording a call
    pub async fn add_filesystem(&self, name: &str) {
        self.datasets
            .write()
            .await
            .insert(name.to_string(), filesystem(name, None, Properties::new()));
    }

    /// Seed a snapshot without recording a call
    pub async fn add_snapshot(&self, name: &str) {
        self.datasets
            .write()
            .await
            .insert(name.to_string(), snapshot(name));
    }

    /// Set a property on an existing dataset
    pub async fn set_property(&self, name: &str, property: &str, value: &str) {
        if let Some(ds) = self.datasets.write().await.get_mut(name) {
            ds.properties
                .insert(property.to_string(), value.to_string());
        }
    }

    /// Change the mountpoint of an existing dataset.
    ///
    /// `None` stands for `mountpoint=none` or `legacy`; filesystems created
    /// below such a dataset inherit it.
    pub async fn set_mountpoint(&self, name: &str, mountpoint: Option<&str>) {
        if let Some(ds) = self.datasets.write().await.get_mut(name) {
            ds.mountpoint = mountpoint.map(str::to_string);
        }
    }

    /// Remove a dataset behind the provisioner's back, as an operator would
    pub async fn remove_out_of_band(&self, name: &str) {
        self.datasets.write().await.remove(name);
    }

    /// Make the next and all further `operation` calls on `target` fail.
    ///
    /// Operation names match the trait methods, e.g. `"destroy"`.
    pub async fn fail_on(&self, operation: &str, target: &str) {
        self.failures
            .write()
            .await
            .insert((operation.to_string(), target.to_string()));
    }

    /// Make `operation` calls on `target` never complete, like a hung pool
    pub async fn hang_on(&self, operation: &str, target: &str) {
        self.hangs
            .write()
            .await
            .insert((operation.to_string(), target.to_string()));
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.datasets.read().await.contains_key(name)
    }

    pub async fn dataset(&self, name: &str) -> Option<Dataset> {
        self.datasets.read().await.get(name).cloned()
    }

    /// All mutating calls in the order they were made
    pub async fn calls(&self) -> Vec<EngineCall> {
        self.calls.read().await.clone()
    }

    pub async fn destroy_calls(&self) -> Vec<String> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|c| match c {
                EngineCall::Destroy { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn snapshot_calls(&self) -> Vec<String> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|c| match c {
                EngineCall::Snapshot { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn owner_calls(&self) -> Vec<(String, u32, Option<u32>)> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|c| match c {
                EngineCall::SetOwner {
                    mountpoint,
                    uid,
                    gid,
                } => Some((mountpoint.clone(), *uid, *gid)),
                _ => None,
            })
            .collect()
    }

    async fn check_failure(&self, operation: &str, target: &str) -> Result<()> {
        let key = (operation.to_string(), target.to_string());
        let hangs = self.hangs.read().await.contains(&key);
        if hangs {
            std::future::pending::<()>().await;
        }
        if self.failures.read().await.contains(&key) {
            return Err(EngineError::injected(operation, target));
        }
        Ok(())
    }

    async fn record(&self, call: EngineCall) {
        self.calls.write().await.push(call);
    }
}

fn filesystem(name: &str, origin: Option<String>, properties: Properties) -> Dataset {
    Dataset {
        name: name.to_string(),
        kind: DatasetKind::Filesystem,
        mountpoint: Some(format!("/{}", name)),
        origin,
        properties,
    }
}

fn snapshot(name: &str) -> Dataset {
    Dataset {
        name: name.to_string(),
        kind: DatasetKind::Snapshot,
        mountpoint: None,
        origin: None,
        properties: Properties::new(),
    }
}

fn parent_of(name: &str) -> Option<&str> {
    name.rsplit_once('/').map(|(parent, _)| parent)
}

/// Filesystems inherit an unset mountpoint from their parent
fn inherit_mountpoint(ds: &BTreeMap<String, Dataset>, dataset: &mut Dataset) {
    let unmounted_parent = parent_of(&dataset.name)
        .and_then(|parent| ds.get(parent))
        .is_some_and(|parent| parent.mountpoint.is_none());
    if unmounted_parent {
        dataset.mountpoint = None;
    }
}

fn is_descendant(candidate: &str, name: &str) -> bool {
    candidate.starts_with(&format!("{}/", name)) || candidate.starts_with(&format!("{}@", name))
}

#[async_trait]
impl PoolEngine for MockPoolEngine {
    async fn get_dataset(&self, name: &str) -> Result<Option<Dataset>> {
        self.check_failure("get_dataset", name).await?;
        Ok(self.datasets.read().await.get(name).cloned())
    }

    async fn create_filesystem(&self, name: &str, properties: &Properties) -> Result<Dataset> {
        self.check_failure("create_filesystem", name).await?;
        self.record(EngineCall::CreateFilesystem {
            name: name.to_string(),
            properties: properties.clone(),
        })
        .await;

        let mut ds = self.datasets.write().await;
        if ds.contains_key(name) {
            return Err(EngineError::command_failed(
                format!("zfs create {}", name),
                1,
                format!("cannot create '{}': dataset already exists", name),
            ));
        }
        if let Some(parent) = parent_of(name) {
            if !ds.contains_key(parent) {
                return Err(EngineError::command_failed(
                    format!("zfs create {}", name),
                    1,
                    format!("cannot create '{}': parent does not exist", name),
                ));
            }
        }

        let mut dataset = filesystem(name, None, properties.clone());
        inherit_mountpoint(&ds, &mut dataset);
        ds.insert(name.to_string(), dataset.clone());
        debug!("Mock: created filesystem {}", name);
        Ok(dataset)
    }

    async fn snapshot(
        &self,
        dataset: &str,
        snapshot_name: &str,
        recursive: bool,
    ) -> Result<Dataset> {
        let snap = format!("{}@{}", dataset, snapshot_name);
        self.check_failure("snapshot", &snap).await?;
        self.record(EngineCall::Snapshot { name: snap.clone() }).await;

        let mut ds = self.datasets.write().await;
        if !ds.contains_key(dataset) {
            return Err(EngineError::dataset_not_found(dataset));
        }
        if ds.contains_key(&snap) {
            return Err(EngineError::command_failed(
                format!("zfs snapshot {}", snap),
                1,
                format!("cannot create snapshot '{}': dataset already exists", snap),
            ));
        }

        if recursive {
            let children: Vec<String> = ds
                .keys()
                .filter(|k| k.starts_with(&format!("{}/", dataset)) && !k.contains('@'))
                .cloned()
                .collect();
            for child in children {
                let child_snap = format!("{}@{}", child, snapshot_name);
                ds.insert(child_snap.clone(), snapshot(&child_snap));
            }
        }

        let created = snapshot(&snap);
        ds.insert(snap.clone(), created.clone());
        debug!("Mock: created snapshot {}", snap);
        Ok(created)
    }

    async fn clone_snapshot(
        &self,
        snapshot: &str,
        target: &str,
        properties: &Properties,
    ) -> Result<Dataset> {
        self.check_failure("clone_snapshot", target).await?;
        self.record(EngineCall::Clone {
            snapshot: snapshot.to_string(),
            target: target.to_string(),
            properties: properties.clone(),
        })
        .await;

        let mut ds = self.datasets.write().await;
        if split_snapshot(snapshot).is_none() || !ds.contains_key(snapshot) {
            return Err(EngineError::dataset_not_found(snapshot));
        }
        if ds.contains_key(target) {
            return Err(EngineError::command_failed(
                format!("zfs clone {} {}", snapshot, target),
                1,
                format!("cannot create '{}': dataset already exists", target),
            ));
        }

        let mut dataset = filesystem(target, Some(snapshot.to_string()), properties.clone());
        inherit_mountpoint(&ds, &mut dataset);
        ds.insert(target.to_string(), dataset.clone());
        debug!("Mock: cloned {} to {}", snapshot, target);
        Ok(dataset)
    }

    async fn destroy(&self, name: &str, recursive: bool) -> Result<()> {
        self.check_failure("destroy", name).await?;
        self.record(EngineCall::Destroy {
            name: name.to_string(),
            recursive,
        })
        .await;

        let mut ds = self.datasets.write().await;
        if !ds.contains_key(name) {
            return Err(EngineError::command_failed(
                format!("zfs destroy {}", name),
                1,
                format!("cannot open '{}': dataset does not exist", name),
            ));
        }

        let doomed: Vec<String> = ds
            .keys()
            .filter(|k| k.as_str() == name || (recursive && is_descendant(k, name)))
            .cloned()
            .collect();

        if !recursive && ds.keys().any(|k| is_descendant(k, name)) {
            return Err(EngineError::command_failed(
                format!("zfs destroy {}", name),
                1,
                format!("cannot destroy '{}': filesystem has children", name),
            ));
        }
        if let Some(clone) = ds
            .values()
            .find(|d| d.origin.as_deref().is_some_and(|o| doomed.iter().any(|x| x == o)))
        {
            return Err(EngineError::command_failed(
                format!("zfs destroy {}", name),
                1,
                format!("cannot destroy '{}': snapshot has dependent clone {}", name, clone.name),
            ));
        }

        for d in doomed {
            ds.remove(&d);
        }
        debug!("Mock: destroyed {}", name);
        Ok(())
    }

    async fn list_children(&self, parent: &str) -> Result<Vec<Dataset>> {
        self.check_failure("list_children", parent).await?;
        let ds = self.datasets.read().await;
        if !ds.contains_key(parent) {
            return Err(EngineError::dataset_not_found(parent));
        }
        Ok(ds
            .values()
            .filter(|d| {
                let base = d.name.split('@').next().unwrap_or(&d.name);
                if d.kind == DatasetKind::Snapshot {
                    base == parent
                } else {
                    parent_of(&d.name) == Some(parent)
                }
            })
            .cloned()
            .collect())
    }

    async fn get_property(&self, name: &str, property: &str) -> Result<String> {
        self.check_failure("get_property", name).await?;
        let ds = self.datasets.read().await;
        let dataset = ds
            .get(name)
            .ok_or_else(|| EngineError::dataset_not_found(name))?;
        dataset.properties.get(property).cloned().ok_or_else(|| {
            EngineError::command_failed(
                format!("zfs get {} {}", property, name),
                1,
                format!("bad property list: invalid property '{}'", property),
            )
        })
    }

    async fn set_mountpoint_owner(
        &self,
        mountpoint: &str,
        uid: u32,
        gid: Option<u32>,
    ) -> Result<()> {
        self.check_failure("set_mountpoint_owner", mountpoint).await?;
        self.record(EngineCall::SetOwner {
            mountpoint: mountpoint.to_string(),
            uid,
            gid,
        })
        .await;
        debug!("Mock: chown {} {}:{:?}", mountpoint, uid, gid);
        Ok(())
    }
}
