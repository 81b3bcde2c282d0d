//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeConnector`] models one cluster in memory. It records every call by
//! name, can be told to fail a named call, and can pause inside
//! `create_fileset` so concurrency tests can interleave requests.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::connector::{
    Connector, ConnectorError, ConnectorFuture, Fileset, FilesetCopy, FilesetOptions,
    FilesetType, FilesystemDetails, FilesystemKind, MountDetails, MountStatus, QuotaDetails,
    SnapshotCopy, UNLINKED_PATH,
};
use crate::quota::parse_quota_bytes;

/// Creation time reported for every fake snapshot.
pub const FAKE_SNAPSHOT_CREATED_AT: &str = "2024-03-05 14:07:09,250";

/// Parent id given to dependent filesets created without a named parent.
const DEFAULT_PARENT_ID: u64 = 1;

/// A filesystem known to a [`FakeConnector`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FakeFilesystem {
    /// Filesystem name on the fake cluster.
    pub name: String,
    /// Filesystem UUID.
    pub uuid: String,
    /// Local or remote ownership.
    pub kind: FilesystemKind,
    /// Mount state on the fake cluster.
    pub status: MountStatus,
    /// Mount point on the fake cluster.
    pub mount_point: String,
    /// `<cluster>:<filesystem>` device name.
    pub remote_device_name: String,
    /// Nodes mounting the filesystem.
    pub nodes_mounted: Vec<String>,
    /// Whether quota enforcement is on.
    pub quota_enabled: bool,
    /// Whether the management node mounts the filesystem.
    pub gui_mounted: bool,
}

impl FakeFilesystem {
    /// A mounted, quota-enabled filesystem owned by the fake cluster.
    #[must_use]
    pub fn local(name: &str, uuid: &str, mount_point: &str) -> Self {
        Self {
            name: name.to_owned(),
            uuid: uuid.to_owned(),
            kind: FilesystemKind::Local,
            status: MountStatus::Mounted,
            mount_point: mount_point.to_owned(),
            remote_device_name: format!("fake-cluster:{name}"),
            nodes_mounted: Vec::new(),
            quota_enabled: true,
            gui_mounted: true,
        }
    }

    /// Marks the filesystem as mounted from `owner_device` (`cluster:fs`).
    #[must_use]
    pub fn remote_from(mut self, owner_device: &str) -> Self {
        self.kind = FilesystemKind::Remote;
        owner_device.clone_into(&mut self.remote_device_name);
        self
    }

    /// Sets the mount state.
    #[must_use]
    pub const fn with_status(mut self, status: MountStatus) -> Self {
        self.status = status;
        self
    }

    /// Adds a node that mounts the filesystem.
    #[must_use]
    pub fn mounted_on(mut self, node: &str) -> Self {
        self.nodes_mounted.push(node.to_owned());
        self
    }

    /// Disables quota enforcement.
    #[must_use]
    pub const fn without_quota(mut self) -> Self {
        self.quota_enabled = false;
        self
    }

    /// Reports the filesystem as unmounted on the management node.
    #[must_use]
    pub const fn without_gui_mount(mut self) -> Self {
        self.gui_mounted = false;
        self
    }

    fn details(&self) -> FilesystemDetails {
        FilesystemDetails {
            name: self.name.clone(),
            uuid: self.uuid.clone(),
            kind: self.kind,
            mount: self.mount(),
        }
    }

    fn mount(&self) -> MountDetails {
        MountDetails {
            status: self.status,
            mount_point: self.mount_point.clone(),
            remote_device_name: self.remote_device_name.clone(),
            nodes_mounted: self.nodes_mounted.clone(),
        }
    }
}

/// Initial state of a seeded fileset.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FilesetSeed {
    id: Option<u64>,
    parent_id: u64,
    path: String,
    quota: String,
    block_limit_kib: Option<i64>,
}

impl FilesetSeed {
    /// An independent fileset linked at `junction`.
    #[must_use]
    pub fn linked(junction: &str) -> Self {
        Self {
            path: junction.to_owned(),
            ..Self::default()
        }
    }

    /// An independent, unlinked fileset.
    #[must_use]
    pub fn unlinked() -> Self {
        Self::linked(UNLINKED_PATH)
    }

    /// Uses a fixed fileset id instead of the next free one.
    #[must_use]
    pub const fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Makes the fileset dependent on `parent_id`.
    #[must_use]
    pub const fn with_parent(mut self, parent_id: u64) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Sets the raw quota string reported by the management API.
    #[must_use]
    pub fn with_quota(mut self, raw: &str) -> Self {
        raw.clone_into(&mut self.quota);
        self
    }

    /// Overrides the block limit reported in quota details.
    #[must_use]
    pub const fn with_block_limit_kib(mut self, kib: i64) -> Self {
        self.block_limit_kib = Some(kib);
        self
    }
}

/// Gate that holds `create_fileset` until the test releases it.
#[derive(Debug, Default)]
pub struct PausePoint {
    /// Notified once `create_fileset` has been entered.
    pub reached: Notify,
    /// Notify to let `create_fileset` continue.
    pub resume: Notify,
}

/// A copy request recorded by the fake.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedCopy {
    /// Source fileset.
    pub fileset: String,
    /// Snapshot name for snapshot copies.
    pub snapshot: Option<String>,
    /// Path inside the source.
    pub source_path: String,
    /// Absolute destination path.
    pub target_path: String,
    /// Node class that ran the copy.
    pub node_class: Option<String>,
}

#[derive(Clone, Debug)]
struct FakeFileset {
    id: u64,
    parent_id: u64,
    path: String,
    quota: String,
    block_limit_kib: Option<i64>,
    snapshots: Vec<String>,
}

impl FakeFileset {
    fn view(&self, name: &str) -> Fileset {
        Fileset {
            id: self.id.to_string(),
            name: name.to_owned(),
            parent_id: self.parent_id,
            path: self.path.clone(),
        }
    }
}

type Key = (String, String);

fn key(first: &str, second: &str) -> Key {
    (first.to_owned(), second.to_owned())
}

#[derive(Debug)]
struct FakeState {
    filesystems: Vec<FakeFilesystem>,
    filesets: BTreeMap<Key, FakeFileset>,
    next_fileset_id: u64,
    directories: BTreeSet<Key>,
    symlinks: BTreeMap<Key, Key>,
    node_classes: BTreeSet<String>,
    supports_snapshots: bool,
    failures: BTreeSet<String>,
    calls: Vec<String>,
    copies: Vec<RecordedCopy>,
    pause: Option<Arc<PausePoint>>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            filesystems: Vec::new(),
            filesets: BTreeMap::new(),
            next_fileset_id: 1,
            directories: BTreeSet::new(),
            symlinks: BTreeMap::new(),
            node_classes: BTreeSet::new(),
            supports_snapshots: true,
            failures: BTreeSet::new(),
            calls: Vec::new(),
            copies: Vec::new(),
            pause: None,
        }
    }
}

impl FakeState {
    fn filesystem(&self, op: &str, name: &str) -> Result<&FakeFilesystem, ConnectorError> {
        self.filesystems
            .iter()
            .find(|fs| fs.name == name)
            .ok_or_else(|| ConnectorError::api(op, format!("unknown filesystem [{name}]")))
    }

    fn fileset_mut(
        &mut self,
        op: &str,
        fs: &str,
        name: &str,
    ) -> Result<&mut FakeFileset, ConnectorError> {
        self.filesets
            .get_mut(&key(fs, name))
            .ok_or_else(|| ConnectorError::api(op, format!("fileset [{name}] not found in [{fs}]")))
    }

    fn allocate_id(&mut self, requested: Option<u64>) -> u64 {
        let id = requested.unwrap_or(self.next_fileset_id);
        self.next_fileset_id = self.next_fileset_id.max(id.saturating_add(1));
        id
    }

    fn create_fileset(
        &mut self,
        fs: &str,
        name: &str,
        options: &FilesetOptions,
    ) -> Result<(), ConnectorError> {
        const OP: &str = "create_fileset";
        self.filesystem(OP, fs)?;
        if self.filesets.contains_key(&key(fs, name)) {
            return Err(ConnectorError::api(OP, format!("fileset [{name}] already exists")));
        }
        let parent_id = match (&options.parent_fileset, options.fileset_type) {
            (Some(parent), _) => self.fileset_mut(OP, fs, parent)?.id,
            (None, FilesetType::Dependent) => DEFAULT_PARENT_ID,
            (None, FilesetType::Independent) => 0,
        };
        let id = self.allocate_id(None);
        self.filesets.insert(
            key(fs, name),
            FakeFileset {
                id,
                parent_id,
                path: UNLINKED_PATH.to_owned(),
                quota: String::new(),
                block_limit_kib: None,
                snapshots: Vec::new(),
            },
        );
        Ok(())
    }
}

/// In-memory [`Connector`] for one cluster.
#[derive(Clone, Debug, Default)]
pub struct FakeConnector {
    state: Arc<StdMutex<FakeState>>,
}

impl FakeConnector {
    /// Creates a cluster with no filesystems.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StdMutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `op`, applies any injected failure, then runs `body`.
    fn record<T>(
        &self,
        op: &'static str,
        body: impl FnOnce(&mut FakeState) -> Result<T, ConnectorError>,
    ) -> Result<T, ConnectorError> {
        let mut state = self.lock();
        state.calls.push(op.to_owned());
        if state.failures.contains(op) {
            return Err(ConnectorError::api(op, "injected failure"));
        }
        body(&mut state)
    }

    /// Adds a filesystem.
    #[must_use]
    pub fn with_filesystem(self, filesystem: FakeFilesystem) -> Self {
        self.lock().filesystems.push(filesystem);
        self
    }

    /// Seeds a fileset.
    #[must_use]
    pub fn with_fileset(self, fs: &str, name: &str, seed: FilesetSeed) -> Self {
        {
            let mut state = self.lock();
            let id = state.allocate_id(seed.id);
            state.filesets.insert(
                key(fs, name),
                FakeFileset {
                    id,
                    parent_id: seed.parent_id,
                    path: seed.path,
                    quota: seed.quota,
                    block_limit_kib: seed.block_limit_kib,
                    snapshots: Vec::new(),
                },
            );
        }
        self
    }

    /// Seeds a directory.
    #[must_use]
    pub fn with_directory(self, fs: &str, path: &str) -> Self {
        self.lock().directories.insert(key(fs, path));
        self
    }

    /// Seeds a snapshot on an already seeded fileset.
    #[must_use]
    pub fn with_snapshot(self, fs: &str, fileset: &str, snapshot: &str) -> Self {
        if let Some(entry) = self.lock().filesets.get_mut(&key(fs, fileset)) {
            entry.snapshots.push(snapshot.to_owned());
        }
        self
    }

    /// Seeds `count` snapshots named `snap-<n>`.
    #[must_use]
    pub fn with_snapshots(self, fs: &str, fileset: &str, count: usize) -> Self {
        if let Some(entry) = self.lock().filesets.get_mut(&key(fs, fileset)) {
            entry
                .snapshots
                .extend((0..count).map(|index| format!("snap-{index}")));
        }
        self
    }

    /// Registers a node class.
    #[must_use]
    pub fn with_node_class(self, node_class: &str) -> Self {
        self.lock().node_classes.insert(node_class.to_owned());
        self
    }

    /// Reports cluster software too old for snapshot copies.
    #[must_use]
    pub fn without_snapshot_support(self) -> Self {
        self.lock().supports_snapshots = false;
        self
    }

    /// Makes every later call named `op` fail.
    pub fn inject_failure(&self, op: &str) {
        self.lock().failures.insert(op.to_owned());
    }

    /// Makes the next `create_fileset` wait on the returned gate.
    #[must_use]
    pub fn pause_create_fileset(&self) -> Arc<PausePoint> {
        let pause = Arc::new(PausePoint::default());
        self.lock().pause = Some(Arc::clone(&pause));
        pause
    }

    /// Names of every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls named `op`.
    #[must_use]
    pub fn call_count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|call| *call == op).count()
    }

    /// Current view of a fileset.
    #[must_use]
    pub fn fileset(&self, fs: &str, name: &str) -> Option<Fileset> {
        self.lock()
            .filesets
            .get(&key(fs, name))
            .map(|entry| entry.view(name))
    }

    /// Quota of a fileset in bytes, if one is set.
    #[must_use]
    pub fn fileset_quota_bytes(&self, fs: &str, name: &str) -> Option<u64> {
        self.lock()
            .filesets
            .get(&key(fs, name))
            .and_then(|entry| parse_quota_bytes(&entry.quota).ok())
    }

    /// Whether a directory exists.
    #[must_use]
    pub fn has_directory(&self, fs: &str, path: &str) -> bool {
        self.lock().directories.contains(&key(fs, path))
    }

    /// Target `(filesystem, path)` of a symlink.
    #[must_use]
    pub fn symlink(&self, fs: &str, link_path: &str) -> Option<(String, String)> {
        self.lock().symlinks.get(&key(fs, link_path)).cloned()
    }

    /// Snapshot names of a fileset.
    #[must_use]
    pub fn snapshot_names(&self, fs: &str, fileset: &str) -> Vec<String> {
        self.lock()
            .filesets
            .get(&key(fs, fileset))
            .map(|entry| entry.snapshots.clone())
            .unwrap_or_default()
    }

    /// Nodes mounting a filesystem.
    #[must_use]
    pub fn nodes_mounted(&self, fs: &str) -> Vec<String> {
        self.lock()
            .filesystems
            .iter()
            .find(|entry| entry.name == fs)
            .map(|entry| entry.nodes_mounted.clone())
            .unwrap_or_default()
    }

    /// Copies requested so far.
    #[must_use]
    pub fn copies(&self) -> Vec<RecordedCopy> {
        self.lock().copies.clone()
    }
}

impl Connector for FakeConnector {
    fn path_exists<'a>(&'a self, filesystem: &'a str, path: &'a str) -> ConnectorFuture<'a, bool> {
        Box::pin(async move {
            self.record("path_exists", |state| {
                let entry = key(filesystem, path);
                Ok(state.directories.contains(&entry) || state.symlinks.contains_key(&entry))
            })
        })
    }

    fn make_directory<'a>(
        &'a self,
        filesystem: &'a str,
        path: &'a str,
        _uid: Option<u32>,
        _gid: Option<u32>,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("make_directory", |state| {
                state.filesystem("make_directory", filesystem)?;
                state.directories.insert(key(filesystem, path));
                Ok(())
            })
        })
    }

    fn delete_directory<'a>(&'a self, filesystem: &'a str, path: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("delete_directory", |state| {
                let entry = key(filesystem, path);
                let target = state.symlinks.get(&entry).cloned().unwrap_or(entry);
                state.directories.remove(&target);
                Ok(())
            })
        })
    }

    fn create_symlink<'a>(
        &'a self,
        link_fs: &'a str,
        link_path: &'a str,
        target_fs: &'a str,
        target_path: &'a str,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("create_symlink", |state| {
                state
                    .symlinks
                    .insert(key(link_fs, link_path), key(target_fs, target_path));
                Ok(())
            })
        })
    }

    fn delete_symlink<'a>(&'a self, filesystem: &'a str, link_path: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("delete_symlink", |state| {
                state.symlinks.remove(&key(filesystem, link_path));
                Ok(())
            })
        })
    }

    fn list_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, Option<Fileset>> {
        Box::pin(async move {
            self.record("list_fileset", |state| {
                Ok(state
                    .filesets
                    .get(&key(filesystem, fileset))
                    .map(|entry| entry.view(fileset)))
            })
        })
    }

    fn fileset_by_id<'a>(
        &'a self,
        filesystem: &'a str,
        fileset_id: &'a str,
    ) -> ConnectorFuture<'a, Option<Fileset>> {
        Box::pin(async move {
            self.record("fileset_by_id", |state| {
                Ok(state
                    .filesets
                    .iter()
                    .find(|((fs, _), entry)| fs == filesystem && entry.id.to_string() == fileset_id)
                    .map(|((_, name), entry)| entry.view(name)))
            })
        })
    }

    fn fileset_exists<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, bool> {
        Box::pin(async move {
            self.record("fileset_exists", |state| {
                Ok(state.filesets.contains_key(&key(filesystem, fileset)))
            })
        })
    }

    fn is_fileset_linked<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, bool> {
        Box::pin(async move {
            self.record("is_fileset_linked", |state| {
                let entry = state.fileset_mut("is_fileset_linked", filesystem, fileset)?;
                Ok(entry.view(fileset).link_path().is_some())
            })
        })
    }

    fn create_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        options: &'a FilesetOptions,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            let pause = self.record("create_fileset", |state| Ok(state.pause.take()))?;
            if let Some(pause) = pause {
                pause.reached.notify_one();
                pause.resume.notified().await;
            }
            self.lock().create_fileset(filesystem, fileset, options)
        })
    }

    fn link_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        junction_path: &'a str,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("link_fileset", |state| {
                junction_path.clone_into(&mut state.fileset_mut("link_fileset", filesystem, fileset)?.path);
                Ok(())
            })
        })
    }

    fn delete_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("delete_fileset", |state| {
                state.filesets.remove(&key(filesystem, fileset));
                Ok(())
            })
        })
    }

    fn fileset_quota<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, String> {
        Box::pin(async move {
            self.record("fileset_quota", |state| {
                Ok(state.fileset_mut("fileset_quota", filesystem, fileset)?.quota.clone())
            })
        })
    }

    fn set_fileset_quota<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        bytes: u64,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("set_fileset_quota", |state| {
                state.fileset_mut("set_fileset_quota", filesystem, fileset)?.quota = bytes.to_string();
                Ok(())
            })
        })
    }

    fn fileset_quota_details<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, QuotaDetails> {
        Box::pin(async move {
            self.record("fileset_quota_details", |state| {
                let entry = state.fileset_mut("fileset_quota_details", filesystem, fileset)?;
                let block_limit_kib = entry.block_limit_kib.unwrap_or_else(|| {
                    let bytes = parse_quota_bytes(&entry.quota).unwrap_or(0);
                    i64::try_from(bytes >> 10).unwrap_or(i64::MAX)
                });
                Ok(QuotaDetails { block_limit_kib })
            })
        })
    }

    fn quota_enabled<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, bool> {
        Box::pin(async move {
            self.record("quota_enabled", |state| {
                Ok(state.filesystem("quota_enabled", filesystem)?.quota_enabled)
            })
        })
    }

    fn filesystem_details<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, FilesystemDetails> {
        Box::pin(async move {
            self.record("filesystem_details", |state| {
                Ok(state.filesystem("filesystem_details", filesystem)?.details())
            })
        })
    }

    fn filesystem_mount_details<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, MountDetails> {
        Box::pin(async move {
            self.record("filesystem_mount_details", |state| {
                Ok(state.filesystem("filesystem_mount_details", filesystem)?.mount())
            })
        })
    }

    fn is_mounted_on_gui_node<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, bool> {
        Box::pin(async move {
            self.record("is_mounted_on_gui_node", |state| {
                Ok(state.filesystem("is_mounted_on_gui_node", filesystem)?.gui_mounted)
            })
        })
    }

    fn mount_filesystem<'a>(&'a self, filesystem: &'a str, node: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("mount_filesystem", |state| {
                let entry = state
                    .filesystems
                    .iter_mut()
                    .find(|fs| fs.name == filesystem)
                    .ok_or_else(|| {
                        ConnectorError::api("mount_filesystem", format!("unknown filesystem [{filesystem}]"))
                    })?;
                entry.nodes_mounted.push(node.to_owned());
                Ok(())
            })
        })
    }

    fn filesystem_name<'a>(&'a self, fs_uuid: &'a str) -> ConnectorFuture<'a, String> {
        Box::pin(async move {
            self.record("filesystem_name", |state| {
                state
                    .filesystems
                    .iter()
                    .find(|fs| fs.uuid == fs_uuid)
                    .map(|fs| fs.name.clone())
                    .ok_or_else(|| {
                        ConnectorError::api("filesystem_name", format!("no filesystem with uuid [{fs_uuid}]"))
                    })
            })
        })
    }

    fn snapshot_exists<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        snapshot: &'a str,
    ) -> ConnectorFuture<'a, bool> {
        Box::pin(async move {
            self.record("snapshot_exists", |state| {
                Ok(state
                    .filesets
                    .get(&key(filesystem, fileset))
                    .is_some_and(|entry| entry.snapshots.iter().any(|name| name == snapshot)))
            })
        })
    }

    fn list_snapshots<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.record("list_snapshots", |state| {
                Ok(state.fileset_mut("list_snapshots", filesystem, fileset)?.snapshots.clone())
            })
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        snapshot: &'a str,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("create_snapshot", |state| {
                let entry = state.fileset_mut("create_snapshot", filesystem, fileset)?;
                if entry.snapshots.iter().any(|name| name == snapshot) {
                    return Err(ConnectorError::api(
                        "create_snapshot",
                        format!("snapshot [{snapshot}] already exists"),
                    ));
                }
                entry.snapshots.push(snapshot.to_owned());
                Ok(())
            })
        })
    }

    fn delete_snapshot<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        snapshot: &'a str,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("delete_snapshot", |state| {
                if let Some(entry) = state.filesets.get_mut(&key(filesystem, fileset)) {
                    entry.snapshots.retain(|name| name != snapshot);
                }
                Ok(())
            })
        })
    }

    fn snapshot_created_at<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        snapshot: &'a str,
    ) -> ConnectorFuture<'a, String> {
        Box::pin(async move {
            self.record("snapshot_created_at", |state| {
                let entry = state.fileset_mut("snapshot_created_at", filesystem, fileset)?;
                if entry.snapshots.iter().any(|name| name == snapshot) {
                    Ok(FAKE_SNAPSHOT_CREATED_AT.to_owned())
                } else {
                    Err(ConnectorError::api(
                        "snapshot_created_at",
                        format!("snapshot [{snapshot}] not found"),
                    ))
                }
            })
        })
    }

    fn is_valid_node_class<'a>(&'a self, node_class: &'a str) -> ConnectorFuture<'a, bool> {
        Box::pin(async move {
            self.record("is_valid_node_class", |state| {
                Ok(state.node_classes.contains(node_class))
            })
        })
    }

    fn supports_snapshots(&self) -> ConnectorFuture<'_, bool> {
        Box::pin(async move { self.record("supports_snapshots", |state| Ok(state.supports_snapshots)) })
    }

    fn copy_fileset_path<'a>(&'a self, copy: FilesetCopy<'a>) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("copy_fileset_path", |state| {
                state.fileset_mut("copy_fileset_path", copy.filesystem, copy.fileset)?;
                state.copies.push(RecordedCopy {
                    fileset: copy.fileset.to_owned(),
                    snapshot: None,
                    source_path: copy.source_path.to_owned(),
                    target_path: copy.target_path.to_owned(),
                    node_class: copy.node_class.map(str::to_owned),
                });
                Ok(())
            })
        })
    }

    fn copy_snapshot_path<'a>(&'a self, copy: SnapshotCopy<'a>) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.record("copy_snapshot_path", |state| {
                state.fileset_mut("copy_snapshot_path", copy.filesystem, copy.fileset)?;
                state.copies.push(RecordedCopy {
                    fileset: copy.fileset.to_owned(),
                    snapshot: Some(copy.snapshot.to_owned()),
                    source_path: copy.source_path.to_owned(),
                    target_path: copy.target_path.to_owned(),
                    node_class: copy.node_class.map(str::to_owned),
                });
                Ok(())
            })
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    /// A `None` value removes the variable.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(name, _)| seen.insert(*name))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (name, value) in pairs {
            let old = env::var_os(name);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(name, val),
                    None => env::remove_var(name),
                }
            }
            previous.push(((*name).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (name, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(name, val),
                    None => env::remove_var(name),
                }
            }
        }
    }
}
