//! Management API abstraction for one storage cluster.
//!
//! Each configured cluster is reached through a [`Connector`]. Every call is
//! asynchronous and may fail with a [`ConnectorError`]; the controller maps
//! those failures onto its own status codes.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Boxed future returned by connector operations.
pub type ConnectorFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ConnectorError>> + Send + 'a>>;

/// Link path reported by the management API for unlinked filesets.
pub const UNLINKED_PATH: &str = "--";

/// Errors surfaced by a cluster's management API.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConnectorError {
    /// The API answered but rejected the operation.
    #[error("{operation} rejected: {message}")]
    Api {
        /// Operation that failed.
        operation: String,
        /// Message returned by the API.
        message: String,
    },
    /// The API could not be reached.
    #[error("{operation} could not reach the management API: {message}")]
    Transport {
        /// Operation that failed.
        operation: String,
        /// Transport failure description.
        message: String,
    },
    /// The API answered with a payload the connector could not interpret.
    #[error("{operation} returned an unexpected response: {message}")]
    Unexpected {
        /// Operation that failed.
        operation: String,
        /// Description of the unexpected payload.
        message: String,
    },
}

impl ConnectorError {
    /// Builds an [`ConnectorError::Api`] value.
    #[must_use]
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// A fileset as reported by the management API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fileset {
    /// Backend fileset identifier.
    pub id: String,
    /// Fileset name.
    pub name: String,
    /// Identifier of the parent fileset; zero for independent filesets.
    pub parent_id: u64,
    /// Junction path; empty or `--` when the fileset is unlinked.
    pub path: String,
}

impl Fileset {
    /// Returns the junction path when the fileset is linked.
    #[must_use]
    pub fn link_path(&self) -> Option<&str> {
        let path = self.path.as_str();
        (!path.is_empty() && path != UNLINKED_PATH).then_some(path)
    }

    /// Returns `true` when the fileset owns its inode space.
    #[must_use]
    pub const fn is_independent(&self) -> bool {
        self.parent_id == 0
    }
}

/// Fileset flavour requested at creation time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FilesetType {
    /// A fileset with its own inode space. Required for snapshots.
    #[default]
    Independent,
    /// A fileset sharing its parent's inode space.
    Dependent,
}

impl FilesetType {
    /// Returns the management API spelling of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Independent => "independent",
            Self::Dependent => "dependent",
        }
    }
}

/// Options forwarded to fileset creation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FilesetOptions {
    /// Fileset flavour.
    pub fileset_type: FilesetType,
    /// Owner applied to the fileset root.
    pub uid: Option<u32>,
    /// Group applied to the fileset root.
    pub gid: Option<u32>,
    /// Inode limit as passed through from the request (for example `100K`).
    pub inode_limit: Option<String>,
    /// Parent fileset for dependent filesets.
    pub parent_fileset: Option<String>,
}

/// Whether a filesystem is owned by the queried cluster or mounted remotely.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilesystemKind {
    /// Owned by the queried cluster.
    Local,
    /// Mounted from another cluster.
    Remote,
}

/// Mount state as reported by the management API.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MountStatus {
    /// The filesystem is mounted.
    Mounted,
    /// The filesystem is not mounted.
    NotMounted,
}

/// Mount details of a filesystem.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountDetails {
    /// Mount state on the queried cluster.
    pub status: MountStatus,
    /// Mount point on the queried cluster.
    pub mount_point: String,
    /// `<cluster>:<filesystem>` device name for remote mounts.
    pub remote_device_name: String,
    /// Nodes currently mounting the filesystem.
    pub nodes_mounted: Vec<String>,
}

impl MountDetails {
    /// Returns `true` when `node` currently mounts the filesystem.
    #[must_use]
    pub fn is_mounted_on(&self, node: &str) -> bool {
        self.nodes_mounted.iter().any(|mounted| mounted == node)
    }
}

/// Filesystem details as reported by the management API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilesystemDetails {
    /// Filesystem name on the queried cluster.
    pub name: String,
    /// Filesystem UUID.
    pub uuid: String,
    /// Local or remote ownership.
    pub kind: FilesystemKind,
    /// Mount details.
    pub mount: MountDetails,
}

/// Quota details of a fileset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QuotaDetails {
    /// Hard block limit in KiB.
    pub block_limit_kib: i64,
}

/// Bulk copy from a fileset-backed volume into a new volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FilesetCopy<'a> {
    /// Filesystem holding the source fileset.
    pub filesystem: &'a str,
    /// Source fileset name.
    pub fileset: &'a str,
    /// Path inside the source fileset.
    pub source_path: &'a str,
    /// Absolute destination path.
    pub target_path: &'a str,
    /// Node class that should run the copy.
    pub node_class: Option<&'a str>,
}

/// Bulk copy from a snapshot into a new volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SnapshotCopy<'a> {
    /// Filesystem holding the snapshot.
    pub filesystem: &'a str,
    /// Snapshotted fileset name.
    pub fileset: &'a str,
    /// Snapshot name.
    pub snapshot: &'a str,
    /// Path inside the snapshot.
    pub source_path: &'a str,
    /// Absolute destination path.
    pub target_path: &'a str,
    /// Node class that should run the copy.
    pub node_class: Option<&'a str>,
}

/// Operations the controller needs from a cluster's management API.
///
/// Implementations must be safe to share between concurrent requests.
pub trait Connector: Send + Sync {
    /// Reports whether `path`, relative to the filesystem root, exists.
    fn path_exists<'a>(&'a self, filesystem: &'a str, path: &'a str) -> ConnectorFuture<'a, bool>;

    /// Creates a directory (and missing parents) owned by `uid`/`gid`.
    fn make_directory<'a>(
        &'a self,
        filesystem: &'a str,
        path: &'a str,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> ConnectorFuture<'a, ()>;

    /// Removes a directory; a symlink path removes the directory it targets.
    fn delete_directory<'a>(&'a self, filesystem: &'a str, path: &'a str) -> ConnectorFuture<'a, ()>;

    /// Creates `link_path` on `link_fs` pointing at `target_path` on `target_fs`.
    fn create_symlink<'a>(
        &'a self,
        link_fs: &'a str,
        link_path: &'a str,
        target_fs: &'a str,
        target_path: &'a str,
    ) -> ConnectorFuture<'a, ()>;

    /// Removes a symlink.
    fn delete_symlink<'a>(&'a self, filesystem: &'a str, link_path: &'a str) -> ConnectorFuture<'a, ()>;

    /// Looks a fileset up by name.
    fn list_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, Option<Fileset>>;

    /// Looks a fileset up by identifier.
    fn fileset_by_id<'a>(
        &'a self,
        filesystem: &'a str,
        fileset_id: &'a str,
    ) -> ConnectorFuture<'a, Option<Fileset>>;

    /// Reports whether a fileset exists.
    fn fileset_exists<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, bool>;

    /// Reports whether a fileset is linked into the namespace.
    fn is_fileset_linked<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, bool>;

    /// Creates a fileset.
    fn create_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        options: &'a FilesetOptions,
    ) -> ConnectorFuture<'a, ()>;

    /// Links a fileset at `junction_path`.
    fn link_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        junction_path: &'a str,
    ) -> ConnectorFuture<'a, ()>;

    /// Unlinks and deletes a fileset.
    fn delete_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()>;

    /// Returns the raw quota string of a fileset; empty when unset.
    fn fileset_quota<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, String>;

    /// Sets the hard block quota of a fileset.
    fn set_fileset_quota<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        bytes: u64,
    ) -> ConnectorFuture<'a, ()>;

    /// Returns detailed quota information for a fileset.
    fn fileset_quota_details<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, QuotaDetails>;

    /// Reports whether quota enforcement is enabled on a filesystem.
    fn quota_enabled<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, bool>;

    /// Returns filesystem details.
    fn filesystem_details<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, FilesystemDetails>;

    /// Returns mount details of a filesystem.
    fn filesystem_mount_details<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, MountDetails>;

    /// Reports whether the management (GUI) node mounts a filesystem.
    fn is_mounted_on_gui_node<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, bool>;

    /// Mounts a filesystem on a node.
    fn mount_filesystem<'a>(&'a self, filesystem: &'a str, node: &'a str) -> ConnectorFuture<'a, ()>;

    /// Resolves a filesystem UUID to its name on this cluster.
    fn filesystem_name<'a>(&'a self, fs_uuid: &'a str) -> ConnectorFuture<'a, String>;

    /// Reports whether a snapshot exists.
    fn snapshot_exists<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        snapshot: &'a str,
    ) -> ConnectorFuture<'a, bool>;

    /// Lists the snapshot names of a fileset.
    fn list_snapshots<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, Vec<String>>;

    /// Creates a fileset snapshot.
    fn create_snapshot<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        snapshot: &'a str,
    ) -> ConnectorFuture<'a, ()>;

    /// Deletes a fileset snapshot.
    fn delete_snapshot<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        snapshot: &'a str,
    ) -> ConnectorFuture<'a, ()>;

    /// Returns the creation timestamp of a snapshot as
    /// `YYYY-MM-DD HH:MM:SS,mmm`.
    fn snapshot_created_at<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        snapshot: &'a str,
    ) -> ConnectorFuture<'a, String>;

    /// Reports whether `node_class` names a node class on this cluster.
    fn is_valid_node_class<'a>(&'a self, node_class: &'a str) -> ConnectorFuture<'a, bool>;

    /// Reports whether the cluster software supports snapshot and clone copies.
    fn supports_snapshots(&self) -> ConnectorFuture<'_, bool>;

    /// Copies data out of a fileset into a new volume.
    fn copy_fileset_path<'a>(&'a self, copy: FilesetCopy<'a>) -> ConnectorFuture<'a, ()>;

    /// Copies data out of a snapshot into a new volume.
    fn copy_snapshot_path<'a>(&'a self, copy: SnapshotCopy<'a>) -> ConnectorFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fileset_at(path: &str) -> Fileset {
        Fileset {
            id: String::from("3"),
            name: String::from("pvc-1"),
            parent_id: 0,
            path: path.to_owned(),
        }
    }

    #[rstest]
    #[case("", None)]
    #[case("--", None)]
    #[case("/ibm/fs0/pvc-1", Some("/ibm/fs0/pvc-1"))]
    fn link_path_hides_unlinked_markers(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(fileset_at(path).link_path(), expected);
    }

    #[test]
    fn mount_details_match_nodes_exactly() {
        let mount = MountDetails {
            status: MountStatus::Mounted,
            mount_point: String::from("/ibm/fs0"),
            remote_device_name: String::new(),
            nodes_mounted: vec![String::from("node-a")],
        };
        assert!(mount.is_mounted_on("node-a"));
        assert!(!mount.is_mounted_on("node"));
    }
}
