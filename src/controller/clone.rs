//! Populating new volumes from existing volumes and snapshots.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::ControllerService;
use super::error::ControllerError;
use super::helpers::{absolute_path, step};
use super::provision::{Placement, check_owning_filesystem};
use super::types::VolumeContentSource;
use crate::connector::{Connector, FilesetCopy, FilesystemDetails, SnapshotCopy};
use crate::identifier::{SnapshotId, VolumeId, data_dir_name};
use crate::registry::ClusterKey;

/// A decoded content source.
#[derive(Clone, Debug)]
pub(super) enum CloneSource {
    Volume(VolumeId),
    Snapshot(SnapshotId),
}

impl CloneSource {
    /// Decodes a content source without contacting any cluster.
    pub(super) fn decode(source: &VolumeContentSource) -> Result<Self, ControllerError> {
        match source {
            VolumeContentSource::Volume { volume_id } => {
                let id: VolumeId = volume_id.parse()?;
                if !id.is_fileset_backed() {
                    return Err(ControllerError::InvalidArgument(format!(
                        "source volume [{volume_id}] is not fileset-backed and cannot be cloned"
                    )));
                }
                Ok(Self::Volume(id))
            }
            VolumeContentSource::Snapshot { snapshot_id } => {
                Ok(Self::Snapshot(snapshot_id.parse()?))
            }
        }
    }

    fn cluster_id(&self) -> &str {
        match self {
            Self::Volume(id) => id.cluster_id(),
            Self::Snapshot(id) => &id.cluster_id,
        }
    }

    fn fs_uuid(&self) -> &str {
        match self {
            Self::Volume(id) => id.fs_uuid(),
            Self::Snapshot(id) => &id.fs_uuid,
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Volume(_) => "volume",
            Self::Snapshot(_) => "snapshot",
        }
    }
}

/// A content source validated against the cluster that owns it.
pub(super) struct ResolvedSource {
    connector: Arc<dyn Connector>,
    filesystem: String,
    fileset: String,
    snapshot: Option<(String, String)>,
}

impl ControllerService {
    /// Checks that a content source can be copied into the placed volume.
    pub(super) async fn validate_clone_source(
        &self,
        source: &CloneSource,
        placement: &Placement<'_>,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, ControllerError> {
        let cluster_id = source.cluster_id();
        let kind = source.kind();
        let conn = self.registry.resolve(&ClusterKey::Cluster(cluster_id.to_owned()))?;

        let supported = step(cancel, conn.supports_snapshots())
            .await
            .map_err(|err| err.internal(format!("unable to read the software level of cluster [{cluster_id}]")))?;
        if !supported {
            return Err(ControllerError::FailedPrecondition(format!(
                "the cluster software on [{cluster_id}] does not support creating volumes from a {kind}"
            )));
        }

        if cluster_id != placement.cluster_id {
            return Err(ControllerError::InvalidArgument(format!(
                "cannot create a volume from a source {kind} in another cluster: volume is being \
                 created in cluster [{}], source {kind} is from cluster [{cluster_id}]",
                placement.cluster_id
            )));
        }

        if let Some(node_class) = placement.spec.node_class.as_deref() {
            let valid = step(cancel, conn.is_valid_node_class(node_class))
                .await
                .map_err(|err| err.internal(format!("unable to look up node class [{node_class}]")))?;
            if !valid {
                return Err(ControllerError::NotFound(format!(
                    "node class [{node_class}] not found on cluster [{cluster_id}]"
                )));
            }
        }

        let fs_uuid = source.fs_uuid();
        let filesystem = step(cancel, conn.filesystem_name(fs_uuid))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to get filesystem name for id [{fs_uuid}] and cluster [{cluster_id}]"
                ))
            })?;

        if filesystem != placement.backend_fs {
            let mounted = step(cancel, conn.is_mounted_on_gui_node(&filesystem))
                .await
                .map_err(|err| err.internal(format!("unable to get mount details of filesystem [{filesystem}]")))?;
            if !mounted {
                return Err(ControllerError::Internal(format!(
                    "filesystem [{filesystem}] is not mounted on the management node"
                )));
            }
        }

        let fileset = match source {
            CloneSource::Volume(id) => {
                let fileset_id = id.fileset_id().unwrap_or_default();
                step(cancel, conn.fileset_by_id(&filesystem, fileset_id))
                    .await
                    .map_err(|err| err.internal(format!("unable to get details of fileset id [{fileset_id}]")))?
                    .ok_or_else(|| {
                        ControllerError::NotFound(format!(
                            "fileset id [{fileset_id}] not found in filesystem [{filesystem}]"
                        ))
                    })?
                    .name
            }
            CloneSource::Snapshot(id) => id.fileset_name.clone(),
        };

        let linked = step(cancel, conn.is_fileset_linked(&filesystem, &fileset))
            .await
            .map_err(|err| err.internal(format!("unable to get link information of fileset [{fileset}]")))?;
        if !linked {
            return Err(ControllerError::Internal(format!(
                "fileset [{fileset}] of source {kind} is not linked"
            )));
        }

        let snapshot = match source {
            CloneSource::Volume(_) => None,
            CloneSource::Snapshot(id) => {
                let exists = step(cancel, conn.snapshot_exists(&filesystem, &fileset, &id.snapshot_name))
                    .await
                    .map_err(|err| {
                        err.internal(format!("unable to get information of snapshot [{}]", id.snapshot_name))
                    })?;
                if !exists {
                    return Err(ControllerError::Internal(format!(
                        "snapshot [{}] does not exist for fileset [{fileset}]",
                        id.snapshot_name
                    )));
                }
                Some((id.snapshot_name.clone(), id.path.clone()))
            }
        };

        Ok(ResolvedSource {
            connector: conn,
            filesystem,
            fileset,
            snapshot,
        })
    }
}

/// Copies the source data into the new volume's data directory.
pub(super) async fn copy_clone_source(
    source: &ResolvedSource,
    placement: &Placement<'_>,
    owning_fs: &FilesystemDetails,
    target_path: &str,
    cancel: &CancellationToken,
) -> Result<(), ControllerError> {
    check_owning_filesystem(placement, owning_fs)?;
    let target = absolute_path(&owning_fs.mount.mount_point, target_path);
    let node_class = placement.spec.node_class.as_deref();
    let conn = &source.connector;

    let result = match &source.snapshot {
        None => {
            let source_path = data_dir_name(&source.fileset);
            step(
                cancel,
                conn.copy_fileset_path(FilesetCopy {
                    filesystem: &source.filesystem,
                    fileset: &source.fileset,
                    source_path: &source_path,
                    target_path: &target,
                    node_class,
                }),
            )
            .await
            .map_err(|err| err.internal("failed to create volume from volume"))
        }
        Some((snapshot, path)) => step(
            cancel,
            conn.copy_snapshot_path(SnapshotCopy {
                filesystem: &source.filesystem,
                fileset: &source.fileset,
                snapshot,
                source_path: path,
                target_path: &target,
                node_class,
            }),
        )
        .await
        .map_err(|err| err.internal(format!("failed to create volume from snapshot [{snapshot}]"))),
    };
    if let Err(err) = &result {
        error!(error = %err, "clone copy failed");
    } else {
        info!(target = %target, "clone copy finished");
    }
    result
}
