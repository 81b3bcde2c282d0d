//! Volume deletion.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::error::ControllerError;
use super::helpers::{base_name, relative_to_mount, step};
use super::types::{ControllerCapability, DeleteVolumeRequest};
use super::{ControllerService, MissingCapability};
use crate::identifier::VolumeId;
use crate::registry::{ClusterKey, remote_fs_name};

impl ControllerService {
    /// Deletes a volume's backing object and its access symlink.
    ///
    /// A fileset whose name no longer matches the name recorded in the
    /// identifier's path is left in place; only the symlink is removed.
    /// Deleting a volume whose fileset is already gone succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for malformed identifiers
    /// or when the fileset still has snapshots, [`ControllerError::NotFound`]
    /// for unknown clusters, and [`ControllerError::Internal`] when a cluster
    /// call fails.
    #[instrument(skip(self, request, cancel), fields(volume_id = %request.volume_id))]
    pub async fn delete_volume(
        &self,
        request: &DeleteVolumeRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        self.require_capability(
            ControllerCapability::CreateDeleteVolume,
            MissingCapability::InvalidArgument,
        )?;
        if request.volume_id.is_empty() {
            return Err(ControllerError::InvalidArgument(String::from(
                "volume id is missing",
            )));
        }
        let id: VolumeId = request.volume_id.parse()?;
        let conn = self.registry.resolve(&ClusterKey::Cluster(id.cluster_id().to_owned()))?;
        let primary = self.registry.resolve_primary()?;
        let primary_conn = &primary.connector;
        let primary_fs = primary.cluster.filesystem.as_str();

        let fs_uuid = id.fs_uuid();
        let local_fs = step(cancel, primary_conn.filesystem_name(fs_uuid))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to get filesystem name for id [{fs_uuid}] and cluster [{}]",
                    id.cluster_id()
                ))
            })?;
        let mount = step(cancel, primary_conn.filesystem_mount_details(&local_fs))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to get mount info for filesystem [{local_fs}] in the primary cluster"
                ))
            })?;
        let filesystem = match remote_fs_name(&mount.remote_device_name) {
            "" => local_fs.as_str(),
            name => name,
        };
        let link_path = relative_to_mount(id.path(), &primary.cluster.mount_point);

        if let Some(fileset_id) = id.fileset_id() {
            let fileset = step(cancel, conn.fileset_by_id(filesystem, fileset_id))
                .await
                .map_err(|err| {
                    err.internal(format!(
                        "unable to get fileset name for id [{fileset_id}] in filesystem \
                         [{filesystem}] of cluster [{}]",
                        id.cluster_id()
                    ))
                })?;
            match fileset {
                None => info!(fileset_id, "fileset already removed"),
                Some(fileset) if base_name(&link_path) != fileset.name => info!(
                    pv_name = base_name(&link_path),
                    fileset = %fileset.name,
                    "volume name does not match fileset name, skipping fileset delete"
                ),
                Some(fileset) => {
                    let name = fileset.name.as_str();
                    let snapshots = step(cancel, conn.list_snapshots(filesystem, name))
                        .await
                        .map_err(|err| err.internal(format!("unable to list snapshots for fileset [{name}]")))?;
                    if !snapshots.is_empty() {
                        return Err(ControllerError::InvalidArgument(format!(
                            "volume fileset [{name}] contains {} snapshot(s); delete them first",
                            snapshots.len()
                        )));
                    }
                    debug!(fileset = name, "no snapshots, deleting fileset");
                    step(cancel, conn.delete_fileset(filesystem, name))
                        .await
                        .map_err(|err| {
                            err.internal(format!(
                                "unable to delete fileset [{name}] in filesystem [{filesystem}] \
                                 of cluster [{}]",
                                id.cluster_id()
                            ))
                        })?;
                }
            }
        } else {
            step(cancel, primary_conn.delete_directory(primary_fs, &link_path))
                .await
                .map_err(|err| {
                    err.internal(format!(
                        "unable to delete directory via symlink [{link_path}] in filesystem [{primary_fs}]"
                    ))
                })?;
        }

        step(cancel, primary_conn.delete_symlink(primary_fs, &link_path))
            .await
            .map_err(|err| {
                err.internal(format!("unable to delete symlink [{primary_fs}:{link_path}]"))
            })?;
        info!("volume deleted");
        Ok(())
    }
}
