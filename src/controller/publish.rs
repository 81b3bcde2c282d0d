//! Attaching volumes to nodes.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::error::ControllerError;
use super::helpers::step;
use super::types::{
    ControllerCapability, ControllerPublishVolumeRequest, ControllerUnpublishVolumeRequest,
};
use super::{ControllerService, MissingCapability};
use crate::config::MountPolicy;
use crate::identifier::VolumeAddress;

impl ControllerService {
    /// Makes sure the primary filesystem and the volume's filesystem are
    /// mounted on the target node, mounting them when the policy allows.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for a missing node or a
    /// malformed volume id, and [`ControllerError::Internal`] when a
    /// filesystem is unmounted under [`MountPolicy::Skip`] or a mount fails.
    #[instrument(skip(self, request, cancel), fields(volume_id = %request.volume_id, node = %request.node_id))]
    pub async fn publish_volume(
        &self,
        request: &ControllerPublishVolumeRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        self.require_capability(
            ControllerCapability::PublishUnpublishVolume,
            MissingCapability::Internal,
        )?;
        if request.node_id.is_empty() {
            return Err(ControllerError::InvalidArgument(String::from(
                "node id not present",
            )));
        }
        if request.volume_id.is_empty() {
            return Err(ControllerError::InvalidArgument(String::from(
                "volume id not present",
            )));
        }
        let address = VolumeAddress::parse(&request.volume_id)?;
        let primary = self.registry.resolve_primary()?;
        let conn = &primary.connector;
        let primary_fs = primary.cluster.filesystem.as_str();

        let volume_fs = step(cancel, conn.filesystem_name(&address.fs_uuid))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to get filesystem name for id [{}]",
                    address.fs_uuid
                ))
            })?;
        let primary_mount = step(cancel, conn.filesystem_mount_details(primary_fs))
            .await
            .map_err(|err| {
                err.internal(format!("unable to get mount details of filesystem [{primary_fs}]"))
            })?;

        let node = self.node_mapping.resolve(&request.node_id);
        debug!(cluster_node = node, "resolved node");
        let primary_mounted = primary_mount.is_mounted_on(node);
        let volume_mounted = if volume_fs == primary_fs {
            primary_mounted
        } else {
            step(cancel, conn.filesystem_mount_details(&volume_fs))
                .await
                .map_err(|err| {
                    err.internal(format!("unable to get mount details of filesystem [{volume_fs}]"))
                })?
                .is_mounted_on(node)
        };

        if primary_mounted && volume_mounted {
            debug!("filesystems already mounted");
            return Ok(());
        }
        if self.mount_policy == MountPolicy::Skip {
            error!(primary_mounted, volume_mounted, "filesystem not mounted and mounting is disabled");
            return Err(ControllerError::Internal(format!(
                "mounting is disabled and either [{primary_fs}] or [{volume_fs}] is not mounted \
                 on node [{node}]"
            )));
        }

        if !primary_mounted {
            step(cancel, conn.mount_filesystem(primary_fs, node))
                .await
                .map_err(|err| {
                    err.internal(format!("error mounting filesystem [{primary_fs}] on node [{node}]"))
                })?;
            info!(filesystem = primary_fs, "mounted primary filesystem");
        }
        if !volume_mounted && volume_fs != primary_fs {
            step(cancel, conn.mount_filesystem(&volume_fs, node))
                .await
                .map_err(|err| {
                    err.internal(format!("error mounting filesystem [{volume_fs}] on node [{node}]"))
                })?;
            info!(filesystem = %volume_fs, "mounted volume filesystem");
        }
        Ok(())
    }

    /// Detaching leaves filesystems mounted; only the identifier is checked.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for a malformed volume id.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id, node = %request.node_id))]
    pub fn unpublish_volume(
        &self,
        request: &ControllerUnpublishVolumeRequest,
    ) -> Result<(), ControllerError> {
        self.require_capability(
            ControllerCapability::PublishUnpublishVolume,
            MissingCapability::Internal,
        )?;
        VolumeAddress::parse(&request.volume_id)?;
        debug!("nothing to detach");
        Ok(())
    }
}
