//! Grow-only volume expansion.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::error::ControllerError;
use super::helpers::{base_name, relative_to_mount, step};
use super::types::{
    ControllerCapability, ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
};
use super::{ControllerService, MissingCapability};
use crate::identifier::VolumeId;
use crate::quota::parse_quota_bytes;
use crate::registry::ClusterKey;

impl ControllerService {
    /// Raises the quota of a fileset-backed volume. Quotas never shrink: a
    /// request at or below the current quota reports the current size.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for missing fields and
    /// lightweight volumes, [`ControllerError::NotFound`] when the fileset is
    /// gone or no longer matches the volume, and [`ControllerError::Internal`]
    /// when the quota cannot be read or set.
    #[instrument(skip(self, request, cancel), fields(volume_id = %request.volume_id))]
    pub async fn expand_volume(
        &self,
        request: &ControllerExpandVolumeRequest,
        cancel: &CancellationToken,
    ) -> Result<ControllerExpandVolumeResponse, ControllerError> {
        self.require_capability(ControllerCapability::ExpandVolume, MissingCapability::Internal)?;
        let volume_id = request.volume_id.as_str();
        if volume_id.is_empty() {
            return Err(ControllerError::InvalidArgument(String::from(
                "volume id missing in request",
            )));
        }
        let Some(range) = request.capacity_range else {
            return Err(ControllerError::InvalidArgument(String::from(
                "capacity range not provided",
            )));
        };
        let requested = range.required_bytes;

        let id: VolumeId = volume_id.parse()?;
        let Some(fileset_id) = id.fileset_id() else {
            return Err(ControllerError::InvalidArgument(format!(
                "volume [{volume_id}]: expansion is supported only for fileset-backed volumes"
            )));
        };
        let conn = self.registry.resolve(&ClusterKey::Cluster(id.cluster_id().to_owned()))?;
        let primary = self.registry.resolve_primary()?;

        let fs_uuid = id.fs_uuid();
        let filesystem = step(cancel, conn.filesystem_name(fs_uuid))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to get filesystem name for id [{fs_uuid}] and cluster [{}]",
                    id.cluster_id()
                ))
            })?;
        let fileset = step(cancel, conn.fileset_by_id(&filesystem, fileset_id))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to get fileset name for id [{fileset_id}] in filesystem [{filesystem}]"
                ))
            })?
            .ok_or_else(|| {
                ControllerError::NotFound(format!(
                    "fileset id [{fileset_id}] in filesystem [{filesystem}] and cluster [{}] not found",
                    id.cluster_id()
                ))
            })?;

        let link_path = relative_to_mount(id.path(), &primary.cluster.mount_point);
        let pv_name = base_name(&link_path);
        if pv_name != fileset.name {
            return Err(ControllerError::NotFound(format!(
                "volume name [{pv_name}] from path does not match fileset name [{}]",
                fileset.name
            )));
        }

        let name = fileset.name.as_str();
        let raw = step(cancel, conn.fileset_quota(&filesystem, name))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to list quota for fileset [{name}] in filesystem [{filesystem}]"
                ))
            })?;
        let current = parse_quota_bytes(&raw).map_err(|err| {
            ControllerError::Internal(format!(
                "unable to convert quota for fileset [{name}] in filesystem [{filesystem}]: {err}"
            ))
        })?;

        let capacity_bytes = if current < requested {
            step(cancel, conn.set_fileset_quota(&filesystem, name, requested))
                .await
                .map_err(|err| err.internal("unable to expand the volume"))?;
            info!(from = current, to = requested, "quota raised");
            requested
        } else {
            info!(current, requested, "quota already large enough");
            current
        };

        Ok(ControllerExpandVolumeResponse {
            capacity_bytes,
            node_expansion_required: false,
        })
    }
}
