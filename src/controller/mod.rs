//! Volume lifecycle controller.
//!
//! [`ControllerService`] implements one control-plane request per call. Every
//! operation resolves its connector through the [`ClusterRegistry`], re-checks
//! existence before each mutation so a retry after partial failure converges,
//! and checks its [`CancellationToken`](tokio_util::sync::CancellationToken)
//! before each connector call.

use std::sync::Arc;

use tracing::debug;

use crate::config::{MountPolicy, NodeMapping};
use crate::inflight::InFlightRequests;
use crate::registry::ClusterRegistry;

mod clone;
mod delete;
mod error;
mod expand;
mod helpers;
mod params;
mod provision;
mod publish;
mod snapshot;
mod types;

pub use error::{ControllerError, StatusCode};
pub use params::{
    PARAM_CLUSTER_ID, PARAM_DIR_BASE_PATH, PARAM_FILESET_TYPE, PARAM_FILESYSTEM, PARAM_GID,
    PARAM_INODE_LIMIT, PARAM_NODE_CLASS, PARAM_PARENT_FILESET, PARAM_UID, ParameterError,
    VolumeRequestSpec, VolumeShape,
};
pub use snapshot::MAX_SNAPSHOTS_PER_FILESET;
pub use types::{
    AccessMode, AccessType, CapacityRange, ControllerCapability, ControllerExpandVolumeRequest,
    ControllerExpandVolumeResponse, ControllerPublishVolumeRequest,
    ControllerUnpublishVolumeRequest, CreateSnapshotRequest, CreateSnapshotResponse,
    CreateVolumeRequest, CreateVolumeResponse, DeleteSnapshotRequest, DeleteVolumeRequest,
    Snapshot, ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse, Volume,
    VolumeCapability, VolumeContentSource,
};

/// The volume lifecycle controller.
#[derive(Clone, Debug)]
pub struct ControllerService {
    registry: Arc<ClusterRegistry>,
    in_flight: InFlightRequests,
    mount_policy: MountPolicy,
    node_mapping: NodeMapping,
    capabilities: Vec<ControllerCapability>,
}

/// How an operation reports a capability it does not advertise.
#[derive(Clone, Copy, Debug)]
enum MissingCapability {
    Internal,
    InvalidArgument,
}

impl ControllerService {
    /// Creates a controller advertising every capability, skipping mounts on
    /// publish, and with an empty node mapping.
    #[must_use]
    pub fn new(registry: Arc<ClusterRegistry>) -> Self {
        Self {
            registry,
            in_flight: InFlightRequests::new(),
            mount_policy: MountPolicy::Skip,
            node_mapping: NodeMapping::default(),
            capabilities: ControllerCapability::ALL.to_vec(),
        }
    }

    /// Sets the publish mount policy.
    #[must_use]
    pub const fn with_mount_policy(mut self, mount_policy: MountPolicy) -> Self {
        self.mount_policy = mount_policy;
        self
    }

    /// Sets the node mapping used by publish.
    #[must_use]
    pub fn with_node_mapping(mut self, node_mapping: NodeMapping) -> Self {
        self.node_mapping = node_mapping;
        self
    }

    /// Replaces the advertised capability set.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<ControllerCapability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Requests currently being provisioned.
    #[must_use]
    pub const fn in_flight(&self) -> &InFlightRequests {
        &self.in_flight
    }

    /// Returns the advertised capabilities.
    #[must_use]
    pub fn get_capabilities(&self) -> &[ControllerCapability] {
        &self.capabilities
    }

    /// Checks requested capabilities against what the controller supports.
    ///
    /// Only multi-node multi-writer access is confirmed; any other mode leaves
    /// the response unconfirmed.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] when the volume id or the
    /// capability list is empty.
    pub fn validate_volume_capabilities(
        &self,
        request: &ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, ControllerError> {
        if request.volume_id.is_empty() {
            return Err(ControllerError::InvalidArgument(String::from(
                "ValidateVolumeCapabilities volume id is a required field",
            )));
        }
        if request.volume_capabilities.is_empty() {
            return Err(ControllerError::InvalidArgument(String::from(
                "ValidateVolumeCapabilities volume capabilities is a required field",
            )));
        }
        let all_multi_writer = request
            .volume_capabilities
            .iter()
            .all(|cap| cap.access_mode == AccessMode::MultiNodeMultiWriter);
        if !all_multi_writer {
            debug!(volume_id = %request.volume_id, "capabilities not confirmed");
            return Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: String::new(),
            });
        }
        Ok(ValidateVolumeCapabilitiesResponse {
            confirmed: Some(request.volume_capabilities.clone()),
            message: String::new(),
        })
    }

    /// Listing snapshots is not supported.
    ///
    /// # Errors
    ///
    /// Always returns [`ControllerError::Unimplemented`].
    pub fn list_snapshots(&self) -> Result<Vec<Snapshot>, ControllerError> {
        Err(self.unimplemented("ListSnapshots"))
    }

    /// Capacity reporting is not supported.
    ///
    /// # Errors
    ///
    /// Always returns [`ControllerError::Unimplemented`].
    pub fn get_capacity(&self) -> Result<u64, ControllerError> {
        Err(self.unimplemented("GetCapacity"))
    }

    /// Listing volumes is not supported.
    ///
    /// # Errors
    ///
    /// Always returns [`ControllerError::Unimplemented`].
    pub fn list_volumes(&self) -> Result<Vec<Volume>, ControllerError> {
        Err(self.unimplemented("ListVolumes"))
    }

    fn unimplemented(&self, operation: &str) -> ControllerError {
        debug!(operation, advertised = self.capabilities.len(), "unimplemented call");
        ControllerError::Unimplemented(format!("{operation} is not implemented"))
    }

    fn require_capability(
        &self,
        capability: ControllerCapability,
        missing: MissingCapability,
    ) -> Result<(), ControllerError> {
        if self.capabilities.contains(&capability) {
            return Ok(());
        }
        let message = format!("controller does not advertise {capability:?}");
        Err(match missing {
            MissingCapability::Internal => ControllerError::Internal(message),
            MissingCapability::InvalidArgument => ControllerError::InvalidArgument(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ControllerService {
        ControllerService::new(Arc::new(ClusterRegistry::default()))
    }

    #[test]
    fn advertises_every_capability_by_default() {
        assert_eq!(service().get_capabilities(), ControllerCapability::ALL.as_slice());
    }

    #[test]
    fn confirms_only_multi_writer_capabilities() {
        let mut request = ValidateVolumeCapabilitiesRequest {
            volume_id: String::from("1;AA;path=/x"),
            volume_capabilities: vec![VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)],
        };
        let confirmed = service()
            .validate_volume_capabilities(&request)
            .expect("validated");
        assert_eq!(confirmed.confirmed, Some(request.volume_capabilities.clone()));

        request
            .volume_capabilities
            .push(VolumeCapability::mount(AccessMode::SingleNodeWriter));
        let rejected = service()
            .validate_volume_capabilities(&request)
            .expect("validated");
        assert_eq!(rejected.confirmed, None);
        assert!(rejected.message.is_empty());
    }

    #[test]
    fn validate_requires_capabilities() {
        let request = ValidateVolumeCapabilitiesRequest {
            volume_id: String::from("1;AA;path=/x"),
            volume_capabilities: Vec::new(),
        };
        let err = service()
            .validate_volume_capabilities(&request)
            .expect_err("missing capabilities");
        assert_eq!(err.code(), StatusCode::InvalidArgument);
    }

    #[test]
    fn listing_calls_are_unimplemented() {
        let controller = service();
        assert_eq!(
            controller.list_snapshots().map_err(|err| err.code()),
            Err(StatusCode::Unimplemented)
        );
        assert_eq!(
            controller.get_capacity().map_err(|err| err.code()),
            Err(StatusCode::Unimplemented)
        );
        assert_eq!(
            controller.list_volumes().map_err(|err| err.code()),
            Err(StatusCode::Unimplemented)
        );
    }

    #[test]
    fn missing_capability_uses_requested_code() {
        let controller = service().with_capabilities(vec![ControllerCapability::ExpandVolume]);
        assert!(matches!(
            controller.require_capability(
                ControllerCapability::CreateDeleteVolume,
                MissingCapability::InvalidArgument
            ),
            Err(ControllerError::InvalidArgument(_))
        ));
        assert!(matches!(
            controller.require_capability(
                ControllerCapability::CreateDeleteSnapshot,
                MissingCapability::Internal
            ),
            Err(ControllerError::Internal(_))
        ));
    }
}
