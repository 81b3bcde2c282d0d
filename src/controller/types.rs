//! Request and response types for controller operations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Access mode requested for a volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessMode {
    /// Read-write on a single node.
    SingleNodeWriter,
    /// Read-only on a single node.
    SingleNodeReaderOnly,
    /// Read-only on many nodes.
    MultiNodeReaderOnly,
    /// Read-only on many nodes with one writer.
    MultiNodeSingleWriter,
    /// Read-write on many nodes.
    MultiNodeMultiWriter,
}

/// How a volume is exposed to workloads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AccessType {
    /// Mounted as a filesystem.
    Mount {
        /// Requested filesystem type; empty for the default.
        fs_type: String,
        /// Additional mount flags.
        mount_flags: Vec<String>,
    },
    /// Exposed as a raw block device.
    Block,
}

/// One requested capability of a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeCapability {
    /// Exposure type.
    pub access_type: AccessType,
    /// Access mode.
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    /// A filesystem mount with the given access mode.
    #[must_use]
    pub const fn mount(access_mode: AccessMode) -> Self {
        Self {
            access_type: AccessType::Mount {
                fs_type: String::new(),
                mount_flags: Vec::new(),
            },
            access_mode,
        }
    }

    /// A raw block device with the given access mode.
    #[must_use]
    pub const fn block(access_mode: AccessMode) -> Self {
        Self {
            access_type: AccessType::Block,
            access_mode,
        }
    }
}

/// Requested size bounds.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CapacityRange {
    /// Minimum size in bytes; zero means unconstrained.
    pub required_bytes: u64,
    /// Maximum size in bytes; zero means unconstrained.
    pub limit_bytes: u64,
}

impl CapacityRange {
    /// A range that requires exactly `bytes`.
    #[must_use]
    pub const fn required(bytes: u64) -> Self {
        Self {
            required_bytes: bytes,
            limit_bytes: 0,
        }
    }
}

/// Data a new volume is populated from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeContentSource {
    /// Copy of an existing volume.
    Volume {
        /// Source volume identifier.
        volume_id: String,
    },
    /// Restore of a snapshot.
    Snapshot {
        /// Source snapshot identifier.
        snapshot_id: String,
    },
}

/// Capabilities the controller may advertise.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControllerCapability {
    /// Create and delete volumes.
    CreateDeleteVolume,
    /// Publish and unpublish volumes.
    PublishUnpublishVolume,
    /// Create and delete snapshots.
    CreateDeleteSnapshot,
    /// Expand volumes.
    ExpandVolume,
    /// Clone volumes.
    CloneVolume,
}

impl ControllerCapability {
    /// Every capability this controller implements.
    pub const ALL: [Self; 5] = [
        Self::CreateDeleteVolume,
        Self::PublishUnpublishVolume,
        Self::CreateDeleteSnapshot,
        Self::ExpandVolume,
        Self::CloneVolume,
    ];
}

/// Request to create a volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateVolumeRequest {
    /// Volume name chosen by the orchestrator.
    pub name: String,
    /// Requested size.
    pub capacity_range: Option<CapacityRange>,
    /// Requested capabilities.
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Storage-class parameters.
    pub parameters: BTreeMap<String, String>,
    /// Optional clone source.
    pub content_source: Option<VolumeContentSource>,
}

/// A provisioned volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Encoded volume identifier.
    pub volume_id: String,
    /// Provisioned size in bytes.
    pub capacity_bytes: u64,
    /// Storage-class parameters echoed back to node operations.
    pub volume_context: BTreeMap<String, String>,
    /// Clone source the volume was populated from.
    pub content_source: Option<VolumeContentSource>,
}

/// Response to [`CreateVolumeRequest`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateVolumeResponse {
    /// The provisioned volume.
    pub volume: Volume,
}

/// Request to delete a volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeleteVolumeRequest {
    /// Encoded volume identifier.
    pub volume_id: String,
}

/// Request to make a volume available on a node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControllerPublishVolumeRequest {
    /// Encoded volume identifier.
    pub volume_id: String,
    /// Orchestrator node name.
    pub node_id: String,
    /// Capability requested for the attachment.
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the attachment is read-only.
    pub readonly: bool,
}

/// Request to withdraw a volume from a node.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControllerUnpublishVolumeRequest {
    /// Encoded volume identifier.
    pub volume_id: String,
    /// Orchestrator node name.
    pub node_id: String,
}

/// Request to check capabilities against an existing volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidateVolumeCapabilitiesRequest {
    /// Encoded volume identifier.
    pub volume_id: String,
    /// Capabilities to confirm.
    pub volume_capabilities: Vec<VolumeCapability>,
}

/// Response to [`ValidateVolumeCapabilitiesRequest`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidateVolumeCapabilitiesResponse {
    /// Confirmed capabilities; `None` when any was rejected.
    pub confirmed: Option<Vec<VolumeCapability>>,
    /// Reason for rejection; empty when confirmed.
    pub message: String,
}

/// Request to snapshot a volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateSnapshotRequest {
    /// Encoded source volume identifier.
    pub source_volume_id: String,
    /// Snapshot name chosen by the orchestrator.
    pub name: String,
}

/// A created snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Encoded snapshot identifier.
    pub snapshot_id: String,
    /// Encoded source volume identifier.
    pub source_volume_id: String,
    /// Whether the snapshot can be restored.
    pub ready_to_use: bool,
    /// Creation time reported by the cluster.
    pub creation_time: DateTime<Utc>,
    /// Size a restore requires, in bytes.
    pub size_bytes: u64,
}

/// Response to [`CreateSnapshotRequest`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateSnapshotResponse {
    /// The created snapshot.
    pub snapshot: Snapshot,
}

/// Request to delete a snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeleteSnapshotRequest {
    /// Encoded snapshot identifier.
    pub snapshot_id: String,
}

/// Request to grow a volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControllerExpandVolumeRequest {
    /// Encoded volume identifier.
    pub volume_id: String,
    /// Requested size.
    pub capacity_range: Option<CapacityRange>,
}

/// Response to [`ControllerExpandVolumeRequest`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ControllerExpandVolumeResponse {
    /// Size of the volume after expansion.
    pub capacity_bytes: u64,
    /// Whether nodes must act before the new size is visible.
    pub node_expansion_required: bool,
}
