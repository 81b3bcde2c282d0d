//! Shared cluster fixtures for controller integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Include this module with:
//!
//! ```rust,ignore
//! #[path = "common/cluster.rs"]
//! mod cluster;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use fileset_csi::controller::{
    AccessMode, CapacityRange, CreateVolumeRequest, PARAM_FILESYSTEM, VolumeCapability,
};
use fileset_csi::registry::{ClusterRegistry, PrimaryCluster};
use fileset_csi::test_support::{FakeConnector, FakeFilesystem, FilesetSeed};
use fileset_csi::ControllerService;

/// Identifier of the primary cluster.
pub const PRIMARY_CLUSTER_ID: &str = "1001";
/// Primary filesystem name.
pub const PRIMARY_FS: &str = "fs0";
/// Primary filesystem UUID.
pub const PRIMARY_FS_UUID: &str = "0A0B0C0D:11223344";
/// Primary filesystem mount point.
pub const PRIMARY_MOUNT: &str = "/ibm/fs0";
/// Primary fileset holding the volume symlinks.
pub const PRIMARY_FILESET: &str = "csi-store";
/// Symlink directory relative to the primary filesystem root.
pub const SYMLINK_DIR_REL: &str = "csi-store/.volumes";
/// Fileset id of the seeded primary fileset.
pub const PRIMARY_FILESET_ID: u64 = 1;

/// One gibibyte.
pub const GIB: u64 = 1_073_741_824;

/// The primary cluster description used by every test.
#[must_use]
pub fn primary_cluster() -> PrimaryCluster {
    PrimaryCluster {
        cluster_id: PRIMARY_CLUSTER_ID.to_owned(),
        filesystem: PRIMARY_FS.to_owned(),
        fileset: PRIMARY_FILESET.to_owned(),
        mount_point: PRIMARY_MOUNT.to_owned(),
        symlink_dir_abs: format!("{PRIMARY_MOUNT}/{SYMLINK_DIR_REL}"),
        symlink_dir_rel: SYMLINK_DIR_REL.to_owned(),
    }
}

/// A primary cluster with its filesystem and linked primary fileset.
#[must_use]
pub fn primary_fake() -> FakeConnector {
    FakeConnector::new()
        .with_filesystem(FakeFilesystem::local(PRIMARY_FS, PRIMARY_FS_UUID, PRIMARY_MOUNT))
        .with_fileset(
            PRIMARY_FS,
            PRIMARY_FILESET,
            FilesetSeed::linked(&format!("{PRIMARY_MOUNT}/{PRIMARY_FILESET}"))
                .with_id(PRIMARY_FILESET_ID),
        )
}

/// Builds a controller whose primary cluster is `primary`, plus any extra
/// clusters.
#[must_use]
pub fn controller_with(
    primary: &Arc<FakeConnector>,
    others: &[(&str, Arc<FakeConnector>)],
) -> ControllerService {
    let mut builder = ClusterRegistry::builder().primary(primary_cluster(), Arc::clone(primary) as _);
    for (cluster_id, connector) in others {
        builder = builder.cluster(*cluster_id, Arc::clone(connector) as _);
    }
    ControllerService::new(Arc::new(builder.build()))
}

/// Absolute symlink path of a volume.
#[must_use]
pub fn symlink_abs(volume: &str) -> String {
    format!("{PRIMARY_MOUNT}/{SYMLINK_DIR_REL}/{volume}")
}

/// Symlink path of a volume relative to the primary filesystem root.
#[must_use]
pub fn symlink_rel(volume: &str) -> String {
    format!("{SYMLINK_DIR_REL}/{volume}")
}

/// Fileset-backed volume id on the primary cluster.
#[must_use]
pub fn fileset_volume_id(fileset_id: u64, volume: &str) -> String {
    format!(
        "{PRIMARY_CLUSTER_ID};{PRIMARY_FS_UUID};fileset={fileset_id};path={}",
        symlink_abs(volume)
    )
}

/// A create request for a volume on the primary filesystem.
#[must_use]
pub fn create_request(name: &str, size: u64, extra: &[(&str, &str)]) -> CreateVolumeRequest {
    let mut parameters = BTreeMap::from([(PARAM_FILESYSTEM.to_owned(), PRIMARY_FS.to_owned())]);
    parameters.extend(
        extra
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned())),
    );
    CreateVolumeRequest {
        name: name.to_owned(),
        capacity_range: Some(CapacityRange::required(size)),
        volume_capabilities: vec![VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)],
        parameters,
        content_source: None,
    }
}
