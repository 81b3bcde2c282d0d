//! Volume provisioning.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::clone::{CloneSource, copy_clone_source};
use super::error::ControllerError;
use super::helpers::{absolute_path, fileset_target_path, step};
use super::params::{VolumeRequestSpec, VolumeShape};
use super::types::{
    AccessMode, AccessType, ControllerCapability, CreateVolumeRequest, CreateVolumeResponse,
    Volume,
};
use super::{ControllerService, MissingCapability};
use crate::connector::{Connector, Fileset, FilesystemDetails, FilesystemKind, MountStatus};
use crate::identifier::VolumeId;
use crate::inflight::Admission;
use crate::quota::{QuotaParseError, parse_quota_bytes};
use crate::registry::{ClusterKey, PrimaryHandle, remote_fs_name};

/// Where a new volume lives once its cluster and filesystems are resolved.
pub(super) struct Placement<'a> {
    pub(super) spec: VolumeRequestSpec,
    pub(super) primary: &'a PrimaryHandle,
    /// Connector of the cluster owning the backing object.
    pub(super) connector: Arc<dyn Connector>,
    pub(super) cluster_id: String,
    /// Filesystem name as mounted on the primary cluster.
    pub(super) local_fs: String,
    /// Filesystem name on the owning cluster.
    pub(super) backend_fs: String,
    /// UUID reported by the primary cluster.
    pub(super) fs_uuid: String,
}

impl Placement<'_> {
    fn volume_id(&self, fileset_id: Option<String>) -> VolumeId {
        let path = format!(
            "{}/{}",
            self.primary.cluster.symlink_dir_abs, self.spec.name
        );
        match fileset_id {
            Some(fileset_id) => VolumeId::Fileset {
                cluster_id: self.cluster_id.clone(),
                fs_uuid: self.fs_uuid.clone(),
                fileset_id,
                path,
            },
            None => VolumeId::Lightweight {
                cluster_id: self.cluster_id.clone(),
                fs_uuid: self.fs_uuid.clone(),
                path,
            },
        }
    }
}

/// The backing object once it exists.
struct Provisioned {
    /// Data directory relative to the owning filesystem root.
    target_path: String,
    fileset_id: Option<String>,
}

impl ControllerService {
    /// Creates a volume, or converges on one left behind by an earlier
    /// attempt with the same name and size.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Aborted`] when an identical request is in
    /// flight, [`ControllerError::Unimplemented`] for block or read-only-many
    /// capabilities, and the codes documented on [`ControllerError`] for
    /// everything else.
    #[instrument(skip(self, request, cancel), fields(volume = %request.name))]
    pub async fn create_volume(
        &self,
        request: CreateVolumeRequest,
        cancel: &CancellationToken,
    ) -> Result<CreateVolumeResponse, ControllerError> {
        self.require_capability(
            ControllerCapability::CreateDeleteVolume,
            MissingCapability::Internal,
        )?;
        let size_bytes = validate_create_request(&request)?;
        let spec = VolumeRequestSpec::from_parameters(&request.name, size_bytes, &request.parameters)?;
        let primary = self.registry.resolve_primary()?;
        let source = request
            .content_source
            .as_ref()
            .map(CloneSource::decode)
            .transpose()?;

        let placement = self.place_volume(spec, primary, cancel).await?;
        let resolved_source = match &source {
            Some(source) => Some(self.validate_clone_source(source, &placement, cancel).await?),
            None => None,
        };

        let _permit = match self.in_flight.try_acquire(&placement.spec.name, size_bytes)? {
            Admission::Admitted(permit) => permit,
            Admission::InProgress => {
                error!("volume creation already in progress");
                return Err(ControllerError::Aborted(format!(
                    "volume creation already in progress: {}",
                    placement.spec.name
                )));
            }
        };

        let owning_fs = step(cancel, placement.connector.filesystem_details(&placement.backend_fs))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to get details of filesystem [{}] in cluster [{}]",
                    placement.backend_fs, placement.cluster_id
                ))
            })?;

        let provisioned = match &placement.spec.shape {
            VolumeShape::Fileset { .. } => provision_fileset(&placement, &owning_fs, cancel).await?,
            VolumeShape::Lightweight { base_dir } => {
                provision_directory(&placement, base_dir, cancel).await?
            }
        };
        ensure_symlink(&placement, &provisioned.target_path, cancel).await?;
        let volume_id = placement.volume_id(provisioned.fileset_id);

        if let Some(resolved) = &resolved_source {
            copy_clone_source(resolved, &placement, &owning_fs, &provisioned.target_path, cancel)
                .await?;
        }

        info!(volume_id = %volume_id, "volume created");
        Ok(CreateVolumeResponse {
            volume: Volume {
                volume_id: volume_id.to_string(),
                capacity_bytes: size_bytes,
                volume_context: request.parameters,
                content_source: request.content_source,
            },
        })
    }

    /// Resolves the owning cluster and the filesystem names a volume uses.
    async fn place_volume<'a>(
        &self,
        spec: VolumeRequestSpec,
        primary: &'a PrimaryHandle,
        cancel: &CancellationToken,
    ) -> Result<Placement<'a>, ControllerError> {
        let primary_conn = &primary.connector;
        let primary_fs = primary.cluster.filesystem.as_str();
        let primary_fileset = primary.cluster.fileset.as_str();

        let linked = step(cancel, primary_conn.is_fileset_linked(primary_fs, primary_fileset))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to get details of primary fileset [{primary_fileset}]"
                ))
            })?;
        if !linked {
            return Err(ControllerError::Internal(format!(
                "primary fileset [{primary_fileset}] is not linked"
            )));
        }

        if primary_fs != spec.filesystem {
            let mounted = step(cancel, primary_conn.is_mounted_on_gui_node(primary_fs))
                .await
                .map_err(|err| {
                    err.internal(format!(
                        "unable to get mount details of primary filesystem [{primary_fs}]"
                    ))
                })?;
            if !mounted {
                return Err(ControllerError::Internal(format!(
                    "primary filesystem [{primary_fs}] is not mounted on the management node"
                )));
            }
        }

        let volume_fs = step(cancel, primary_conn.filesystem_details(&spec.filesystem))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to get details of filesystem [{}] on the primary cluster",
                    spec.filesystem
                ))
            })?;
        if volume_fs.mount.status != MountStatus::Mounted {
            return Err(ControllerError::Internal(format!(
                "volume filesystem [{}] is not mounted on the primary cluster",
                spec.filesystem
            )));
        }

        let local_fs = spec.filesystem.clone();
        let (cluster_id, backend_fs) = if spec.is_fileset_backed() {
            let backend_fs = match remote_fs_name(&volume_fs.mount.remote_device_name) {
                "" => local_fs.clone(),
                name => name.to_owned(),
            };
            let cluster_id = match &spec.cluster_id {
                Some(cluster_id) => cluster_id.clone(),
                None if volume_fs.kind == FilesystemKind::Remote => {
                    return Err(ControllerError::Internal(format!(
                        "volume filesystem [{local_fs}] is remotely mounted on the primary \
                         cluster; specify the owning cluster id in the storage class"
                    )));
                }
                None => {
                    debug!("no cluster id in storage class, using the primary cluster");
                    primary.cluster.cluster_id.clone()
                }
            };
            (cluster_id, backend_fs)
        } else {
            (primary.cluster.cluster_id.clone(), local_fs.clone())
        };

        let connector = if spec.is_fileset_backed() {
            self.registry.resolve(&ClusterKey::Cluster(cluster_id.clone()))?
        } else {
            self.registry.resolve(&ClusterKey::Primary)?
        };

        Ok(Placement {
            spec,
            primary,
            connector,
            cluster_id,
            local_fs,
            backend_fs,
            fs_uuid: volume_fs.uuid,
        })
    }
}

async fn provision_fileset(
    placement: &Placement<'_>,
    owning_fs: &FilesystemDetails,
    cancel: &CancellationToken,
) -> Result<Provisioned, ControllerError> {
    let conn = &placement.connector;
    let fs = placement.backend_fs.as_str();
    let name = placement.spec.name.as_str();
    let size = placement.spec.size_bytes;

    check_owning_filesystem(placement, owning_fs)?;

    if size != 0 {
        let enabled = step(cancel, conn.quota_enabled(fs))
            .await
            .map_err(|err| err.internal(format!("unable to check quota on filesystem [{fs}]")))?;
        if !enabled {
            return Err(ControllerError::Internal(format!(
                "quota not enabled for filesystem [{fs}] of cluster [{}]",
                placement.cluster_id
            )));
        }
    }

    let listed = step(cancel, conn.list_fileset(fs, name))
        .await
        .map_err(|err| err.internal(format!("unable to list fileset [{name}] in filesystem [{fs}]")))?;
    let mut fileset = if let Some(fileset) = listed {
        fileset
    } else {
        let options = placement.spec.fileset_options();
        step(cancel, conn.create_fileset(fs, name, &options))
            .await
            .map_err(|err| {
                err.internal(format!("unable to create fileset [{name}] in filesystem [{fs}]"))
            })?;
        info!(fileset = name, filesystem = fs, "fileset created");
        relist(conn.as_ref(), fs, name, "after creation", cancel).await?
    };

    if fileset.link_path().is_none() {
        let junction = absolute_path(&owning_fs.mount.mount_point, name);
        step(cancel, conn.link_fileset(fs, name, &junction))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "linking fileset [{name}] in filesystem [{fs}] at path [{junction}] failed"
                ))
            })?;
        fileset = relist(conn.as_ref(), fs, name, "after linking", cancel).await?;
    }

    if size != 0 {
        reconcile_quota(conn.as_ref(), fs, name, size, cancel).await?;
    }

    let Some(link_path) = fileset.link_path() else {
        return Err(ControllerError::Internal(format!(
            "fileset [{name}] in filesystem [{fs}] has no junction path"
        )));
    };
    let target_path = fileset_target_path(link_path, &owning_fs.mount.mount_point, name)?;
    ensure_directory(placement, &target_path, cancel).await?;
    Ok(Provisioned {
        target_path,
        fileset_id: Some(fileset.id),
    })
}

/// Checks that the owning cluster can create filesets on the filesystem.
pub(super) fn check_owning_filesystem(
    placement: &Placement<'_>,
    owning_fs: &FilesystemDetails,
) -> Result<(), ControllerError> {
    if owning_fs.kind == FilesystemKind::Remote {
        return Err(ControllerError::Internal(format!(
            "filesystem [{}] is not local to cluster [{}]",
            placement.backend_fs, placement.cluster_id
        )));
    }
    let is_primary = placement.cluster_id == placement.primary.cluster.cluster_id;
    if !is_primary && owning_fs.mount.status != MountStatus::Mounted {
        return Err(ControllerError::Internal(format!(
            "filesystem [{}] in cluster [{}] is not mounted",
            placement.backend_fs, placement.cluster_id
        )));
    }
    debug!(mount_point = %owning_fs.mount.mount_point, "owning filesystem usable");
    Ok(())
}

fn validate_create_request(request: &CreateVolumeRequest) -> Result<u64, ControllerError> {
    if request.name.is_empty() {
        return Err(ControllerError::InvalidArgument(String::from(
            "volume name is a required field",
        )));
    }
    let Some(range) = request.capacity_range else {
        return Err(ControllerError::InvalidArgument(String::from(
            "capacity range is a required field",
        )));
    };
    if request.volume_capabilities.is_empty() {
        return Err(ControllerError::InvalidArgument(String::from(
            "volume capabilities is a required field",
        )));
    }
    for capability in &request.volume_capabilities {
        if capability.access_type == AccessType::Block {
            return Err(ControllerError::Unimplemented(String::from(
                "block volumes are not supported",
            )));
        }
        if capability.access_mode == AccessMode::MultiNodeReaderOnly {
            return Err(ControllerError::Unimplemented(String::from(
                "access mode ReadOnlyMany is not supported",
            )));
        }
    }
    Ok(range.required_bytes)
}

async fn relist(
    conn: &dyn Connector,
    fs: &str,
    name: &str,
    when: &str,
    cancel: &CancellationToken,
) -> Result<Fileset, ControllerError> {
    step(cancel, conn.list_fileset(fs, name))
        .await
        .map_err(|err| err.internal(format!("unable to list fileset [{name}] in filesystem [{fs}] {when}")))?
        .ok_or_else(|| {
            ControllerError::Internal(format!(
                "fileset [{name}] in filesystem [{fs}] is missing {when}"
            ))
        })
}

/// Sets the fileset quota unless it already holds the requested value.
///
/// An unset quota reads back as a non-number and counts as zero. A different
/// non-zero quota means the fileset belongs to someone else.
async fn reconcile_quota(
    conn: &dyn Connector,
    fs: &str,
    name: &str,
    size: u64,
    cancel: &CancellationToken,
) -> Result<(), ControllerError> {
    let raw = step(cancel, conn.fileset_quota(fs, name))
        .await
        .map_err(|err| err.internal(format!("unable to list quota for fileset [{name}] in filesystem [{fs}]")))?;
    let current = match parse_quota_bytes(&raw) {
        Ok(bytes) => bytes,
        Err(QuotaParseError::InvalidNumber(_)) => 0,
        Err(err) => {
            return Err(ControllerError::Internal(format!(
                "unable to convert quota for fileset [{name}] in filesystem [{fs}]: {err}"
            )));
        }
    };
    if current != 0 && current != size {
        return Err(ControllerError::Internal(format!(
            "fileset [{name}] present but quota {current} does not match requested size {size}"
        )));
    }
    if current == 0 {
        step(cancel, conn.set_fileset_quota(fs, name, size))
            .await
            .map_err(|err| {
                err.internal(format!("unable to set quota [{size}] on fileset [{name}] of filesystem [{fs}]"))
            })?;
    }
    Ok(())
}

async fn provision_directory(
    placement: &Placement<'_>,
    base_dir: &str,
    cancel: &CancellationToken,
) -> Result<Provisioned, ControllerError> {
    let fs = placement.backend_fs.as_str();
    let exists = step(cancel, placement.primary.connector.path_exists(fs, base_dir))
        .await
        .map_err(|err| {
            err.internal(format!(
                "unable to check if base directory [{base_dir}] is present in filesystem [{fs}]"
            ))
        })?;
    if !exists {
        warn!(base_dir, filesystem = fs, "base directory missing");
        return Err(ControllerError::Internal(format!(
            "directory base path [{base_dir}] not present in filesystem [{fs}]"
        )));
    }
    let target_path = format!("{base_dir}/{}", placement.spec.name);
    ensure_directory(placement, &target_path, cancel).await?;
    Ok(Provisioned {
        target_path,
        fileset_id: None,
    })
}

async fn ensure_directory(
    placement: &Placement<'_>,
    path: &str,
    cancel: &CancellationToken,
) -> Result<(), ControllerError> {
    let conn = &placement.connector;
    let fs = placement.backend_fs.as_str();
    let exists = step(cancel, conn.path_exists(fs, path))
        .await
        .map_err(|err| {
            err.internal(format!(
                "unable to check if directory [{path}] exists in filesystem [{fs}]"
            ))
        })?;
    if !exists {
        step(
            cancel,
            conn.make_directory(fs, path, placement.spec.uid, placement.spec.gid),
        )
        .await
        .map_err(|err| {
            err.internal(format!(
                "unable to create directory [{path}] in filesystem [{fs}]"
            ))
        })?;
    }
    Ok(())
}

async fn ensure_symlink(
    placement: &Placement<'_>,
    target_path: &str,
    cancel: &CancellationToken,
) -> Result<(), ControllerError> {
    let primary = &placement.primary;
    let primary_fs = primary.cluster.filesystem.as_str();
    let link_path = format!("{}/{}", primary.cluster.symlink_dir_rel, placement.spec.name);
    let exists = step(cancel, primary.connector.path_exists(primary_fs, &link_path))
        .await
        .map_err(|err| {
            err.internal(format!(
                "unable to check if symlink [{link_path}] exists in filesystem [{primary_fs}]"
            ))
        })?;
    if !exists {
        step(
            cancel,
            primary
                .connector
                .create_symlink(primary_fs, &link_path, &placement.local_fs, target_path),
        )
        .await
        .map_err(|err| {
            err.internal(format!(
                "failed to create symlink [{link_path}] in filesystem [{primary_fs}] for target \
                 [{target_path}] in filesystem [{}]",
                placement.local_fs
            ))
        })?;
    }
    Ok(())
}
