//! Fileset snapshots.

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::error::ControllerError;
use super::helpers::{base_name, relative_to_mount, step};
use super::types::{
    ControllerCapability, CreateSnapshotRequest, CreateSnapshotResponse, DeleteSnapshotRequest,
    Snapshot,
};
use super::{ControllerService, MissingCapability};
use crate::identifier::{SnapshotId, VolumeId};
use crate::registry::ClusterKey;

/// Most snapshots a single fileset can hold.
pub const MAX_SNAPSHOTS_PER_FILESET: usize = 256;

/// Layout of snapshot creation times reported by the management API.
const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

impl ControllerService {
    /// Snapshots the independent fileset behind a volume. Requesting a
    /// snapshot that already exists returns it again.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for lightweight or
    /// dependent-fileset volumes, [`ControllerError::OutOfRange`] once the
    /// fileset holds [`MAX_SNAPSHOTS_PER_FILESET`] snapshots, and
    /// [`ControllerError::Internal`] when a cluster call fails.
    #[instrument(skip(self, request, cancel), fields(snapshot = %request.name))]
    pub async fn create_snapshot(
        &self,
        request: &CreateSnapshotRequest,
        cancel: &CancellationToken,
    ) -> Result<CreateSnapshotResponse, ControllerError> {
        self.require_capability(
            ControllerCapability::CreateDeleteSnapshot,
            MissingCapability::Internal,
        )?;
        let volume_id = request.source_volume_id.as_str();
        if volume_id.is_empty() {
            return Err(ControllerError::InvalidArgument(String::from(
                "source volume id is a required field",
            )));
        }
        if request.name.is_empty() {
            return Err(ControllerError::InvalidArgument(String::from(
                "snapshot name is a required field",
            )));
        }
        let id: VolumeId = volume_id.parse()?;
        let Some(fileset_id) = id.fileset_id() else {
            return Err(ControllerError::InvalidArgument(format!(
                "volume [{volume_id}] is not fileset-backed; snapshots need an independent fileset"
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
                    "unable to get fileset for id [{fileset_id}] in filesystem [{filesystem}]"
                ))
            })?
            .ok_or_else(|| {
                ControllerError::NotFound(format!(
                    "fileset id [{fileset_id}] not found in filesystem [{filesystem}]"
                ))
            })?;
        if !fileset.is_independent() {
            return Err(ControllerError::InvalidArgument(format!(
                "volume [{volume_id}] is a dependent fileset; snapshots need an independent fileset"
            )));
        }

        let link_path = relative_to_mount(id.path(), &primary.cluster.mount_point);
        let pv_name = base_name(&link_path);
        if pv_name != fileset.name {
            return Err(ControllerError::Internal(format!(
                "volume name [{pv_name}] from path does not match fileset name [{}]",
                fileset.name
            )));
        }

        let fileset_name = fileset.name.as_str();
        let snapshot_name = request.name.as_str();
        let exists = step(cancel, conn.snapshot_exists(&filesystem, fileset_name, snapshot_name))
            .await
            .map_err(|err| err.internal(format!("unable to get details of snapshot [{snapshot_name}]")))?;
        if exists {
            debug!(fileset = fileset_name, "snapshot already exists");
        } else {
            let existing = step(cancel, conn.list_snapshots(&filesystem, fileset_name))
                .await
                .map_err(|err| {
                    err.internal(format!(
                        "unable to list snapshots for fileset [{filesystem}:{fileset_name}]"
                    ))
                })?;
            if existing.len() >= MAX_SNAPSHOTS_PER_FILESET {
                error!(fileset = fileset_name, "snapshot limit reached");
                return Err(ControllerError::OutOfRange(format!(
                    "max limit of snapshots reached for fileset [{filesystem}:{fileset_name}]"
                )));
            }
            step(cancel, conn.create_snapshot(&filesystem, fileset_name, snapshot_name))
                .await
                .map_err(|err| err.internal(format!("unable to create snapshot [{snapshot_name}]")))?;
            info!(fileset = fileset_name, "snapshot created");
        }

        let snapshot_id = SnapshotId::for_fileset(id.cluster_id(), fs_uuid, fileset_name, snapshot_name);

        let raw_time = step(cancel, conn.snapshot_created_at(&filesystem, fileset_name, snapshot_name))
            .await
            .map_err(|err| {
                err.internal(format!("unable to get creation time of snapshot [{snapshot_name}]"))
            })?;
        let creation_time = parse_snapshot_timestamp(&raw_time)?;

        let quota = step(cancel, conn.fileset_quota_details(&filesystem, fileset_name))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to get quota details of fileset [{filesystem}:{fileset_name}]"
                ))
            })?;
        let size_bytes = restore_size_bytes(quota.block_limit_kib).ok_or_else(|| {
            ControllerError::Internal(format!(
                "invalid block limit [{}] for fileset [{filesystem}:{fileset_name}]",
                quota.block_limit_kib
            ))
        })?;

        Ok(CreateSnapshotResponse {
            snapshot: Snapshot {
                snapshot_id: snapshot_id.to_string(),
                source_volume_id: request.source_volume_id.clone(),
                ready_to_use: true,
                creation_time,
                size_bytes,
            },
        })
    }

    /// Deletes a snapshot. A missing fileset or a missing snapshot counts as
    /// already deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for malformed identifiers,
    /// [`ControllerError::NotFound`] for unknown clusters, and
    /// [`ControllerError::Internal`] when a cluster call fails.
    #[instrument(skip(self, request, cancel), fields(snapshot_id = %request.snapshot_id))]
    pub async fn delete_snapshot(
        &self,
        request: &DeleteSnapshotRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        self.require_capability(
            ControllerCapability::CreateDeleteSnapshot,
            MissingCapability::Internal,
        )?;
        if request.snapshot_id.is_empty() {
            return Err(ControllerError::InvalidArgument(String::from(
                "snapshot id is a required field",
            )));
        }
        let id: SnapshotId = request.snapshot_id.parse()?;
        let conn = self.registry.resolve(&ClusterKey::Cluster(id.cluster_id.clone()))?;

        let filesystem = step(cancel, conn.filesystem_name(&id.fs_uuid))
            .await
            .map_err(|err| {
                err.internal(format!(
                    "unable to get filesystem name for id [{}] and cluster [{}]",
                    id.fs_uuid, id.cluster_id
                ))
            })?;
        let fileset = id.fileset_name.as_str();
        let snapshot = id.snapshot_name.as_str();

        let fileset_exists = step(cancel, conn.fileset_exists(&filesystem, fileset))
            .await
            .map_err(|err| err.internal(format!("unable to get details of fileset [{fileset}]")))?;
        if !fileset_exists {
            info!(fileset, "fileset already removed, nothing to delete");
            return Ok(());
        }
        let snapshot_exists = step(cancel, conn.snapshot_exists(&filesystem, fileset, snapshot))
            .await
            .map_err(|err| err.internal(format!("unable to get details of snapshot [{snapshot}]")))?;
        if !snapshot_exists {
            info!(fileset, "snapshot already removed");
            return Ok(());
        }
        step(cancel, conn.delete_snapshot(&filesystem, fileset, snapshot))
            .await
            .map_err(|err| err.internal(format!("error deleting snapshot [{snapshot}]")))?;
        info!(fileset, "snapshot deleted");
        Ok(())
    }
}

/// Parses a `YYYY-MM-DD HH:MM:SS,mmm` timestamp as UTC.
fn parse_snapshot_timestamp(raw: &str) -> Result<DateTime<Utc>, ControllerError> {
    NaiveDateTime::parse_from_str(raw.trim(), SNAPSHOT_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|err| {
            ControllerError::Internal(format!("unparsable snapshot creation time [{raw}]: {err}"))
        })
}

/// Converts a block limit in KiB to bytes, rejecting negative values.
fn restore_size_bytes(block_limit_kib: i64) -> Option<u64> {
    u64::try_from(block_limit_kib).ok()?.checked_mul(1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use rstest::rstest;

    #[test]
    fn parses_management_api_timestamps() {
        let parsed = parse_snapshot_timestamp("2024-03-05 14:07:09,250").expect("timestamp");
        assert_eq!(
            parsed.with_nanosecond(0),
            Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).single()
        );
        assert_eq!(parsed.nanosecond(), 250_000_000);
    }

    #[test]
    fn rejects_unparsable_timestamps() {
        assert!(matches!(
            parse_snapshot_timestamp("yesterday"),
            Err(ControllerError::Internal(_))
        ));
    }

    #[rstest]
    #[case(0, Some(0))]
    #[case(1_048_576, Some(1_073_741_824))]
    #[case(-1, None)]
    fn converts_block_limit(#[case] kib: i64, #[case] expected: Option<u64>) {
        assert_eq!(restore_size_bytes(kib), expected);
    }
}
