//! Volume and snapshot identifiers.
//!
//! Identifiers are handed to the orchestrator as opaque strings and come back
//! verbatim on every later call, so the grammar is fixed:
//!
//! ```text
//! <cluster>;<fs-uuid>;path=<symlink>                    lightweight volume
//! <cluster>;<fs-uuid>;fileset=<id>;path=<symlink>       fileset-backed volume
//! <cluster>;<fs-uuid>;<fileset>;<snapshot>[;<path>]     snapshot
//! ```
//!
//! Parsing is strict: unknown keys, empty fields, and unexpected field counts
//! are rejected. A `key=value` field is split on its first `=` only.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

const FIELD_SEPARATOR: char = ';';
const PATH_KEY: &str = "path";
const FILESET_KEY: &str = "fileset";
const DEFAULT_SNAPSHOT_PATH: &str = "/";

/// Errors raised while decoding identifiers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IdentifierError {
    /// The identifier does not have a supported number of fields.
    #[error("{kind} id [{raw}] has {found} fields, expected {expected}")]
    FieldCount {
        /// Identifier kind (`volume` or `snapshot`).
        kind: &'static str,
        /// Raw identifier text.
        raw: String,
        /// Number of `;`-separated fields found.
        found: usize,
        /// Human-readable description of the accepted counts.
        expected: &'static str,
    },
    /// A `key=value` field lacks the `=` separator.
    #[error("field [{field}] of id [{raw}] is not a key=value pair")]
    MissingSeparator {
        /// Offending field.
        field: String,
        /// Raw identifier text.
        raw: String,
    },
    /// A `key=value` field carries an unexpected key.
    #[error("field [{found}] of id [{raw}] should use key [{expected}]")]
    UnexpectedKey {
        /// Key the grammar requires at this position.
        expected: &'static str,
        /// Key found in the identifier.
        found: String,
        /// Raw identifier text.
        raw: String,
    },
    /// A required field is empty.
    #[error("{field} of id [{raw}] must not be empty")]
    EmptyField {
        /// Logical name of the empty field.
        field: &'static str,
        /// Raw identifier text.
        raw: String,
    },
}

/// Decoded volume identifier.
///
/// `cluster_id` and `fs_uuid` always name the cluster and filesystem that own
/// the backing object; the UUID is the one reported by the primary cluster.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum VolumeId {
    /// A plain directory under a configured base path.
    Lightweight {
        /// Owning cluster identifier.
        cluster_id: String,
        /// Filesystem UUID as seen by the primary cluster.
        fs_uuid: String,
        /// Absolute path of the access symlink.
        path: String,
    },
    /// A dedicated fileset with its own quota.
    Fileset {
        /// Owning cluster identifier.
        cluster_id: String,
        /// Filesystem UUID as seen by the primary cluster.
        fs_uuid: String,
        /// Backend fileset identifier.
        fileset_id: String,
        /// Absolute path of the access symlink.
        path: String,
    },
}

impl VolumeId {
    /// Returns the owning cluster identifier.
    #[must_use]
    pub fn cluster_id(&self) -> &str {
        match self {
            Self::Lightweight { cluster_id, .. } | Self::Fileset { cluster_id, .. } => cluster_id,
        }
    }

    /// Returns the filesystem UUID.
    #[must_use]
    pub fn fs_uuid(&self) -> &str {
        match self {
            Self::Lightweight { fs_uuid, .. } | Self::Fileset { fs_uuid, .. } => fs_uuid,
        }
    }

    /// Returns the absolute symlink path recorded at creation.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Lightweight { path, .. } | Self::Fileset { path, .. } => path,
        }
    }

    /// Returns the fileset identifier for fileset-backed volumes.
    #[must_use]
    pub fn fileset_id(&self) -> Option<&str> {
        match self {
            Self::Lightweight { .. } => None,
            Self::Fileset { fileset_id, .. } => Some(fileset_id),
        }
    }

    /// Returns `true` when the volume is backed by its own fileset.
    #[must_use]
    pub const fn is_fileset_backed(&self) -> bool {
        matches!(self, Self::Fileset { .. })
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lightweight {
                cluster_id,
                fs_uuid,
                path,
            } => write!(f, "{cluster_id};{fs_uuid};{PATH_KEY}={path}"),
            Self::Fileset {
                cluster_id,
                fs_uuid,
                fileset_id,
                path,
            } => write!(
                f,
                "{cluster_id};{fs_uuid};{FILESET_KEY}={fileset_id};{PATH_KEY}={path}"
            ),
        }
    }
}

impl FromStr for VolumeId {
    type Err = IdentifierError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
        match fields.as_slice() {
            [cluster, uuid, path_field] => Ok(Self::Lightweight {
                cluster_id: require(cluster, "cluster id", raw)?,
                fs_uuid: require(uuid, "filesystem uuid", raw)?,
                path: keyed_value(path_field, PATH_KEY, raw)?,
            }),
            [cluster, uuid, fileset_field, path_field] => Ok(Self::Fileset {
                cluster_id: require(cluster, "cluster id", raw)?,
                fs_uuid: require(uuid, "filesystem uuid", raw)?,
                fileset_id: keyed_value(fileset_field, FILESET_KEY, raw)?,
                path: keyed_value(path_field, PATH_KEY, raw)?,
            }),
            _ => Err(IdentifierError::FieldCount {
                kind: "volume",
                raw: raw.to_owned(),
                found: fields.len(),
                expected: "3 or 4",
            }),
        }
    }
}

/// The cluster and filesystem prefix of a volume identifier.
///
/// Publish and unpublish only need to know which filesystem a volume lives on,
/// so they read the first two fields and leave the rest undecoded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeAddress {
    /// Owning cluster identifier.
    pub cluster_id: String,
    /// Filesystem UUID as seen by the primary cluster.
    pub fs_uuid: String,
}

impl VolumeAddress {
    /// Reads the cluster and filesystem fields of a volume identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::FieldCount`] when fewer than three fields are
    /// present and [`IdentifierError::EmptyField`] when either field is blank.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let fields: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
        let [cluster, uuid, _, ..] = fields.as_slice() else {
            return Err(IdentifierError::FieldCount {
                kind: "volume",
                raw: raw.to_owned(),
                found: fields.len(),
                expected: "at least 3",
            });
        };
        Ok(Self {
            cluster_id: require(cluster, "cluster id", raw)?,
            fs_uuid: require(uuid, "filesystem uuid", raw)?,
        })
    }
}

/// Decoded snapshot identifier.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SnapshotId {
    /// Owning cluster identifier.
    pub cluster_id: String,
    /// Filesystem UUID.
    pub fs_uuid: String,
    /// Name of the snapshotted fileset.
    pub fileset_name: String,
    /// Snapshot name.
    pub snapshot_name: String,
    /// Path inside the snapshot holding the volume data. Defaults to `/`.
    pub path: String,
}

impl SnapshotId {
    /// Builds the identifier returned for a freshly created snapshot, whose
    /// data lives under `<fileset>-data`.
    #[must_use]
    pub fn for_fileset(
        cluster_id: impl Into<String>,
        fs_uuid: impl Into<String>,
        fileset_name: &str,
        snapshot_name: impl Into<String>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            fs_uuid: fs_uuid.into(),
            fileset_name: fileset_name.to_owned(),
            snapshot_name: snapshot_name.into(),
            path: data_dir_name(fileset_name),
        }
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{};{}",
            self.cluster_id, self.fs_uuid, self.fileset_name, self.snapshot_name, self.path
        )
    }
}

impl FromStr for SnapshotId {
    type Err = IdentifierError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
        let (head, path) = match fields.as_slice() {
            [cluster, uuid, fileset, snapshot] => ([*cluster, *uuid, *fileset, *snapshot], None),
            [cluster, uuid, fileset, snapshot, path] => {
                ([*cluster, *uuid, *fileset, *snapshot], Some(*path))
            }
            _ => {
                return Err(IdentifierError::FieldCount {
                    kind: "snapshot",
                    raw: raw.to_owned(),
                    found: fields.len(),
                    expected: "4 or 5",
                });
            }
        };
        let [cluster, uuid, fileset, snapshot] = head;
        Ok(Self {
            cluster_id: require(cluster, "cluster id", raw)?,
            fs_uuid: require(uuid, "filesystem uuid", raw)?,
            fileset_name: require(fileset, "fileset name", raw)?,
            snapshot_name: require(snapshot, "snapshot name", raw)?,
            path: path
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_SNAPSHOT_PATH)
                .to_owned(),
        })
    }
}

/// Name of the directory holding a fileset volume's data.
#[must_use]
pub fn data_dir_name(volume_name: &str) -> String {
    format!("{volume_name}-data")
}

fn require(value: &str, field: &'static str, raw: &str) -> Result<String, IdentifierError> {
    if value.is_empty() {
        return Err(IdentifierError::EmptyField {
            field,
            raw: raw.to_owned(),
        });
    }
    Ok(value.to_owned())
}

fn keyed_value(field: &str, key: &'static str, raw: &str) -> Result<String, IdentifierError> {
    let Some((found, value)) = field.split_once('=') else {
        return Err(IdentifierError::MissingSeparator {
            field: field.to_owned(),
            raw: raw.to_owned(),
        });
    };
    if found != key {
        return Err(IdentifierError::UnexpectedKey {
            expected: key,
            found: found.to_owned(),
            raw: raw.to_owned(),
        });
    }
    require(value, key, raw)
}
