//! Storage-class parameter parsing.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::connector::{FilesetOptions, FilesetType};
use crate::quota::parse_quota_bytes;

/// Filesystem the volume is created on. Required.
pub const PARAM_FILESYSTEM: &str = "volBackendFs";
/// Base directory for lightweight volumes.
pub const PARAM_DIR_BASE_PATH: &str = "volDirBasePath";
/// Cluster owning the filesystem.
pub const PARAM_CLUSTER_ID: &str = "clusterId";
/// Owner of the volume root.
pub const PARAM_UID: &str = "uid";
/// Group of the volume root.
pub const PARAM_GID: &str = "gid";
/// Fileset flavour.
pub const PARAM_FILESET_TYPE: &str = "filesetType";
/// Inode limit of an independent fileset.
pub const PARAM_INODE_LIMIT: &str = "inodeLimit";
/// Parent of a dependent fileset.
pub const PARAM_PARENT_FILESET: &str = "parentFileset";
/// Node class running clone copies.
pub const PARAM_NODE_CLASS: &str = "nodeClass";

/// Errors raised while interpreting storage-class parameters.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ParameterError {
    /// The target filesystem was not given.
    #[error("{PARAM_FILESYSTEM} must be specified in the storage class")]
    MissingFilesystem,
    /// Two parameters that exclude each other were both given.
    #[error("{first} and {second} must not be specified together")]
    Conflict {
        /// First parameter key.
        first: &'static str,
        /// Second parameter key.
        second: &'static str,
    },
    /// The fileset type is neither `independent` nor `dependent`.
    #[error("invalid {PARAM_FILESET_TYPE} [{0}]: use independent or dependent")]
    InvalidFilesetType(String),
    /// A numeric parameter is not a valid number.
    #[error("invalid value [{value}] for {key}")]
    InvalidNumber {
        /// Parameter key.
        key: &'static str,
        /// Value supplied.
        value: String,
    },
}

/// Shape of the backing object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeShape {
    /// A directory under `base_dir`.
    Lightweight {
        /// Base directory relative to the filesystem root.
        base_dir: String,
    },
    /// A dedicated fileset.
    Fileset {
        /// Fileset flavour.
        fileset_type: FilesetType,
        /// Inode limit passed through to creation.
        inode_limit: Option<String>,
        /// Parent of a dependent fileset.
        parent_fileset: Option<String>,
    },
}

/// A create request's storage-class parameters, validated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRequestSpec {
    /// Volume name.
    pub name: String,
    /// Requested size in bytes; zero means no quota.
    pub size_bytes: u64,
    /// Target filesystem as known to the primary cluster.
    pub filesystem: String,
    /// Backing object shape.
    pub shape: VolumeShape,
    /// Owner of the volume root.
    pub uid: Option<u32>,
    /// Group of the volume root.
    pub gid: Option<u32>,
    /// Explicit owning cluster.
    pub cluster_id: Option<String>,
    /// Node class for clone copies.
    pub node_class: Option<String>,
}

impl VolumeRequestSpec {
    /// Validates storage-class parameters for volume `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] for missing, malformed, or conflicting
    /// parameters.
    pub fn from_parameters(
        name: &str,
        size_bytes: u64,
        parameters: &BTreeMap<String, String>,
    ) -> Result<Self, ParameterError> {
        let get = |key: &str| {
            parameters
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };
        let filesystem = get(PARAM_FILESYSTEM).ok_or(ParameterError::MissingFilesystem)?;
        let shape = match (get(PARAM_DIR_BASE_PATH), get(PARAM_FILESET_TYPE)) {
            (Some(_), Some(_)) => {
                return Err(conflict(PARAM_DIR_BASE_PATH, PARAM_FILESET_TYPE));
            }
            (Some(base_dir), None) => {
                if get(PARAM_INODE_LIMIT).is_some() {
                    return Err(conflict(PARAM_DIR_BASE_PATH, PARAM_INODE_LIMIT));
                }
                if get(PARAM_PARENT_FILESET).is_some() {
                    return Err(conflict(PARAM_DIR_BASE_PATH, PARAM_PARENT_FILESET));
                }
                VolumeShape::Lightweight {
                    base_dir: base_dir.to_owned(),
                }
            }
            (None, fileset_type) => fileset_shape(
                fileset_type,
                get(PARAM_INODE_LIMIT),
                get(PARAM_PARENT_FILESET),
            )?,
        };
        Ok(Self {
            name: name.to_owned(),
            size_bytes,
            filesystem: filesystem.to_owned(),
            shape,
            uid: get(PARAM_UID).map(|value| parse_id(PARAM_UID, value)).transpose()?,
            gid: get(PARAM_GID).map(|value| parse_id(PARAM_GID, value)).transpose()?,
            cluster_id: get(PARAM_CLUSTER_ID).map(str::to_owned),
            node_class: get(PARAM_NODE_CLASS).map(str::to_owned),
        })
    }

    /// Returns `true` when the volume gets its own fileset.
    #[must_use]
    pub const fn is_fileset_backed(&self) -> bool {
        matches!(self.shape, VolumeShape::Fileset { .. })
    }

    /// Options forwarded to fileset creation.
    #[must_use]
    pub fn fileset_options(&self) -> FilesetOptions {
        let (fileset_type, inode_limit, parent_fileset) = match &self.shape {
            VolumeShape::Fileset {
                fileset_type,
                inode_limit,
                parent_fileset,
            } => (*fileset_type, inode_limit.clone(), parent_fileset.clone()),
            VolumeShape::Lightweight { .. } => (FilesetType::default(), None, None),
        };
        FilesetOptions {
            fileset_type,
            uid: self.uid,
            gid: self.gid,
            inode_limit,
            parent_fileset,
        }
    }
}

fn fileset_shape(
    fileset_type: Option<&str>,
    inode_limit: Option<&str>,
    parent_fileset: Option<&str>,
) -> Result<VolumeShape, ParameterError> {
    let parsed = match fileset_type {
        None | Some("independent") => FilesetType::Independent,
        Some("dependent") => FilesetType::Dependent,
        Some(other) => return Err(ParameterError::InvalidFilesetType(other.to_owned())),
    };
    match parsed {
        FilesetType::Independent if parent_fileset.is_some() => {
            return Err(conflict(PARAM_FILESET_TYPE, PARAM_PARENT_FILESET));
        }
        FilesetType::Dependent if inode_limit.is_some() => {
            return Err(conflict(PARAM_FILESET_TYPE, PARAM_INODE_LIMIT));
        }
        _ => {}
    }
    if let Some(limit) = inode_limit {
        validate_inode_limit(limit)?;
    }
    Ok(VolumeShape::Fileset {
        fileset_type: parsed,
        inode_limit: inode_limit.map(str::to_owned),
        parent_fileset: parent_fileset.map(str::to_owned),
    })
}

fn validate_inode_limit(value: &str) -> Result<(), ParameterError> {
    let invalid = || ParameterError::InvalidNumber {
        key: PARAM_INODE_LIMIT,
        value: value.to_owned(),
    };
    let suffix_ok = value
        .chars()
        .last()
        .is_some_and(|ch| ch.is_ascii_digit() || matches!(ch.to_ascii_uppercase(), 'K' | 'M' | 'G'));
    if !suffix_ok {
        return Err(invalid());
    }
    parse_quota_bytes(value).map(|_| ()).map_err(|_| invalid())
}

fn parse_id(key: &'static str, value: &str) -> Result<u32, ParameterError> {
    value.parse().map_err(|_| ParameterError::InvalidNumber {
        key,
        value: value.to_owned(),
    })
}

const fn conflict(first: &'static str, second: &'static str) -> ParameterError {
    ParameterError::Conflict { first, second }
}
