//! Controller configuration loaded via `ortho-config`.

use std::collections::BTreeMap;
use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable consulted for the mount policy.
pub const SKIP_MOUNT_UNMOUNT_ENV: &str = "SKIP_MOUNT_UNMOUNT";
/// Environment variable consulted for the node mapping prefix.
pub const NODE_MAPPING_PREFIX_ENV: &str = "SCALE_NODE_MAPPING_PREFIX";
/// Default node mapping prefix.
pub const DEFAULT_NODE_MAPPING_PREFIX: &str = "K8sNodePrefix_";

/// Controller settings layered from defaults, configuration files, and the
/// environment.
#[derive(Clone, Debug, Deserialize, Serialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(discovery(
    app_name = "fileset-csi",
    env_var = "FILESET_CSI_CONFIG_PATH",
    config_file_name = "fileset-csi.toml",
    dotfile_name = ".fileset-csi.toml",
    project_file_name = "fileset-csi.toml"
))]
pub struct ControllerConfig {
    /// Whether publish may mount filesystems on nodes (`no`) or must only
    /// check that they are mounted (`yes`). Defaults to `yes`.
    #[ortho_config(default = "yes".to_owned())]
    pub skip_mount_unmount: String,
    /// Prefix used to look up per-node overrides in the environment.
    #[ortho_config(default = DEFAULT_NODE_MAPPING_PREFIX.to_owned())]
    pub scale_node_mapping_prefix: String,
}

/// Whether publish is allowed to mount filesystems.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountPolicy {
    /// Publish fails unless the filesystems are already mounted.
    Skip,
    /// Publish mounts missing filesystems on the target node.
    Mount,
}

impl ControllerConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("fileset-csi")]).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Interprets `skip_mount_unmount`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for anything other than `yes` or
    /// `no`.
    pub fn mount_policy(&self) -> Result<MountPolicy, ConfigError> {
        match self.skip_mount_unmount.trim().to_ascii_lowercase().as_str() {
            "yes" => Ok(MountPolicy::Skip),
            "no" => Ok(MountPolicy::Mount),
            _ => Err(ConfigError::InvalidValue {
                env_var: SKIP_MOUNT_UNMOUNT_ENV,
                value: self.skip_mount_unmount.clone(),
                expected: "yes or no",
            }),
        }
    }

    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a field holds an unsupported value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mount_policy()?;
        if self.scale_node_mapping_prefix.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing node mapping prefix: set {NODE_MAPPING_PREFIX_ENV} or add \
                 scale_node_mapping_prefix to fileset-csi.toml"
            )));
        }
        Ok(())
    }

    /// Builds a node mapping from the process environment.
    #[must_use]
    pub fn node_mapping_from_env(&self) -> NodeMapping {
        NodeMapping::from_env(&self.scale_node_mapping_prefix)
    }
}

/// Translation from orchestrator node names to cluster node names.
///
/// A node is looked up under its own name first, then under the configured
/// prefix followed by its name. Unmapped nodes keep their name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeMapping {
    prefix: String,
    entries: BTreeMap<String, String>,
}

impl NodeMapping {
    /// Builds a mapping from `(key, value)` pairs such as environment
    /// variables.
    #[must_use]
    pub fn new<I, K, V>(prefix: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: prefix.to_owned(),
            entries: entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Builds a mapping from the process environment.
    #[must_use]
    pub fn from_env(prefix: &str) -> Self {
        Self::new(prefix, std::env::vars())
    }

    /// Returns the cluster node name for `node_id`.
    #[must_use]
    pub fn resolve<'a>(&'a self, node_id: &'a str) -> &'a str {
        if let Some(mapped) = self.entries.get(node_id) {
            return mapped;
        }
        self.entries
            .get(&format!("{}{node_id}", self.prefix))
            .map_or(node_id, String::as_str)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unsupported value.
    #[error("{env_var} must be {expected}, got [{value}]")]
    InvalidValue {
        /// Environment variable backing the field.
        env_var: &'static str,
        /// Value supplied.
        value: String,
        /// Description of accepted values.
        expected: &'static str,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
