//! Cluster registry.
//!
//! The registry maps cluster identifiers to connectors and holds the primary
//! cluster's configuration. The primary is addressed through its own slot, so
//! it can never collide with a cluster identifier.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::connector::Connector;

/// Key used to address a registry slot.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ClusterKey {
    /// The primary cluster.
    Primary,
    /// A cluster addressed by its identifier.
    Cluster(String),
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Cluster(id) => f.write_str(id),
        }
    }
}

/// Configuration of the primary cluster.
///
/// The primary hosts the symlink directory through which every volume is
/// reached, whichever cluster owns its data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrimaryCluster {
    /// Cluster identifier of the primary.
    pub cluster_id: String,
    /// Filesystem holding the symlink directory.
    pub filesystem: String,
    /// Fileset holding the symlink directory.
    pub fileset: String,
    /// Mount point of the primary filesystem.
    pub mount_point: String,
    /// Absolute path of the symlink directory.
    pub symlink_dir_abs: String,
    /// Symlink directory relative to the primary filesystem root.
    pub symlink_dir_rel: String,
}

/// Primary cluster configuration together with its connector.
#[derive(Clone)]
pub struct PrimaryHandle {
    /// Primary configuration.
    pub cluster: PrimaryCluster,
    /// Connector reaching the primary.
    pub connector: Arc<dyn Connector>,
}

impl fmt::Debug for PrimaryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimaryHandle")
            .field("cluster", &self.cluster)
            .finish_non_exhaustive()
    }
}

/// Errors raised by registry lookups.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// No primary cluster was configured.
    #[error("primary cluster is not configured")]
    MissingPrimary,
    /// No connector is registered for the cluster.
    #[error("no connector registered for cluster [{0}]")]
    UnknownCluster(String),
}

/// Connectors keyed by cluster, plus the primary.
#[derive(Clone, Default)]
pub struct ClusterRegistry {
    primary: Option<PrimaryHandle>,
    clusters: HashMap<String, Arc<dyn Connector>>,
}

impl fmt::Debug for ClusterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.clusters.keys().collect();
        ids.sort();
        f.debug_struct("ClusterRegistry")
            .field("primary", &self.primary)
            .field("clusters", &ids)
            .finish()
    }
}

impl ClusterRegistry {
    /// Starts a registry builder.
    #[must_use]
    pub fn builder() -> ClusterRegistryBuilder {
        ClusterRegistryBuilder::default()
    }

    /// Returns the primary cluster and its connector.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MissingPrimary`] when no primary is configured.
    pub fn resolve_primary(&self) -> Result<&PrimaryHandle, RegistryError> {
        self.primary.as_ref().ok_or(RegistryError::MissingPrimary)
    }

    fn connector_for(&self, cluster_id: &str) -> Result<Arc<dyn Connector>, RegistryError> {
        self.clusters
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCluster(cluster_id.to_owned()))
    }

    /// Resolves a registry slot to its connector.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MissingPrimary`] for the primary slot when no
    /// primary is configured, and [`RegistryError::UnknownCluster`] for an
    /// unregistered cluster identifier.
    pub fn resolve(&self, key: &ClusterKey) -> Result<Arc<dyn Connector>, RegistryError> {
        match key {
            ClusterKey::Primary => Ok(Arc::clone(&self.resolve_primary()?.connector)),
            ClusterKey::Cluster(id) => self.connector_for(id),
        }
    }
}

/// Builder for [`ClusterRegistry`].
#[derive(Default)]
pub struct ClusterRegistryBuilder {
    registry: ClusterRegistry,
}

impl ClusterRegistryBuilder {
    /// Sets the primary cluster. Its connector is also registered under the
    /// primary's cluster identifier.
    #[must_use]
    pub fn primary(mut self, cluster: PrimaryCluster, connector: Arc<dyn Connector>) -> Self {
        self.registry
            .clusters
            .insert(cluster.cluster_id.clone(), Arc::clone(&connector));
        self.registry.primary = Some(PrimaryHandle { cluster, connector });
        self
    }

    /// Registers an additional cluster.
    #[must_use]
    pub fn cluster(mut self, cluster_id: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        self.registry.clusters.insert(cluster_id.into(), connector);
        self
    }

    /// Finishes the registry.
    #[must_use]
    pub fn build(self) -> ClusterRegistry {
        self.registry
    }
}

/// Extracts the filesystem name from a `<cluster>:<filesystem>` remote device
/// name. Values without a `:` are returned unchanged.
#[must_use]
pub fn remote_fs_name(remote_device_name: &str) -> &str {
    remote_device_name
        .rsplit_once(':')
        .map_or(remote_device_name, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeConnector;
    use rstest::rstest;

    fn primary() -> PrimaryCluster {
        PrimaryCluster {
            cluster_id: String::from("1001"),
            filesystem: String::from("fs0"),
            fileset: String::from("csi-store"),
            mount_point: String::from("/ibm/fs0"),
            symlink_dir_abs: String::from("/ibm/fs0/csi-store/.volumes"),
            symlink_dir_rel: String::from("csi-store/.volumes"),
        }
    }

    #[test]
    fn primary_is_reachable_by_slot_and_id() {
        let registry = ClusterRegistry::builder()
            .primary(primary(), Arc::new(FakeConnector::new()))
            .build();
        assert_eq!(
            registry.resolve_primary().map(|handle| &handle.cluster),
            Ok(&primary())
        );
        assert!(registry.resolve(&ClusterKey::Cluster(String::from("1001"))).is_ok());
        assert!(registry.resolve(&ClusterKey::Primary).is_ok());
    }

    #[test]
    fn missing_primary_is_reported() {
        let registry = ClusterRegistry::builder()
            .cluster("2002", Arc::new(FakeConnector::new()))
            .build();
        assert!(matches!(
            registry.resolve_primary(),
            Err(RegistryError::MissingPrimary)
        ));
        assert!(matches!(
            registry.resolve(&ClusterKey::Primary),
            Err(RegistryError::MissingPrimary)
        ));
        assert!(registry.resolve(&ClusterKey::Cluster(String::from("2002"))).is_ok());
    }

    #[test]
    fn unknown_cluster_is_reported() {
        let registry = ClusterRegistry::default();
        assert!(matches!(
            registry.resolve(&ClusterKey::Cluster(String::from("9"))),
            Err(RegistryError::UnknownCluster(id)) if id == "9"
        ));
    }

    #[rstest]
    #[case("cluster-b.example:remotefs", "remotefs")]
    #[case("a:b:fs1", "fs1")]
    #[case("fs0", "fs0")]
    #[case("", "")]
    fn remote_fs_name_takes_last_segment(#[case] device: &str, #[case] expected: &str) {
        assert_eq!(remote_fs_name(device), expected);
    }
}
