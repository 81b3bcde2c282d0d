//! Core library for the fileset volume controller.
//!
//! The crate exposes the control-plane half of a container storage driver for
//! a clustered filesystem: volumes are independent or dependent filesets, or
//! plain directories, reached through symlinks under a primary fileset. The
//! [`ControllerService`] drives one or more clusters through the
//! [`Connector`] abstraction.

pub mod config;
pub mod connector;
pub mod controller;
pub mod identifier;
pub mod inflight;
pub mod quota;
pub mod registry;
pub mod test_support;

pub use config::{ConfigError, ControllerConfig, MountPolicy, NodeMapping};
pub use connector::{Connector, ConnectorError, ConnectorFuture};
pub use controller::{ControllerError, ControllerService, StatusCode};
pub use identifier::{IdentifierError, SnapshotId, VolumeAddress, VolumeId};
pub use inflight::{Admission, InFlightError, InFlightPermit, InFlightRequests};
pub use quota::{QuotaParseError, parse_quota_bytes};
pub use registry::{ClusterKey, ClusterRegistry, PrimaryCluster, RegistryError};
