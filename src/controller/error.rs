//! Error types for controller operations.

use std::fmt::Display;

use serde::Serialize;
use thiserror::Error;

use super::params::ParameterError;
use crate::connector::ConnectorError;
use crate::identifier::IdentifierError;
use crate::inflight::InFlightError;
use crate::registry::RegistryError;

/// Status codes surfaced to the orchestrator.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// The request is malformed or names an unsupported combination.
    InvalidArgument,
    /// The cluster is not in a state that allows the operation.
    FailedPrecondition,
    /// A referenced object does not exist.
    NotFound,
    /// An identical request is already running.
    Aborted,
    /// A resource limit was reached.
    OutOfRange,
    /// The operation is not supported.
    Unimplemented,
    /// The backend failed or returned inconsistent state.
    Internal,
    /// The caller cancelled the request.
    Cancelled,
}

/// Errors returned by controller operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ControllerError {
    /// The request is malformed or names an unsupported combination.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The cluster is not in a state that allows the operation.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    /// A referenced object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// An identical request is already running.
    #[error("aborted: {0}")]
    Aborted(String),
    /// A resource limit was reached.
    #[error("out of range: {0}")]
    OutOfRange(String),
    /// The operation is not supported.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    /// The backend failed or returned inconsistent state.
    #[error("internal error: {0}")]
    Internal(String),
    /// The caller cancelled the request before it completed.
    #[error("request cancelled")]
    Cancelled,
}

impl ControllerError {
    /// Returns the status code for this error.
    #[must_use]
    pub const fn code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::InvalidArgument,
            Self::FailedPrecondition(_) => StatusCode::FailedPrecondition,
            Self::NotFound(_) => StatusCode::NotFound,
            Self::Aborted(_) => StatusCode::Aborted,
            Self::OutOfRange(_) => StatusCode::OutOfRange,
            Self::Unimplemented(_) => StatusCode::Unimplemented,
            Self::Internal(_) => StatusCode::Internal,
            Self::Cancelled => StatusCode::Cancelled,
        }
    }

    /// Creates a [`ControllerError::InvalidArgument`] from anything that
    /// implements [`Display`].
    #[must_use]
    pub fn invalid_argument<E: Display>(e: E) -> Self {
        Self::InvalidArgument(e.to_string())
    }

    /// Creates a [`ControllerError::Internal`] from anything that implements
    /// [`Display`].
    #[must_use]
    pub fn internal<E: Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<IdentifierError> for ControllerError {
    fn from(value: IdentifierError) -> Self {
        Self::invalid_argument(value)
    }
}

impl From<ParameterError> for ControllerError {
    fn from(value: ParameterError) -> Self {
        Self::invalid_argument(value)
    }
}

impl From<InFlightError> for ControllerError {
    fn from(value: InFlightError) -> Self {
        Self::internal(value)
    }
}

impl From<RegistryError> for ControllerError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::MissingPrimary => Self::internal(value),
            RegistryError::UnknownCluster(_) => Self::NotFound(value.to_string()),
        }
    }
}

/// Failure of a single connector call made on behalf of a request.
#[derive(Debug, Error)]
pub(crate) enum StepError {
    #[error("request cancelled")]
    Cancelled,
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

impl StepError {
    /// Reports the failure as an internal error prefixed with `context`.
    pub(crate) fn internal(self, context: impl Display) -> ControllerError {
        match self {
            Self::Cancelled => ControllerError::Cancelled,
            Self::Connector(err) => ControllerError::Internal(format!("{context}: {err}")),
        }
    }
}
