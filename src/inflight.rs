//! De-duplication of concurrent create requests.
//!
//! A create request admits itself under its volume name before touching any
//! backend. A second request for the same name and size is told the first is
//! still running; a request for the same name with a different size is an
//! error. Admission is released when the returned [`InFlightPermit`] drops, so
//! every exit path of the admitted request clears its entry.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::debug;

/// Errors raised when admitting a request.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InFlightError {
    /// The name is in flight with a different size.
    #[error("volume [{name}] is already being created with size {in_flight}, not {requested}")]
    SizeMismatch {
        /// Volume name.
        name: String,
        /// Size of the conflicting request.
        requested: u64,
        /// Size recorded for the running request.
        in_flight: u64,
    },
}

/// Outcome of an admission attempt.
#[derive(Debug)]
pub enum Admission {
    /// The caller owns the name until the permit drops.
    Admitted(InFlightPermit),
    /// An identical request is already running.
    InProgress,
}

/// Registry of volume names with create requests in flight.
#[derive(Clone, Debug, Default)]
pub struct InFlightRequests {
    entries: Arc<DashMap<String, u64>>,
}

impl InFlightRequests {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to admit a create request.
    ///
    /// # Errors
    ///
    /// Returns [`InFlightError::SizeMismatch`] when `name` is already in flight
    /// with a different size.
    pub fn try_acquire(&self, name: &str, size_bytes: u64) -> Result<Admission, InFlightError> {
        match self.entries.entry(name.to_owned()) {
            Entry::Occupied(entry) => {
                let in_flight = *entry.get();
                if in_flight == size_bytes {
                    debug!(volume = name, "create already in flight");
                    Ok(Admission::InProgress)
                } else {
                    Err(InFlightError::SizeMismatch {
                        name: name.to_owned(),
                        requested: size_bytes,
                        in_flight,
                    })
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(size_bytes);
                Ok(Admission::Admitted(InFlightPermit {
                    entries: Arc::clone(&self.entries),
                    name: name.to_owned(),
                }))
            }
        }
    }

    /// Reports whether `name` is in flight.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of requests in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reports whether no request is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ownership of an in-flight volume name.
#[derive(Debug)]
pub struct InFlightPermit {
    entries: Arc<DashMap<String, u64>>,
    name: String,
}

impl InFlightPermit {
    /// Volume name held by this permit.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.entries.remove(&self.name);
    }
}
