//! Error types for dependency resolution.
//!
//! Resolution results are shared between every subscriber of a pending value,
//! so all errors here are `Clone`.

use serde_json::Value;
use thiserror::Error;

/// The reason a resolve function gave up.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Rejected: {reason}")]
pub struct Rejection {
    /// Arbitrary payload describing the failure.
    pub reason: Value,
}

impl Rejection {
    /// Create a rejection with the given reason.
    pub fn new(reason: impl Into<Value>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The rejection payload.
    pub fn reason(&self) -> &Value {
        &self.reason
    }
}

/// Errors raised while planning or executing a resolve map.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// The resolve map contains a dependency cycle.
    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Keys along the cycle, first key repeated at the end.
        cycle: Vec<String>,
    },

    /// A declared parameter is neither produced, overridden nor injectable.
    #[error("Unknown dependency '{dependency}' required by '{key}'")]
    UnknownDependency {
        /// The entry that declared the parameter.
        key: String,
        /// The missing parameter.
        dependency: String,
    },

    /// An entry names a service the injector does not provide.
    #[error("Unknown service '{service}' for '{key}'")]
    UnknownService {
        /// The entry.
        key: String,
        /// The service name.
        service: String,
    },

    /// A resolve function rejected.
    #[error(transparent)]
    Rejected(#[from] Rejection),
}

impl ResolveError {
    /// The rejection, if this error came from a resolve function.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

/// Result type alias for resolution.
pub type Result<T> = std::result::Result<T, ResolveError>;
