//! Error types for state registration and transitions.
//!
//! Two families live here. [`Error`] covers declaration time: registering
//! states, compiling their URLs and planning their resolve maps. These are
//! returned synchronously. [`TransitionError`] is the terminal outcome of a
//! transition and only ever reaches callers through the transition future
//! (and the error event).

use thiserror::Error;
use waypost_resolve::{Rejection, ResolveError};

/// Errors raised while declaring states.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The state name is empty or contains `@`.
    #[error("Invalid state name '{0}'")]
    InvalidName(String),

    /// A state with this name is already registered or queued.
    #[error("State '{0}' is already defined")]
    DuplicateState(String),

    /// A relative state reference could not be followed.
    #[error("Invalid state reference '{reference}': {reason}")]
    InvalidReference {
        /// The reference as written.
        reference: String,
        /// Why it could not be followed.
        reason: String,
    },

    /// URL or parameter compilation failed.
    #[error(transparent)]
    Core(#[from] waypost_core::Error),

    /// A resolve map could not be planned.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Generic configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid-reference error.
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for state declaration.
pub type Result<T> = std::result::Result<T, Error>;

/// How a transition ended, when it did not commit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    /// A newer transition started before this one could commit.
    #[error("Transition superseded")]
    Superseded,

    /// A start listener cancelled the transition.
    #[error("Transition prevented")]
    Prevented,

    /// A not-found listener cancelled the transition.
    #[error("Transition aborted")]
    Aborted,

    /// The target was still missing after a retry.
    #[error("Transition failed")]
    Failed,

    /// The target state does not exist.
    #[error("Could not resolve '{to}' from state '{from}'")]
    NotFound {
        /// The requested target.
        to: String,
        /// The state the transition started from.
        from: String,
    },

    /// Abstract states cannot be entered directly.
    #[error("Cannot transition to abstract state '{0}'")]
    AbstractTarget(String),

    /// The parameters do not satisfy the target's parameter types.
    #[error("Parameter values are not valid for state '{0}'")]
    Validation(String),

    /// The state named by the reload option does not exist.
    #[error("No such reload state '{0}'")]
    ReloadNotFound(String),

    /// A resolve function or hook rejected.
    #[error(transparent)]
    Rejected(Rejection),

    /// A resolve map failed for a reason other than a rejection.
    #[error(transparent)]
    Resolve(ResolveError),

    /// The engine's configuration prevented the transition.
    #[error(transparent)]
    Configuration(Error),
}

impl TransitionError {
    /// Whether a newer transition took over.
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }

    /// Whether a start listener cancelled the transition.
    pub fn is_prevented(&self) -> bool {
        matches!(self, Self::Prevented)
    }

    /// Whether a not-found listener cancelled the transition.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Whether a retried target was still missing.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// The rejection, if a resolve function or hook gave up.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

impl From<ResolveError> for TransitionError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Rejected(r) => Self::Rejected(r),
            other => Self::Resolve(other),
        }
    }
}

impl From<Rejection> for TransitionError {
    fn from(r: Rejection) -> Self {
        Self::Rejected(r)
    }
}

impl From<Error> for TransitionError {
    fn from(err: Error) -> Self {
        Self::Configuration(err)
    }
}

impl From<waypost_core::Error> for TransitionError {
    fn from(err: waypost_core::Error) -> Self {
        Self::Configuration(Error::Core(err))
    }
}
