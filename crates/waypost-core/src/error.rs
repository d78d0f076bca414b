//! Error types for configuration-time operations.
//!
//! Everything in this crate runs while the application declares its
//! parameter types, URL patterns and states. Failures here are programming
//! errors in that declaration: they are returned synchronously to the caller
//! and never retried.

use thiserror::Error;

/// Errors raised while registering types or compiling URL patterns.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Generic configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A parameter type with this name is already registered.
    #[error("A type named '{0}' has already been defined")]
    DuplicateType(String),

    /// No parameter type is registered under this name.
    #[error("Unknown parameter type '{0}'")]
    UnknownType(String),

    /// A parameter id was declared twice in the same parameter-set chain.
    #[error("Duplicate parameter name '{id}' in pattern '{pattern}'")]
    DuplicateParam {
        /// The offending parameter id.
        id: String,
        /// The pattern (or state) that declared it.
        pattern: String,
    },

    /// A placeholder name does not follow the `word(-word)*([])?` shape.
    #[error("Invalid parameter name '{id}' in pattern '{pattern}'")]
    InvalidParamName {
        /// The offending parameter id.
        id: String,
        /// The pattern that declared it.
        pattern: String,
    },

    /// The compiled regex does not have one capture group per path parameter.
    #[error("Unbalanced capture group in route '{pattern}': expected {expected}, found {found}")]
    UnbalancedCaptures {
        /// The source pattern.
        pattern: String,
        /// Number of path parameters.
        expected: usize,
        /// Number of capture groups in the compiled regex.
        found: usize,
    },

    /// An injectable default was evaluated before an injector was installed.
    #[error("Injectable default for parameter '{0}' cannot be evaluated at configuration time")]
    InjectorUnavailable(String),

    /// A default value does not satisfy its parameter type.
    #[error("Default value ({value}) for parameter '{id}' is not an instance of type '{type_name}'")]
    InvalidDefault {
        /// The parameter id.
        id: String,
        /// The type the default should satisfy.
        type_name: String,
        /// The offending value, JSON encoded.
        value: String,
    },

    /// A regex fragment failed to compile.
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a duplicate-parameter error.
    pub fn duplicate_param(id: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::DuplicateParam {
            id: id.into(),
            pattern: pattern.into(),
        }
    }
}

/// Result type alias using Waypost's core Error type.
pub type Result<T> = std::result::Result<T, Error>;
