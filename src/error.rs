//! Protocol-facing error type.
//!
//! Every service operation returns [`CsiError`], whose variants are the
//! status categories the orchestrator understands. Component errors
//! (codec, capacity, topology, cloud, mount) are converted into a
//! `CsiError` at the service boundary, where the operation decides which
//! category applies.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status category attached to a failed operation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// Missing or malformed caller input.
    InvalidArgument,
    /// Another operation on the same volume is in flight.
    Aborted,
    /// A cloud resource exists but is incompatible with the request.
    AlreadyExists,
    /// A referenced resource does not exist.
    NotFound,
    /// The resource is in use and cannot be changed as requested.
    FailedPrecondition,
    /// Unexpected failure from the cloud or the local mount layer.
    Internal,
    /// The operation is intentionally unsupported.
    Unimplemented,
}

/// Unified error type for driver operations.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum CsiError {
    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An operation for the same volume identity is already running.
    #[error("aborted: {0}")]
    Aborted(String),
    /// The resource exists with incompatible properties.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The referenced resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The resource is in a state that prevents the operation.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
    /// The operation is not implemented by this driver.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
}

impl CsiError {
    /// Returns the status category of this error.
    #[must_use]
    pub const fn code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::InvalidArgument,
            Self::Aborted(_) => StatusCode::Aborted,
            Self::AlreadyExists(_) => StatusCode::AlreadyExists,
            Self::NotFound(_) => StatusCode::NotFound,
            Self::FailedPrecondition(_) => StatusCode::FailedPrecondition,
            Self::Internal(_) => StatusCode::Internal,
            Self::Unimplemented(_) => StatusCode::Unimplemented,
        }
    }

    /// Returns the human-readable message without the category prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument(msg)
            | Self::Aborted(msg)
            | Self::AlreadyExists(msg)
            | Self::NotFound(msg)
            | Self::FailedPrecondition(msg)
            | Self::Internal(msg)
            | Self::Unimplemented(msg) => msg,
        }
    }

    /// Create a [`CsiError::InvalidArgument`] from anything that implements
    /// [`Display`].
    pub fn invalid<E: Display>(e: E) -> Self {
        Self::InvalidArgument(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`Display`].
    pub fn internal<E: Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Shorthand for a missing required request field.
    pub fn missing(operation: &str, field: &str) -> Self {
        Self::InvalidArgument(format!("{operation} {field} must be provided"))
    }
}
