//! Error types for the cloud disk client.

use thiserror::Error;

/// Errors raised by [`super::CloudDisks`] implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// The referenced resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Resource description, e.g. `disk zone-a/d1`.
        resource: String,
    },
    /// A resource with the same name already exists.
    #[error("{resource} already exists")]
    AlreadyExists {
        /// Resource description.
        resource: String,
    },
    /// The resource is used by another resource and cannot be changed.
    #[error("{resource} is in use by another resource: {message}")]
    InUse {
        /// Resource description.
        resource: String,
        /// Message returned by the provider.
        message: String,
    },
    /// An asynchronous operation finished with an error.
    #[error("operation {operation} failed: {message}")]
    OperationFailed {
        /// Operation name.
        operation: String,
        /// Error details reported by the provider.
        message: String,
    },
    /// A wait loop exceeded its deadline.
    #[error("timeout waiting for {action} on {resource}")]
    Timeout {
        /// What was being waited for.
        action: String,
        /// Resource description.
        resource: String,
    },
    /// Credentials could not be obtained.
    #[error("authentication failed: {message}")]
    Auth {
        /// Underlying error.
        message: String,
    },
    /// Any other provider or transport failure.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider or HTTP client.
        message: String,
    },
}

impl CloudError {
    /// Whether the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the error reports a name collision.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Whether the error reports a resource in use.
    #[must_use]
    pub const fn is_in_use(&self) -> bool {
        matches!(self, Self::InUse { .. })
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(value: reqwest::Error) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}
