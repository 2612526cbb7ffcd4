use std::sync::Arc;

use crate::LifecycleError;

/// Result type used throughout the SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the SDK.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The secret key does not look like a server secret key.
    #[error("invalid secret key, expected a key starting with `secret-`")]
    InvalidSecretKey,

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The operation is not allowed in the current lifecycle state.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The request was unauthorized, possibly due to an invalid secret key.
    #[error("unauthorized, secret key is likely invalid")]
    Unauthorized,

    /// The server could not evaluate the gate or config, or returned a malformed response.
    #[error("remote evaluation failed: {0}")]
    RemoteEvaluation(String),

    /// Failure delivering exposures or events. Never returned from evaluation methods.
    #[error("event delivery failed: {0}")]
    Telemetry(String),

    /// Indicates that the polling task panicked. This should normally never happen.
    #[error("polling task panicked")]
    PollerPanicked,

    /// A call made through an `_async` method panicked.
    #[error("background task panicked")]
    TaskPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl Error {
    /// Returns `true` if the client was used before initialization or after shutdown.
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(self, Error::Lifecycle(_))
    }

    /// Returns `true` if the error is caused by invalid client configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Error::InvalidSecretKey | Error::InvalidBaseUrl(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
