//! Error types for the Tollgate crate.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// Rejecting a request for exceeding its limit is not an error; it is
/// answered with a 429 response by the middleware.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limit with a zero request count or zero-length window
    #[error("Invalid rate limit: {0}")]
    InvalidLimit(String),

    /// The reclaim scheduler was started outside a tokio runtime
    #[error("No tokio runtime available to run the reclaim scheduler")]
    NoRuntime,

    /// Errors raised while assembling layered configuration
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by a custom key extractor.
///
/// The limiter never propagates this: it logs it and falls back to the
/// default fingerprint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The request does not carry what the extractor needs
    #[error("missing key material: {0}")]
    Missing(String),

    /// The extractor produced something unusable as a key
    #[error("invalid key: {0}")]
    Invalid(String),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
