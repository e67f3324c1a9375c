//! Error types for the multinet pipeline
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for multinet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the multinet pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Measurement source errors (one source, recoverable at the run level)
    #[error("Measurement source error: {0}")]
    Source(String),

    /// No source produced a single measurement
    #[error("No measurements available from any source")]
    NoMeasurements,

    /// Record store errors
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// Result artifact publication errors
    #[error("Artifact store error: {0}")]
    ArtifactStore(String),

    /// Run state persistence errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reconciliation aborted on the first failed record-set update
    #[error("Reconciliation of {key} failed after {updated} successful update(s): {source}")]
    Reconcile {
        /// Number of record sets replaced before the failure
        updated: usize,
        /// Line key whose update failed (e.g. "cu-v4")
        key: String,
        /// The record store error
        #[source]
        source: Box<Error>,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors (from adapters)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a measurement source error
    pub fn measurement_source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create a record store error
    pub fn record_store(msg: impl Into<String>) -> Self {
        Self::RecordStore(msg.into())
    }

    /// Create an artifact store error
    pub fn artifact_store(msg: impl Into<String>) -> Self {
        Self::ArtifactStore(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Number of record sets updated before a reconciliation failure
    ///
    /// Returns `None` for every error that is not [`Error::Reconcile`].
    pub fn updated_before_failure(&self) -> Option<usize> {
        match self {
            Self::Reconcile { updated, .. } => Some(*updated),
            _ => None,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
