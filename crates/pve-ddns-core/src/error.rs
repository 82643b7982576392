//! Error types for the pve-ddns system
//!
//! Every adapter boundary reports failure as a value of this type; nothing
//! in the core panics on collaborator failure. The reconciliation loop
//! decides per call site whether an error is transient (skip, retry next
//! tick), input-validation (permanent for the tick) or fatal.

use thiserror::Error;

/// Result type alias for pve-ddns operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the pve-ddns system
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// DNS provider-specific error
    #[error("DNS provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Virtualization platform API errors
    #[error("Platform API error: {0}")]
    Platform(String),

    /// Public IP lookup errors
    #[error("Public IP lookup error: {0}")]
    PublicIp(String),

    /// Container runtime errors
    #[error("Container runtime error: {0}")]
    Container(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Malformed or unusable address (input-validation class: never retried
    /// within a tick)
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// HTTP client errors (from provider/platform APIs)
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors (subprocess, filesystem)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a platform API error
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Create a public IP lookup error
    pub fn public_ip(msg: impl Into<String>) -> Self {
        Self::PublicIp(msg.into())
    }

    /// Create a container runtime error
    pub fn container(msg: impl Into<String>) -> Self {
        Self::Container(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an invalid address error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
