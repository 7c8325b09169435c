//! Error types for the billing cache
//!
//! All modules use `BillingResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for billing cache operations
pub type BillingResult<T> = Result<T, BillingError>;

/// All errors that can occur in the billing cache
#[derive(Error, Debug)]
pub enum BillingError {
    // Collaborator errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a server error
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Check if error is retryable
    ///
    /// Only transient collaborator failures qualify. Reads consult this;
    /// mutations never retry regardless.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }

    /// Check if error is a 4xx-equivalent the caller must fix
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::NotFound(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Network(_) => Some("Check connectivity to the billing backend"),
            Self::Validation { .. } => Some("Correct the submitted fields and try again"),
            Self::ConfigInvalid { .. } => Some("Fix or remove the billing cache config file"),
            _ => None,
        }
    }
}
