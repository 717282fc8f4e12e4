//! Error types for Agentbox.

use thiserror::Error;

/// Result type alias using Agentbox's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Agentbox.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // =========================================================================
    // Security Errors
    // =========================================================================
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a provisioning error.
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    /// Create a container runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a security violation error.
    pub fn security(msg: impl Into<String>) -> Self {
        Self::SecurityViolation(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
