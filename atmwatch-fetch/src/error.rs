//! Fetch error types.

use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Main Fetch Error
// ============================================================================

/// Error type for upstream operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Timeout, connection failure, or other transport-level error.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// Request timed out.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream answered with a non-success status.
    #[error("Upstream returned HTTP {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Short body excerpt or reason phrase.
        message: String,
    },

    /// The upstream rejected the session token.
    #[error("Session token expired or rejected")]
    TokenExpired,

    /// Non-JSON or schema-violating payload.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Invalid URL or request construction failure.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The fetch infrastructure for a batch could not run.
    #[error("Batch {batch} failed: {reason}")]
    BatchFailed {
        /// Batch number.
        batch: u32,
        /// Why the batch could not run.
        reason: String,
    },

    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// No batch succeeded.
    #[error("Run failed: {0}")]
    RunFailed(String),

    /// Persistence collaborator failed.
    #[error("Core error: {0}")]
    Core(#[from] atmwatch_core::CoreError),
}

impl FetchError {
    /// Returns true if the error is transient and the request may be retried.
    ///
    /// Timeouts, connection errors, 5xx and 429 are retryable. Other 4xx,
    /// malformed payloads and token expiry are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientNetwork(_) | Self::Timeout(_) => true,
            Self::Status { code, .. } => *code == 429 || (500..=599).contains(code),
            _ => false,
        }
    }

    /// Builds an error from an HTTP status code and body excerpt.
    pub fn from_status(code: u16, body: &str) -> Self {
        if code == 401 {
            return Self::TokenExpired;
        }
        let message: String = body.chars().take(200).collect();
        Self::Status { code, message }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::MalformedResponse(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_builder() {
            return Self::InvalidRequest(err.to_string());
        }
        Self::TransientNetwork(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(err.to_string())
    }
}

// ============================================================================
// Auth Error
// ============================================================================

/// Authentication-specific error type.
#[derive(Debug, Error)]
pub enum AuthError {
    /// One credential attempt failed.
    #[error("Login as {username} failed: {reason}")]
    AttemptFailed {
        /// Username tried.
        username: String,
        /// Why it failed.
        reason: String,
    },

    /// No token field could be located in the login response.
    #[error("No token in login response")]
    TokenNotFound,

    /// Both primary and fallback credentials were rejected.
    #[error("Authentication failed for all credentials: {0}")]
    AuthenticationFailed(String),
}

// ============================================================================
// Tests
// ============================================================================
