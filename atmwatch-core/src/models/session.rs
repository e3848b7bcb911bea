//! Credential and session types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Credential
// ============================================================================

/// A username/password pair for the upstream login endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Login username.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl Credential {
    /// Creates a new credential.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns true if either field is empty.
    pub fn is_blank(&self) -> bool {
        self.username.trim().is_empty() || self.password.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Which configured credential produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialRole {
    /// The primary credential.
    Primary,
    /// The fallback credential.
    Fallback,
    /// Synthesized offline session.
    Demo,
}

impl fmt::Display for CredentialRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Demo => "demo",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Session
// ============================================================================

/// An authenticated upstream session.
///
/// Owned by exactly one pipeline run. Read-only once obtained.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    /// Access token.
    pub token: String,
    /// Username the token was issued to.
    pub username: String,
    /// Which credential produced the session.
    pub role: CredentialRole,
    /// When the session was established.
    pub authenticated_at: DateTime<Utc>,
}

impl Session {
    /// Creates a new session.
    pub fn new(token: impl Into<String>, username: impl Into<String>, role: CredentialRole) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
            role,
            authenticated_at: Utc::now(),
        }
    }

    /// Returns true if the session was synthesized offline.
    pub fn is_demo(&self) -> bool {
        self.role == CredentialRole::Demo
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("role", &self.role)
            .field("authenticated_at", &self.authenticated_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let cred = Credential::new("ops", "hunter2");
        let session = Session::new("tok-123", "ops", CredentialRole::Primary);
        assert!(!format!("{cred:?}").contains("hunter2"));
        assert!(!format!("{session:?}").contains("tok-123"));
    }

    #[test]
    fn test_blank_credential() {
        assert!(Credential::new("", "x").is_blank());
        assert!(Credential::new("ops", "").is_blank());
        assert!(!Credential::new("ops", "x").is_blank());
    }
}
