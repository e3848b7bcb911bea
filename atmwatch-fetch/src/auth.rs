//! Session lifecycle against the upstream.
//!
//! Login tries the primary credential, then the fallback, using the same
//! procedure for both. A login succeeds only when a non-empty token can be
//! pulled out of the response by one of the [`TOKEN_FIELDS`] strategies.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use atmwatch_core::{Credential, CredentialRole, Session};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AuthError, FetchError};
use crate::retry::RetryPolicy;

// ============================================================================
// Login Transport
// ============================================================================

/// Network side of login and logout.
#[async_trait]
pub trait LoginTransport: Send + Sync {
    /// Submits a credential and returns the parsed JSON response.
    async fn login(&self, credential: &Credential) -> Result<Value, FetchError>;

    /// Invalidates a session token.
    async fn logout(&self, session: &Session) -> Result<(), FetchError>;
}

// ============================================================================
// Token Extraction
// ============================================================================

/// Where a token may live in a login response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenField {
    /// A top-level string key.
    TopLevel(&'static str),
    /// A string key inside a top-level object.
    Nested(&'static str, &'static str),
}

impl TokenField {
    /// Returns the token at this location, if it is a non-empty string.
    pub fn extract(&self, response: &Value) -> Option<String> {
        let value = match self {
            Self::TopLevel(key) => response.get(key),
            Self::Nested(outer, inner) => response.get(outer).and_then(|v| v.get(inner)),
        }?;

        value
            .as_str()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    }
}

/// Token locations, tried in order.
pub const TOKEN_FIELDS: &[TokenField] = &[
    TokenField::TopLevel("token"),
    TokenField::TopLevel("user_token"),
    TokenField::Nested("header", "user_token"),
];

/// Returns the first token found by [`TOKEN_FIELDS`].
pub fn extract_token(response: &Value) -> Option<String> {
    TOKEN_FIELDS.iter().find_map(|field| field.extract(response))
}

// ============================================================================
// Login Attempts
// ============================================================================

/// Record of one credential attempt.
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    /// Which credential was tried.
    pub role: CredentialRole,
    /// Username tried.
    pub username: String,
    /// Whether it produced a session.
    pub success: bool,
    /// Error if it failed.
    pub error: Option<String>,
    /// Retries spent on this credential.
    pub retries: u32,
    /// How long the attempt took.
    pub duration: Duration,
}

/// Outcome of [`Authenticator::authenticate_with_attempts`].
#[derive(Debug)]
pub struct AuthOutcome {
    /// Session, or the final error.
    pub result: Result<Session, AuthError>,
    /// Attempts made, in order.
    pub attempts: Vec<LoginAttempt>,
}

impl AuthOutcome {
    /// Returns the failed attempts.
    pub fn failed_attempts(&self) -> impl Iterator<Item = &LoginAttempt> {
        self.attempts.iter().filter(|a| !a.success)
    }

    /// Returns the retries spent across all attempts.
    pub fn retries(&self) -> u64 {
        self.attempts.iter().map(|a| u64::from(a.retries)).sum()
    }
}

// ============================================================================
// Authenticator
// ============================================================================

/// Obtains, refreshes and invalidates upstream sessions.
pub struct Authenticator {
    transport: Option<Arc<dyn LoginTransport>>,
    primary: Credential,
    fallback: Credential,
    retry: RetryPolicy,
}

impl Authenticator {
    /// Creates a live authenticator.
    pub fn new(
        transport: Arc<dyn LoginTransport>,
        primary: Credential,
        fallback: Credential,
    ) -> Self {
        Self {
            transport: Some(transport),
            primary,
            fallback,
            retry: RetryPolicy::default(),
        }
    }

    /// Creates an authenticator that never touches the network.
    pub fn demo() -> Self {
        Self {
            transport: None,
            primary: Credential::new("demo", ""),
            fallback: Credential::new("demo", ""),
            retry: RetryPolicy::no_retry(),
        }
    }

    /// Sets the retry policy used for each login and logout request.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns true if this authenticator synthesizes sessions.
    pub fn is_demo(&self) -> bool {
        self.transport.is_none()
    }

    /// Authenticates with the primary credential, then the fallback.
    pub async fn authenticate(&self) -> Result<Session, AuthError> {
        self.authenticate_with_attempts().await.result
    }

    /// Authenticates and returns every attempt made.
    #[instrument(skip(self))]
    pub async fn authenticate_with_attempts(&self) -> AuthOutcome {
        let Some(transport) = self.transport.as_deref() else {
            info!("Demo mode, synthesizing session");
            let token = format!("demo-{}", Uuid::new_v4().simple());
            return AuthOutcome {
                result: Ok(Session::new(token, "demo", CredentialRole::Demo)),
                attempts: Vec::new(),
            };
        };

        let mut attempts = Vec::with_capacity(2);
        let candidates = [
            (CredentialRole::Primary, &self.primary),
            (CredentialRole::Fallback, &self.fallback),
        ];

        for (role, credential) in candidates {
            let start = Instant::now();
            let (result, retries) = self.attempt(transport, role, credential).await;
            let duration = start.elapsed();

            match result {
                Ok(session) => {
                    info!(role = %role, username = %credential.username, "Authenticated");
                    attempts.push(LoginAttempt {
                        role,
                        username: credential.username.clone(),
                        success: true,
                        error: None,
                        retries,
                        duration,
                    });
                    return AuthOutcome {
                        result: Ok(session),
                        attempts,
                    };
                }
                Err(error) => {
                    warn!(
                        role = %role,
                        username = %credential.username,
                        error = %error,
                        "Login attempt failed"
                    );
                    attempts.push(LoginAttempt {
                        role,
                        username: credential.username.clone(),
                        success: false,
                        error: Some(error.to_string()),
                        retries,
                        duration,
                    });
                }
            }
        }

        let reasons: Vec<String> = attempts
            .iter()
            .filter_map(|a| a.error.as_ref().map(|e| format!("{}: {e}", a.role)))
            .collect();

        AuthOutcome {
            result: Err(AuthError::AuthenticationFailed(reasons.join("; "))),
            attempts,
        }
    }

    /// One credential's login. Also returns the retries it took.
    async fn attempt(
        &self,
        transport: &dyn LoginTransport,
        role: CredentialRole,
        credential: &Credential,
    ) -> (Result<Session, AuthError>, u32) {
        if credential.is_blank() {
            let error = AuthError::AttemptFailed {
                username: credential.username.clone(),
                reason: "credential not configured".to_string(),
            };
            return (Err(error), 0);
        }

        debug!(role = %role, "Submitting login");
        let outcome = self.retry.execute(move || transport.login(credential)).await;
        let retries = outcome.retries();

        let result = outcome
            .result
            .map_err(|e| AuthError::AttemptFailed {
                username: credential.username.clone(),
                reason: e.to_string(),
            })
            .and_then(|response| extract_token(&response).ok_or(AuthError::TokenNotFound))
            .map(|token| Session::new(token, credential.username.clone(), role));

        (result, retries)
    }

    /// Obtains a fresh session. The upstream has no refresh grant, so this
    /// is a full login.
    pub async fn refresh_token(&self) -> Result<Session, AuthError> {
        self.refresh_with_attempts().await.result
    }

    /// Like [`Self::refresh_token`], returning every attempt made.
    pub async fn refresh_with_attempts(&self) -> AuthOutcome {
        info!("Refreshing session token");
        self.authenticate_with_attempts().await
    }

    /// Invalidates `session` and returns the retries it took.
    ///
    /// Best-effort: failures are logged, never returned.
    #[instrument(skip_all)]
    pub async fn logout(&self, session: Option<&Session>) -> u32 {
        let Some(session) = session else {
            debug!("No active session, nothing to log out");
            return 0;
        };

        let Some(transport) = self.transport.as_deref() else {
            debug!("Demo session, skipping logout request");
            return 0;
        };
        if session.is_demo() {
            return 0;
        }

        let outcome = self.retry.execute(move || transport.logout(session)).await;
        match &outcome.result {
            Ok(()) => info!(username = %session.username, "Logged out"),
            Err(error) => warn!(error = %error, "Logout failed, ignoring"),
        }
        outcome.retries()
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("demo", &self.is_demo())
            .field("primary", &self.primary)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Accepts exactly one password per username.
    struct ScriptedTransport {
        accepted: Vec<(&'static str, &'static str, Value)>,
        logins: Mutex<Vec<String>>,
        logouts: AtomicU32,
        fail_logout: bool,
    }

    impl ScriptedTransport {
        fn new(accepted: Vec<(&'static str, &'static str, Value)>) -> Self {
            Self {
                accepted,
                logins: Mutex::new(Vec::new()),
                logouts: AtomicU32::new(0),
                fail_logout: false,
            }
        }
    }

    #[async_trait]
    impl LoginTransport for ScriptedTransport {
        async fn login(&self, credential: &Credential) -> Result<Value, FetchError> {
            self.logins.lock().unwrap().push(credential.username.clone());
            self.accepted
                .iter()
                .find(|(u, p, _)| *u == credential.username && *p == credential.password)
                .map(|(_, _, response)| response.clone())
                .ok_or_else(|| FetchError::from_status(403, "bad credentials"))
        }

        async fn logout(&self, _session: &Session) -> Result<(), FetchError> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            if self.fail_logout {
                Err(FetchError::from_status(400, "no session"))
            } else {
                Ok(())
            }
        }
    }

    fn authenticator(transport: Arc<ScriptedTransport>) -> Authenticator {
        Authenticator::new(
            transport,
            Credential::new("ops", "wrong"),
            Credential::new("backup", "secret"),
        )
        .with_retry(RetryPolicy::no_retry())
    }

    #[test]
    fn test_token_field_order() {
        let both = json!({ "token": "a", "user_token": "b" });
        assert_eq!(extract_token(&both).as_deref(), Some("a"));

        let user = json!({ "user_token": "b" });
        assert_eq!(extract_token(&user).as_deref(), Some("b"));

        let nested = json!({ "header": { "user_token": "c" } });
        assert_eq!(extract_token(&nested).as_deref(), Some("c"));
    }

    #[test]
    fn test_token_field_rejects_empty_and_non_string() {
        assert_eq!(extract_token(&json!({ "token": "" })), None);
        assert_eq!(extract_token(&json!({ "token": 42 })), None);
        assert_eq!(
            extract_token(&json!({ "token": "  ", "header": { "user_token": "x" } })).as_deref(),
            Some("x")
        );
        assert_eq!(extract_token(&json!([1, 2])), None);
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_rejected() {
        let transport = Arc::new(ScriptedTransport::new(vec![(
            "backup",
            "secret",
            json!({ "user_token": "tok-1" }),
        )]));
        let auth = authenticator(transport.clone());

        let outcome = auth.authenticate_with_attempts().await;
        let session = outcome.result.as_ref().unwrap();

        assert_eq!(session.username, "backup");
        assert_eq!(session.role, CredentialRole::Fallback);
        assert_eq!(session.token, "tok-1");
        assert_eq!(outcome.attempts.len(), 2);
        assert!(!outcome.attempts[0].success);
        assert_eq!(outcome.attempts[0].username, "ops");
        assert_eq!(outcome.failed_attempts().count(), 1);
        assert_eq!(*transport.logins.lock().unwrap(), vec!["ops", "backup"]);
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let transport = Arc::new(ScriptedTransport::new(vec![(
            "ops",
            "right",
            json!({ "token": "tok-p" }),
        )]));
        let auth = Authenticator::new(
            transport.clone(),
            Credential::new("ops", "right"),
            Credential::new("backup", "secret"),
        );

        let session = auth.authenticate().await.unwrap();
        assert_eq!(session.role, CredentialRole::Primary);
        assert_eq!(transport.logins.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_token_falls_through() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ("ops", "wrong", json!({ "status": "ok" })),
            ("backup", "secret", json!({ "header": { "user_token": "tok-2" } })),
        ]));
        let session = authenticator(transport).authenticate().await.unwrap();
        assert_eq!(session.token, "tok-2");
    }

    #[tokio::test]
    async fn test_both_rejected() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let result = authenticator(transport).authenticate().await;
        match result {
            Err(AuthError::AuthenticationFailed(reason)) => {
                assert!(reason.contains("primary"));
                assert!(reason.contains("fallback"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_demo_session() {
        let auth = Authenticator::demo();
        let session = auth.authenticate().await.unwrap();
        assert!(session.is_demo());
        assert!(session.token.starts_with("demo-"));
    }

    #[tokio::test]
    async fn test_refresh_is_fresh_login() {
        let transport = Arc::new(ScriptedTransport::new(vec![(
            "backup",
            "secret",
            json!({ "token": "tok" }),
        )]));
        let auth = authenticator(transport.clone());
        auth.authenticate().await.unwrap();
        auth.refresh_token().await.unwrap();
        assert_eq!(transport.logins.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_logout_is_best_effort() {
        let mut transport = ScriptedTransport::new(Vec::new());
        transport.fail_logout = true;
        let transport = Arc::new(transport);
        let auth = authenticator(transport.clone());

        auth.logout(None).await;
        assert_eq!(transport.logouts.load(Ordering::SeqCst), 0);

        let session = Session::new("tok", "backup", CredentialRole::Fallback);
        auth.logout(Some(&session)).await;
        assert_eq!(transport.logouts.load(Ordering::SeqCst), 1);
    }

    /// Fails with a transient error a fixed number of times, then accepts.
    struct UnsteadyTransport {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl LoginTransport for UnsteadyTransport {
        async fn login(&self, _credential: &Credential) -> Result<Value, FetchError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(FetchError::TransientNetwork("connection reset".into()));
            }
            Ok(json!({ "token": "tok" }))
        }

        async fn logout(&self, _session: &Session) -> Result<(), FetchError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_login_retries_are_counted() {
        let transport = Arc::new(UnsteadyTransport {
            failures_left: AtomicU32::new(2),
        });
        let auth = Authenticator::new(
            transport,
            Credential::new("ops", "right"),
            Credential::new("backup", "secret"),
        )
        .with_retry(RetryPolicy::new(3).with_base_delay(Duration::from_millis(1)));

        let outcome = auth.authenticate_with_attempts().await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].retries, 2);
        assert_eq!(outcome.retries(), 2);
    }
}
