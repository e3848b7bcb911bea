//! Upstream HTTP client.
//!
//! Wraps a pooled `reqwest` client with:
//! - An explicit connect-timeout / read-timeout pair
//! - The upstream's relaxed certificate policy
//! - A fixed browser-like header set the upstream expects
//! - JSON envelope helpers for the upstream endpoints

use std::time::Duration;

use async_trait::async_trait;
use atmwatch_core::{Credential, Session, Terminal};
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT,
};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use crate::auth::LoginTransport;
use crate::context::FetchSettings;
use crate::error::FetchError;

// ============================================================================
// Constants
// ============================================================================

/// Login endpoint.
const LOGIN_PATH: &str = "login";

/// Logout endpoint.
const LOGOUT_PATH: &str = "logout";

/// Dashboard search endpoint.
const DASHBOARD_SEARCH_PATH: &str = "dashboard-search";

/// Terminal detail endpoint.
const TERMINAL_DETAIL_PATH: &str = "terminal-detail";

/// User agent the upstream's web dashboard sends.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// ============================================================================
// Upstream Client
// ============================================================================

/// HTTP client for the terminal-monitoring upstream.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    inner: Client,
    base_url: Url,
    read_timeout: Duration,
}

impl UpstreamClient {
    /// Creates a client for `base_url` using the timeouts in `settings`.
    pub fn new(base_url: &str, settings: &FetchSettings) -> Result<Self, FetchError> {
        let base_url = normalize_base(base_url)?;
        let headers = browser_headers(&base_url)?;

        let inner = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            inner,
            base_url,
            read_timeout: settings.read_timeout,
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the inner reqwest client for advanced operations.
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))
    }

    fn map_transport(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.read_timeout)
        } else {
            FetchError::from(err)
        }
    }

    /// Sends a JSON request and parses a JSON response.
    ///
    /// Non-2xx responses become [`FetchError::Status`] (or
    /// [`FetchError::TokenExpired`] for 401); non-JSON bodies become
    /// [`FetchError::MalformedResponse`].
    #[instrument(skip(self, body), fields(method = %method, path = %path))]
    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: &Value,
    ) -> Result<Value, FetchError> {
        let url = self.endpoint(path)?;
        debug!("Sending request");

        let response = self
            .inner
            .request(method, url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_transport(e))?;
        debug!(status = %status, bytes = text.len(), "Response received");

        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16(), &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| FetchError::MalformedResponse(format!("{path}: {e}")))
    }

    /// Issues `PUT /dashboard-search` for one status filter.
    pub async fn dashboard_search(
        &self,
        session: &Session,
        status_filter: &str,
    ) -> Result<Value, FetchError> {
        let body = envelope(
            session,
            json!({
                "parameters_list": [
                    { "parameter_name": "issueStateName", "parameter_values": [status_filter] }
                ]
            }),
        );
        self.send_json(Method::PUT, DASHBOARD_SEARCH_PATH, &body).await
    }

    /// Issues `PUT /terminal-detail` for one terminal.
    pub async fn terminal_detail(
        &self,
        session: &Session,
        terminal: &Terminal,
    ) -> Result<Value, FetchError> {
        let body = envelope(session, json!({ "terminal_id": terminal.terminal_id }));
        self.send_json(Method::PUT, TERMINAL_DETAIL_PATH, &body).await
    }
}

#[async_trait]
impl LoginTransport for UpstreamClient {
    async fn login(&self, credential: &Credential) -> Result<Value, FetchError> {
        let body = json!({
            "user_name": credential.username,
            "password": credential.password,
        });
        self.send_json(Method::POST, LOGIN_PATH, &body).await
    }

    async fn logout(&self, session: &Session) -> Result<(), FetchError> {
        let body = envelope(session, json!({}));
        self.send_json(Method::PUT, LOGOUT_PATH, &body).await.map(|_| ())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Wraps a request body in the upstream's `{header, body}` envelope.
pub fn envelope(session: &Session, body: Value) -> Value {
    json!({
        "header": {
            "logged_user": session.username,
            "user_token": session.token,
        },
        "body": body,
    })
}

/// Parses the base URL and makes sure it ends with `/` so endpoint joins
/// append instead of replacing the last path segment.
fn normalize_base(base_url: &str) -> Result<Url, FetchError> {
    let mut url = Url::parse(base_url).map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn browser_headers(base_url: &Url) -> Result<HeaderMap, FetchError> {
    let origin = base_url.origin().ascii_serialization();
    let header = |value: &str| {
        HeaderValue::from_str(value).map_err(|e| FetchError::InvalidRequest(e.to_string()))
    };

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ORIGIN, header(&origin)?);
    headers.insert(REFERER, header(&format!("{origin}/"))?);
    Ok(headers)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use atmwatch_core::CredentialRole;

    #[test]
    fn test_endpoint_join_keeps_base_path() {
        let client =
            UpstreamClient::new("https://atm.example.com/api/v1", &FetchSettings::default())
                .unwrap();
        let url = client.endpoint(LOGIN_PATH).unwrap();
        assert_eq!(url.as_str(), "https://atm.example.com/api/v1/login");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = UpstreamClient::new("not a url", &FetchSettings::default());
        assert!(matches!(result, Err(FetchError::InvalidRequest(_))));
    }

    #[test]
    fn test_browser_headers_origin() {
        let url = Url::parse("https://atm.example.com:8443/api/").unwrap();
        let headers = browser_headers(&url).unwrap();
        assert_eq!(headers[ORIGIN], "https://atm.example.com:8443");
        assert_eq!(headers[REFERER], "https://atm.example.com:8443/");
    }

    #[test]
    fn test_envelope_shape() {
        let session = Session::new("tok", "ops", CredentialRole::Primary);
        let value = envelope(&session, json!({ "terminal_id": "T1" }));
        assert_eq!(value["header"]["user_token"], "tok");
        assert_eq!(value["header"]["logged_user"], "ops");
        assert_eq!(value["body"]["terminal_id"], "T1");
    }

    mod timeouts {
        use super::*;
        use std::time::Duration;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        const BODY: &[u8] = br#"{"ok":true}"#;

        /// Accepts one connection, then answers with `BODY` one byte every
        /// `gap`, or never answers when `gap` is `None`.
        async fn serve(gap: Option<Duration>) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                stream.set_nodelay(true).unwrap();
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;

                let Some(gap) = gap else {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    return;
                };
                let head = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n",
                    BODY.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                for byte in BODY {
                    tokio::time::sleep(gap).await;
                    let _ = stream.write_all(&[*byte]).await;
                    let _ = stream.flush().await;
                }
            });
            format!("http://{addr}/")
        }

        fn client(base: &str, read_timeout: Duration) -> UpstreamClient {
            let mut settings = FetchSettings::default();
            settings.read_timeout = read_timeout;
            UpstreamClient::new(base, &settings).unwrap()
        }

        #[tokio::test]
        async fn test_slow_but_steady_body_is_not_cut_off() {
            // 11 bytes at 100ms each takes longer than the read timeout.
            let base = serve(Some(Duration::from_millis(100))).await;
            let client = client(&base, Duration::from_millis(500));

            let value = client.send_json(Method::PUT, "x", &json!({})).await.unwrap();
            assert_eq!(value["ok"], true);
        }

        #[tokio::test]
        async fn test_stalled_response_times_out() {
            let base = serve(None).await;
            let client = client(&base, Duration::from_millis(200));

            let result = client.send_json(Method::PUT, "x", &json!({})).await;
            assert!(matches!(result, Err(FetchError::Timeout(_))));
        }
    }
}
