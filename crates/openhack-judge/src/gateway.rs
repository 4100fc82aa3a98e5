// API gateway seam: the operations the judging session consumes, and an
// HTTP implementation of them on top of reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::ApiError;
use crate::model::{
    FlagMap, JudgeMe, Judgment, JudgmentRequest, RotationSignal, Team, UpgradeRequest,
    UpgradeResponse,
};

/// Judge-facing endpoints of the judging API.
#[async_trait]
pub trait JudgeApi: Send + Sync {
    async fn me(&self) -> Result<JudgeMe, ApiError>;
    async fn current_team(&self) -> Result<Team, ApiError>;
    async fn previous_team(&self) -> Result<RotationSignal, ApiError>;
    /// Advance the rotation. Fails with status 410 once it is exhausted.
    async fn next_team(&self) -> Result<RotationSignal, ApiError>;
    async fn judgment(&self, request: &JudgmentRequest) -> Result<Judgment, ApiError>;
    /// Exchange a short-lived QR token for a session token. Fails with
    /// status 401 for invalid or expired tokens.
    async fn upgrade(&self, request: &UpgradeRequest) -> Result<UpgradeResponse, ApiError>;
}

#[async_trait]
pub trait FlagsApi: Send + Sync {
    async fn fetch_flags(&self) -> Result<FlagMap, ApiError>;
}

// ---------------------------------------------------------------------------
// HttpGateway
// ---------------------------------------------------------------------------

/// reqwest-backed gateway. Reads the bearer token from the credential store
/// on every request so a token saved by `upgrade` is picked up immediately.
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
    credentials: CredentialStore,
}

impl HttpGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: CredentialStore,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn from_config(config: &Config, credentials: CredentialStore) -> Result<Self, ApiError> {
        Self::new(
            config.api.base_url.clone(),
            Duration::from_secs(config.api.request_timeout_secs),
            credentials,
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.http.request(method, url);
        match self.credentials.load() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = send(self.request(Method::GET, path), path).await?;
        decode(response).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let mut builder = self.request(Method::POST, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = send(builder, path).await?;
        decode(response).await
    }
}

#[async_trait]
impl JudgeApi for HttpGateway {
    async fn me(&self) -> Result<JudgeMe, ApiError> {
        self.get("/judge/me").await
    }

    async fn current_team(&self) -> Result<Team, ApiError> {
        self.get("/judge/current-team").await
    }

    async fn previous_team(&self) -> Result<RotationSignal, ApiError> {
        let value: Value = self.get("/judge/previous-team").await?;
        RotationSignal::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn next_team(&self) -> Result<RotationSignal, ApiError> {
        let value: Value = self.post::<(), _>("/judge/next-team", None).await?;
        RotationSignal::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn judgment(&self, request: &JudgmentRequest) -> Result<Judgment, ApiError> {
        self.post("/judge/judgment", Some(request)).await
    }

    async fn upgrade(&self, request: &UpgradeRequest) -> Result<UpgradeResponse, ApiError> {
        self.post("/judge/upgrade", Some(request)).await
    }
}

#[async_trait]
impl FlagsApi for HttpGateway {
    async fn fetch_flags(&self) -> Result<FlagMap, ApiError> {
        self.get("/accounts/flags").await
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

async fn send(builder: RequestBuilder, path: &str) -> Result<Response, ApiError> {
    let response = builder
        .send()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    debug!(path, status = response.status().as_u16(), "API response");

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message: error_message(status, &body),
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    // Bodiless success (e.g. 204) decodes as JSON null.
    let slice: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &bytes
    };
    serde_json::from_slice(slice).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Human-readable message for an error response: the body's `message` or
/// `error` field, else the canonical reason phrase.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    let from_body = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        ["message", "error"]
            .iter()
            .find_map(|key| v.get(key).and_then(Value::as_str).map(str::to_string))
    });
    from_body.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use crate::storage::MemoryStore;

    /// Serve one canned HTTP response and hand back the raw request text.
    async fn serve_once(response: String) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (req_tx, req_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let _ = req_tx.send(request);
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        });

        (format!("http://{addr}"), req_rx)
    }

    /// Read headers plus a `Content-Length` body, whichever way the client
    /// splits its writes.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).to_string();
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= header_end + 4 + content_length {
                break;
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }

    fn http_response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn gateway(base_url: &str, token: Option<&str>) -> HttpGateway {
        let credentials = CredentialStore::new(Arc::new(MemoryStore::new()));
        if let Some(token) = token {
            credentials.save(token);
        }
        HttpGateway::new(base_url, Duration::from_secs(5), credentials).unwrap()
    }

    #[test]
    fn error_message_prefers_body_fields() {
        assert_eq!(
            error_message(StatusCode::GONE, r#"{"message":"judging finished"}"#),
            "judging finished"
        );
        assert_eq!(
            error_message(StatusCode::UNAUTHORIZED, r#"{"error":"token expired"}"#),
            "token expired"
        );
        assert_eq!(error_message(StatusCode::UNAUTHORIZED, "<html>"), "Unauthorized");
    }

    #[tokio::test]
    async fn next_team_assigned_sends_bearer_token() {
        let body = r#"{"id":"T1","name":"Rustaceans","table":"4"}"#;
        let (url, req_rx) = serve_once(http_response("200 OK", body)).await;

        let signal = gateway(&url, Some("bearer-1")).next_team().await.unwrap();
        assert_eq!(signal.team().map(|t| t.id.as_str()), Some("T1"));

        let request = req_rx.await.unwrap();
        assert!(request.starts_with("POST /judge/next-team "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer bearer-1"));
    }

    #[tokio::test]
    async fn next_team_resting_is_classified() {
        let body = r#"{"message":"resting"}"#;
        let (url, _req) = serve_once(http_response("202 Accepted", body)).await;

        let signal = gateway(&url, Some("t")).next_team().await.unwrap();
        assert_eq!(signal, RotationSignal::Resting("resting".into()));
    }

    #[tokio::test]
    async fn next_team_gone_is_judging_finished() {
        let body = r#"{"message":"judging finished"}"#;
        let (url, _req) = serve_once(http_response("410 Gone", body)).await;

        let err = gateway(&url, Some("t")).next_team().await.unwrap_err();
        assert!(err.is_judging_finished());
        assert_eq!(
            err,
            ApiError::Status {
                status: 410,
                message: "judging finished".into()
            }
        );
    }

    #[tokio::test]
    async fn upgrade_posts_token_without_auth_header() {
        let body = r#"{"token":"long","judge":{"id":"j1","name":"Ada","pair":"p","currentTeam":-1,"nextTeamTime":""}}"#;
        let (url, req_rx) = serve_once(http_response("200 OK", body)).await;

        let response = gateway(&url, None)
            .upgrade(&UpgradeRequest {
                token: "qr-123".into(),
            })
            .await
            .unwrap();
        assert_eq!(response.token, "long");
        assert_eq!(response.judge.current_team, -1);

        let request = req_rx.await.unwrap();
        assert!(request.starts_with("POST /judge/upgrade "));
        assert!(!request.to_ascii_lowercase().contains("authorization:"));
        assert!(request.contains(r#""token":"qr-123""#));
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let (url, _req) = serve_once(http_response("200 OK", "{oops")).await;
        let err = gateway(&url, Some("t")).me().await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = gateway(&format!("http://{addr}"), None)
            .fetch_flags()
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert_eq!(err.status(), None);
    }
}
