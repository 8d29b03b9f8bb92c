use std::fmt;

use async_trait::async_trait;
use reqwest::header;
use serde_json::Value;

use crate::{Method, NotebookError, RequestDescriptor, Result};

/// Successful response from the remote data service.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportResponse {
    /// HTTP status code (always 2xx).
    pub status: u16,
    /// Decoded JSON body; `Null` for empty bodies, `String` for non-JSON text.
    pub body: Value,
}

/// Sends one request attempt to the remote service.
///
/// Implementations report non-success statuses as [`NotebookError::Http`]
/// so the classifier can see the status code. Timeouts and retries are
/// applied by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse>;
}

/// [`Transport`] over HTTPS using `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    authorization: Option<String>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl HttpTransport {
    /// Creates an unauthenticated transport rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            authorization: None,
        }
    }

    /// Sends `authorization` verbatim as the `Authorization` header.
    pub fn with_raw_auth(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    /// Sends a bearer token, adding the `Bearer ` prefix when missing.
    pub fn with_bearer(self, token: impl AsRef<str>) -> Self {
        let authorization = bearer_header_value(token.as_ref());
        self.with_raw_auth(authorization)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse> {
        let method = match request.method() {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .http
            .request(method, self.url_for(request.endpoint()))
            .header(header::ACCEPT, "application/json");
        if let Some(authorization) = &self.authorization {
            builder = builder.header(header::AUTHORIZATION, authorization);
        }
        for (name, value) in &request.options().headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(payload) = request.payload() {
            builder = builder.json(payload);
        }

        let response = builder.send().await.map_err(NotebookError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(NotebookError::Transport)?;

        if !status.is_success() {
            return Err(NotebookError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(TransportResponse {
            status: status.as_u16(),
            body: decode_body(body),
        })
    }
}

fn decode_body(body: String) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}

/// Builds the `Authorization` value for a token, with or without a scheme.
fn bearer_header_value(token: &str) -> String {
    let token = token.trim();
    match token.split_once(char::is_whitespace) {
        Some((scheme, credentials)) if scheme.eq_ignore_ascii_case("bearer") => {
            format!("Bearer {}", credentials.trim_start())
        }
        _ => format!("Bearer {token}"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{bearer_header_value, decode_body, HttpTransport};

    #[test]
    fn bearer_value_is_canonical() {
        assert_eq!(bearer_header_value("abc123"), "Bearer abc123");
        assert_eq!(bearer_header_value("  bEaReR   abc123 "), "Bearer abc123");
        assert_eq!(bearer_header_value("Bearer\tabc123"), "Bearer abc123");
    }

    #[test]
    fn debug_shows_base_url_but_hides_credentials() {
        let transport = HttpTransport::new("https://notes.example/api/").with_bearer("secret-token");
        let debug = format!("{transport:?}");
        assert!(debug.contains("https://notes.example/api"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
        assert_eq!(transport.base_url(), "https://notes.example/api");

        let anonymous = format!("{:?}", HttpTransport::new("https://notes.example"));
        assert!(anonymous.contains("authorization: None"));
    }

    #[test]
    fn url_join_handles_slashes() {
        let transport = HttpTransport::new("https://api.example/rest/");
        assert_eq!(
            transport.url_for("/settings/theme"),
            "https://api.example/rest/settings/theme"
        );
        assert_eq!(transport.url_for("notes"), "https://api.example/rest/notes");
    }

    #[test]
    fn body_decoding_falls_back_to_text() {
        assert_eq!(decode_body(String::new()), Value::Null);
        assert_eq!(decode_body("{\"ok\":true}".to_owned()), json!({"ok": true}));
        assert_eq!(decode_body("pong".to_owned()), json!("pong"));
    }
}
