//! Remote peer services reachable over HTTP.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StepError;

/// A call to a peer service: method, path, headers and an optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RemoteRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Forwards the caller's bearer credential, if there is one.
    pub fn bearer(self, token: Option<&str>) -> Self {
        match token {
            Some(token) => self.header("authorization", format!("Bearer {token}")),
            None => self,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns the first header with `name` (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A peer's answer: status code and JSON body (`Null` when empty).
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Value,
}

impl RemoteResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into [`StepError::Remote`].
    pub fn error_for_status(self) -> Result<Self, StepError> {
        if self.is_success() {
            return Ok(self);
        }
        let detail = self
            .body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.body.to_string());
        Err(StepError::Remote {
            status: Some(self.status),
            message: format!("peer responded {}: {detail}", self.status),
        })
    }

    /// Deserializes the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| StepError::transport(format!("unexpected response body: {e}")))
    }
}

/// A remote service endpoint.
///
/// Implementations report transport failures as [`StepError::Remote`] with no
/// status; non-2xx responses are returned as-is for the caller to judge.
#[async_trait]
pub trait RemotePeer: Send + Sync {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, StepError>;
}

/// [`RemotePeer`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPeer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPeer {
    /// Creates a peer rooted at `base_url` (e.g. `http://payment-service:3003`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemotePeer for HttpPeer {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, StepError> {
        let url = self.url(&request.path);
        let mut builder = self.client.request(request.method.clone(), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::debug!(%url, error = %e, "remote call transport error");
            StepError::transport(format!("{} {url}: {e}", request.method))
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| StepError::transport(format!("reading response from {url}: {e}")))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(RemoteResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bearer_forwarding() {
        let request = RemoteRequest::post("/payments/create").bearer(Some("abc"));
        assert_eq!(request.header_value("Authorization"), Some("Bearer abc"));
        let request = RemoteRequest::post("/payments/create").bearer(None);
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_error_for_status() {
        assert!(RemoteResponse::new(201, json!({"id": "x"})).error_for_status().is_ok());

        let err = RemoteResponse::new(502, json!({"error": "upstream down"}))
            .error_for_status()
            .unwrap_err();
        match err {
            StepError::Remote { status, message } => {
                assert_eq!(status, Some(502));
                assert!(message.contains("upstream down"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_url_joining() {
        let peer = HttpPeer::new("http://payment-service:3003/");
        assert_eq!(peer.url("/payments/create"), "http://payment-service:3003/payments/create");
        assert_eq!(peer.url("payments/1"), "http://payment-service:3003/payments/1");
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transport_error() {
        let peer = HttpPeer::new("http://127.0.0.1:1");
        let err = peer.send(RemoteRequest::get("/health")).await.unwrap_err();
        assert!(matches!(err, StepError::Remote { status: None, .. }));
    }
}
