use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether parameters travel in the body rather than the query string.
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully addressed request, ready to go on the wire byte for byte.
#[derive(Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

// Header values carry API keys, so they stay out of Debug output.
impl fmt::Debug for PreparedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("PreparedRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &names)
            .field("body", &self.body)
            .finish()
    }
}

/// An HTTP response as received, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// Header names lower-cased, in the order the server sent them.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// 429 (rate limited) or 418 (temporarily banned).
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429 || self.status == 418
    }

    /// The `Retry-After` delay, in whole seconds.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Decode the body as JSON. Empty bodies become `Null`; bodies that are
    /// not JSON are kept verbatim as a string for the caller to inspect.
    pub fn into_api_response(self) -> ApiResponse {
        let body = if self.body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&self.body).unwrap_or(Value::String(self.body))
        };
        ApiResponse {
            status: self.status,
            headers: self.headers,
            body,
        }
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// A decoded response. Non-2xx statuses are returned as-is: the client
/// does not interpret exchange business error codes.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// A top-level string field of an object body.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// The seam between request building and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request. Only failures that produced no HTTP response are
    /// errors; every status code comes back as a [`RawResponse`].
    async fn send(&self, request: &PreparedRequest) -> Result<RawResponse, ClientError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &PreparedRequest) -> Result<RawResponse, ClientError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = resp.text().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_retry_after_parsing() {
        let resp = RawResponse::new(429, "").with_header("Retry-After", "3");
        assert!(resp.is_rate_limited());
        assert_eq!(resp.retry_after(), Some(Duration::from_secs(3)));

        let resp = RawResponse::new(418, "").with_header("retry-after", "soon");
        assert_eq!(resp.retry_after(), None);
    }

    #[test]
    fn test_non_json_body_is_kept_verbatim() {
        let resp = RawResponse::new(502, "<html>bad gateway</html>").into_api_response();
        assert!(!resp.is_success());
        assert_eq!(resp.body, Value::String("<html>bad gateway</html>".to_string()));

        let resp = RawResponse::new(200, "").into_api_response();
        assert_eq!(resp.body, Value::Null);
    }

    #[test]
    fn test_debug_hides_header_values() {
        let req = PreparedRequest {
            method: HttpMethod::Get,
            url: "https://example.invalid/api/v3/account".to_string(),
            headers: vec![("X-MBX-APIKEY".to_string(), "super-secret-key".to_string())],
            body: None,
        };
        let printed = format!("{:?}", req);
        assert!(printed.contains("X-MBX-APIKEY"));
        assert!(!printed.contains("super-secret-key"));
    }

    #[tokio::test]
    async fn test_http_transport_round_trip() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v3/order")
                    .header("X-MBX-APIKEY", "test-key")
                    .body("symbol=ETHBTC&side=BUY");
                then.status(200)
                    .header("x-mbx-used-weight-1m", "7")
                    .body("{\"status\":\"NEW\"}");
            })
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let resp = transport
            .send(&PreparedRequest {
                method: HttpMethod::Post,
                url: format!("{}/api/v3/order", server.base_url()),
                headers: vec![("X-MBX-APIKEY".to_string(), "test-key".to_string())],
                body: Some("symbol=ETHBTC&side=BUY".to_string()),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("X-MBX-USED-WEIGHT-1M"), Some("7"));
        assert_eq!(resp.into_api_response().field_str("status"), Some("NEW"));
    }
}
