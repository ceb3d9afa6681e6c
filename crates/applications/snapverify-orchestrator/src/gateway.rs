//! Cluster REST transport
//!
//! [`ClusterGateway`] is the only thing in the crate that talks to the
//! network. Everything above it works in terms of [`ApiRequest`] and
//! [`ApiResponse`], so tests can swap in an in-memory cluster.

use crate::config::{ClusterConnection, Credentials};
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// One call against the cluster REST API
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path relative to the cluster URL, without leading slash
    pub path: String,
    /// Query string pairs
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Create a request without query or body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// `GET path`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `PUT path`
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `POST path`
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `DELETE path`
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the JSON body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Look up a query parameter
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Query and body rendered for diagnostics
    pub fn describe_parameters(&self) -> String {
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        match (&self.body, query.is_empty()) {
            (None, true) => "{}".to_string(),
            (None, false) => format!("?{}", query),
            (Some(body), true) => body.to_string(),
            (Some(body), false) => format!("?{} {}", query, body),
        }
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Status and decoded body of a completed call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// JSON body; a JSON string if the body was not JSON, `null` if empty
    pub body: Value,
}

impl ApiResponse {
    /// Create a response
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 4xx
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// 404
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Executes raw calls against the cluster API
///
/// Implementations report every HTTP response as `Ok`, whatever its status;
/// classification of statuses is left to the retrying caller.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Execute one request
    async fn send(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, TransportError>;
}

/// [`ClusterGateway`] over HTTP
pub struct HttpClusterGateway {
    /// Base URL, without trailing slash
    base_url: String,

    /// HTTP client
    client: reqwest::Client,

    /// Basic auth credentials
    credentials: Option<Credentials>,
}

impl HttpClusterGateway {
    /// Create a gateway for a cluster connection
    pub fn new(connection: &ClusterConnection, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            base_url: connection.url.trim_end_matches('/').to_string(),
            client,
            credentials: connection.credentials()?,
        })
    }

    /// Cluster base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ClusterGateway for HttpClusterGateway {
    async fn send(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(ref creds) = self.credentials {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }

        trace!(request = %request, "Sending cluster request");

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(classify)?;

        Ok(ApiResponse::new(status, decode_body(&text)))
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}

fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(""), Value::Null);
        assert_eq!(decode_body("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(decode_body("not json"), json!("not json"));
    }

    #[test]
    fn test_describe_parameters() {
        assert_eq!(ApiRequest::get("_cat/master").describe_parameters(), "{}");
        assert_eq!(
            ApiRequest::get("_cat/master")
                .with_query("format", "json")
                .describe_parameters(),
            "?format=json"
        );
        assert_eq!(
            ApiRequest::put("idx/_doc/1")
                .with_body(json!({"test_value": "x"}))
                .describe_parameters(),
            "{\"test_value\":\"x\"}"
        );
    }

    #[test]
    fn test_status_classes() {
        assert!(ApiResponse::new(201, Value::Null).is_success());
        assert!(ApiResponse::new(404, Value::Null).is_client_error());
        assert!(ApiResponse::new(404, Value::Null).is_not_found());
        assert!(!ApiResponse::new(500, Value::Null).is_client_error());
    }

    #[test]
    fn test_url_joining() {
        let connection = ClusterConnection {
            url: "http://localhost:9200/".to_string(),
            ..Default::default()
        };
        let gateway = HttpClusterGateway::new(&connection, Duration::from_secs(1)).unwrap();

        assert_eq!(gateway.base_url(), "http://localhost:9200");
        assert_eq!(gateway.url("/_cat/master"), "http://localhost:9200/_cat/master");
    }
}
