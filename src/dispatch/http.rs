//! Outbound HTTP calls for cron dispatch and buffer forwards

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::DispatchConfig;
use crate::ledger::{HeaderMap, HttpMethod};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ForwardError>;

/// Request payload
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Text(String),
}

impl RequestBody {
    /// Stored body text is sent as JSON when it parses to an object or array,
    /// otherwise as raw text
    pub fn from_stored(raw: Option<&str>) -> Self {
        match raw {
            None => RequestBody::Empty,
            Some(text) if text.trim().is_empty() => RequestBody::Empty,
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(value @ (Value::Object(_) | Value::Array(_))) => RequestBody::Json(value),
                _ => RequestBody::Text(text.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, bon::Builder)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    #[builder(into)]
    pub url: String,
    #[builder(default)]
    pub headers: HeaderMap,
    #[builder(default)]
    pub body: RequestBody,
    /// Overrides the caller's default timeout
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs one outbound request. Any HTTP status is a response; only transport
/// failures are errors.
#[async_trait]
pub trait HttpCaller: Send + Sync {
    async fn call(&self, request: &OutboundRequest) -> Result<HttpResponse>;
}

/// reqwest-backed caller
pub struct ReqwestCaller {
    client: Client,
    default_timeout: Duration,
}

impl ReqwestCaller {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| ForwardError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            default_timeout: config.request_timeout.as_duration(),
        })
    }

    fn method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Response text for the log; bytes that are not UTF-8 are replaced, never rejected
fn body_text(raw: Bytes) -> String {
    String::from_utf8_lossy(&raw).into_owned()
}

#[async_trait]
impl HttpCaller for ReqwestCaller {
    async fn call(&self, request: &OutboundRequest) -> Result<HttpResponse> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| ForwardError::InvalidUrl(format!("{}: {}", request.url, e)))?;

        let mut builder = self
            .client
            .request(Self::method(request.method), url)
            .timeout(request.timeout.unwrap_or(self.default_timeout));

        for (name, value) in &request.headers {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ForwardError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                }
            })?;
            let header_value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                ForwardError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.header(header_name, header_value);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Text(text) => builder.body(text.clone()),
        };

        debug!(method = %request.method, url = %request.url, "Sending request");

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::Timeout
            } else {
                ForwardError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let raw = response
            .bytes()
            .await
            .map_err(|e| ForwardError::RequestFailed(format!("Failed to read body: {}", e)))?;
        let body = body_text(raw);

        debug!(url = %request.url, status, size = body.len(), "Request completed");
        Ok(HttpResponse { status, body })
    }
}
