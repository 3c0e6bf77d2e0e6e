//! Scripted HTTP caller for tests and local runs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::http::{ForwardError, HttpCaller, HttpResponse, OutboundRequest, Result};

#[derive(Debug, Clone)]
enum Scripted {
    Respond { status: u16, body: String },
    Fail(String),
}

/// Records every request and answers from per-URL scripts (default: 200 "ok")
#[derive(Default)]
pub struct RecordingCaller {
    calls: Mutex<Vec<OutboundRequest>>,
    routes: Mutex<HashMap<String, Scripted>>,
    delay: Option<Duration>,
}

impl RecordingCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond_to(&self, url: &str, status: u16, body: &str) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(
                url.to_string(),
                Scripted::Respond {
                    status,
                    body: body.to_string(),
                },
            );
        }
    }

    /// Make calls to `url` fail with a transport error
    pub fn fail_for(&self, url: &str, message: &str) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.to_string(), Scripted::Fail(message.to_string()));
        }
    }

    pub fn calls(&self) -> Vec<OutboundRequest> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }
}

#[async_trait]
impl HttpCaller for RecordingCaller {
    async fn call(&self, request: &OutboundRequest) -> Result<HttpResponse> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        tracing::info!(method = %request.method, url = %request.url, "Mock call");

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .routes
            .lock()
            .ok()
            .and_then(|routes| routes.get(&request.url).cloned());

        match scripted {
            Some(Scripted::Respond { status, body }) => Ok(HttpResponse { status, body }),
            Some(Scripted::Fail(message)) => Err(ForwardError::RequestFailed(message)),
            None => Ok(HttpResponse {
                status: 200,
                body: "ok".to_string(),
            }),
        }
    }
}
