//! Request execution: the single funnel between client operations and the
//! network.
//!
//! Sending lives behind the [`HttpSend`] port so the executor's retry,
//! backoff, and status-mapping logic can be exercised against scripted
//! fakes. The real implementation is a thin [`reqwest`] wrapper.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::sleep;

use crate::errors::{Error, Resource, Result};
use crate::limiter::RateLimiter;
use crate::transport::Transport;

/// Fallback when a 429 response carries no `Retry-After` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// A fully-addressed outbound request.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    /// JSON body; suppressed when a file payload forces multipart encoding.
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
    pub file: Option<FilePayload>,
    pub timeout: Duration,
}

/// A file to upload as a multipart form.
#[derive(Clone, Debug)]
pub struct FilePayload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Additional plain-text form fields sent alongside the file.
    pub fields: Vec<(String, String)>,
}

/// What came back from the wire, before status classification.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub retry_after: Option<u64>,
    pub is_json: bool,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Convenience for building JSON responses in tests and fakes.
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            retry_after: None,
            is_json: true,
            body: serde_json::to_vec(value).expect("serializable value"),
        }
    }
}

/// Connection-level failure: the request never produced an HTTP status.
/// These are the only failures the executor retries.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
}

/// Port for the actual wire send. One logical request in, one response or
/// connection-level failure out; no retries, no status interpretation.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, req: &ApiRequest) -> std::result::Result<ApiResponse, SendError>;
}

/// Decoded 2xx payload.
#[derive(Debug)]
pub(crate) enum Payload {
    Json(Value),
    Raw(Vec<u8>),
}

pub(crate) fn decode<T: DeserializeOwned>(payload: Payload) -> Result<T> {
    match payload {
        Payload::Json(value) => Ok(serde_json::from_value(value)?),
        Payload::Raw(bytes) => Ok(serde_json::from_slice(&bytes)?),
    }
}

/// One logical API call, built by the client operations.
#[derive(Debug)]
pub(crate) struct Call<'a> {
    method: Method,
    path: &'a str,
    body: Option<Value>,
    query: Vec<(String, String)>,
    file: Option<FilePayload>,
    not_found: Resource,
}

impl<'a> Call<'a> {
    fn new(method: Method, path: &'a str) -> Self {
        Self {
            method,
            path,
            body: None,
            query: Vec::new(),
            file: None,
            not_found: Resource::Server,
        }
    }

    pub fn get(path: &'a str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &'a str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: &'a str) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn file(mut self, file: FilePayload) -> Self {
        self.file = Some(file);
        self
    }

    /// Which resource kind a 404 on this call refers to.
    pub fn not_found(mut self, resource: Resource) -> Self {
        self.not_found = resource;
        self
    }
}

/// Performs one API call with bounded retry and typed failure
/// classification. Every public client operation reaches the network
/// through here; nothing calls the transport directly.
pub(crate) struct Executor {
    transport: Transport,
    sender: Arc<dyn HttpSend>,
    limiter: RateLimiter,
    retry_attempts: u32,
    timeout: Duration,
}

impl Executor {
    pub fn new(
        transport: Transport,
        sender: Arc<dyn HttpSend>,
        limiter: RateLimiter,
        retry_attempts: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            sender,
            limiter,
            retry_attempts: retry_attempts.max(1),
            timeout,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub async fn execute(&self, call: Call<'_>) -> Result<Payload> {
        let req = ApiRequest {
            method: call.method,
            url: self.transport.url_for(call.path),
            headers: self.transport.request_headers(),
            // A file payload forces multipart encoding and suppresses any
            // JSON body.
            body: if call.file.is_some() { None } else { call.body },
            query: call.query,
            file: call.file,
            timeout: self.timeout,
        };

        let mut attempt: u32 = 0;
        loop {
            // Every attempt, retries included, goes through the limiter and
            // lands in its ledger.
            self.limiter.acquire().await;

            match self.sender.send(&req).await {
                Ok(resp) => return classify(resp, call.not_found),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.retry_attempts {
                        return Err(Error::Connection(err.to_string()));
                    }
                    let backoff = Duration::from_secs(1u64 << (attempt - 1));
                    tracing::warn!(
                        url = %req.url,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %err,
                        "request failed, retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}

/// Normative status-code mapping. HTTP-status errors surface immediately,
/// with no local retry; the caller decides what to do next.
fn classify(resp: ApiResponse, not_found: Resource) -> Result<Payload> {
    match resp.status {
        401 => Err(Error::InvalidToken),
        403 => Err(Error::PermissionDenied),
        404 => Err(Error::NotFound(not_found)),
        429 => Err(Error::RateLimited {
            retry_after: resp
                .retry_after
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER),
        }),
        status if status >= 400 => {
            let body = if resp.is_json {
                serde_json::from_slice(&resp.body).unwrap_or(Value::Null)
            } else {
                Value::Null
            };
            Err(Error::Api { status, body })
        }
        _ => {
            if resp.is_json {
                if resp.body.is_empty() {
                    return Ok(Payload::Json(Value::Null));
                }
                Ok(Payload::Json(serde_json::from_slice(&resp.body)?))
            } else {
                Ok(Payload::Raw(resp.body))
            }
        }
    }
}

/// Production sender backed by a shared [`reqwest::Client`].
pub struct ReqwestSend {
    http: reqwest::Client,
}

impl ReqwestSend {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("reqwest client build");
        Self { http }
    }
}

impl Default for ReqwestSend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpSend for ReqwestSend {
    async fn send(&self, req: &ApiRequest) -> std::result::Result<ApiResponse, SendError> {
        let mut builder = self
            .http
            .request(req.method.clone(), &req.url)
            .timeout(req.timeout);

        for (key, value) in &req.headers {
            builder = builder.header(*key, value);
        }
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }

        if let Some(file) = &req.file {
            let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                .file_name(file.filename.clone())
                .mime_str(&file.content_type)
                .map_err(|e| SendError::Connect(format!("invalid content type: {e}")))?;
            let mut form = reqwest::multipart::Form::new().part("file", part);
            for (key, value) in &file.fields {
                form = form.text(key.clone(), value.clone());
            }
            builder = builder.multipart(form);
        } else if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SendError::Timeout
            } else {
                SendError::Connect(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let is_json = resp
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        let body = resp
            .bytes()
            .await
            .map_err(|e| SendError::Connect(e.to_string()))?
            .to_vec();

        Ok(ApiResponse {
            status,
            retry_after,
            is_json,
            body,
        })
    }
}

/// Scripted sender shared by the executor and client tests.
#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Pops one outcome per attempt, records every request it saw.
    #[derive(Default)]
    pub(crate) struct FakeSend {
        script: Mutex<VecDeque<std::result::Result<ApiResponse, SendError>>>,
        pub(crate) requests: Mutex<Vec<ApiRequest>>,
    }

    impl FakeSend {
        pub(crate) fn scripted(
            outcomes: Vec<std::result::Result<ApiResponse, SendError>>,
        ) -> Self {
            Self {
                script: Mutex::new(outcomes.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn attempts(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpSend for FakeSend {
        async fn send(&self, req: &ApiRequest) -> std::result::Result<ApiResponse, SendError> {
            self.requests.lock().unwrap().push(req.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(SendError::Connect("script exhausted".into())))
        }
    }
}
