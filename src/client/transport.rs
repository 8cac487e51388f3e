//! Transport abstraction for client callers.
//!
//! The retry machine talks to a [`Transport`] rather than to reqwest
//! directly, so the same policy drives real HTTP calls, in-process calls
//! against a local router, and scripted doubles in tests.

use crate::error::TransportFailure;
use crate::spec::HttpMethod;
use async_trait::async_trait;
use std::time::Duration;
use tower::ServiceExt;

/// One prepared outgoing request
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<String>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

/// What came back from the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    pub status: u16,
    pub body: String,
}

impl WireResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Send one request, get one response (or a transport failure).
///
/// `Ok(None)` models a transport that produced no response at all; the retry
/// machine treats it as a transient failure.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: &WireRequest,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> std::result::Result<Option<WireResponse>, TransportFailure>;
}

/// Real HTTP transport over reqwest
pub struct ReqwestTransport {
    verify_ssl: bool,
}

impl ReqwestTransport {
    pub fn new(verify_ssl: bool) -> Self {
        Self { verify_ssl }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        request: &WireRequest,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> std::result::Result<Option<WireResponse>, TransportFailure> {
        let target = format!("{} {}", request.method, request.url);

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(!self.verify_ssl)
            .build()
            .map_err(|e| TransportFailure::Other(e.to_string()))?;

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportFailure::Other(e.to_string()))?;

        let mut builder = client
            .request(method, &request.url)
            .timeout(read_timeout + connect_timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .map_err(|e| TransportFailure::Other(e.to_string()))?;
                Ok(Some(WireResponse { status, body }))
            }
            Err(e) => Err(classify_reqwest_error(e, &target)),
        }
    }
}

fn classify_reqwest_error(e: reqwest::Error, target: &str) -> TransportFailure {
    if e.is_timeout() && e.is_connect() {
        TransportFailure::ConnectTimeout(target.to_string())
    } else if e.is_timeout() {
        TransportFailure::ReadTimeout(target.to_string())
    } else {
        TransportFailure::Other(format!("{target}: {e}"))
    }
}

/// In-process transport that dispatches straight into an axum router; the
/// local-call analog of an HTTP round-trip.
pub struct RouterTransport {
    router: axum::Router,
}

impl RouterTransport {
    pub fn new(router: axum::Router) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Transport for RouterTransport {
    async fn execute(
        &self,
        request: &WireRequest,
        _connect_timeout: Duration,
        _read_timeout: Duration,
    ) -> std::result::Result<Option<WireResponse>, TransportFailure> {
        let mut uri = request.url.clone();
        if !request.query.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&request.query)
                .finish();
            uri = format!("{uri}?{encoded}");
        }

        let mut builder = axum::http::Request::builder()
            .method(request.method.as_str())
            .uri(uri.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let body = request.body.clone().unwrap_or_default();
        let http_request = builder
            .body(axum::body::Body::from(body))
            .map_err(|e| TransportFailure::Other(e.to_string()))?;

        let response = match self.router.clone().oneshot(http_request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        let status = response.status().as_u16();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| TransportFailure::Other(e.to_string()))?;
        Ok(Some(WireResponse {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }))
    }
}
