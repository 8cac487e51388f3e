//! Retry state machine for one logical client call.
//!
//! Attempts are strictly sequential and bounded by `max_attempts`. Read
//! timeouts are retried only for GET and PATCH (idempotent-safe); connect
//! timeouts are always retried, since the connection never reached the
//! server and there is no side-effect risk. An empty response is a transient
//! failure, retried for safe methods with a linearly growing backoff. Any
//! other failure aborts at once unless the caller requested forced retries.

use crate::client::transport::{Transport, WireRequest, WireResponse};
use crate::error::TransportFailure;
use crate::spec::HttpMethod;
use std::sync::Arc;
use std::time::Duration;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_STEP_MS: u64 = 500;

/// Transient per-invocation state; one instance per logical call
pub struct RetryableCall {
    transport: Arc<dyn Transport>,
    request: WireRequest,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_attempts: u32,
}

impl RetryableCall {
    pub fn new(
        transport: Arc<dyn Transport>,
        request: WireRequest,
        connect_timeout: Duration,
        read_timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            transport,
            request,
            connect_timeout,
            read_timeout,
            // The attempt budget is at least one
            max_attempts: max_attempts.max(1),
        }
    }

    fn method_is_safe_to_retry(&self) -> bool {
        matches!(self.request.method, HttpMethod::Get | HttpMethod::Patch)
    }

    /// Run the attempt loop to a terminal state: the first response wins,
    /// exhaustion surfaces the last observed failure.
    pub async fn call(
        &self,
        force_retry: bool,
    ) -> std::result::Result<WireResponse, TransportFailure> {
        let target = format!("{} {}", self.request.method, self.request.url);
        let mut last_failure: Option<TransportFailure> = None;

        for attempt in 0..self.max_attempts {
            tracing::info!(
                "Calling {} (attempt {}/{})",
                target,
                attempt + 1,
                self.max_attempts
            );

            match self
                .transport
                .execute(&self.request, self.connect_timeout, self.read_timeout)
                .await
            {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => {
                    tracing::warn!("Got empty response calling {}", target);
                    if !self.method_is_safe_to_retry() {
                        return Err(TransportFailure::EmptyResponse(target));
                    }
                    let delay =
                        Duration::from_millis(BACKOFF_BASE_MS + u64::from(attempt) * BACKOFF_STEP_MS);
                    tracing::info!(
                        "Waiting {:?} and retrying since call is a {}",
                        delay,
                        self.request.method
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => {
                    let mut retry = force_retry;
                    match &failure {
                        TransportFailure::ReadTimeout(_) => {
                            tracing::warn!("Got a read timeout calling {}", target);
                            if self.method_is_safe_to_retry() {
                                tracing::info!(
                                    "Retrying since call is a {}",
                                    self.request.method
                                );
                                retry = true;
                            }
                        }
                        TransportFailure::ConnectTimeout(_) => {
                            tracing::warn!("Got a connect timeout calling {}", target);
                            retry = true;
                        }
                        _ => {}
                    }
                    if !retry {
                        return Err(failure);
                    }
                    last_failure = Some(failure);
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| {
            TransportFailure::Other(format!(
                "Reached max-attempts ({}). Giving up calling {}",
                self.max_attempts, target
            ))
        }))
    }
}
