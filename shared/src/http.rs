//! HTTP client utilities
//!
//! Calls between services go through [`retry_with_backoff`]: every failed
//! attempt is classified into a [`RetryDecision`], transient failures are
//! retried with capped exponential backoff, and the whole loop runs under one
//! overall deadline measured from the first attempt.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use reqwest::{redirect, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::logger::truncate_for_log;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("invalid base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryConfigError {
    #[error("max attempts must be at least 1")]
    ZeroAttempts,
    #[error("backoff multiplier must be finite and at least 1.0, got {0}")]
    InvalidMultiplier(f64),
    #[error("initial backoff {initial:?} is larger than max backoff {max:?}")]
    BackoffRange { initial: Duration, max: Duration },
    #[error("overall timeout must be non-zero")]
    ZeroTimeout,
}

/// Retry parameters for one logical remote call. Constructed once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff_multiplier: f64,
    overall_timeout: Duration,
}

impl RetryConfig {
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
        overall_timeout: Duration,
    ) -> Result<Self, RetryConfigError> {
        if max_attempts == 0 {
            return Err(RetryConfigError::ZeroAttempts);
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(RetryConfigError::InvalidMultiplier(backoff_multiplier));
        }
        if initial_backoff > max_backoff {
            return Err(RetryConfigError::BackoffRange {
                initial: initial_backoff,
                max: max_backoff,
            });
        }
        if overall_timeout.is_zero() {
            return Err(RetryConfigError::ZeroTimeout);
        }
        Ok(Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            overall_timeout,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn overall_timeout(&self) -> Duration {
        self.overall_timeout
    }

    /// Delay to wait after the 1-based `attempt` failed:
    /// `min(max_backoff, initial_backoff * multiplier^(attempt - 1))`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_backoff.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_backoff.as_nanos() as f64 {
            return self.max_backoff;
        }
        Duration::from_nanos(scaled.round() as u64)
    }
}

/// Classification of a single failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryableNetwork,
    RetryableServerError,
    NonRetryableClientError,
    NonRetryableOther,
}

impl RetryDecision {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            RetryDecision::RetryableNetwork | RetryDecision::RetryableServerError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RetryDecision::RetryableNetwork => "retryable_network",
            RetryDecision::RetryableServerError => "retryable_server_error",
            RetryDecision::NonRetryableClientError => "non_retryable_client_error",
            RetryDecision::NonRetryableOther => "non_retryable_other",
        }
    }
}

impl fmt::Display for RetryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one attempt failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptError {
    /// Transport-level failure: connect, DNS, reset, timeout.
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {status}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The request could not be formed at all.
    #[error("invalid request: {0}")]
    Request(String),
}

impl AttemptError {
    pub fn classify(&self) -> RetryDecision {
        match self {
            AttemptError::Network(_) => RetryDecision::RetryableNetwork,
            AttemptError::Status { status, .. } if *status >= 500 => {
                RetryDecision::RetryableServerError
            }
            AttemptError::Status { status, .. } if (400..500).contains(status) => {
                RetryDecision::NonRetryableClientError
            }
            AttemptError::Status { .. } | AttemptError::Malformed(_) | AttemptError::Request(_) => {
                RetryDecision::NonRetryableOther
            }
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            AttemptError::Request(err.to_string())
        } else if err.is_decode() || err.is_redirect() {
            AttemptError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            AttemptError::Status {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            AttemptError::Network(err.to_string())
        }
    }
}

/// Terminal outcome of a remote call that did not succeed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteCallError {
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: AttemptError,
    },
    #[error("request rejected with status {0}")]
    ClientError(u16),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("downstream unreachable: {0}")]
    Unreachable(String),
}

impl RemoteCallError {
    /// Maps a failure that must not be retried to its terminal error.
    pub fn terminal(failure: AttemptError) -> Self {
        match failure {
            AttemptError::Status { status, .. } if (400..500).contains(&status) => {
                RemoteCallError::ClientError(status)
            }
            AttemptError::Status { status, .. } => {
                RemoteCallError::MalformedResponse(format!("unexpected status {status}"))
            }
            AttemptError::Malformed(reason) => RemoteCallError::MalformedResponse(reason),
            AttemptError::Request(reason) | AttemptError::Network(reason) => {
                RemoteCallError::Unreachable(reason)
            }
        }
    }

    /// Stable identifier used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteCallError::Timeout(_) => "deadline_exceeded",
            RemoteCallError::RetriesExhausted { .. } => "retries_exhausted",
            RemoteCallError::ClientError(_) => "client_error",
            RemoteCallError::MalformedResponse(_) => "protocol_error",
            RemoteCallError::Unreachable(_) => "unreachable",
        }
    }
}

/// Runs `attempt_fn` until it succeeds, fails permanently, runs out of
/// attempts, or the overall deadline passes.
///
/// `attempt_fn` receives the 1-based attempt number. `operation` only labels
/// log events.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut attempt_fn: F,
) -> Result<T, RemoteCallError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let deadline = config.overall_timeout();
    let started = Instant::now();

    match tokio::time::timeout(deadline, attempt_loop(config, operation, &mut attempt_fn)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            error!(
                operation,
                elapsed_ms = started.elapsed().as_millis() as u64,
                timeout_ms = deadline.as_millis() as u64,
                "remote call deadline exceeded"
            );
            Err(RemoteCallError::Timeout(deadline))
        }
    }
}

async fn attempt_loop<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    attempt_fn: &mut F,
) -> Result<T, RemoteCallError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = config.max_attempts();
    let mut attempt = 1;

    loop {
        debug!(operation, attempt, max_attempts, "starting attempt");

        let failure = match attempt_fn(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "remote call succeeded after retry");
                }
                return Ok(value);
            }
            Err(failure) => failure,
        };

        let decision = failure.classify();
        if !decision.is_retryable() {
            error!(
                operation,
                attempt,
                decision = %decision,
                error = %failure,
                "non-retryable failure"
            );
            return Err(RemoteCallError::terminal(failure));
        }

        if attempt >= max_attempts {
            error!(
                operation,
                attempts = attempt,
                error = %failure,
                "max attempts exceeded"
            );
            return Err(RemoteCallError::RetriesExhausted {
                attempts: attempt,
                last: failure,
            });
        }

        let delay = config.backoff_for(attempt);
        warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            decision = %decision,
            error = %failure,
            "attempt failed, retrying after backoff"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Thin wrapper over `reqwest::Client` bound to one base url. Each method is
/// a single attempt; retries are layered on top with [`retry_with_backoff`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpClient {
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self, HttpError> {
        let base_url = Url::parse(base_url).map_err(|e| HttpError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(HttpError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "url cannot be used as a base".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(response_timeout)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Joins `segments` onto the base url, percent-encoding each one.
    pub fn url(&self, segments: &[&str]) -> Result<Url, AttemptError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AttemptError::Request(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GETs `url` and decodes a 2xx JSON body into `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, AttemptError> {
        let response = self.exchange(self.client.get(url)).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| AttemptError::Malformed(e.to_string()))
    }

    /// GETs `url` as text with its own `timeout`, for lightweight probes.
    pub async fn get_text(&self, url: Url, timeout: Duration) -> Result<String, AttemptError> {
        let response = self.exchange(self.client.get(url).timeout(timeout)).await?;
        Ok(response.text().await?)
    }

    /// Sends one request, logging the outbound exchange. Non-2xx responses
    /// become [`AttemptError::Status`] carrying the body.
    async fn exchange(&self, request: RequestBuilder) -> Result<Response, AttemptError> {
        let request = request.build()?;
        let method = request.method().clone();
        let url = request.url().clone();
        info!(method = %method, url = %url, "outbound request");
        debug!(headers = ?request.headers(), "outbound request headers");

        let response = self.client.execute(request).await.map_err(|e| {
            warn!(method = %method, url = %url, error = %e, "outbound request failed");
            AttemptError::from(e)
        })?;

        let status = response.status();
        info!(method = %method, url = %url, status = status.as_u16(), "outbound response");
        debug!(headers = ?response.headers(), "outbound response headers");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        error!(
            url = %url,
            status = status.as_u16(),
            body = %truncate_for_log(&body, 256),
            "error response from downstream"
        );
        Err(AttemptError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
