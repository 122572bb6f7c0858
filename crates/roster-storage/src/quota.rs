//! Quota handling for rate-limited upstream APIs: exponential backoff on 429,
//! round-robin credential rotation on other failures, and a fixed pause
//! between consecutive calls.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use roster_core::ErrorKind;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("rate limit still in effect after {attempts} attempts")]
    RateLimitExhausted { attempts: usize },
    #[error("http status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed upstream payload: {0}")]
    Parse(String),
    #[error("no credentials configured for {0}")]
    NoCredentials(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Same credential, after a delay.
    WaitAndRetry,
    /// Next credential in the pool.
    RotateCredential,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::WaitAndRetry
    } else if status.is_success() {
        RetryDisposition::NonRetryable
    } else {
        RetryDisposition::RotateCredential
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl UpstreamError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            UpstreamError::RateLimited { .. } => RetryDisposition::WaitAndRetry,
            UpstreamError::Status { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::RotateCredential),
            UpstreamError::Transport(_) => RetryDisposition::RotateCredential,
            UpstreamError::RateLimitExhausted { .. }
            | UpstreamError::Parse(_)
            | UpstreamError::NoCredentials(_) => RetryDisposition::NonRetryable,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UpstreamError::RateLimited { .. } | UpstreamError::RateLimitExhausted { .. } => {
                ErrorKind::RateLimit
            }
            UpstreamError::Status { .. } | UpstreamError::Transport(_) => {
                ErrorKind::TransientNetwork
            }
            UpstreamError::Parse(_) => ErrorKind::Parse,
            UpstreamError::NoCredentials(_) => ErrorKind::Configuration,
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            return UpstreamError::Parse(err.to_string());
        }
        if let Some(status) = err.status() {
            return UpstreamError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        UpstreamError::Transport(err.to_string())
    }

    /// Passes successful responses through and turns everything else into
    /// the matching error.
    pub fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, Self> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited {
                retry_after: parse_retry_after(resp.headers()),
            });
        }
        Err(UpstreamError::Status {
            status: status.as_u16(),
            url: resp.url().to_string(),
        })
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::from_reqwest(&err)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub backoff: BackoffPolicy,
    /// Minimum spacing between consecutive calls through one limiter.
    pub inter_call_delay: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            inter_call_delay: Duration::from_secs(3),
        }
    }
}

/// Enforces a minimum interval between calls.
#[derive(Debug)]
pub struct Pacer {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Ordered credentials with a shared round-robin cursor.
#[derive(Debug)]
pub struct CredentialPool<C> {
    credentials: Vec<C>,
    cursor: AtomicUsize,
}

impl<C: Clone> CredentialPool<C> {
    pub fn new(credentials: Vec<C>) -> Self {
        Self {
            credentials,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn current(&self) -> Option<C> {
        if self.credentials.is_empty() {
            return None;
        }
        let idx = self.cursor.load(Ordering::SeqCst) % self.credentials.len();
        self.credentials.get(idx).cloned()
    }

    /// Advances to the next credential and returns its index.
    pub fn rotate(&self) -> usize {
        if self.credentials.is_empty() {
            return 0;
        }
        let next = self.cursor.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        next % self.credentials.len()
    }
}

/// Wraps calls to one quota-limited provider.
#[derive(Debug)]
pub struct RateLimiter<C> {
    name: String,
    policy: RateLimitPolicy,
    credentials: CredentialPool<C>,
    pacer: Pacer,
}

impl<C: Clone + Send + Sync> RateLimiter<C> {
    pub fn new(name: impl Into<String>, policy: RateLimitPolicy, credentials: Vec<C>) -> Self {
        Self {
            name: name.into(),
            pacer: Pacer::new(policy.inter_call_delay),
            policy,
            credentials: CredentialPool::new(credentials),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    /// Runs `op` with the current credential until it succeeds or the policy
    /// gives up. A 429 waits `Retry-After` (or backs off) and retries up to
    /// `max_retries`; other failures rotate credentials, giving each one
    /// more attempt; parse errors are returned immediately.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, UpstreamError>
    where
        F: FnMut(C) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut rate_limited = 0usize;
        let mut rotations = 0usize;
        loop {
            let credential = self
                .credentials
                .current()
                .ok_or_else(|| UpstreamError::NoCredentials(self.name.clone()))?;
            self.pacer.wait().await;

            let err = match op(credential).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.disposition() {
                RetryDisposition::WaitAndRetry => {
                    if rate_limited >= self.policy.backoff.max_retries {
                        warn!(provider = %self.name, attempts = rate_limited + 1, "rate limit retries exhausted");
                        return Err(UpstreamError::RateLimitExhausted {
                            attempts: rate_limited + 1,
                        });
                    }
                    let retry_after = match &err {
                        UpstreamError::RateLimited { retry_after } => *retry_after,
                        _ => None,
                    };
                    let delay = retry_after
                        .unwrap_or_else(|| self.policy.backoff.delay_for_attempt(rate_limited));
                    warn!(provider = %self.name, attempt = rate_limited + 1, delay_ms = delay.as_millis() as u64, "rate limited; waiting");
                    rate_limited += 1;
                    tokio::time::sleep(delay).await;
                }
                RetryDisposition::RotateCredential => {
                    rotations += 1;
                    if rotations > self.credentials.len() {
                        return Err(err);
                    }
                    let index = self.credentials.rotate();
                    debug!(provider = %self.name, credential_index = index, error = %err, "rotating credential");
                }
                RetryDisposition::NonRetryable => return Err(err),
            }
        }
    }
}
