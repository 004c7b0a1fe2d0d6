//! HTTP client for the external accrual service.
//!
//! One lookup is `GET {base_url}/api/orders/{number}`. Transient outcomes
//! (network failures, 5xx, rate limiting) are retried with exponential
//! backoff inside a fixed attempt budget; a `Retry-After` hint from the
//! service overrides the computed delay but still consumes an attempt.
//! Non-transient outcomes (malformed bodies, unexpected statuses) surface
//! immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use loyalty_core::EntryStatus;

/// Status vocabulary of the accrual service.
///
/// `REGISTERED` has no ledger counterpart of its own; the reconciler treats
/// it as equivalent to NEW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Invalid,
    Processing,
    Processed,
}

impl AccrualStatus {
    pub fn as_entry_status(self) -> EntryStatus {
        match self {
            AccrualStatus::Registered => EntryStatus::New,
            AccrualStatus::Invalid => EntryStatus::Invalid,
            AccrualStatus::Processing => EntryStatus::Processing,
            AccrualStatus::Processed => EntryStatus::Processed,
        }
    }
}

/// Successful accrual lookup payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AccrualVerdict {
    pub order: String,
    pub status: AccrualStatus,
    /// Awarded amount in decimal currency units; absent until processed.
    pub accrual: Option<f64>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccrualError {
    /// 429 from the service; `retry_after` carries the `Retry-After` header
    /// when it was present and parseable.
    #[error("rate limited by accrual service")]
    RateLimited { retry_after: Option<Duration> },

    /// Server-side failure (5xx).
    #[error("accrual service returned http {0}")]
    Server(u16),

    /// The request never produced a usable response.
    #[error("accrual request failed: {0}")]
    Network(String),

    /// The service answered with something outside its contract.
    #[error("unexpected accrual response: {0}")]
    Malformed(String),
}

impl AccrualError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AccrualError::RateLimited { .. } | AccrualError::Server(_) | AccrualError::Network(_)
        )
    }

    /// Explicit wait hint, when the service provided one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AccrualError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Anything the reconciler can ask for verdicts. `Ok(None)` means the order
/// is not (yet) known upstream.
#[async_trait]
pub trait VerdictSource: Send + Sync {
    async fn fetch_verdict(&self, order_id: &str) -> Result<Option<AccrualVerdict>, AccrualError>;
}

#[derive(Debug, Clone)]
pub struct AccrualClientConfig {
    pub base_url: String,
    /// Total attempts per lookup, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt after that.
    pub base_retry_delay: Duration,
    pub request_timeout: Duration,
}

impl AccrualClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            max_attempts: 3,
            base_retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Reqwest-backed accrual client.
#[derive(Debug, Clone)]
pub struct AccrualClient {
    config: AccrualClientConfig,
    http: reqwest::Client,
}

impl AccrualClient {
    pub fn new(config: AccrualClientConfig) -> Result<Self, AccrualError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AccrualError::Network(e.to_string()))?;
        Ok(Self { config, http })
    }

    async fn fetch_once(&self, order_id: &str) -> Result<Option<AccrualVerdict>, AccrualError> {
        let url = format!(
            "{}/api/orders/{}",
            self.config.base_url.trim_end_matches('/'),
            order_id
        );
        debug!(order = order_id, %url, "querying accrual service");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AccrualError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let verdict = response
                    .json::<AccrualVerdict>()
                    .await
                    .map_err(|e| AccrualError::Malformed(e.to_string()))?;
                Ok(Some(verdict))
            }
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(AccrualError::RateLimited { retry_after })
            }
            status if status.is_server_error() => Err(AccrualError::Server(status.as_u16())),
            status => Err(AccrualError::Malformed(format!("http status {status}"))),
        }
    }
}

#[async_trait]
impl VerdictSource for AccrualClient {
    async fn fetch_verdict(&self, order_id: &str) -> Result<Option<AccrualVerdict>, AccrualError> {
        let mut delay = self.config.base_retry_delay;
        let mut attempt = 1u32;

        loop {
            match self.fetch_once(order_id).await {
                Ok(verdict) => return Ok(verdict),
                Err(err) => {
                    if !err.is_transient() || attempt >= self.config.max_attempts {
                        return Err(err);
                    }

                    let wait = err.retry_after().unwrap_or(delay);
                    warn!(
                        order = order_id,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "transient accrual failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }
}
