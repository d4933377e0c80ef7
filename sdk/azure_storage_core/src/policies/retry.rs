//! Retry with exponential or fixed backoff and read failover to a secondary host.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::abort;
use crate::error::{StorageError, StorageResult};
use crate::http::{query, set_url_host, Request, Response};
use crate::pipeline::{Next, Policy};

/// How the delay between tries grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageRetryPolicyType {
    /// `(2^(attempt-1) - 1) * retry_delay`, capped at `max_retry_delay`.
    #[default]
    Exponential,
    /// Always `retry_delay`.
    Fixed,
}

/// Configuration for [`StorageRetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Backoff strategy. Defaults to exponential.
    pub policy_type: StorageRetryPolicyType,
    /// Total number of tries including the first one. `1` disables retries;
    /// `0` means the default of 4.
    pub max_tries: u32,
    /// Server-side timeout hint sent with every try as `timeout=<seconds>`.
    /// Not enforced locally.
    pub try_timeout: Option<Duration>,
    /// Base delay between tries (default 4s). Clamped to `max_retry_delay`.
    pub retry_delay: Duration,
    /// Upper bound for any delay (default 120s).
    pub max_retry_delay: Duration,
    /// Host serving read-only replicas. When set, GET/HEAD/OPTIONS retries
    /// alternate between the primary and this host.
    pub secondary_host: Option<String>,
}

impl RetryOptions {
    pub const DEFAULT_MAX_TRIES: u32 = 4;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(4 * 1000);
    pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_millis(120 * 1000);
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            policy_type: StorageRetryPolicyType::Exponential,
            max_tries: Self::DEFAULT_MAX_TRIES,
            try_timeout: None,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
            max_retry_delay: Self::DEFAULT_MAX_RETRY_DELAY,
            secondary_host: None,
        }
    }
}

/// Upper bound of the random delay before a secondary read.
const SECONDARY_MAX_JITTER_MS: u64 = 1000;

/// Retries transient failures of everything below it in the pipeline.
///
/// Every try works on a fresh clone of the request handed to the policy, so
/// host swaps and query parameters never carry over between tries.
#[derive(Debug, Clone)]
pub struct StorageRetryPolicy {
    options: RetryOptions,
}

impl StorageRetryPolicy {
    pub const NAME: &'static str = "StorageRetryPolicy";

    /// Create the policy, normalizing `options`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidEndpoint`] if the secondary host cannot
    /// be used as a URL host.
    pub fn new(options: RetryOptions) -> StorageResult<Self> {
        let max_tries = if options.max_tries >= 1 {
            options.max_tries
        } else {
            RetryOptions::DEFAULT_MAX_TRIES
        };
        let try_timeout = options.try_timeout.filter(|t| !t.is_zero());
        let retry_delay = options.retry_delay.min(options.max_retry_delay);
        let secondary_host = options.secondary_host.filter(|h| !h.is_empty());

        if let Some(host) = &secondary_host {
            let mut candidate = Url::parse("https://localhost/")
                .map_err(|e| StorageError::invalid_endpoint_with_source("invalid secondary host", e))?;
            set_url_host(&mut candidate, host)?;
        }

        Ok(Self {
            options: RetryOptions {
                policy_type: options.policy_type,
                max_tries,
                try_timeout,
                retry_delay,
                max_retry_delay: options.max_retry_delay,
                secondary_host,
            },
        })
    }

    /// The normalized options in effect.
    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Delay before the try that follows `attempt`.
    pub fn retry_delay(&self, is_primary: bool, attempt: u32) -> Duration {
        if !is_primary {
            return Duration::from_millis(fastrand::u64(0..SECONDARY_MAX_JITTER_MS));
        }

        match self.options.policy_type {
            StorageRetryPolicyType::Exponential => {
                let exponent = attempt.saturating_sub(1).min(31);
                let factor = (1u32 << exponent) - 1;
                self.options
                    .retry_delay
                    .saturating_mul(factor)
                    .min(self.options.max_retry_delay)
            }
            StorageRetryPolicyType::Fixed => self.options.retry_delay,
        }
    }

    /// Decide whether the outcome of try number `attempt` deserves another try.
    pub fn should_retry(
        &self,
        is_primary: bool,
        attempt: u32,
        outcome: &StorageResult<Response>,
    ) -> bool {
        if attempt >= self.options.max_tries {
            tracing::info!(
                attempt,
                max_tries = self.options.max_tries,
                "attempts exhausted, no further try"
            );
            return false;
        }

        match outcome {
            Err(StorageError::Transport { kind, .. }) if kind.is_transient() => {
                tracing::info!(%kind, "network error, will retry");
                return true;
            }
            Err(StorageError::Parse {
                incomplete: true, ..
            }) => {
                tracing::info!("incomplete response body, likely a service timeout, will retry");
                return true;
            }
            _ => {}
        }

        match status_of(outcome) {
            Some(404) if !is_primary => {
                tracing::info!("secondary returned 404, will retry");
                true
            }
            Some(status @ (500 | 503)) => {
                tracing::info!(status, "server error, will retry");
                true
            }
            _ => false,
        }
    }

    fn is_primary_try(&self, request: &Request, secondary_has_404: bool, attempt: u32) -> bool {
        secondary_has_404
            || self.options.secondary_host.is_none()
            || !request.is_read()
            || attempt % 2 == 1
    }

    fn prepare_try(&self, request: &Request, is_primary: bool) -> StorageResult<Request> {
        let mut attempt_request = request.clone();
        if !is_primary {
            if let Some(host) = &self.options.secondary_host {
                set_url_host(attempt_request.url_mut(), host)?;
            }
        }
        if let Some(timeout) = self.options.try_timeout {
            attempt_request.set_query_parameter(query::TIMEOUT, &timeout.as_secs().to_string());
        }
        Ok(attempt_request)
    }
}

fn status_of(outcome: &StorageResult<Response>) -> Option<u16> {
    match outcome {
        Ok(response) => Some(response.status().as_u16()),
        Err(err) => err.status(),
    }
}

#[async_trait]
impl Policy for StorageRetryPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn send(&self, request: Request, next: Next<'_>) -> StorageResult<Response> {
        let mut secondary_has_404 = false;
        let mut attempt: u32 = 1;

        loop {
            let is_primary = self.is_primary_try(&request, secondary_has_404, attempt);
            let attempt_request = self.prepare_try(&request, is_primary)?;

            tracing::info!(
                attempt,
                target = if is_primary { "primary" } else { "secondary" },
                "sending try"
            );
            let outcome = next.run(attempt_request).await;

            match &outcome {
                Err(StorageError::Cancelled) => return outcome,
                Err(err) => tracing::warn!(attempt, error = %err, "try failed"),
                Ok(_) => {}
            }

            if !is_primary && status_of(&outcome) == Some(404) {
                secondary_has_404 = true;
            }

            if !self.should_retry(is_primary, attempt, &outcome) {
                return outcome;
            }

            let delay = self.retry_delay(is_primary, attempt);
            tracing::info!(delay_ms = delay.as_millis() as u64, "delaying before retry");
            abort::delay(delay, request.abort_signal()).await?;
            attempt += 1;
        }
    }
}
