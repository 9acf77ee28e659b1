//! Retry/backoff executor used to open provider streams.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::options::AbortSignal;

/// Normalized failure category used for retry decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RateLimit,
    Timeout,
    Network,
    ServiceUnavailable,
    Validation,
    Auth,
    Aborted,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::Aborted => "aborted",
            Self::Unknown => "unknown",
        }
    }

    /// Default retryability when the policy has no `should_retry` predicate.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Timeout | Self::Network | Self::ServiceUnavailable
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies free-form error text (case-insensitive substring heuristics).
pub fn classify_message(message: &str) -> ErrorCode {
    let lower = message.to_ascii_lowercase();
    let has = |needle: &str| lower.contains(needle);
    if has("rate") && has("limit") {
        ErrorCode::RateLimit
    } else if has("timeout") || has("timed out") {
        ErrorCode::Timeout
    } else if has("network") || has("fetch") {
        ErrorCode::Network
    } else if has("auth") || has("unauthorized") || has("forbidden") {
        ErrorCode::Auth
    } else if has("invalid") || has("schema") || has("validation") {
        ErrorCode::Validation
    } else if has("overloaded") || has("unavailable") {
        ErrorCode::ServiceUnavailable
    } else if has("aborted") {
        ErrorCode::Aborted
    } else {
        ErrorCode::Unknown
    }
}

/// Errors the executor knows how to classify.
///
/// The default implementation falls back to [`classify_message`] on the
/// error's display text.
pub trait Retryable: fmt::Display {
    fn error_code(&self) -> ErrorCode {
        classify_message(&self.to_string())
    }

    /// Server-provided minimum wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn status_code(&self) -> Option<u16> {
        None
    }
}

impl Retryable for ProviderError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::RateLimited { .. } => ErrorCode::RateLimit,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Network { .. } => ErrorCode::Network,
            Self::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            Self::AuthenticationFailed { .. } => ErrorCode::Auth,
            Self::InvalidRequest { .. } | Self::ContentFiltered { .. } => ErrorCode::Validation,
            Self::Aborted { .. } => ErrorCode::Aborted,
            Self::Protocol { .. } | Self::Unknown { .. } => classify_message(self.message()),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn status_code(&self) -> Option<u16> {
        ProviderError::status_code(self)
    }
}

impl Retryable for String {}
impl Retryable for &str {}

/// Error re-raised by [`execute_with_retry`] once retries are exhausted or
/// the failure is not retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct NormalizedError {
    pub code: ErrorCode,
    pub message: String,
    /// Number of times the operation was invoked.
    pub attempts: u32,
    pub status_code: Option<u16>,
}

impl NormalizedError {
    fn from_error<E: Retryable>(err: &E, attempts: u32) -> Self {
        Self {
            code: err.error_code(),
            message: err.to_string(),
            attempts,
            status_code: err.status_code(),
        }
    }

    pub(crate) fn aborted(attempts: u32) -> Self {
        Self {
            code: ErrorCode::Aborted,
            message: "Request was aborted".into(),
            attempts,
            status_code: None,
        }
    }
}

/// Caller override for retryability: `(error, attempt) -> retry?`.
pub type RetryPredicate = Arc<dyn Fn(&NormalizedError, u32) -> bool + Send + Sync>;

/// Exponential backoff policy.
#[derive(Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total invocations allowed, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for computed backoff. Unbounded when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(skip)]
    pub should_retry: Option<RetryPredicate>,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(default_max_attempts(), default_base_delay_ms())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("should_retry", &self.should_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::exponential(1, default_base_delay_ms())
    }

    pub fn exponential(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: None,
            should_retry: None,
        }
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    pub fn with_should_retry(
        mut self,
        predicate: impl Fn(&NormalizedError, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Same policy limited to one attempt (used when a cancellation signal is
    /// attached to the call).
    pub fn single_attempt(mut self) -> Self {
        self.max_attempts = 1;
        self
    }

    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay after failed attempt `attempt` (counting from 1):
    /// `base * 2^(attempt-1)`, capped at `max_delay_ms`.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1_u64 << exp);
        let capped = match self.max_delay_ms {
            Some(max) => delay.min(max),
            None => delay,
        };
        Duration::from_millis(capped)
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay_ms {
            Some(max) => delay.min(Duration::from_millis(max)),
            None => delay,
        }
    }

    fn allows_retry(&self, err: &NormalizedError, attempt: u32) -> bool {
        if err.code == ErrorCode::Aborted || !self.can_retry(attempt) {
            return false;
        }
        match &self.should_retry {
            Some(predicate) => predicate(err, attempt),
            None => err.code.is_retryable(),
        }
    }
}

/// Runs `operation` under `policy`.
///
/// The closure receives the 1-based attempt number. A signal that is already
/// aborted short-circuits before the first invocation; one that fires during
/// backoff ends the loop with an `aborted` error.
pub async fn execute_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    signal: Option<&AbortSignal>,
    mut operation: F,
) -> Result<T, NormalizedError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut attempt = 0;
    loop {
        if signal.is_some_and(AbortSignal::is_aborted) {
            return Err(NormalizedError::aborted(attempt));
        }
        attempt += 1;
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let normalized = NormalizedError::from_error(&err, attempt);
        if !policy.allows_retry(&normalized, attempt) {
            debug!(
                code = %normalized.code,
                attempt,
                "giving up after non-retryable or final failure"
            );
            return Err(normalized);
        }

        let backoff = policy.backoff_duration(attempt);
        let delay = policy.cap(err.retry_after().map_or(backoff, |hint| hint.max(backoff)));
        warn!(
            code = %normalized.code,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %normalized.message,
            "retrying after retryable failure"
        );
        match signal {
            Some(signal) => {
                tokio::select! {
                    _ = signal.aborted() => return Err(NormalizedError::aborted(attempt)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::AbortHandle;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn message_heuristics() {
        assert_eq!(classify_message("Rate limit exceeded"), ErrorCode::RateLimit);
        assert_eq!(classify_message("request timed out"), ErrorCode::Timeout);
        assert_eq!(classify_message("fetch failed"), ErrorCode::Network);
        assert_eq!(classify_message("403 Forbidden"), ErrorCode::Auth);
        assert_eq!(classify_message("schema mismatch"), ErrorCode::Validation);
        assert_eq!(classify_message("something odd"), ErrorCode::Unknown);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::exponential(5, 100).with_max_delay_ms(350);
        assert_eq!(policy.backoff_duration(1).as_millis(), 100);
        assert_eq!(policy.backoff_duration(2).as_millis(), 200);
        assert_eq!(policy.backoff_duration(3).as_millis(), 350);
        let unbounded = RetryPolicy::exponential(5, 100);
        assert_eq!(unbounded.backoff_duration(4).as_millis(), 800);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_retried_until_attempts_run_out() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::exponential(3, 250);
        let started = tokio::time::Instant::now();
        let result: Result<(), _> = execute_with_retry(&policy, None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("rate limit exceeded") }
        })
        .await;
        let err = result.expect_err("always fails");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.code, ErrorCode::RateLimit);
        assert_eq!(err.attempts, 3);
        assert!(started.elapsed() >= Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::exponential(5, 10);
        let err = execute_with_retry(&policy, None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("401 unauthorized") }
        })
        .await
        .expect_err("auth failure");
        assert_eq!(err.code, ErrorCode::Auth);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_overrides_default_retryability() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::exponential(2, 10).with_should_retry(|_, _| true);
        let _ = execute_with_retry(&policy, None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("schema invalid") }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn aborted_signal_skips_the_operation() {
        let handle = AbortHandle::new();
        handle.abort();
        let signal = handle.signal();
        let calls = AtomicU32::new(0);
        let err = execute_with_retry(&RetryPolicy::default(), Some(&signal), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        })
        .await
        .expect_err("aborted");
        assert_eq!(err.code, ErrorCode::Aborted);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let value = execute_with_retry(&RetryPolicy::exponential(3, 50), None, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 1 {
                    Err(ProviderError::network("openai", "connection reset"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .expect("second attempt succeeds");
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
