//! Backoff policy for remote calls (S3 objects, conversion API).

use std::time::Duration;

use backon::ExponentialBuilder;

/// Runs an S3 request with backoff, logging each retry.
///
/// Errors are classified with [`is_retryable_s3_error`]; the last one
/// surfaces as `StorageError::S3`.
///
/// # Usage
/// ```ignore
/// s3_retry!(
///     operation = { client.put_object().bucket(b).key(k).send().await },
///     retry_config = self.retry_config,
///     context = format!("PUT {}", key),
/// )?;
/// ```
#[macro_export]
macro_rules! s3_retry {
    (
        operation = $op:expr,
        retry_config = $config:expr,
        context = $ctx:expr $(,)?
    ) => {{
        use backon::Retryable;
        use $crate::storage::retry::is_retryable_s3_error;

        let context = $ctx;
        (|| async { $op })
            .retry($config.backoff())
            .when(|e| is_retryable_s3_error(&e.to_string()))
            .notify(|err, dur| {
                tracing::warn!(
                    context = %context,
                    error = %err,
                    retry_in = ?dur,
                    "Blob storage request failed, retrying"
                );
            })
            .await
            .map_err(|e| $crate::contracts::StorageError::S3(e.to_string()))
    }};
}

/// Exponential backoff settings for one remote dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts after the first one; 0 disables retrying.
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Retry settings for S3, read from `CONTRACTOR_S3_*`.
    pub fn from_env() -> Self {
        Self::from_env_with_prefix("CONTRACTOR_S3")
    }

    /// Reads `{prefix}_MAX_RETRIES`, `{prefix}_RETRY_INITIAL_MS` and
    /// `{prefix}_RETRY_MAX_MS`. Missing or unparsable values keep the defaults
    /// (5 retries, 100 ms, 10 s).
    pub fn from_env_with_prefix(prefix: &str) -> Self {
        let default = Self::default();
        let read = |suffix: &str| -> Option<u64> {
            std::env::var(format!("{}_{}", prefix, suffix))
                .ok()
                .and_then(|v| v.trim().parse().ok())
        };

        Self {
            max_retries: read("MAX_RETRIES")
                .map(|n| n as usize)
                .unwrap_or(default.max_retries),
            initial_delay: read("RETRY_INITIAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.initial_delay),
            max_delay: read("RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.max_delay),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Jittered exponential backoff bounded by this config.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay.max(self.initial_delay))
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

/// Network-level failures worth another attempt against any HTTP service.
const TRANSIENT_PATTERNS: [&str; 9] = [
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "503",
    "502",
    "429",
];

/// S3 error codes that signal a temporary condition.
const S3_RETRYABLE_CODES: [&str; 5] = [
    "serviceunavailable",
    "slowdown",
    "throttlingexception",
    "requesttimeout",
    "internalerror",
];

/// True for timeouts, dropped connections, 502/503 and throttling.
pub fn is_transient_error(err: &str) -> bool {
    let err = err.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| err.contains(p))
}

/// Transient errors plus S3's own temporary error codes.
pub fn is_retryable_s3_error(err: &str) -> bool {
    if is_transient_error(err) {
        return true;
    }
    let err = err.to_lowercase();
    S3_RETRYABLE_CODES.iter().any(|code| err.contains(code))
}
