// =============================================================================
// Error taxonomy — typed pipeline errors with retry/fatal classification
// =============================================================================

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// The error kinds a pipeline component can produce. Call sites that need
/// ad-hoc context (a file path, a symbol, a stage name) wrap these in
/// `anyhow::Error` rather than growing the enum with one-off variants.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("venue request failed (transient): {0}")]
    TransientVenue(String),

    #[error("venue request failed (permanent): {0}")]
    PermanentVenue(String),

    #[error("precision mismatch: {0}")]
    Precision(String),

    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether `with_retry` should attempt this call again. `QueueFull` is
    /// handled by the fan-out server blocking the producer or dropping a
    /// subscriber, never by retrying with backoff.
    pub fn retryable(&self) -> bool {
        matches!(self, PipelineError::TransientVenue(_))
    }

    /// Whether the error indicates the calling component should stop rather
    /// than continue with degraded behavior.
    pub fn fatal(&self) -> bool {
        matches!(self, PipelineError::Config(_))
    }
}

/// Exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`.
fn backoff_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let scaled = base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    scaled.min(max_delay)
}

/// Run `op`, retrying on `PipelineError::retryable()` failures up to
/// `max_attempts` times total, with exponential backoff between attempts.
/// The first attempt counts toward `max_attempts`.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.retryable() && attempt + 1 < max_attempts => {
                let delay = backoff_delay(attempt, base_delay, max_delay);
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(PipelineError::TransientVenue("timeout".into()).retryable());
        assert!(!PipelineError::QueueFull("c5".into()).retryable());
        assert!(!PipelineError::PermanentVenue("404".into()).retryable());
        assert!(!PipelineError::Precision("tick mismatch".into()).retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(PipelineError::Config("missing api key".into()).fatal());
        assert!(!PipelineError::TransientVenue("timeout".into()).fatal());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(2);
        assert_eq!(backoff_delay(0, base, max), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, base, max), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, base, max), Duration::from_millis(400));
        assert_eq!(backoff_delay(10, base, max), max);
    }

    #[tokio::test]
    async fn with_retry_succeeds_after_transient_failures() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = with_retry(
            "test-op",
            3,
            Duration::from_millis(1),
            Duration::from_millis(10),
            || {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(PipelineError::TransientVenue("not yet".into()))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_gives_up_on_permanent_error() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), PipelineError> = with_retry(
            "test-op",
            5,
            Duration::from_millis(1),
            Duration::from_millis(10),
            || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(PipelineError::PermanentVenue("404".into())) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_retry_exhausts_max_attempts() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), PipelineError> = with_retry(
            "test-op",
            3,
            Duration::from_millis(1),
            Duration::from_millis(10),
            || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(PipelineError::TransientVenue("still failing".into())) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
