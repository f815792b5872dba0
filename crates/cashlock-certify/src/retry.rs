//! Retry with exponential backoff for external fetches.
//!
//! Only failures that report themselves as transient are retried; anything
//! else is returned immediately.

use std::future::Future;
use std::time::Duration;

/// Maximum number of retry attempts after the initial call.
pub const MAX_RETRIES: u32 = 3;

/// Base delay between retries (doubles each attempt: 200ms, 400ms, 800ms).
pub const BASE_DELAY_MS: u64 = 200;

/// Whether a failure may succeed on another attempt.
pub trait Transient {
    /// True for timeouts, dropped connections and similar.
    fn is_transient(&self) -> bool;
}

impl Transient for crate::error::CertifyError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { transient: true, .. })
    }
}

/// Call `f` until it succeeds, fails permanently, or the retries run out.
///
/// `f` is called at most `MAX_RETRIES + 1` times.
pub async fn retry_transient<T, E, F, Fut>(label: &str, f: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_base(label, Duration::from_millis(BASE_DELAY_MS), f).await
}

async fn retry_with_base<T, E, F, Fut>(label: &str, base: Duration, f: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    for attempt in 0..MAX_RETRIES {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() => {
                let delay = base * 2u32.pow(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = MAX_RETRIES,
                    "{label} failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    // Final attempt, no more retries.
    f().await
}
