//! Classification-driven retry with exponential backoff.
//!
//! Every network call to the analytical store goes through `run_with_retry`:
//! transient failures back off and retry, permanent ones surface on the
//! first attempt.

use std::future::Future;
use std::time::Duration;

use beacon_core::Result;
use tracing::{error, warn};

/// Markers whose presence in an error message (lowercased) classifies the
/// failure as transient: timeouts, memory pressure, connection resets and
/// hangups, DNS and TLS failures, generic unavailability.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "memory",
    "overcommittracker",
    "eai_again",
    "socket hang up",
    "connection",
    "econnreset",
    "tls",
    "temporarily unavailable",
];

/// Returns true when the message carries a transient-failure marker.
pub fn is_retriable_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| msg.contains(marker))
}

/// Retry policy for store operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(2000),
        }
    }
}

/// Runs `op`, retrying transient failures with exponential backoff.
///
/// The delay before retry `i` is `base_delay * 2^(i-1)`, no jitter. Fails
/// with the current error on the first non-transient failure or once
/// attempts are exhausted.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, desc: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                error!(op = desc, attempt, error = %e, "store operation failed");

                if !is_retriable_message(&e.to_string()) || attempt == max_attempts {
                    return Err(e);
                }

                let backoff = policy.base_delay * 2u32.pow(attempt - 1);
                warn!(
                    op = desc,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }

    unreachable!("retry loop returns on the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_marker_classification() {
        assert!(is_retriable_message("Code: 159. Read timeout expired"));
        assert!(is_retriable_message("MemoryTracker: OvercommitTracker refused"));
        assert!(is_retriable_message("getaddrinfo EAI_AGAIN clickhouse"));
        assert!(is_retriable_message("Socket hang up"));
        assert!(is_retriable_message("read ECONNRESET"));
        assert!(is_retriable_message("TLS handshake failed"));
        assert!(is_retriable_message("server temporarily unavailable"));

        assert!(!is_retriable_message("Syntax error: failed at position 12"));
        assert!(!is_retriable_message("Unknown identifier 'foo'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retries_to_exhaustion() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let start = tokio::time::Instant::now();
        let result: Result<()> = run_with_retry(&policy(100), "always-transient", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::store("read ECONNRESET"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        // Backoffs: 100 + 200 + 400 + 800 = 1500ms, no delay after the last attempt.
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_fails_fast() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<()> = run_with_retry(&policy(100), "syntax-error", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::store("Syntax error: failed at position 3"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = run_with_retry(&policy(50), "flaky", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::store("connection refused"))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
