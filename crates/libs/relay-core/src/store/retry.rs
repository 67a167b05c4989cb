//! Lock-retry wrapper and circuit breaker for catalog writes.
//!
//! SQLite allows one writer at a time. Under bursts of concurrent agent
//! activity a write can see `database is locked` even with a generous
//! busy timeout. Writes are therefore wrapped in exponential backoff with
//! ±25% jitter and a bounded attempt count, behind a circuit breaker that
//! opens after sustained failures and resets after a cooldown.

use crate::{Error, Result};
use rand::Rng;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Failures before the circuit opens.
const BREAKER_THRESHOLD: u32 = 5;

/// How long an open circuit rejects operations before a retry is allowed.
const BREAKER_RESET: Duration = Duration::from_secs(30);

/// Default retry ceiling (~6.4s total backoff before jitter).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 7;

/// Base delay for the first retry.
const BASE_DELAY: Duration = Duration::from_millis(50);

/// Whether a libsql error message indicates transient lock contention.
pub fn is_lock_error(err: &Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("database is locked")
        || msg.contains("database is busy")
        || msg.contains("database table is locked")
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Circuit breaker shared by all catalog write paths.
///
/// Opens after [`BREAKER_THRESHOLD`] consecutive lock failures; while
/// open, operations fail fast with [`Error::CircuitOpen`] instead of
/// piling onto a struggling database. Any success closes it.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an error if the circuit is currently open.
    pub fn check(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(until) = state.open_until {
            if Instant::now() < until {
                return Err(Error::CircuitOpen);
            }
            // Cooldown elapsed: half-open, allow one probe through.
            state.open_until = None;
            state.consecutive_failures = 0;
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    pub fn record_failure(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.consecutive_failures += 1;
        if state.consecutive_failures >= BREAKER_THRESHOLD {
            state.open_until = Some(Instant::now() + BREAKER_RESET);
            warn!(
                failures = state.consecutive_failures,
                cooldown_secs = BREAKER_RESET.as_secs(),
                "database circuit breaker opened"
            );
        }
    }

    /// True when the circuit is currently rejecting operations.
    pub fn is_open(&self) -> bool {
        self.check().is_err()
    }
}

/// Exponential backoff delay for the given attempt, with ±25% jitter to
/// avoid thundering-herd collisions when many agents act in unison.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_DELAY.as_millis() as u64 * 2u64.saturating_pow(attempt);
    let jitter_span = base / 4;
    let jittered = if jitter_span == 0 {
        base
    } else {
        let offset = rand::thread_rng().gen_range(0..=jitter_span * 2);
        base - jitter_span + offset
    };
    Duration::from_millis(jittered)
}

/// Run `op` with lock-retry semantics under the circuit breaker.
///
/// Non-lock errors propagate immediately. Lock errors are retried up to
/// `max_attempts` times; exhaustion surfaces as [`Error::ResourceBusy`]
/// (recoverable) and feeds the breaker.
pub async fn retry_on_db_lock<T, F, Fut>(
    breaker: &CircuitBreaker,
    operation: &str,
    max_attempts: u32,
    op: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    breaker.check()?;

    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => {
                breaker.record_success();
                return Ok(value);
            }
            Err(err) if is_lock_error(&err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    breaker.record_failure();
                    warn!(
                        operation,
                        attempts = attempt,
                        "database lock retries exhausted"
                    );
                    return Err(Error::ResourceBusy {
                        operation: operation.to_string(),
                        attempts: attempt,
                    });
                }
                let delay = backoff_delay(attempt - 1);
                debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after database lock"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn lock_err() -> Error {
        Error::InvalidInput("database is locked".to_string())
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_lock() {
        let breaker = CircuitBreaker::new();
        let calls = AtomicU32::new(0);

        let result = retry_on_db_lock(&breaker, "test_op", 5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(lock_err())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_resource_busy() {
        let breaker = CircuitBreaker::new();

        let result: Result<()> =
            retry_on_db_lock(&breaker, "always_locked", 3, || async { Err(lock_err()) }).await;

        match result {
            Err(Error::ResourceBusy { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected ResourceBusy, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_non_lock_error_propagates_immediately() {
        let breaker = CircuitBreaker::new();
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_on_db_lock(&breaker, "hard_fail", 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::NotFound) }
        })
        .await;

        assert!(matches!(result, Err(Error::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new();
        for _ in 0..BREAKER_THRESHOLD {
            breaker.record_failure();
        }
        assert!(breaker.is_open());

        let result: Result<()> =
            retry_on_db_lock(&breaker, "gated", 3, || async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::CircuitOpen)));

        breaker.record_success();
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_backoff_delay_within_jitter_band() {
        for attempt in 0..5 {
            let base = 50u64 * 2u64.pow(attempt);
            let d = backoff_delay(attempt).as_millis() as u64;
            assert!(d >= base - base / 4, "delay {} below band for {}", d, attempt);
            assert!(d <= base + base / 4, "delay {} above band for {}", d, attempt);
        }
    }
}
