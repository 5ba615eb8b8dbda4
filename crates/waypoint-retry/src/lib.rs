//! Request lifecycle orchestration: retry-reason classification, pluggable
//! backoff strategies, deadline enforcement, and per-endpoint circuit
//! breaking.

mod breaker;
mod reason;
mod strategy;

pub use breaker::{CircuitBreaker, CircuitState};
pub use reason::RetryReason;
pub use strategy::{BestEffort, FailFast, RetryStrategy};

use std::time::{Duration, Instant};

/// Outcome of a single dispatch attempt, as classified by the caller before
/// handing control back to [`drive`].
pub enum Outcome<T, E> {
    Success(T),
    Terminal(E),
    Retriable(RetryReason, E),
}

#[derive(Debug, thiserror::Error)]
pub enum TimeoutKind {
    /// No bytes describing this operation are known to have reached the
    /// server; safe to report as a plain timeout.
    #[error("operation timed out without reaching the server")]
    Unambiguous,
    /// The operation may have been applied server-side before the channel
    /// was lost; callers must not assume it did not happen.
    #[error("operation timed out after possibly reaching the server")]
    Ambiguous,
}

/// Drive `attempt` to completion, applying `strategy`'s backoff decisions
/// between retriable failures until `deadline` elapses. `attempt` is called
/// once per try and is expected to itself perform the encode/dispatch/decode
/// round trip and classify its own result into an [`Outcome`].
pub async fn drive<T, E, S, F, Fut>(
    mut strategy: S,
    deadline: Instant,
    idempotent: bool,
    mut attempt: F,
) -> Result<T, RetryOutcome<E>>
where
    S: RetryStrategy,
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Outcome<T, E>>,
{
    let mut attempt_number = 0u32;
    loop {
        if Instant::now() >= deadline {
            return Err(RetryOutcome::TimedOut(TimeoutKind::Unambiguous));
        }
        attempt_number += 1;
        match attempt(attempt_number).await {
            Outcome::Success(value) => return Ok(value),
            Outcome::Terminal(err) => return Err(RetryOutcome::Failed(err)),
            Outcome::Retriable(reason, err) => {
                if !idempotent && !reason.allows_non_idempotent_retry() {
                    return Err(RetryOutcome::Failed(err));
                }
                match strategy.next_backoff(reason, attempt_number) {
                    Some(wait) if Instant::now() + wait < deadline => {
                        tracing::warn!(?reason, attempt_number, ?wait, "retrying after backoff");
                        tokio::time::sleep(wait).await;
                    }
                    Some(_) | None => {
                        let kind = if reason.proves_non_application() {
                            TimeoutKind::Unambiguous
                        } else {
                            TimeoutKind::Ambiguous
                        };
                        return Err(RetryOutcome::TimedOut(kind));
                    }
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryOutcome<E> {
    #[error("request failed")]
    Failed(E),
    #[error(transparent)]
    TimedOut(#[from] TimeoutKind),
}

/// Convenience: a deadline computed from "now" plus a per-service timeout.
pub fn deadline_from_timeout(timeout: Duration) -> Instant {
    Instant::now() + timeout
}
