//! Retry / fault classification (spec.md §4.G).
//!
//! This crate has no backend-specific knowledge: it classifies and retries
//! whatever implements [`Fault`], which the `store` crate's `Error` type
//! implements for its own variants. The operation engine is the only caller
//! that threads a [`RetryPolicy`] through every phase.

use std::{future::Future, time::Duration};

use logger::Logger;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Transient,
    Terminal,
}

/// Implemented by error types the retry driver can classify. `store::Error`
/// implements this in terms of its own `ResultCode::is_transient`.
pub trait Fault: std::fmt::Display {
    fn fault_class(&self) -> FaultClass;
}

/// A pluggable retry policy: backoff curve, attempt cap, and (by default)
/// fault classification delegated to [`Fault::fault_class`].
pub trait RetryPolicy: Send + Sync {
    fn classify(&self, err: &dyn Fault) -> FaultClass {
        err.fault_class()
    }

    fn backoff(&self, attempt: u32) -> Duration;

    fn max_attempts(&self) -> u32;
}

/// Exponential backoff with jitter, bounded by `cap` and `max_attempts`.
/// This is the default policy handed to `ShardMapManagerConfig` when the
/// caller doesn't supply one of their own.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    /// Fraction of the computed backoff to randomize, in `[0.0, 1.0]`.
    pub jitter_fraction: f64,
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        ExponentialBackoffPolicy {
            base: Duration::from_millis(50),
            cap: Duration::from_secs(5),
            max_attempts: 5,
            jitter_fraction: 0.2,
        }
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.min(32));
        let capped = exp.min(self.cap.as_millis());
        let capped = capped as u64;
        let jitter_span = (capped as f64 * self.jitter_fraction) as u64;
        let jitter = if jitter_span == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_span)
        };
        Duration::from_millis(capped.saturating_sub(jitter_span / 2).saturating_add(jitter))
            .min(self.cap)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Drives one phase of the operation engine to completion: retries as long
/// as the policy classifies each failure as [`FaultClass::Transient`] and
/// the attempt cap hasn't been hit, otherwise returns the terminal error
/// immediately (spec.md §4.G, §5 "phases are designed idempotent for that
/// purpose").
pub async fn retry<F, Fut, T, E>(
    policy: &dyn RetryPolicy,
    phase: &'static str,
    log: &Logger,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Fault,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                let class = policy.classify(&err);
                attempt += 1;
                if class != FaultClass::Transient || attempt >= policy.max_attempts() {
                    return Err(err);
                }
                let delay = policy.backoff(attempt);
                logger::warn!(log, "retrying phase after transient fault";
                    "phase" => phase, "attempt" => attempt, "delay_ms" => delay.as_millis() as u64, "err" => %err);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeErr(FaultClass);
    impl std::fmt::Display for FakeErr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fake")
        }
    }
    impl Fault for FakeErr {
        fn fault_class(&self) -> FaultClass {
            self.0
        }
    }

    #[test]
    fn backoff_is_bounded_by_cap() {
        let policy = ExponentialBackoffPolicy::default();
        for attempt in 0..40 {
            assert!(policy.backoff(attempt) <= policy.cap);
        }
    }

    #[tokio::test]
    async fn terminal_fault_returns_immediately() {
        let policy = ExponentialBackoffPolicy::default();
        let log = logger::nop_logger();
        let mut calls = 0;
        let result = retry(&policy, "test", &log, || {
            calls += 1;
            async { Err::<(), _>(FakeErr(FaultClass::Terminal)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn transient_fault_retries_until_cap() {
        let policy = ExponentialBackoffPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            max_attempts: 3,
            jitter_fraction: 0.0,
        };
        let log = logger::nop_logger();
        let mut calls = 0;
        let result = retry(&policy, "test", &log, || {
            calls += 1;
            async { Err::<(), _>(FakeErr(FaultClass::Transient)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, policy.max_attempts);
    }
}
