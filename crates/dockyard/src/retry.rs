// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded retry with pluggable backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// Retry right away.
    Immediate,
    /// Same delay before every retry.
    Fixed(Duration),
    /// Delay doubles after each retry, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    fn initial_delay(&self) -> Duration {
        match self {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { initial, .. } => *initial,
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        match self {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { max, .. } => std::cmp::min(current * 2, *max),
        }
    }
}

/// Retry an operation up to `max_retries` times.
///
/// Total attempts = 1 + `max_retries`. Errors for which `is_retryable`
/// returns false are returned immediately.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    max_retries: u32,
    backoff: Backoff,
    description: &str,
    mut attempt_fn: F,
    mut is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: FnMut(&E) -> bool,
{
    let mut delay = backoff.initial_delay();
    let mut attempt = 0;

    loop {
        match attempt_fn().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if attempt >= max_retries || !is_retryable(&e) {
                    return Err(e);
                }
                attempt += 1;
                warn!(
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    description,
                    error = %e,
                    "Attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                delay = backoff.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, String> = retry_with_backoff(
            3,
            Backoff::Immediate,
            "flaky op",
            move || {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                async move { if n < 3 { Err(format!("fail {n}")) } else { Ok(n) } }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), String> = retry_with_backoff(
            2,
            Backoff::Fixed(Duration::from_millis(1)),
            "always failing",
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), String> = retry_with_backoff(
            5,
            Backoff::Immediate,
            "fatal",
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
            |e| e != "fatal",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_is_capped() {
        let start = tokio::time::Instant::now();
        let result: Result<(), String> = retry_with_backoff(
            4,
            Backoff::Exponential {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(25),
            },
            "capped",
            || async { Err("nope".to_string()) },
            |_| true,
        )
        .await;
        assert!(result.is_err());
        // 10 + 20 + 25 + 25
        assert_eq!(start.elapsed(), Duration::from_millis(80));
    }
}
