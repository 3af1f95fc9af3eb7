//! Exponential-backoff polling.
//!
//! Every blocking wait in the engine goes through [`Backoff::retry`]: a
//! probe is invoked until it succeeds, the attempt budget runs out, or the
//! next sleep would overrun the elapsed budget. Any probe error means
//! "not yet"; deciding whether an operation is worth polling at all is
//! the caller's job.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ReplaceError, ReplaceResult};

/// Polling policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay after the first failed probe.
    pub initial_interval: Duration,
    /// Cap on a single delay.
    pub max_interval: Duration,
    /// Wall-clock budget across all attempts.
    pub max_elapsed: Duration,
    /// Probe invocations allowed, including the first.
    pub max_attempts: u32,
    /// Growth factor applied to the delay after each failure.
    pub multiplier: f64,
}

impl Backoff {
    /// Slow-moving convergence: instance stop/terminate and group sizing.
    ///
    /// The 300s elapsed budget is the binding limit; with these intervals
    /// it runs out after about a dozen probes. The 30-attempt cap only
    /// comes into play once the intervals are overridden to be shorter.
    pub fn long() -> Self {
        Self {
            initial_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(300),
            max_attempts: 30,
            multiplier: 1.5,
        }
    }

    /// Fast-moving convergence: drains and workload placement.
    pub fn short() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(600),
            max_attempts: 100,
            multiplier: 1.5,
        }
    }

    /// Delay to use after `interval`.
    pub fn next_interval(&self, interval: Duration) -> Duration {
        interval.mul_f64(self.multiplier.max(1.0)).min(self.max_interval)
    }

    /// Poll `probe` until it succeeds or the budget is spent.
    ///
    /// Returns `TimedOut` with the last probe error when the attempt or
    /// elapsed budget is exhausted, and `Cancelled` as soon as `shutdown`
    /// flips to `true`.
    pub async fn retry<T, E, F, Fut>(
        &self,
        what: &str,
        shutdown: &watch::Receiver<bool>,
        mut probe: F,
    ) -> ReplaceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut shutdown = shutdown.clone();
        let started = Instant::now();
        let mut interval = self.initial_interval;
        let mut attempts = 0u32;

        loop {
            if *shutdown.borrow() {
                return Err(ReplaceError::Cancelled {
                    what: what.to_string(),
                });
            }

            attempts += 1;
            let err = match probe().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(%what, attempts, "converged");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let elapsed = started.elapsed();
            if attempts >= self.max_attempts || elapsed + interval > self.max_elapsed {
                warn!(%what, attempts, elapsed_secs = elapsed.as_secs(), error = %err, "gave up waiting");
                return Err(ReplaceError::TimedOut {
                    what: what.to_string(),
                    attempts,
                    elapsed,
                    last_error: err.to_string(),
                });
            }

            debug!(
                %what,
                attempt = attempts,
                delay_ms = interval.as_millis() as u64,
                error = %err,
                "not converged yet, backing off"
            );
            if sleep_or_shutdown(interval, &mut shutdown).await {
                return Err(ReplaceError::Cancelled {
                    what: what.to_string(),
                });
            }
            interval = self.next_interval(interval);
        }
    }
}

/// Sleep for `delay`; returns `true` if shutdown was signalled first.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => return true,
                Ok(()) => {}
                Err(_) => {
                    // Sender gone: nobody can cancel us any more.
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}

/// The two polling profiles a run uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffProfiles {
    pub long: Backoff,
    pub short: Backoff,
}

impl Default for BackoffProfiles {
    fn default() -> Self {
        Self {
            long: Backoff::long(),
            short: Backoff::short(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quiet() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[test]
    fn intervals_grow_and_cap() {
        let b = Backoff::long();
        let mut interval = b.initial_interval;
        interval = b.next_interval(interval);
        assert_eq!(interval, Duration::from_secs(15));
        for _ in 0..10 {
            interval = b.next_interval(interval);
        }
        assert_eq!(interval, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_a_few_attempts() {
        let (_tx, rx) = quiet();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = Backoff::short()
            .retry("probe", &rx, || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("attempt {n}")) } else { Ok(n) }
            })
            .await
            .unwrap();
        assert_eq!(result, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_budget_bounds_probe_calls() {
        let (_tx, rx) = quiet();
        let calls = Arc::new(AtomicU32::new(0));
        let backoff = Backoff {
            max_attempts: 4,
            ..Backoff::short()
        };
        let err = backoff
            .retry("probe", &rx, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("never")
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            ReplaceError::TimedOut {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "never");
            }
            other => panic!("expected TimedOut, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_budget_is_never_overrun() {
        let (_tx, rx) = quiet();
        let backoff = Backoff::long();
        let started = Instant::now();
        let err = backoff
            .retry("probe", &rx, || async { Err::<(), _>("not yet") })
            .await
            .unwrap_err();

        assert!(started.elapsed() <= backoff.max_elapsed);
        match err {
            ReplaceError::TimedOut { attempts, .. } => assert!(attempts < backoff.max_attempts),
            other => panic!("expected TimedOut, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_a_pending_wait() {
        let (tx, rx) = quiet();
        let handle = tokio::spawn(async move {
            Backoff::long()
                .retry("probe", &rx, || async { Err::<(), _>("not yet") })
                .await
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ReplaceError::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_does_not_cancel() {
        let (tx, rx) = quiet();
        drop(tx);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = Backoff::short()
            .retry("probe", &rx, || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 { Err("first") } else { Ok(7) }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
