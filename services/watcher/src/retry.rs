//! Retrying external calls with backoff and cooperative shutdown.
//!
//! Every call site (fetch, persist, notify) goes through a [`Retrier`]
//! carrying the shared [`RetryPolicy`]. The call site decides which of its
//! errors are worth retrying; the retrier decides how long to wait and
//! stops waiting as soon as shutdown is requested.

use std::fmt::Display;
use std::future::Future;

use corpwatch_reconcile::RetryPolicy;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Why a retried call gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The call failed with an error the call site does not retry.
    Fatal { attempts: u32, error: E },

    /// Every allowed attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },

    /// Shutdown was requested before the call succeeded.
    Cancelled,
}

/// When a shutdown request may cut a call short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Abandon the in-flight call as well as backoff waits.
    Anytime,

    /// Let an in-flight call finish; only backoff waits are interrupted.
    BetweenAttempts,
}

/// Resolves once shutdown has been requested. Never resolves if the
/// shutdown sender is gone without having requested it.
pub async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Runs calls under a retry policy.
#[derive(Debug, Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy, shutdown: watch::Receiver<bool>) -> Self {
        Self { policy, shutdown }
    }

    /// Returns true if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Call `call` until it succeeds, fails fatally, runs out of attempts,
    /// or shutdown is requested. `call` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        operation: &'static str,
        interrupt: Interrupt,
        is_retryable: P,
        mut call: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 1u32;

        loop {
            if self.is_shutdown() {
                return Err(RetryError::Cancelled);
            }

            let result = match interrupt {
                Interrupt::Anytime => {
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(self.shutdown.clone()) => {
                            debug!(operation, attempt, "Call abandoned for shutdown");
                            return Err(RetryError::Cancelled);
                        }
                        result = call(attempt) => result,
                    }
                }
                Interrupt::BetweenAttempts => call(attempt).await,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !is_retryable(&error) {
                return Err(RetryError::Fatal {
                    attempts: attempt,
                    error,
                });
            }

            if !self.policy.should_retry(attempt) {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                operation,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Call failed, backing off"
            );

            tokio::select! {
                biased;
                _ = shutdown_requested(self.shutdown.clone()) => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let (_tx, rx) = watch::channel(false);
        let retrier = Retrier::new(policy(5), rx);
        let calls = AtomicU32::new(0);

        let result: Result<u32, RetryError<String>> = retrier
            .run("test", Interrupt::Anytime, |_| true, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let (_tx, rx) = watch::channel(false);
        let retrier = Retrier::new(policy(3), rx);

        let result: Result<(), RetryError<&str>> = retrier
            .run("test", Interrupt::Anytime, |_| true, |_| async { Err("down") })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: "down"
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let (_tx, rx) = watch::channel(false);
        let retrier = Retrier::new(policy(5), rx);
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<&str>> = retrier
            .run("test", Interrupt::Anytime, |e| *e != "fatal", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::Fatal {
                attempts: 1,
                error: "fatal"
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_reports_its_attempt() {
        let (_tx, rx) = watch::channel(false);
        let retrier = Retrier::new(policy(5), rx);

        let result: Result<(), RetryError<&str>> = retrier
            .run("test", Interrupt::Anytime, |e| *e != "fatal", |attempt| async move {
                if attempt < 3 {
                    Err("flaky")
                } else {
                    Err("fatal")
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::Fatal {
                attempts: 3,
                error: "fatal"
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let (tx, rx) = watch::channel(false);
        let retrier = Retrier::new(
            RetryPolicy {
                base_delay: Duration::from_secs(3600),
                max_delay: Duration::from_secs(3600),
                ..policy(5)
            },
            rx,
        );

        let handle = tokio::spawn(async move {
            retrier
                .run("test", Interrupt::BetweenAttempts, |_| true, |_| async {
                    Err::<(), _>("down")
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_call() {
        let (tx, rx) = watch::channel(false);
        let retrier = Retrier::new(policy(5), rx);

        let handle = tokio::spawn(async move {
            retrier
                .run("test", Interrupt::Anytime, |_| true, |_| async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok::<_, &str>(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        assert!(matches!(handle.await.unwrap(), Err(RetryError::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropped_sender_never_cancels() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let retrier = Retrier::new(policy(2), rx);

        let result: Result<u8, RetryError<&str>> = retrier
            .run("test", Interrupt::Anytime, |_| true, |_| async { Ok(7) })
            .await;
        assert_eq!(result.unwrap(), 7);
    }
}
