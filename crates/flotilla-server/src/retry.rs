use std::future::Future;
use std::time::Duration;

use flotilla_common::config;
use log::warn;

#[derive(Debug, Clone)]
pub enum RetryStrategy {
    Fixed {
        max_count: usize,
        delay: Duration,
    },
    ExponentialBackoff {
        max_count: usize,
        initial_delay: Duration,
        max_delay: Duration,
        factor: u32,
    },
}

struct ExponentialBackoffDelay {
    delay: Duration,
    max_delay: Duration,
    factor: u32,
}

impl Iterator for ExponentialBackoffDelay {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.delay;
        self.delay = std::cmp::min(delay * self.factor, self.max_delay);
        Some(delay)
    }
}

impl RetryStrategy {
    pub fn iter(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match self {
            Self::ExponentialBackoff {
                max_count,
                initial_delay,
                max_delay,
                factor,
            } => Box::new(
                ExponentialBackoffDelay {
                    delay: *initial_delay,
                    max_delay: *max_delay,
                    factor: *factor,
                }
                .take(*max_count),
            ),
            Self::Fixed { max_count, delay } => {
                Box::new(std::iter::repeat(*delay).take(*max_count))
            }
        }
    }

    /// Run a fallible async operation, retrying it according to the strategy.
    /// The last error is returned when all retries are exhausted.
    pub async fn run<F, Fut, T, E>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: std::fmt::Display + Send,
    {
        let mut delay = self.iter();
        loop {
            match f().await {
                x @ Ok(_) => return x,
                Err(e) => {
                    warn!("retryable operation failed: {e}");
                    if let Some(delay) = delay.next() {
                        tokio::time::sleep(delay).await;
                    } else {
                        return Err(e);
                    }
                }
            }
        }
    }
}

impl From<&config::RetryStrategy> for RetryStrategy {
    fn from(config: &config::RetryStrategy) -> Self {
        match config {
            config::RetryStrategy::Fixed {
                max_count,
                delay_secs,
            } => Self::Fixed {
                max_count: *max_count,
                delay: Duration::from_secs(*delay_secs),
            },
            config::RetryStrategy::ExponentialBackoff {
                max_count,
                initial_delay_secs,
                max_delay_secs,
                factor,
            } => Self::ExponentialBackoff {
                max_count: *max_count,
                initial_delay: Duration::from_secs(*initial_delay_secs),
                max_delay: Duration::from_secs(*max_delay_secs),
                factor: *factor,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_exponential_backoff_delays() {
        let strategy = RetryStrategy::ExponentialBackoff {
            max_count: 4,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            factor: 2,
        };
        let delays: Vec<_> = strategy.iter().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(40),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let strategy = RetryStrategy::Fixed {
            max_count: 3,
            delay: Duration::from_millis(1),
        };
        let attempts = AtomicUsize::new(0);
        let out = strategy
            .run(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err("not yet")
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(out, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_returns_last_error() {
        let strategy = RetryStrategy::Fixed {
            max_count: 2,
            delay: Duration::from_millis(1),
        };
        let attempts = AtomicUsize::new(0);
        let out: Result<(), _> = strategy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("always") }
            })
            .await;
        assert_eq!(out, Err("always"));
        // One initial attempt plus two retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
