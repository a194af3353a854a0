//! Rate-Limited Executor: `execute(fn)` awaits a slot, invokes `fn`,
//! releases the slot, and retries on a retryable failure with capped
//! jittered exponential backoff.
//!
//! Two independent gates guard slot acquisition: an in-flight counter
//! (`maxConcurrent`) and a sliding-window request counter
//! (`requestsPerMinute`). Both critical sections are short mutex-guarded
//! sections with no I/O performed while held, per the concurrency model.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimiterConfig;
use crate::error::PipelineError;

const CONCURRENCY_POLL: Duration = Duration::from_millis(100);
const WINDOW_EXIT_BUFFER: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct RateLimitedExecutor {
    max_concurrent: usize,
    requests_per_minute: usize,
    window: Duration,
    initial_delay_ms: u64,
    backoff_multiplier: f64,
    max_retries: u32,
    in_flight: Arc<AtomicUsize>,
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
}

impl RateLimitedExecutor {
    pub fn new(config: &RateLimiterConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            requests_per_minute: config.requests_per_minute,
            window: Duration::from_secs(60),
            initial_delay_ms: config.initial_delay_ms,
            backoff_multiplier: config.backoff_multiplier,
            max_retries: config.max_retries,
            in_flight: Arc::new(AtomicUsize::new(0)),
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    #[cfg(test)]
    fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Acquire a slot: blocks until both gates pass, then records the
    /// timestamp and bumps the in-flight counter. Returns a guard that
    /// releases the in-flight slot on drop.
    async fn acquire(&self) -> SlotGuard {
        loop {
            if self.in_flight.load(Ordering::SeqCst) < self.max_concurrent {
                break;
            }
            tokio::time::sleep(CONCURRENCY_POLL).await;
        }

        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();
                while let Some(front) = timestamps.front() {
                    if now.duration_since(*front) > self.window {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }
                if timestamps.len() < self.requests_per_minute {
                    timestamps.push_back(now);
                    None
                } else {
                    let earliest = *timestamps.front().unwrap();
                    Some((earliest + self.window) - now + WINDOW_EXIT_BUFFER)
                }
            };
            match wait {
                None => break,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        SlotGuard {
            in_flight: self.in_flight.clone(),
        }
    }

    /// Run `f`, retrying on retryable failures with capped jittered
    /// exponential backoff. `on_retry(attempt, &error)` is called before
    /// each retry sleep.
    pub async fn execute<F, Fut, T>(
        &self,
        mut f: F,
        mut on_retry: impl FnMut(u32, &PipelineError),
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 0u32;
        loop {
            let guard = self.acquire().await;
            let result = f().await;
            drop(guard);

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    on_retry(attempt, &err);
                    let delay = self.backoff_delay(attempt, &err);
                    debug!(attempt, ?delay, "retrying after retryable error");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!("exhausted {} retries: {err}", self.max_retries);
                    }
                    return Err(err);
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32, err: &PipelineError) -> Duration {
        let base = if matches!(err, PipelineError::RateLimited(_)) {
            self.initial_delay_ms as f64 * 3.0
        } else {
            self.initial_delay_ms as f64
        };
        let raw = base * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = raw.min(60_000.0);
        let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
        let jittered = (capped * (1.0 + jitter)).max(0.0);
        Duration::from_millis(jittered as u64)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

struct SlotGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn test_config() -> RateLimiterConfig {
        RateLimiterConfig {
            max_concurrent: 2,
            requests_per_minute: 100,
            backoff_multiplier: 2.0,
            max_retries: 3,
            initial_delay_ms: 10,
        }
    }

    #[tokio::test]
    async fn never_exceeds_max_concurrent() {
        let executor = RateLimitedExecutor::new(&test_config());
        let max_observed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let executor = executor.clone();
            let max_observed = max_observed.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .execute(
                        || {
                            let max_observed = max_observed.clone();
                            let executor = executor.clone();
                            async move {
                                let current = executor.in_flight_count();
                                max_observed.fetch_max(current, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(20)).await;
                                Ok::<(), PipelineError>(())
                            }
                        },
                        |_, _| {},
                    )
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn sliding_window_limits_starts_per_window() {
        let mut config = test_config();
        config.max_concurrent = 10;
        config.requests_per_minute = 2;
        let executor = RateLimitedExecutor::new(&config).with_window(Duration::from_millis(200));

        let started = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let executor = executor.clone();
            let started = started.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .execute(
                        || {
                            let started = started.clone();
                            async move {
                                started.fetch_add(1, Ordering::SeqCst);
                                Ok::<(), PipelineError>(())
                            }
                        },
                        |_, _| {},
                    )
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.load(Ordering::SeqCst) <= 2);
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(started.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_error_propagates_immediately() {
        let executor = RateLimitedExecutor::new(&test_config());
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result = executor
            .execute(
                move || {
                    let attempts = attempts_clone.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(PipelineError::Validation("bad input".into()))
                    }
                },
                |_, _| {},
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_error_retries_up_to_max() {
        let executor = RateLimitedExecutor::new(&test_config());
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result = executor
            .execute(
                move || {
                    let attempts = attempts_clone.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(PipelineError::Overloaded("529".into()))
                    }
                },
                |_, _| {},
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4); // initial + 3 retries
    }
}
