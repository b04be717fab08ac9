//! Token-bucket rate limiting with a bounded wait queue.

use crate::defaults;
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Rate limiter tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Sustained call rate in calls per minute.
    pub rate_per_minute: u32,
    /// Calls allowed immediately at start before the sustained rate
    /// applies.
    pub burst: u32,
    /// Callers allowed to wait for a token. Submissions beyond this depth
    /// fail with `RateLimited` instead of queueing.
    pub queue_depth: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rate_per_minute: defaults::RATE_LIMIT_PER_MINUTE,
            burst: 1,
            queue_depth: defaults::RATE_QUEUE_DEPTH,
        }
    }
}

impl RateLimiterConfig {
    /// A zero rate would make the refill interval undefined.
    pub fn validate(&self) -> Result<()> {
        if self.rate_per_minute == 0 {
            return Err(PipelineError::InvalidConfiguration {
                key: "rate_per_minute".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter shared across concurrent callers.
///
/// Tokens replenish at the configured per-minute rate. A caller without a
/// token waits in a bounded queue; when the queue is full the call fails
/// immediately, which is the pipeline's translation backpressure point.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Arc<Mutex<Bucket>>,
    queue_slots: Arc<Semaphore>,
    rate_per_sec: f64,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let rate_per_sec = config.rate_per_minute as f64 / 60.0;
        let bucket = Bucket {
            tokens: config.burst as f64,
            last_refill: Instant::now(),
        };
        Self {
            queue_slots: Arc::new(Semaphore::new(config.queue_depth)),
            bucket: Arc::new(Mutex::new(bucket)),
            rate_per_sec,
            config,
        }
    }

    /// Acquires one token, waiting in the bounded queue if none is
    /// available. Fails with `RateLimited` when the queue is full.
    pub async fn acquire(&self) -> Result<()> {
        let _slot = self
            .queue_slots
            .try_acquire()
            .map_err(|_| PipelineError::RateLimited {
                queue_depth: self.config.queue_depth,
            })?;

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().map_err(|_| {
                    PipelineError::Other("rate limiter state poisoned".to_string())
                })?;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                // Time until one full token accumulates.
                let deficit = 1.0 - bucket.tokens;
                Duration::from_secs_f64(deficit / self.rate_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        // Tokens never accumulate past the burst size (minimum one).
        let cap = (self.config.burst as f64).max(1.0);
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(cap);
    }
}
