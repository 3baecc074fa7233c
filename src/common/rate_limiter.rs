//! Token-bucket rate limiter for venue calls

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub max_requests_per_second: usize,
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 10,
            refill_interval: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_rate(mut self, requests_per_second: usize) -> Self {
        self.max_requests_per_second = requests_per_second;
        self
    }
}

/// Permits are consumed per request and replenished each refill interval
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    max_permits: usize,
    last_refill: Arc<Mutex<Instant>>,
    refill_interval: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_requests_per_second)),
            max_permits: config.max_requests_per_second,
            last_refill: Arc::new(Mutex::new(Instant::now())),
            refill_interval: config.refill_interval,
        }
    }

    /// Wait for a permit; the permit is consumed, not returned
    pub async fn acquire(&self) {
        self.try_refill().await;
        let permit = self
            .permits
            .acquire()
            .await
            .expect("semaphore never closed");
        permit.forget();
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    async fn try_refill(&self) {
        let mut last_refill = self.last_refill.lock().await;
        if last_refill.elapsed() >= self.refill_interval {
            let current = self.permits.available_permits();
            let to_add = self.max_permits.saturating_sub(current);
            if to_add > 0 {
                self.permits.add_permits(to_add);
            }
            *last_refill = Instant::now();
        }
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            permits: Arc::clone(&self.permits),
            max_permits: self.max_permits,
            last_refill: Arc::clone(&self.last_refill),
            refill_interval: self.refill_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_permits_are_consumed() {
        let limiter = RateLimiter::new(RateLimiterConfig::default().with_rate(2));
        assert_eq!(limiter.available_permits(), 2);
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.available_permits(), 0);
    }

    #[tokio::test]
    async fn test_refill_after_interval() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_requests_per_second: 2,
            refill_interval: Duration::from_millis(50),
        });
        limiter.acquire().await;
        limiter.acquire().await;

        sleep(Duration::from_millis(60)).await;
        limiter.acquire().await;
        assert_eq!(limiter.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_clone_shares_bucket() {
        let a = RateLimiter::new(RateLimiterConfig::default().with_rate(3));
        let b = a.clone();
        a.acquire().await;
        assert_eq!(b.available_permits(), 2);
    }
}
