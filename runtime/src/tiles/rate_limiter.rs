//! Rate limiter for polite tile fetching.

use super::TileError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Caps concurrent requests and spaces their start times.
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    min_delay: Duration,
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// - `max_concurrent`: maximum number of in-flight requests
    /// - `min_delay_ms`: minimum milliseconds between request starts
    pub fn new(max_concurrent: usize, min_delay_ms: u64) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            min_delay: Duration::from_millis(min_delay_ms),
            last_request: tokio::sync::Mutex::new(None),
        }
    }

    /// No spacing, generous concurrency. Used for local and test sources.
    pub fn unlimited() -> Self {
        Self::new(Semaphore::MAX_PERMITS, 0)
    }

    /// Wait for a slot. The slot is released when the guard drops.
    pub async fn acquire(&self) -> Result<RateLimitGuard, TileError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TileError::Unavailable("rate limiter closed".into()))?;

        if !self.min_delay.is_zero() {
            let mut last = self.last_request.lock().await;
            if let Some(previous) = *last {
                let elapsed = previous.elapsed();
                if elapsed < self.min_delay {
                    tokio::time::sleep(self.min_delay - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }

        Ok(RateLimitGuard { _permit: permit })
    }
}

/// Releases the limiter slot when dropped.
pub struct RateLimitGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrency_cap() {
        let limiter = RateLimiter::new(2, 0);
        let g1 = limiter.acquire().await.unwrap();
        let _g2 = limiter.acquire().await.unwrap();
        assert_eq!(limiter.semaphore.available_permits(), 0);
        drop(g1);
        assert_eq!(limiter.semaphore.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_delay_spacing() {
        let limiter = RateLimiter::new(4, 500);
        let start = Instant::now();
        let _a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
