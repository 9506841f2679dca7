//! Sliding-window rate limiter for the search provider.
//!
//! At most `max_calls` acquisitions are granted inside any trailing window of
//! length `window`. Callers over the limit wait instead of failing.
//!
//! [`SlidingWindowLimiter::shared`] hands out one limiter per budget for the
//! whole process, so every search client built with the same budget draws
//! from the same window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, LazyLock, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

type Registry = std::sync::Mutex<HashMap<(u32, Duration), Arc<SlidingWindowLimiter>>>;

static SHARED: LazyLock<Registry> = LazyLock::new(Registry::default);

/// Process-wide call budget shared by every search of a run.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_calls: usize,
    window: Duration,
    /// Grant times inside the current window, oldest first.
    calls: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter; `max_calls` is clamped to at least 1.
    pub fn new(max_calls: u32, window: Duration) -> Self {
        let max_calls = (max_calls as usize).max(1);
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// The process-wide limiter for this budget, created on first use.
    pub fn shared(max_calls: u32, window: Duration) -> Arc<Self> {
        let mut registry = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        let limiter = registry
            .entry((max_calls, window))
            .or_insert_with(|| Arc::new(Self::new(max_calls, window)));
        Arc::clone(limiter)
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a call is allowed, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                self.evict_expired(&mut calls, now);

                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    return;
                }

                match calls.front() {
                    Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!(
                wait_ms = wait.as_millis() as u64,
                max_calls = self.max_calls,
                "search rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of calls granted within the trailing window.
    pub async fn calls_in_window(&self) -> usize {
        let mut calls = self.calls.lock().await;
        self.evict_expired(&mut calls, Instant::now());
        calls.len()
    }

    fn evict_expired(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = calls.front() {
            if now.duration_since(oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn calls_under_limit_do_not_wait() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.calls_in_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn call_over_limit_waits_for_window() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_with_oldest_call() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.acquire().await;

        // Third call only waits for the first one to leave the window.
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_calls_are_evicted() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(10));
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.calls_in_window().await, 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(limiter.calls_in_window().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_budget() {
        let limiter = Arc::new(SlidingWindowLimiter::new(4, Duration::from_secs(60)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut granted = Vec::new();
        for handle in handles {
            granted.push(handle.await.unwrap());
        }

        let immediate = granted
            .iter()
            .filter(|t| t.duration_since(start) < Duration::from_secs(60))
            .count();
        assert_eq!(immediate, 4);
    }

    #[test]
    fn shared_returns_one_limiter_per_budget() {
        let a = SlidingWindowLimiter::shared(17, Duration::from_secs(23));
        let b = SlidingWindowLimiter::shared(17, Duration::from_secs(23));
        let other = SlidingWindowLimiter::shared(18, Duration::from_secs(23));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(a.max_calls(), 17);
    }

    #[test]
    fn zero_max_calls_is_clamped() {
        let limiter = SlidingWindowLimiter::new(0, Duration::from_secs(1));
        assert_eq!(limiter.max_calls(), 1);
        assert_eq!(limiter.window(), Duration::from_secs(1));
    }
}
