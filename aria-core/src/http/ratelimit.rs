use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window admission gate: at most `max_requests` within `window`.
///
/// Timestamps are trimmed on every call; when the window is full, `acquire`
/// sleeps until the oldest entry ages out. The internal lock is released
/// while sleeping so concurrent callers queue fairly behind the mutex.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    fn trim(&self, stamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = stamps.front() {
            if now.duration_since(oldest) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Block until a slot is available, then record the request.
    pub async fn acquire(&self) {
        loop {
            let wait_until = {
                let mut stamps = self.timestamps.lock().await;
                let now = Instant::now();
                self.trim(&mut stamps, now);
                if stamps.len() < self.max_requests {
                    stamps.push_back(now);
                    return;
                }
                *stamps.front().expect("non-empty window") + self.window
            };
            tokio::time::sleep_until(wait_until).await;
        }
    }

    /// Record a request if a slot is free; never blocks.
    pub async fn try_acquire(&self) -> bool {
        let mut stamps = self.timestamps.lock().await;
        let now = Instant::now();
        self.trim(&mut stamps, now);
        if stamps.len() < self.max_requests {
            stamps.push_back(now);
            true
        } else {
            false
        }
    }

    pub async fn available(&self) -> usize {
        let mut stamps = self.timestamps.lock().await;
        let now = Instant::now();
        self.trim(&mut stamps, now);
        self.max_requests - stamps.len()
    }
}

/// SongLink allows 10/min; stay one below.
pub fn songlink_limiter() -> &'static RateLimiter {
    static LIMITER: OnceLock<RateLimiter> = OnceLock::new();
    LIMITER.get_or_init(|| RateLimiter::new(9, Duration::from_secs(60)))
}

pub fn idhs_limiter() -> &'static RateLimiter {
    static LIMITER: OnceLock<RateLimiter> = OnceLock::new();
    LIMITER.get_or_init(|| RateLimiter::new(8, Duration::from_secs(60)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn window_never_exceeded() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.available().await, 0);
        assert!(!limiter.try_acquire().await);

        // Fourth acquire must wait for the oldest stamp to age out.
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn slots_free_up_after_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(5));
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(limiter.available().await, 2);
        assert!(limiter.try_acquire().await);
    }
}
