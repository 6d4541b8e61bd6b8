//! Sliding-window governor for outbound calendar traffic.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;

/// Allows at most `max_requests` per `window`. When the window is full,
/// `acquire` suspends the caller until the oldest request ages out rather
/// than rejecting — calendar reads are not on a hard latency budget.
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
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.timestamps.lock().await;
                let now = Instant::now();
                while let Some(front) = stamps.front() {
                    if now.duration_since(*front) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }

                if stamps.len() < self.max_requests {
                    stamps.push_back(now);
                    return;
                }

                // Time until the oldest request leaves the window.
                let oldest = *stamps.front().unwrap();
                self.window - now.duration_since(oldest)
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            sleep(wait).await;
        }
    }
}
