//! Rolling-window rate limiter for outbound requests.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Window length for the rolling request cap.
const WINDOW: Duration = Duration::from_secs(60);

/// Caps outbound request volume to a configured number per rolling
/// 60-second window.
///
/// Timestamps older than the window are discarded before every decision
/// (sliding window, not a fixed bucket). A caller that finds the window at
/// capacity suspends until the oldest timestamp ages out, then proceeds;
/// requests are never rejected. Every attempt, retries included, is
/// recorded exactly once at the moment it is admitted.
///
/// The ledger lives behind a `tokio::sync::Mutex` so concurrent tasks
/// sharing one client cannot lose recordings to interleaved read/modify/
/// write cycles.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    max_per_window: usize,
    ledger: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_window: max_per_minute.max(1) as usize,
            ledger: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until the window has capacity, then record this attempt.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut ledger = self.ledger.lock().await;
                let now = Instant::now();
                while ledger
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= WINDOW)
                {
                    ledger.pop_front();
                }

                if ledger.len() < self.max_per_window {
                    ledger.push_back(now);
                    return;
                }

                // Window full: wait out the remainder of the oldest entry.
                let oldest = *ledger.front().expect("non-empty ledger");
                WINDOW - now.duration_since(oldest)
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            sleep(wait).await;
        }
    }
}
