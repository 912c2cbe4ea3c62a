use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Sliding-window limiter: at most `max` starts in any `window`
///
/// Shared by every dispatcher of a queue, so the limit holds no matter which
/// worker slot starts the job.
#[derive(Debug)]
pub struct RateLimiter {
    max: usize,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            max: config.max.max(1) as usize,
            window: config.window(),
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a start if the window has room, else return how long to wait
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut starts = self.starts.lock();
        while let Some(oldest) = starts.front() {
            if now.duration_since(*oldest) >= self.window {
                starts.pop_front();
            } else {
                break;
            }
        }

        if starts.len() < self.max {
            starts.push_back(now);
            return Ok(());
        }

        let wait = starts
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or_default();
        Err(wait.max(Duration::from_millis(1)))
    }

    /// Wait until a start is permitted, then record it
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Give back the most recent start when no job was dispatched with it
    pub fn release_unused(&self) {
        self.starts.lock().pop_back();
    }

    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        self.starts
            .lock()
            .iter()
            .filter(|start| now.duration_since(**start) < self.window)
            .count()
    }
}
