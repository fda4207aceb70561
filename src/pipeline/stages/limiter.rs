use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{StageError, StageKind};

/// Sliding-window call ceiling per stage kind, shared by every run.
pub struct CallRateLimiter {
    windows: Mutex<HashMap<StageKind, VecDeque<Instant>>>,
    limit: u32,
    window: Duration,
}

impl CallRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit: limit.max(1),
            window,
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Take a slot if one is free. Returns `Err(wait)` with the time until the
    /// oldest call in the window expires otherwise.
    pub fn try_acquire(&self, stage: StageKind) -> Result<(), Duration> {
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entries = windows.entry(stage).or_default();

        while entries
            .front()
            .is_some_and(|ts| now.duration_since(*ts) >= self.window)
        {
            entries.pop_front();
        }

        if entries.len() as u32 >= self.limit {
            let oldest = entries.front().copied().unwrap_or(now);
            return Err(self.window.saturating_sub(now.duration_since(oldest)));
        }

        entries.push_back(now);
        Ok(())
    }

    /// Wait for a slot, but never longer than `max_wait` in total, however
    /// many times another caller takes the slot first.
    pub async fn acquire(&self, stage: StageKind, max_wait: Duration) -> Result<(), StageError> {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.try_acquire(stage) {
                Ok(()) => return Ok(()),
                Err(wait) if Instant::now() + wait > deadline => {
                    return Err(StageError::RateLimited(wait))
                }
                Err(wait) => {
                    tracing::debug!(stage = %stage, wait_ms = wait.as_millis() as u64, "Waiting for call slot");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
