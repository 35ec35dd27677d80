//! Sliding-window request counter.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Time-ordered admission timestamps inside the trailing window.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window: Duration,
    max_requests: usize,
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            timestamps: VecDeque::new(),
        }
    }

    /// Drops timestamps older than the window.
    pub fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until one more request fits in the window. Call after
    /// [`evict`](Self::evict).
    pub fn wait_time(&self, now: Instant) -> Duration {
        if self.timestamps.len() < self.max_requests {
            return Duration::ZERO;
        }
        // The oldest entry that must expire before a slot frees up
        let blocking = self.timestamps.len() - self.max_requests;
        let expires_at = self.timestamps[blocking] + self.window;
        expires_at.saturating_duration_since(now)
    }

    /// Records an admission at `at`, keeping the queue ordered.
    pub fn record(&mut self, at: Instant) {
        let pos = self.timestamps.partition_point(|&t| t <= at);
        self.timestamps.insert(pos, at);
    }

    /// Removes one admission recorded at `at`.
    pub fn remove(&mut self, at: Instant) {
        if let Some(pos) = self.timestamps.iter().rposition(|&t| t == at) {
            self.timestamps.remove(pos);
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
