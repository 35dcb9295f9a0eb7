//! Sliding-window event counter that trips once a scope gets too chatty
use std::collections::VecDeque;

use tokio::time::{Duration, Instant};

/// Counts events over a trailing window and reports when the count
/// strictly exceeds the configured maximum.
#[derive(Clone, Debug)]
pub struct RateLimitsCircuitBreaker {
    interval: Duration,
    max_events_per_interval: usize,
    events: VecDeque<Instant>,
}

impl RateLimitsCircuitBreaker {
    pub fn new(interval: Duration, max_events_per_interval: usize) -> Self {
        Self {
            interval,
            max_events_per_interval,
            events: VecDeque::new(),
        }
    }

    pub fn from_millis(interval_ms: u64, max_events_per_interval: usize) -> Self {
        Self::new(Duration::from_millis(interval_ms), max_events_per_interval)
    }

    pub fn record_event(&mut self) {
        let now = Instant::now();
        self.evict_expired(now);
        self.events.push_back(now);
    }

    pub fn should_break_circuit(&mut self) -> bool {
        self.evict_expired(Instant::now());
        self.events.len() > self.max_events_per_interval
    }

    /// Number of events currently inside the window
    pub fn events_in_window(&mut self) -> usize {
        self.evict_expired(Instant::now());
        self.events.len()
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(oldest) = self.events.front() {
            if now.duration_since(*oldest) >= self.interval {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}
