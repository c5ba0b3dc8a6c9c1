//! Deadlines and bounded exponential backoff for polling loops.

use std::time::{Duration, Instant};

/// First poll interval.
pub const BACKOFF_START: Duration = Duration::from_millis(5);
/// Poll interval ceiling.
pub const BACKOFF_MAX: Duration = Duration::from_millis(100);

/// A point in time after which waiting stops.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// The earlier of this deadline and `now + budget`.
    #[must_use]
    pub fn min_with(self, budget: Duration) -> Self {
        let candidate = Instant::now() + budget;
        Self {
            at: self.at.min(candidate),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Doubling sleep interval, capped, that never sleeps past a deadline.
#[derive(Clone, Debug)]
pub struct Backoff {
    start: Duration,
    next: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BACKOFF_START, BACKOFF_MAX)
    }
}

impl Backoff {
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            start,
            next: start,
            max,
        }
    }

    /// Interval the next wait sleeps for, before clamping to a deadline.
    pub fn interval(&self) -> Duration {
        self.next
    }

    /// Sleep for the current interval (clamped to `deadline`) and grow it.
    ///
    /// Returns `false` without sleeping once the deadline has passed.
    pub fn wait(&mut self, deadline: &Deadline) -> bool {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return false;
        }
        std::thread::sleep(self.next.min(remaining));
        self.next = (self.next * 2).min(self.max);
        true
    }

    /// Async variant for code running on a tokio runtime.
    pub async fn wait_async(&mut self, deadline: &Deadline) -> bool {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return false;
        }
        tokio::time::sleep(self.next.min(remaining)).await;
        self.next = (self.next * 2).min(self.max);
        true
    }

    /// Start over from the initial interval after progress was made.
    pub fn reset(&mut self) {
        self.next = self.start.min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stops_at_deadline() {
        let deadline = Deadline::after(Duration::from_millis(30));
        let mut backoff = Backoff::default();
        let started = Instant::now();
        while backoff.wait(&deadline) {}
        assert!(deadline.expired());
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn reset_returns_to_the_configured_start() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let mut backoff = Backoff::new(Duration::from_millis(20), Duration::from_millis(200));
        assert!(backoff.wait(&deadline));
        assert_eq!(backoff.interval(), Duration::from_millis(40));
        backoff.reset();
        assert_eq!(backoff.interval(), Duration::from_millis(20));
    }

    #[test]
    fn min_with_never_extends() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let narrowed = deadline.min_with(Duration::from_secs(60));
        assert!(narrowed.remaining() <= Duration::from_millis(10));
    }
}
