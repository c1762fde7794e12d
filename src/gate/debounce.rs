// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Cool-down debouncing

use std::time::Duration;
use tokio::time::Instant;

/// Collapses bursts of raw notifications into one detection per cool-down window.
///
/// A notification is accepted when at least `cool_down` has elapsed since the
/// last accepted one (ties are accepted). Notifications stamped earlier than the
/// last accepted one are rejected.
#[derive(Debug, Clone)]
pub struct Debouncer {
    cool_down: Duration,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(cool_down: Duration) -> Self {
        Self {
            cool_down,
            last_accepted: None,
        }
    }

    /// Returns `true` when a notification observed at `at` starts a new detection
    pub fn accept(&mut self, at: Instant) -> bool {
        match self.last_accepted {
            Some(last) if at.saturating_duration_since(last) < self.cool_down => false,
            Some(last) if at < last => false,
            _ => {
                self.last_accepted = Some(at);
                true
            }
        }
    }

    pub fn cool_down(&self) -> Duration {
        self.cool_down
    }

    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_burst_within_cool_down_collapses() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(ms(500));

        assert!(debouncer.accept(start));
        assert!(!debouncer.accept(start + ms(100)));
        assert_eq!(debouncer.last_accepted(), Some(start));
    }

    #[test]
    fn test_spaced_notifications_both_accepted() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(ms(500));

        assert!(debouncer.accept(start));
        assert!(debouncer.accept(start + ms(600)));
    }

    #[test]
    fn test_boundary_is_accepted() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(ms(500));

        assert!(debouncer.accept(start));
        assert!(!debouncer.accept(start + ms(499)));
        assert!(debouncer.accept(start + ms(500)));
    }

    #[test]
    fn test_window_restarts_from_last_accepted() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(ms(500));

        // Rejected chatter does not extend the window
        assert!(debouncer.accept(start));
        assert!(!debouncer.accept(start + ms(300)));
        assert!(!debouncer.accept(start + ms(450)));
        assert!(debouncer.accept(start + ms(520)));
        assert!(!debouncer.accept(start + ms(900)));
        assert!(debouncer.accept(start + ms(1020)));
    }

    #[test]
    fn test_out_of_order_notification_rejected() {
        let start = Instant::now() + ms(1000);
        let mut debouncer = Debouncer::new(ms(500));

        assert!(debouncer.accept(start));
        assert!(!debouncer.accept(start - ms(600)));
    }
}
