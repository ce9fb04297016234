//! Rate limiting for list change notifications.
//!
//! The debouncer only makes decisions; whoever owns it is responsible for
//! delivering notifications and running the timer it asks for. That keeps it
//! usable against a simulated clock.

use std::time::Duration;
use tokio::time::Instant;

/// Minimum time between two delivered notifications
pub const DEFAULT_NOTIFY_DELAY: Duration = Duration::from_millis(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    /// A deferred notification will go out at `fire_at`
    Pending { fire_at: Instant },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Deliver right away, then report it with `delivered`
    NotifyNow,
    /// Start a timer for `fire_at` and call `fire` when it goes off
    Schedule { fire_at: Instant },
    /// A timer is already pending, it will cover this change too
    Coalesced,
}

#[derive(Debug)]
pub struct Debouncer {
    min_interval: Duration,
    last_notify: Option<Instant>,
    state: DebounceState,
}

impl Debouncer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_notify: None,
            state: DebounceState::Idle,
        }
    }

    /// Something changed at `now`, decide what to do about it
    pub fn request(&mut self, now: Instant) -> Decision {
        match self.last_notify {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => {
                if let DebounceState::Pending { .. } = self.state {
                    return Decision::Coalesced;
                }

                let fire_at = last + self.min_interval;
                self.state = DebounceState::Pending { fire_at };
                Decision::Schedule { fire_at }
            }
            _ => Decision::NotifyNow,
        }
    }

    /// A notification went out at `at`. Any pending timer is now redundant.
    pub fn delivered(&mut self, at: Instant) {
        self.last_notify = Some(at);
        self.state = DebounceState::Idle;
    }

    /// The timer scheduled for `fire_at` went off. Returns false when that
    /// timer was superseded or cancelled and nothing should be delivered.
    pub fn fire(&mut self, fire_at: Instant) -> bool {
        if self.state != (DebounceState::Pending { fire_at }) {
            return false;
        }

        self.delivered(fire_at);
        true
    }

    pub fn cancel(&mut self) {
        self.state = DebounceState::Idle;
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn last_notify(&self) -> Option<Instant> {
        self.last_notify
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_DELAY)
    }
}
