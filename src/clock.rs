use std::time::{Duration, Instant};

/// Source of "now" for the timed state machines.
///
/// The terminal loop uses [`SystemClock`]; tests drive a [`ManualClock`] so
/// every transition happens at an exact, repeatable instant.
pub trait Clock {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
pub struct ManualClock {
    now: std::cell::Cell<Instant>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: std::cell::Cell::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// A single-slot timer.
///
/// Arming always replaces whatever was armed before, so a state machine that
/// owns one `Deadline` can never have two of its transitions pending at once.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn arm(&mut self, now: Instant, delay: Duration) {
        self.at = Some(now + delay);
    }

    pub fn cancel(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    pub fn at(&self) -> Option<Instant> {
        self.at
    }

    /// Disarm and return true if the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.at {
            Some(at) if now >= at => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}

/// Earliest of a set of optional instants.
pub fn earliest(instants: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    instants.into_iter().flatten().min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_fires_once_at_or_after_target() {
        let clock = ManualClock::new();
        let mut d = Deadline::default();
        d.arm(clock.now(), Duration::from_millis(100));

        clock.advance_ms(99);
        assert!(!d.fire(clock.now()));
        clock.advance_ms(1);
        assert!(d.fire(clock.now()));
        assert!(!d.fire(clock.now()));
        assert!(!d.is_armed());
    }

    #[test]
    fn rearming_replaces_previous_deadline() {
        let clock = ManualClock::new();
        let mut d = Deadline::default();
        d.arm(clock.now(), Duration::from_millis(100));
        clock.advance_ms(50);
        d.arm(clock.now(), Duration::from_millis(100));

        clock.advance_ms(60);
        assert!(!d.fire(clock.now()), "old deadline must not fire");
        clock.advance_ms(40);
        assert!(d.fire(clock.now()));
    }

    #[test]
    fn earliest_skips_none() {
        let t = Instant::now();
        let later = t + Duration::from_millis(5);
        assert_eq!(earliest([None, Some(later), Some(t)]), Some(t));
        assert_eq!(earliest([None, None]), None);
    }
}
