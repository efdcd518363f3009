use std::time::{Duration, Instant};
use tracing::debug;

use crate::clock::Deadline;
use crate::messages::CassetteMessage;

/// Length of both the insert and the eject animation.
pub const CASSETTE_ANIMATION: Duration = Duration::from_millis(420);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CassettePhase {
    Insert,
    Steady,
    Eject,
}

/// Things the owner should react to (sounds, shake).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CassetteEvent {
    Inserting,
    Ejecting,
    Settled,
}

/// Single-slot cassette mailbox.
///
/// Holds the tape currently in the slot and at most one tape waiting for the
/// slot to be free. A message that arrives while a tape is ejecting waits for
/// the eject to finish; a newer one replaces it.
#[derive(Debug, Default)]
pub struct CassetteQueue {
    current: Option<CassetteMessage>,
    pending: Option<CassetteMessage>,
    phase: Option<CassettePhase>,
    timer: Deadline,
    modal_open: bool,
}

impl CassetteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, msg: CassetteMessage, now: Instant) -> Vec<CassetteEvent> {
        match self.phase {
            None => vec![self.insert(msg, now)],
            Some(CassettePhase::Insert) | Some(CassettePhase::Steady) => {
                debug!(title = %msg.title, "ejecting current cassette");
                self.pending = Some(msg);
                self.phase = Some(CassettePhase::Eject);
                self.timer.arm(now, CASSETTE_ANIMATION);
                vec![CassetteEvent::Ejecting]
            }
            Some(CassettePhase::Eject) => {
                self.pending = Some(msg);
                Vec::new()
            }
        }
    }

    fn insert(&mut self, msg: CassetteMessage, now: Instant) -> CassetteEvent {
        debug!(title = %msg.title, "inserting cassette");
        self.current = Some(msg);
        self.phase = Some(CassettePhase::Insert);
        self.timer.arm(now, CASSETTE_ANIMATION);
        CassetteEvent::Inserting
    }

    pub fn tick(&mut self, now: Instant) -> Vec<CassetteEvent> {
        if !self.timer.fire(now) {
            return Vec::new();
        }
        match self.phase {
            Some(CassettePhase::Insert) => {
                self.phase = Some(CassettePhase::Steady);
                vec![CassetteEvent::Settled]
            }
            Some(CassettePhase::Eject) => match self.pending.take() {
                Some(next) => vec![self.insert(next, now)],
                None => {
                    self.current = None;
                    self.phase = None;
                    Vec::new()
                }
            },
            _ => Vec::new(),
        }
    }

    pub fn phase(&self) -> Option<CassettePhase> {
        self.phase
    }

    /// True while a tape is moving in or out of the slot.
    pub fn is_animating(&self) -> bool {
        matches!(self.phase, Some(CassettePhase::Insert) | Some(CassettePhase::Eject))
    }

    pub fn current(&self) -> Option<&CassetteMessage> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> Option<&CassetteMessage> {
        self.pending.as_ref()
    }

    pub fn open_modal(&mut self) -> bool {
        if self.current.is_none() || self.modal_open {
            return false;
        }
        self.modal_open = true;
        true
    }

    pub fn close_modal(&mut self) -> bool {
        std::mem::replace(&mut self.modal_open, false)
    }

    pub fn modal_open(&self) -> bool {
        self.modal_open
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn tape(title: &str) -> CassetteMessage {
        CassetteMessage {
            title: title.into(),
            content: format!("{} body", title),
        }
    }

    #[test]
    fn insert_then_settle() {
        let clock = ManualClock::new();
        let mut q = CassetteQueue::new();

        assert_eq!(q.receive(tape("M1"), clock.now()), vec![CassetteEvent::Inserting]);
        assert_eq!(q.phase(), Some(CassettePhase::Insert));

        clock.advance_ms(419);
        assert!(q.tick(clock.now()).is_empty());
        clock.advance_ms(1);
        assert_eq!(q.tick(clock.now()), vec![CassetteEvent::Settled]);
        assert_eq!(q.phase(), Some(CassettePhase::Steady));
    }

    #[test]
    fn replacement_runs_eject_insert_steady() {
        let clock = ManualClock::new();
        let mut q = CassetteQueue::new();
        q.receive(tape("M1"), clock.now());
        clock.advance_ms(420);
        q.tick(clock.now());

        let mut events = q.receive(tape("M2"), clock.now());
        let mut phases = vec![q.phase()];
        clock.advance_ms(420);
        events.extend(q.tick(clock.now()));
        phases.push(q.phase());
        assert_eq!(q.current(), Some(&tape("M2")));
        clock.advance_ms(420);
        events.extend(q.tick(clock.now()));
        phases.push(q.phase());

        assert_eq!(
            phases,
            vec![
                Some(CassettePhase::Eject),
                Some(CassettePhase::Insert),
                Some(CassettePhase::Steady)
            ]
        );
        assert_eq!(
            events,
            vec![CassetteEvent::Ejecting, CassetteEvent::Inserting, CassetteEvent::Settled]
        );
        assert_eq!(q.current(), Some(&tape("M2")));
        assert!(q.pending().is_none());
    }

    #[test]
    fn arrival_during_eject_is_deferred_not_stacked() {
        let clock = ManualClock::new();
        let mut q = CassetteQueue::new();
        q.receive(tape("M1"), clock.now());
        clock.advance_ms(420);
        q.tick(clock.now());
        q.receive(tape("M2"), clock.now());

        clock.advance_ms(200);
        assert!(q.receive(tape("M3"), clock.now()).is_empty());
        assert_eq!(q.phase(), Some(CassettePhase::Eject));
        assert_eq!(q.pending(), Some(&tape("M3")));

        // Eject timer was not restarted by the late arrival.
        clock.advance_ms(220);
        assert_eq!(q.tick(clock.now()), vec![CassetteEvent::Inserting]);
        assert_eq!(q.current(), Some(&tape("M3")));
    }

    #[test]
    fn arrival_during_insert_ejects_first() {
        let clock = ManualClock::new();
        let mut q = CassetteQueue::new();
        q.receive(tape("M1"), clock.now());
        clock.advance_ms(100);
        assert_eq!(q.receive(tape("M2"), clock.now()), vec![CassetteEvent::Ejecting]);
        // The insert timer was replaced: nothing settles at the old deadline.
        clock.advance_ms(320);
        assert!(q.tick(clock.now()).is_empty());
        clock.advance_ms(100);
        assert_eq!(q.tick(clock.now()), vec![CassetteEvent::Inserting]);
    }

    #[test]
    fn modal_does_not_touch_phase() {
        let clock = ManualClock::new();
        let mut q = CassetteQueue::new();
        assert!(!q.open_modal(), "nothing to show yet");

        q.receive(tape("M1"), clock.now());
        assert!(q.open_modal());
        assert!(!q.open_modal());
        assert_eq!(q.phase(), Some(CassettePhase::Insert));
        assert!(q.close_modal());
        assert!(!q.close_modal());
        assert_eq!(q.phase(), Some(CassettePhase::Insert));
    }
}
