use std::time::{Duration, Instant};
use tracing::debug;

use crate::clock::{Deadline, earliest};

pub const BOOT_DURATION: Duration = Duration::from_millis(500);
pub const POWER_ANIMATION: Duration = Duration::from_millis(180);
const POWER_ANIMATION_TAIL: Duration = Duration::from_millis(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAnim {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenEvent {
    PowerOn,
    PowerOff,
}

/// Boot, power-on and power-off sequencing of the screen.
///
/// The screen is off while booting or while the agent is absent. Only edges
/// of that value do anything; repeating the same input is a no-op.
#[derive(Debug)]
pub struct ScreenPower {
    booting: bool,
    agent_connected: bool,
    screen_off: bool,
    anim: Option<PowerAnim>,
    content_visible: bool,
    boot: Deadline,
    hide_content: Deadline,
    clear_anim: Deadline,
}

impl ScreenPower {
    pub fn new(now: Instant) -> Self {
        let mut boot = Deadline::default();
        boot.arm(now, BOOT_DURATION);
        Self {
            booting: true,
            agent_connected: false,
            screen_off: true,
            anim: None,
            content_visible: false,
            boot,
            hide_content: Deadline::default(),
            clear_anim: Deadline::default(),
        }
    }

    pub fn set_agent_connected(&mut self, connected: bool, now: Instant) -> Option<ScreenEvent> {
        self.agent_connected = connected;
        self.reconcile(now)
    }

    pub fn tick(&mut self, now: Instant) -> Option<ScreenEvent> {
        if self.hide_content.fire(now) {
            self.content_visible = false;
        }
        if self.clear_anim.fire(now) {
            self.anim = None;
        }
        if self.boot.fire(now) {
            self.booting = false;
            return self.reconcile(now);
        }
        None
    }

    fn reconcile(&mut self, now: Instant) -> Option<ScreenEvent> {
        let off = self.booting || !self.agent_connected;
        if off == self.screen_off {
            return None;
        }
        self.screen_off = off;
        self.clear_anim.arm(now, POWER_ANIMATION + POWER_ANIMATION_TAIL);

        if off {
            debug!("screen powering off");
            self.anim = Some(PowerAnim::Off);
            self.hide_content.arm(now, POWER_ANIMATION);
            Some(ScreenEvent::PowerOff)
        } else {
            debug!("screen powering on");
            self.hide_content.cancel();
            self.content_visible = true;
            self.anim = Some(PowerAnim::On);
            Some(ScreenEvent::PowerOn)
        }
    }

    pub fn screen_off(&self) -> bool {
        self.screen_off
    }

    #[cfg(test)]
    pub fn is_booting(&self) -> bool {
        self.booting
    }

    pub fn anim(&self) -> Option<PowerAnim> {
        self.anim
    }

    pub fn content_visible(&self) -> bool {
        self.content_visible
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([self.boot.at(), self.hide_content.at(), self.clear_anim.at()])
    }
}
