//! Retransmission timer binding: one scheduler timer slot per session.

use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use crate::scheduler::{Scheduler, SessionToken, TimerId};

/// Owns a single timer slot from acquisition until release.
///
/// The slot is acquired in [`RetransmitTimer::new`] and released exactly once,
/// either by [`RetransmitTimer::release`] or on drop.
pub struct RetransmitTimer {
    scheduler: Rc<dyn Scheduler>,
    id: Option<TimerId>,
    armed: bool,
    fired: u32,
}

impl RetransmitTimer {
    pub fn new(scheduler: Rc<dyn Scheduler>, owner: SessionToken) -> Self {
        let id = scheduler.acquire_timer(owner);
        Self {
            scheduler,
            id: Some(id),
            armed: false,
            fired: 0,
        }
    }

    /// Arm for `delay` from now, replacing any pending expiry.
    pub fn arm(&mut self, delay: Duration) {
        if let Some(id) = self.id {
            debug!(delay_ms = delay.as_millis() as u64, "retransmission timer armed");
            self.scheduler.arm(id, delay);
            self.armed = true;
        }
    }

    pub fn cancel(&mut self) {
        if let (Some(id), true) = (self.id, self.armed) {
            self.scheduler.disarm(id);
        }
        self.armed = false;
    }

    /// Record an expiry. Returns `false` for a stale expiry delivered after cancel or release.
    pub fn on_fire(&mut self) -> bool {
        if !self.armed || self.id.is_none() {
            return false;
        }
        self.armed = false;
        self.fired += 1;
        true
    }

    /// Give the slot back to the scheduler. Later calls are no-ops.
    pub fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.scheduler.release_timer(id);
            self.armed = false;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_released(&self) -> bool {
        self.id.is_none()
    }

    /// Expiries handled since construction.
    pub fn fired_count(&self) -> u32 {
        self.fired
    }
}

impl Drop for RetransmitTimer {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Event, EventLoop};

    fn timer(el: &EventLoop) -> (SessionToken, RetransmitTimer) {
        let handle = el.handle();
        let token = handle.allocate_token();
        (token, RetransmitTimer::new(Rc::new(handle), token))
    }

    #[test]
    fn acquire_and_release_once() {
        let el = EventLoop::new();
        let (_, mut t) = timer(&el);
        assert_eq!(el.live_timers(), 1);
        t.release();
        t.release();
        assert!(t.is_released());
        assert_eq!(el.live_timers(), 0);
    }

    #[test]
    fn drop_releases() {
        let el = EventLoop::new();
        {
            let (_, mut t) = timer(&el);
            t.arm(Duration::from_millis(50));
        }
        assert_eq!(el.live_timers(), 0);
        assert_eq!(el.next_event(), None);
    }

    #[test]
    fn fire_is_delivered_as_event() {
        let el = EventLoop::new();
        let (token, mut t) = timer(&el);
        t.arm(Duration::from_millis(50));
        assert_eq!(el.next_event(), Some((token, Event::Timeout)));
        assert!(t.on_fire());
        assert!(!t.on_fire());
        assert_eq!(t.fired_count(), 1);
    }

    #[test]
    fn cancel_prevents_fire() {
        let el = EventLoop::new();
        let (_, mut t) = timer(&el);
        t.arm(Duration::from_millis(50));
        t.cancel();
        assert!(!t.is_armed());
        assert_eq!(el.next_event(), None);
        assert!(!t.on_fire());
    }
}
