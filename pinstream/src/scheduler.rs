//! Single-threaded event loop with a virtual clock.
//!
//! Everything a session reacts to arrives as a `(SessionToken, Event)` pair:
//! transport readiness posted by transports, and timer expiry posted by the
//! loop itself. Queued events are always delivered before the clock advances
//! to the next timer deadline.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

use crate::transport::StreamEvent;

/// Opaque handle identifying the session an event is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(pub u64);

/// Handle to a one-shot timer slot owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Stream(StreamEvent),
    /// The session's retransmission timer expired.
    Timeout,
}

/// Timer and clock services consumed by a session.
pub trait Scheduler {
    /// Current time on the scheduler's clock.
    fn now(&self) -> Duration;
    /// Allocate a timer slot whose expiry is posted to `owner`.
    fn acquire_timer(&self, owner: SessionToken) -> TimerId;
    /// Arm (or re-arm) the timer to fire once after `delay`.
    fn arm(&self, id: TimerId, delay: Duration);
    fn disarm(&self, id: TimerId);
    /// Free the slot; any pending expiry is discarded.
    fn release_timer(&self, id: TimerId);
}

#[derive(Debug)]
struct TimerSlot {
    owner: SessionToken,
    deadline: Option<Duration>,
}

#[derive(Debug, Default)]
struct LoopState {
    now: Duration,
    queue: VecDeque<(SessionToken, Event)>,
    timers: HashMap<TimerId, TimerSlot>,
    next_timer: u64,
    next_token: u64,
}

/// Cloneable handle for posting events and managing timers.
#[derive(Debug, Clone, Default)]
pub struct LoopHandle {
    inner: Rc<RefCell<LoopState>>,
}

impl LoopHandle {
    /// Queue an event for delivery.
    pub fn post(&self, token: SessionToken, event: Event) {
        self.inner.borrow_mut().queue.push_back((token, event));
    }

    /// Hand out a fresh session token.
    pub fn allocate_token(&self) -> SessionToken {
        let mut state = self.inner.borrow_mut();
        state.next_token += 1;
        SessionToken(state.next_token)
    }
}

impl Scheduler for LoopHandle {
    fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    fn acquire_timer(&self, owner: SessionToken) -> TimerId {
        let mut state = self.inner.borrow_mut();
        state.next_timer += 1;
        let id = TimerId(state.next_timer);
        state.timers.insert(
            id,
            TimerSlot {
                owner,
                deadline: None,
            },
        );
        id
    }

    fn arm(&self, id: TimerId, delay: Duration) {
        let mut state = self.inner.borrow_mut();
        let deadline = state.now + delay;
        if let Some(slot) = state.timers.get_mut(&id) {
            slot.deadline = Some(deadline);
        }
    }

    fn disarm(&self, id: TimerId) {
        if let Some(slot) = self.inner.borrow_mut().timers.get_mut(&id) {
            slot.deadline = None;
        }
    }

    fn release_timer(&self, id: TimerId) {
        self.inner.borrow_mut().timers.remove(&id);
    }
}

/// The event loop. Owns the virtual clock and hands out [`LoopHandle`]s.
#[derive(Debug, Default)]
pub struct EventLoop {
    handle: LoopHandle,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn now(&self) -> Duration {
        self.handle.now()
    }

    /// Next event in delivery order.
    ///
    /// Drains posted events first; when none remain, advances the clock to the
    /// earliest armed timer and fires it. Returns `None` when the loop is idle.
    pub fn next_event(&self) -> Option<(SessionToken, Event)> {
        let mut state = self.handle.inner.borrow_mut();
        if let Some(event) = state.queue.pop_front() {
            return Some(event);
        }

        let (id, deadline) = state
            .timers
            .iter()
            .filter_map(|(id, slot)| slot.deadline.map(|d| (*id, d)))
            .min_by_key(|(id, deadline)| (*deadline, *id))?;
        let slot = state.timers.get_mut(&id)?;
        slot.deadline = None;
        let owner = slot.owner;
        state.now = state.now.max(deadline);
        trace!(token = owner.0, now_ms = state.now.as_millis() as u64, "timer fired");
        Some((owner, Event::Timeout))
    }

    /// Advance the clock without firing anything (timers due in the past fire next).
    pub fn advance(&self, by: Duration) {
        self.handle.inner.borrow_mut().now += by;
    }

    /// Timer slots currently allocated.
    pub fn live_timers(&self) -> usize {
        self.handle.inner.borrow().timers.len()
    }

    /// Timer slots currently armed.
    pub fn armed_timers(&self) -> usize {
        self.handle
            .inner
            .borrow()
            .timers
            .values()
            .filter(|slot| slot.deadline.is_some())
            .count()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.handle.inner.borrow();
        state.queue.is_empty() && state.timers.values().all(|slot| slot.deadline.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posted_events_precede_timers() {
        let el = EventLoop::new();
        let h = el.handle();
        let token = h.allocate_token();
        let timer = h.acquire_timer(token);
        h.arm(timer, Duration::from_millis(10));
        h.post(token, Event::Stream(StreamEvent::Readable));

        assert_eq!(el.next_event(), Some((token, Event::Stream(StreamEvent::Readable))));
        assert_eq!(el.now(), Duration::ZERO);
        assert_eq!(el.next_event(), Some((token, Event::Timeout)));
        assert_eq!(el.now(), Duration::from_millis(10));
        assert_eq!(el.next_event(), None);
    }

    #[test]
    fn timer_fires_once_per_arm() {
        let el = EventLoop::new();
        let h = el.handle();
        let token = h.allocate_token();
        let timer = h.acquire_timer(token);
        h.arm(timer, Duration::from_millis(50));
        assert!(el.next_event().is_some());
        assert!(el.next_event().is_none());
        assert!(el.is_idle());
    }

    #[test]
    fn earliest_deadline_first() {
        let el = EventLoop::new();
        let h = el.handle();
        let (a, b) = (h.allocate_token(), h.allocate_token());
        let ta = h.acquire_timer(a);
        let tb = h.acquire_timer(b);
        h.arm(ta, Duration::from_millis(30));
        h.arm(tb, Duration::from_millis(20));
        assert_eq!(el.next_event(), Some((b, Event::Timeout)));
        assert_eq!(el.next_event(), Some((a, Event::Timeout)));
        assert_eq!(el.now(), Duration::from_millis(30));
    }

    #[test]
    fn disarm_and_release() {
        let el = EventLoop::new();
        let h = el.handle();
        let token = h.allocate_token();
        let timer = h.acquire_timer(token);
        h.arm(timer, Duration::from_millis(5));
        h.disarm(timer);
        assert_eq!(el.next_event(), None);
        assert_eq!(el.live_timers(), 1);
        h.arm(timer, Duration::from_millis(5));
        h.release_timer(timer);
        assert_eq!(el.live_timers(), 0);
        assert_eq!(el.next_event(), None);
    }
}
