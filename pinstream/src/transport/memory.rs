//! In-memory transport pair for tests and demos.
//!
//! Both ends share one buffer per direction. Writes post `Readable` to the
//! peer's token through the event loop; [`PipeControl`] opens, fails and
//! injects loss into the pipe from outside the sessions.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::debug;

use crate::scheduler::{Event, LoopHandle, SessionToken};
use crate::transport::{StreamEvent, StreamResult, StreamState, Transport, TransportMode};

/// Error code reported for writes on a closed pipe (EPIPE).
pub const ERROR_PIPE_CLOSED: i32 = 32;

/// Which end of a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    A,
    B,
}

impl PipeEnd {
    fn index(self) -> usize {
        match self {
            PipeEnd::A => 0,
            PipeEnd::B => 1,
        }
    }

    fn peer(self) -> PipeEnd {
        match self {
            PipeEnd::A => PipeEnd::B,
            PipeEnd::B => PipeEnd::A,
        }
    }
}

#[derive(Debug, Default)]
struct Direction {
    chunks: VecDeque<Vec<u8>>,
    /// Offset into the front chunk already consumed (stream mode only).
    front_offset: usize,
    drop_next: usize,
    dropped: usize,
    written: usize,
}

#[derive(Debug)]
struct PipeShared {
    mode: TransportMode,
    state: StreamState,
    error: i32,
    /// Indexed by the writing end.
    directions: [Direction; 2],
    tokens: [SessionToken; 2],
    events: LoopHandle,
}

impl PipeShared {
    fn notify(&self, end: PipeEnd, event: StreamEvent) {
        self.events.post(self.tokens[end.index()], Event::Stream(event));
    }

    fn close(&mut self, error: i32) {
        if self.state == StreamState::Closed {
            return;
        }
        self.state = StreamState::Closed;
        self.error = error;
    }
}

/// One end of an in-memory pipe.
#[derive(Debug)]
pub struct MemoryPipe {
    end: PipeEnd,
    shared: Rc<RefCell<PipeShared>>,
}

/// Out-of-band control over a pipe pair.
#[derive(Debug, Clone)]
pub struct PipeControl {
    shared: Rc<RefCell<PipeShared>>,
}

impl MemoryPipe {
    /// Create a connected pair in the `Opening` state; call [`PipeControl::open`] to open it.
    pub fn pair(
        events: &LoopHandle,
        mode: TransportMode,
        a: SessionToken,
        b: SessionToken,
    ) -> (MemoryPipe, MemoryPipe, PipeControl) {
        let shared = Rc::new(RefCell::new(PipeShared {
            mode,
            state: StreamState::Opening,
            error: 0,
            directions: [Direction::default(), Direction::default()],
            tokens: [a, b],
            events: events.clone(),
        }));
        (
            MemoryPipe {
                end: PipeEnd::A,
                shared: Rc::clone(&shared),
            },
            MemoryPipe {
                end: PipeEnd::B,
                shared: Rc::clone(&shared),
            },
            PipeControl { shared },
        )
    }

    /// Create a pair that is already open. No `Opened` events are posted.
    pub fn open_pair(
        events: &LoopHandle,
        mode: TransportMode,
        a: SessionToken,
        b: SessionToken,
    ) -> (MemoryPipe, MemoryPipe, PipeControl) {
        let (pa, pb, control) = Self::pair(events, mode, a, b);
        control.shared.borrow_mut().state = StreamState::Open;
        (pa, pb, control)
    }

    pub fn end(&self) -> PipeEnd {
        self.end
    }
}

impl Transport for MemoryPipe {
    fn state(&self) -> StreamState {
        self.shared.borrow().state
    }

    fn read(&mut self, buf: &mut [u8]) -> StreamResult {
        let mut shared = self.shared.borrow_mut();
        let mode = shared.mode;
        let inbound = &mut shared.directions[self.end.peer().index()];

        if let Some(front) = inbound.chunks.front() {
            return match mode {
                TransportMode::Datagram => {
                    let n = front.len().min(buf.len());
                    buf[..n].copy_from_slice(&front[..n]);
                    inbound.chunks.pop_front();
                    StreamResult::Success(n)
                }
                TransportMode::Stream => {
                    let mut copied = 0;
                    while copied < buf.len() {
                        let Some(front) = inbound.chunks.front() else {
                            break;
                        };
                        let available = &front[inbound.front_offset..];
                        let n = available.len().min(buf.len() - copied);
                        buf[copied..copied + n].copy_from_slice(&available[..n]);
                        copied += n;
                        inbound.front_offset += n;
                        if inbound.front_offset == front.len() {
                            inbound.chunks.pop_front();
                            inbound.front_offset = 0;
                        }
                    }
                    StreamResult::Success(copied)
                }
            };
        }

        match shared.state {
            StreamState::Open | StreamState::Opening => StreamResult::WouldBlock,
            StreamState::Closed if shared.error == 0 => StreamResult::EndOfStream,
            StreamState::Closed => StreamResult::Error(shared.error),
        }
    }

    fn write(&mut self, data: &[u8]) -> StreamResult {
        let mut shared = self.shared.borrow_mut();
        match shared.state {
            StreamState::Opening => return StreamResult::WouldBlock,
            StreamState::Closed => return StreamResult::Error(ERROR_PIPE_CLOSED),
            StreamState::Open => {}
        }
        let outbound = &mut shared.directions[self.end.index()];
        outbound.written += 1;
        if outbound.drop_next > 0 {
            outbound.drop_next -= 1;
            outbound.dropped += 1;
            debug!(end = ?self.end, len = data.len(), "memory pipe dropped write");
            return StreamResult::Success(data.len());
        }
        outbound.chunks.push_back(data.to_vec());
        shared.notify(self.end.peer(), StreamEvent::Readable);
        StreamResult::Success(data.len())
    }

    fn close(&mut self) {
        let mut shared = self.shared.borrow_mut();
        if shared.state == StreamState::Closed {
            return;
        }
        shared.close(0);
        shared.notify(self.end.peer(), StreamEvent::Closed(0));
    }
}

impl PipeControl {
    /// Open the pipe and post `Opened` to both ends.
    pub fn open(&self) {
        let mut shared = self.shared.borrow_mut();
        if shared.state != StreamState::Opening {
            return;
        }
        shared.state = StreamState::Open;
        shared.notify(PipeEnd::A, StreamEvent::Opened);
        shared.notify(PipeEnd::B, StreamEvent::Opened);
    }

    /// Fail the pipe with `code`, posting `Closed(code)` to both ends.
    pub fn fail(&self, code: i32) {
        let mut shared = self.shared.borrow_mut();
        if shared.state == StreamState::Closed {
            return;
        }
        shared.close(code);
        shared.notify(PipeEnd::A, StreamEvent::Closed(code));
        shared.notify(PipeEnd::B, StreamEvent::Closed(code));
    }

    /// Silently discard the next `count` writes made by `from`.
    pub fn drop_next(&self, from: PipeEnd, count: usize) {
        self.shared.borrow_mut().directions[from.index()].drop_next += count;
    }

    /// Writes discarded so far from `from`.
    pub fn dropped(&self, from: PipeEnd) -> usize {
        self.shared.borrow().directions[from.index()].dropped
    }

    /// Writes attempted so far from `from`, delivered or not.
    pub fn writes(&self, from: PipeEnd) -> usize {
        self.shared.borrow().directions[from.index()].written
    }

    pub fn state(&self) -> StreamState {
        self.shared.borrow().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::EventLoop;

    fn tokens(el: &EventLoop) -> (SessionToken, SessionToken) {
        let h = el.handle();
        (h.allocate_token(), h.allocate_token())
    }

    #[test]
    fn datagram_preserves_boundaries() {
        let el = EventLoop::new();
        let (ta, tb) = tokens(&el);
        let (mut a, mut b, _ctl) = MemoryPipe::open_pair(&el.handle(), TransportMode::Datagram, ta, tb);
        assert_eq!(a.write(b"one"), StreamResult::Success(3));
        assert_eq!(a.write(b"three"), StreamResult::Success(5));

        let mut buf = [0u8; 64];
        assert_eq!(b.read(&mut buf), StreamResult::Success(3));
        assert_eq!(&buf[..3], b"one");
        assert_eq!(b.read(&mut buf), StreamResult::Success(5));
        assert_eq!(b.read(&mut buf), StreamResult::WouldBlock);
        assert_eq!(el.next_event(), Some((tb, Event::Stream(StreamEvent::Readable))));
    }

    #[test]
    fn stream_coalesces_and_splits() {
        let el = EventLoop::new();
        let (ta, tb) = tokens(&el);
        let (mut a, mut b, _ctl) = MemoryPipe::open_pair(&el.handle(), TransportMode::Stream, ta, tb);
        a.write(b"hello ");
        a.write(b"world");
        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf), StreamResult::Success(4));
        assert_eq!(&buf, b"hell");
        let mut rest = [0u8; 64];
        assert_eq!(b.read(&mut rest), StreamResult::Success(7));
        assert_eq!(&rest[..7], b"o world");
    }

    #[test]
    fn opening_blocks_writes_until_open() {
        let el = EventLoop::new();
        let (ta, tb) = tokens(&el);
        let (mut a, _b, ctl) = MemoryPipe::pair(&el.handle(), TransportMode::Stream, ta, tb);
        assert_eq!(a.state(), StreamState::Opening);
        assert_eq!(a.write(b"x"), StreamResult::WouldBlock);
        ctl.open();
        assert_eq!(el.next_event(), Some((ta, Event::Stream(StreamEvent::Opened))));
        assert_eq!(el.next_event(), Some((tb, Event::Stream(StreamEvent::Opened))));
        assert_eq!(a.write(b"x"), StreamResult::Success(1));
    }

    #[test]
    fn drop_next_discards_writes() {
        let el = EventLoop::new();
        let (ta, tb) = tokens(&el);
        let (mut a, mut b, ctl) = MemoryPipe::open_pair(&el.handle(), TransportMode::Datagram, ta, tb);
        ctl.drop_next(PipeEnd::A, 1);
        assert_eq!(a.write(b"lost"), StreamResult::Success(4));
        a.write(b"kept");
        let mut buf = [0u8; 8];
        assert_eq!(b.read(&mut buf), StreamResult::Success(4));
        assert_eq!(&buf[..4], b"kept");
        assert_eq!(ctl.dropped(PipeEnd::A), 1);
        assert_eq!(ctl.writes(PipeEnd::A), 2);
    }

    #[test]
    fn close_and_fail() {
        let el = EventLoop::new();
        let (ta, tb) = tokens(&el);
        let (mut a, mut b, ctl) = MemoryPipe::open_pair(&el.handle(), TransportMode::Stream, ta, tb);
        a.close();
        let mut buf = [0u8; 8];
        assert_eq!(b.read(&mut buf), StreamResult::EndOfStream);
        assert_eq!(b.write(b"x"), StreamResult::Error(ERROR_PIPE_CLOSED));
        assert_eq!(el.next_event(), Some((tb, Event::Stream(StreamEvent::Closed(0)))));

        let (_c, mut d, ctl2) = MemoryPipe::open_pair(&el.handle(), TransportMode::Stream, ta, tb);
        ctl2.fail(104);
        assert_eq!(d.read(&mut buf), StreamResult::Error(104));
        assert_eq!(ctl.state(), StreamState::Closed);
    }
}
