//! Callback shell around a [`Session`] and a helper that pumps the event loop.

use tracing::trace;

use pintrust::HandshakeErrorKind;

use crate::error::StartError;
use crate::scheduler::{Event, EventLoop, SessionToken};
use crate::session::{Session, SessionEvent};

/// Consumer callbacks. Each receives the session so it can read, write,
/// export keys or shut down in response.
pub trait SessionHandler {
    fn on_open(&mut self, _session: &mut Session) {}
    fn on_readable(&mut self, _session: &mut Session) {}
    fn on_writable(&mut self, _session: &mut Session) {}
    fn on_closed(&mut self, _session: &mut Session, _code: i32) {}
    fn on_handshake_error(&mut self, _session: &mut Session, _kind: HandshakeErrorKind) {}
}

/// Something the event loop can deliver events to.
pub trait EventSink {
    fn token(&self) -> SessionToken;
    fn handle_event(&mut self, event: Event);
}

/// A session plus the handler its events are dispatched to.
pub struct SessionAdapter<H> {
    session: Session,
    handler: H,
}

impl<H: SessionHandler> SessionAdapter<H> {
    pub fn new(session: Session, handler: H) -> Self {
        Self { session, handler }
    }

    pub fn token(&self) -> SessionToken {
        self.session.token()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Start the session and dispatch anything the first step produced.
    pub fn start(&mut self) -> Result<(), StartError> {
        let result = self.session.start();
        self.dispatch();
        result
    }

    /// Feed one event to the session, then run handlers for what it emitted.
    pub fn handle_event(&mut self, event: Event) {
        self.session.handle_event(event);
        self.dispatch();
    }

    /// Drain queued session events into the handler, including any raised by the handler itself.
    pub fn dispatch(&mut self) {
        while let Some(event) = self.session.poll_event() {
            match event {
                SessionEvent::Open => self.handler.on_open(&mut self.session),
                SessionEvent::Readable => self.handler.on_readable(&mut self.session),
                SessionEvent::Writable => self.handler.on_writable(&mut self.session),
                SessionEvent::Closed(code) => self.handler.on_closed(&mut self.session, code),
                SessionEvent::HandshakeError(kind) => {
                    self.handler.on_handshake_error(&mut self.session, kind)
                }
            }
        }
    }
}

impl<H: SessionHandler> EventSink for SessionAdapter<H> {
    fn token(&self) -> SessionToken {
        SessionAdapter::token(self)
    }

    fn handle_event(&mut self, event: Event) {
        SessionAdapter::handle_event(self, event)
    }
}

/// Deliver up to `max_events` events to the matching sinks. Returns how many were delivered.
///
/// Stops early once the loop has nothing queued and no timer armed.
pub fn drive(events: &EventLoop, sinks: &mut [&mut dyn EventSink], max_events: usize) -> usize {
    let mut delivered = 0;
    while delivered < max_events {
        let Some((token, event)) = events.next_event() else {
            break;
        };
        delivered += 1;
        match sinks.iter_mut().find(|sink| sink.token() == token) {
            Some(sink) => sink.handle_event(event),
            None => trace!(?token, ?event, "no sink for event"),
        }
    }
    delivered
}
