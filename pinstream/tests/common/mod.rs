// Shared harness: two sessions over an in-memory pipe, driven by one event loop.

#![allow(dead_code)]

use std::rc::Rc;

use pinstream::transport::memory::{MemoryPipe, PipeControl};
use pinstream::{
    drive, CryptoEngineContext, EventLoop, EventSink, Scheduler, Session, SessionAdapter,
    SessionHandler, StreamResult, TransportMode,
};
use pintrust::{DigestAlgorithm, HandshakeErrorKind, Identity, Role};

/// Records every callback; drains readable data as it arrives.
#[derive(Debug, Default)]
pub struct Recorder {
    pub opened: u32,
    pub readable: u32,
    pub writable: u32,
    pub closed: Vec<i32>,
    pub errors: Vec<HandshakeErrorKind>,
    pub received: Vec<u8>,
}

impl SessionHandler for Recorder {
    fn on_open(&mut self, _session: &mut Session) {
        self.opened += 1;
    }

    fn on_readable(&mut self, session: &mut Session) {
        self.readable += 1;
        let mut buf = [0u8; 4096];
        while let StreamResult::Success(n) = session.read(&mut buf) {
            self.received.extend_from_slice(&buf[..n]);
        }
    }

    fn on_writable(&mut self, _session: &mut Session) {
        self.writable += 1;
    }

    fn on_closed(&mut self, _session: &mut Session, code: i32) {
        self.closed.push(code);
    }

    fn on_handshake_error(&mut self, _session: &mut Session, kind: HandshakeErrorKind) {
        self.errors.push(kind);
    }
}

pub struct Harness {
    pub events: EventLoop,
    pub control: PipeControl,
    pub client: SessionAdapter<Recorder>,
    pub server: SessionAdapter<Recorder>,
    pub client_identity: Identity,
    pub server_identity: Identity,
    pub context: CryptoEngineContext,
}

/// Client and server sessions with identities set and no peer digests.
///
/// `open` selects an already-open pipe; otherwise call `control.open()`.
pub fn harness(mode: TransportMode, open: bool) -> Harness {
    harness_with(mode, open, true)
}

pub fn harness_with(mode: TransportMode, open: bool, client_identity_set: bool) -> Harness {
    let context = CryptoEngineContext::initialize().unwrap();
    let events = EventLoop::new();
    let handle = events.handle();
    let client_token = handle.allocate_token();
    let server_token = handle.allocate_token();
    let (client_io, server_io, control) = if open {
        MemoryPipe::open_pair(&handle, mode, client_token, server_token)
    } else {
        MemoryPipe::pair(&handle, mode, client_token, server_token)
    };
    let scheduler: Rc<dyn Scheduler> = Rc::new(handle);

    let client_identity = Identity::generate("client").unwrap();
    let server_identity = Identity::generate("server").unwrap();

    let mut client = Session::new(
        &context,
        client_token,
        Box::new(client_io),
        Rc::clone(&scheduler),
        Role::Client,
    );
    client.set_mode(mode).unwrap();
    if client_identity_set {
        client.set_identity(client_identity.clone()).unwrap();
    }

    let mut server = Session::new(
        &context,
        server_token,
        Box::new(server_io),
        scheduler,
        Role::Server,
    );
    server.set_mode(mode).unwrap();
    server.set_identity(server_identity.clone()).unwrap();

    Harness {
        events,
        control,
        client: SessionAdapter::new(client, Recorder::default()),
        server: SessionAdapter::new(server, Recorder::default()),
        client_identity,
        server_identity,
        context,
    }
}

pub fn sha256(identity: &Identity) -> Vec<u8> {
    identity.certificate().compute_digest(DigestAlgorithm::Sha256)
}

impl Harness {
    /// Give each side the other's SHA-256 certificate digest.
    pub fn exchange_digests(&mut self) {
        let server_digest = sha256(&self.server_identity);
        let client_digest = sha256(&self.client_identity);
        self.client
            .session_mut()
            .set_peer_digest("sha-256", &server_digest)
            .unwrap();
        self.server
            .session_mut()
            .set_peer_digest("sha-256", &client_digest)
            .unwrap();
    }

    pub fn start_both(&mut self) {
        self.client.start().unwrap();
        self.server.start().unwrap();
    }

    /// Pump the loop until idle (or `max_events`); returns events delivered.
    pub fn run(&mut self, max_events: usize) -> usize {
        let mut sinks: [&mut dyn EventSink; 2] = [&mut self.client, &mut self.server];
        drive(&self.events, &mut sinks, max_events)
    }
}
