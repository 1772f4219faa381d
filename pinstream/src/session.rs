//! The handshake state machine: one secure session over one transport.

use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use pintrust::identity::Certificate;
use pintrust::suite::{build_offer_list, split_srtp_keying_material, SrtpKeys, SRTP_EXPORTER_LABEL};
use pintrust::{
    CipherSuite, CryptoOptions, DigestAlgorithm, Fingerprint, HandshakeErrorKind, Identity,
    ProtocolVersion, Role, SrtpCryptoSuite,
};

use crate::config::SessionConfig;
use crate::engine::pin::ERROR_ENGINE_FAILED;
use crate::engine::{CryptoEngine, CryptoEngineContext, EngineConfig, EngineError, StepOutcome};
use crate::error::{ConfigError, DigestError, ExportError, StartError};
use crate::scheduler::{Event, Scheduler, SessionToken};
use crate::timer::RetransmitTimer;
use crate::transport::{StreamEvent, StreamResult, StreamState, Transport, TransportMode};
use crate::trust::PeerTrust;

/// Lifecycle of a [`Session`]. `Failed` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    WaitingForTransportOpen,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

/// Outward notifications, drained with [`Session::poll_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connected and the peer is trusted.
    Open,
    Readable,
    Writable,
    /// Transport closed or failed; 0 for an orderly close.
    Closed(i32),
    /// Negotiation or trust failure.
    HandshakeError(HandshakeErrorKind),
}

/// A fingerprint-authenticated session.
///
/// The session owns its transport, engine and timer slot. It is driven by
/// [`Session::handle_event`] for everything addressed to its token, and by
/// direct consumer calls. Nothing is shared with other sessions.
pub struct Session {
    token: SessionToken,
    role: Role,
    state: SessionState,
    config: SessionConfig,
    identity: Option<Identity>,
    media_suites: Vec<SrtpCryptoSuite>,
    engine: Box<dyn CryptoEngine>,
    transport: Box<dyn Transport>,
    timer: RetransmitTimer,
    trust: PeerTrust,
    events: VecDeque<SessionEvent>,
    retransmission_timeout: Option<Duration>,
    open_emitted: bool,
}

impl Session {
    pub fn new(
        context: &CryptoEngineContext,
        token: SessionToken,
        transport: Box<dyn Transport>,
        scheduler: Rc<dyn Scheduler>,
        role: Role,
    ) -> Self {
        Self::with_engine(
            context.create_engine(),
            token,
            transport,
            scheduler,
            role,
            SessionConfig::default(),
        )
    }

    pub fn with_config(
        context: &CryptoEngineContext,
        token: SessionToken,
        transport: Box<dyn Transport>,
        scheduler: Rc<dyn Scheduler>,
        role: Role,
        config: SessionConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_engine(
            context.create_engine(),
            token,
            transport,
            scheduler,
            role,
            config,
        ))
    }

    /// Build a session around a caller-supplied engine. `config` is assumed valid.
    pub fn with_engine(
        engine: Box<dyn CryptoEngine>,
        token: SessionToken,
        transport: Box<dyn Transport>,
        scheduler: Rc<dyn Scheduler>,
        role: Role,
        config: SessionConfig,
    ) -> Self {
        Self {
            token,
            role,
            state: SessionState::Uninitialized,
            config,
            identity: None,
            media_suites: Vec::new(),
            engine,
            transport,
            timer: RetransmitTimer::new(scheduler, token),
            trust: PeerTrust::new(),
            events: VecDeque::new(),
            retransmission_timeout: None,
            open_emitted: false,
        }
    }

    // ── Configuration (before start) ────────────────────────────────────

    fn ensure_configurable(&self) -> Result<(), ConfigError> {
        if self.state != SessionState::Uninitialized {
            return Err(ConfigError::AlreadyStarted);
        }
        Ok(())
    }

    pub fn set_identity(&mut self, identity: Identity) -> Result<(), ConfigError> {
        self.ensure_configurable()?;
        self.identity = Some(identity);
        Ok(())
    }

    /// Require a verified peer before `Open`; as server, also demand a client certificate.
    pub fn request_mutual_auth(&mut self, enabled: bool) -> Result<(), ConfigError> {
        self.ensure_configurable()?;
        self.config.client_auth_enabled = enabled;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: TransportMode) -> Result<(), ConfigError> {
        self.ensure_configurable()?;
        self.config.mode = mode;
        Ok(())
    }

    pub fn set_max_protocol_version(&mut self, version: ProtocolVersion) -> Result<(), ConfigError> {
        self.ensure_configurable()?;
        self.config.max_protocol_version = version;
        Ok(())
    }

    pub fn set_crypto_options(&mut self, options: CryptoOptions) -> Result<(), ConfigError> {
        self.ensure_configurable()?;
        self.config.crypto_options = options;
        Ok(())
    }

    pub fn set_cipher_suites(&mut self, suites: &[CipherSuite]) -> Result<(), ConfigError> {
        self.ensure_configurable()?;
        if suites.is_empty() {
            return Err(ConfigError::Invalid("cipher suite list is empty".into()));
        }
        self.config.cipher_suites = suites.to_vec();
        Ok(())
    }

    /// Request media-suite negotiation with `candidates` in preference order.
    ///
    /// GCM suites are prepended when enabled in the crypto options and dropped
    /// otherwise. Any unknown identifier rejects the whole list.
    pub fn set_candidate_media_suites(&mut self, candidates: &[u16]) -> Result<(), ConfigError> {
        self.ensure_configurable()?;
        let offer = build_offer_list(candidates, &self.config.crypto_options)
            .map_err(|e| ConfigError::UnsupportedSuite(e.to_string()))?;
        self.media_suites = offer;
        Ok(())
    }

    pub fn set_initial_retransmission_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<(), ConfigError> {
        self.ensure_configurable()?;
        if timeout.is_zero() {
            return Err(ConfigError::Invalid("retransmission timeout must be positive".into()));
        }
        self.config.initial_retransmission_timeout_ms = timeout.as_millis() as u64;
        Ok(())
    }

    // ── Trust ───────────────────────────────────────────────────────────

    /// Store the expected peer certificate digest.
    ///
    /// If the peer certificate was already observed it is verified right away:
    /// a mismatch fails the session, a match releases a withheld `Open`.
    pub fn set_peer_digest(&mut self, algorithm: &str, digest: &[u8]) -> Result<(), DigestError> {
        self.trust.set_peer_digest(algorithm, digest)?;
        if self.trust.peer_certificate().is_none() {
            return Ok(());
        }
        if self.trust.verify_peer_certificate() {
            debug!(token = ?self.token, "late peer digest verified");
            self.maybe_open();
            return Ok(());
        }
        if !self.state.is_terminal() {
            warn!(token = ?self.token, "late peer digest does not match certificate");
            self.fail_handshake(HandshakeErrorKind::VerificationFailed);
        }
        Err(DigestError::VerificationFailed)
    }

    pub fn set_peer_fingerprint(&mut self, fingerprint: &Fingerprint) -> Result<(), DigestError> {
        self.set_peer_digest(fingerprint.algorithm().name(), fingerprint.digest())
    }

    /// Recompute and compare the peer digest. False if either side is missing.
    pub fn verify_peer_certificate(&mut self) -> bool {
        self.trust.verify_peer_certificate()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Begin negotiation now, or as soon as the transport opens.
    ///
    /// Failures during the first engine step are reported through events.
    pub fn start(&mut self) -> Result<(), StartError> {
        if self.state != SessionState::Uninitialized {
            return Err(StartError::AlreadyStarted);
        }
        if self.role == Role::Server && self.identity.is_none() {
            return Err(StartError::MissingIdentity);
        }
        match self.transport.state() {
            StreamState::Closed => Err(StartError::TransportClosed),
            StreamState::Opening => {
                self.set_state(SessionState::WaitingForTransportOpen);
                Ok(())
            }
            StreamState::Open => {
                self.begin_negotiation();
                Ok(())
            }
        }
    }

    /// Deliver an event addressed to this session's token.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Stream(ev) => self.on_stream_event(ev),
            Event::Timeout => self.on_timeout(),
        }
    }

    /// Orderly close from any state. Emits no event; idempotent.
    pub fn shutdown(&mut self) {
        if !self.state.is_terminal() {
            if self.state == SessionState::Connected {
                self.engine.shutdown(self.transport.as_mut());
            }
            self.transport.close();
            self.set_state(SessionState::Closed);
        }
        self.timer.release();
    }

    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    // ── Application data ────────────────────────────────────────────────

    pub fn read(&mut self, buf: &mut [u8]) -> StreamResult {
        if self.state != SessionState::Connected {
            return StreamResult::Error(ERROR_ENGINE_FAILED);
        }
        let result = self.engine.read_application(self.transport.as_mut(), buf);
        match result {
            StreamResult::EndOfStream => {
                self.set_state(SessionState::Closed);
                self.timer.release();
                self.events.push_back(SessionEvent::Closed(0));
            }
            StreamResult::Error(code) => self.on_engine_error(code),
            StreamResult::Success(_) | StreamResult::WouldBlock => {}
        }
        result
    }

    pub fn write(&mut self, data: &[u8]) -> StreamResult {
        if self.state != SessionState::Connected {
            return StreamResult::Error(ERROR_ENGINE_FAILED);
        }
        let result = self.engine.write_application(self.transport.as_mut(), data);
        if let StreamResult::Error(code) = result {
            self.on_engine_error(code);
        }
        result
    }

    // ── Key export ──────────────────────────────────────────────────────

    /// Derive `length` bytes bound to `label` (and `context` when `use_context`).
    pub fn export_keying_material(
        &self,
        label: &str,
        context: Option<&[u8]>,
        use_context: bool,
        length: usize,
    ) -> Result<Vec<u8>, ExportError> {
        if self.state != SessionState::Connected {
            return Err(ExportError::NotConnected);
        }
        let context = use_context.then(|| context.unwrap_or(&[]));
        self.engine.export_keying_material(label, context, length)
    }

    /// Export and split the SRTP master keys and salts for the negotiated media suite.
    pub fn export_srtp_keying_material(&self) -> Result<SrtpKeys, ExportError> {
        let suite = self
            .negotiated_media_crypto_suite()
            .ok_or_else(|| ExportError::Unsupported("no media suite negotiated".into()))?;
        let length = suite.keying_material_len();
        let material = self.export_keying_material(SRTP_EXPORTER_LABEL, None, false, length)?;
        split_srtp_keying_material(suite, &material)
            .map_err(|e| ExportError::Unsupported(e.to_string()))
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn mode(&self) -> TransportMode {
        self.config.mode
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connected and the peer's leaf matched the expected digest.
    pub fn peer_verified(&self) -> bool {
        self.state == SessionState::Connected && self.trust.is_verified()
    }

    pub fn peer_certificate(&self) -> Option<&Certificate> {
        self.trust.peer_certificate()
    }

    /// The agreed media suite; set only while Connected and only if requested.
    pub fn negotiated_media_crypto_suite(&self) -> Option<SrtpCryptoSuite> {
        if self.state != SessionState::Connected {
            return None;
        }
        self.engine.negotiated_srtp_suite()
    }

    /// Record-protection suite in use; `None` unless Connected.
    pub fn negotiated_cipher_suite(&self) -> Option<CipherSuite> {
        if self.state != SessionState::Connected {
            return None;
        }
        self.engine.negotiated_cipher_suite()
    }

    /// Protocol version in use; `None` unless Connected.
    pub fn negotiated_protocol_version(&self) -> Option<ProtocolVersion> {
        if self.state != SessionState::Connected {
            return None;
        }
        self.engine.negotiated_version()
    }

    /// Delay most recently requested by the engine in datagram mode.
    pub fn retransmission_timeout(&self) -> Option<Duration> {
        self.retransmission_timeout
    }

    pub fn timeouts_fired(&self) -> u32 {
        self.timer.fired_count()
    }

    pub fn timer_released(&self) -> bool {
        self.timer.is_released()
    }

    pub fn local_fingerprint(&self, algorithm: DigestAlgorithm) -> Option<Fingerprint> {
        self.identity
            .as_ref()
            .map(|identity| Fingerprint::from_identity(algorithm, identity))
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!(
                token = ?self.token,
                role = ?self.role,
                from = ?self.state,
                to = ?next,
                "session state"
            );
            self.state = next;
        }
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            role: self.role,
            mode: self.config.mode,
            max_version: self.config.max_protocol_version,
            identity: self.identity.clone(),
            cipher_suites: self.config.cipher_suites.clone(),
            srtp_suites: self.media_suites.clone(),
            require_client_certificate: self.role == Role::Server && self.config.client_auth_enabled,
            initial_timeout: self.config.initial_retransmission_timeout(),
            max_timeout: self.config.max_retransmission_timeout(),
        }
    }

    fn begin_negotiation(&mut self) {
        self.set_state(SessionState::Negotiating);
        let config = self.engine_config();
        let outcome = self
            .engine
            .begin(config, self.transport.as_mut(), &mut self.trust);
        self.apply_outcome(outcome);
    }

    fn on_stream_event(&mut self, event: StreamEvent) {
        match (self.state, event) {
            (SessionState::WaitingForTransportOpen, StreamEvent::Opened) => self.begin_negotiation(),
            (SessionState::Negotiating, StreamEvent::Readable | StreamEvent::Writable) => {
                self.timer.cancel();
                let outcome = self
                    .engine
                    .continue_step(self.transport.as_mut(), &mut self.trust);
                self.apply_outcome(outcome);
            }
            (SessionState::Connected, StreamEvent::Readable) => {
                self.events.push_back(SessionEvent::Readable)
            }
            (SessionState::Connected, StreamEvent::Writable) => {
                self.events.push_back(SessionEvent::Writable)
            }
            (
                SessionState::WaitingForTransportOpen
                | SessionState::Negotiating
                | SessionState::Connected,
                StreamEvent::Closed(code),
            ) => self.on_transport_closed(code),
            (state, event) => trace!(token = ?self.token, ?state, ?event, "ignoring stream event"),
        }
    }

    fn on_timeout(&mut self) {
        if self.state != SessionState::Negotiating || !self.timer.on_fire() {
            trace!(token = ?self.token, "ignoring stale timeout");
            return;
        }
        let outcome = self.engine.handle_timeout(self.transport.as_mut());
        self.apply_outcome(outcome);
    }

    fn apply_outcome(&mut self, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Success => {
                self.timer.cancel();
                self.set_state(SessionState::Connected);
                self.maybe_open();
            }
            StepOutcome::NeedInput => {}
            StepOutcome::RetryAfter(delay) => {
                self.retransmission_timeout = Some(delay);
                if self.config.mode == TransportMode::Datagram {
                    self.timer.arm(delay);
                }
            }
            StepOutcome::Fatal(EngineError::Handshake { kind, .. }) => self.fail_handshake(kind),
            StepOutcome::Fatal(EngineError::Transport(code)) => self.on_transport_closed(code),
        }
    }

    /// Emit `Open` once, when connected and the peer is trusted (or trust is not required).
    fn maybe_open(&mut self) {
        if self.state != SessionState::Connected || self.open_emitted {
            return;
        }
        if self.config.client_auth_enabled && !self.trust.is_verified() {
            debug!(token = ?self.token, "connected; open withheld until peer is verified");
            return;
        }
        self.open_emitted = true;
        self.events.push_back(SessionEvent::Open);
    }

    fn fail_handshake(&mut self, kind: HandshakeErrorKind) {
        warn!(token = ?self.token, role = ?self.role, ?kind, "session failed");
        self.set_state(SessionState::Failed);
        self.timer.release();
        self.events.push_back(SessionEvent::HandshakeError(kind));
    }

    fn on_transport_closed(&mut self, code: i32) {
        let next = if self.state == SessionState::Connected && code == 0 {
            SessionState::Closed
        } else {
            SessionState::Failed
        };
        self.set_state(next);
        self.timer.release();
        self.events.push_back(SessionEvent::Closed(code));
    }

    fn on_engine_error(&mut self, code: i32) {
        let kind = match self.engine.failure() {
            Some(EngineError::Handshake { kind, .. }) => Some(*kind),
            _ => None,
        };
        match kind {
            Some(kind) => self.fail_handshake(kind),
            None => self.on_transport_closed(code),
        }
    }
}
