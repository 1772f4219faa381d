//! Reference engine: `pintrust::handshake` over the record layer.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use pintrust::crypto::x25519::SessionKeys;
use pintrust::handshake::{
    AlertDescription, CertificateVerifier, Handshake, HandshakeConfig, HandshakeMessage,
};
use pintrust::identity::Certificate;
use pintrust::{
    CipherSuite, HandshakeErrorKind, PinTrustError, ProtocolVersion, Role, SrtpCryptoSuite,
};

use super::record::{
    ContentType, Record, RecordLayer, EPOCH_PLAINTEXT, EPOCH_PROTECTED, MAX_RECORD_PAYLOAD,
    RECORD_HEADER_LEN,
};
use super::{CryptoEngine, EngineConfig, EngineError, StepOutcome};
use crate::error::ExportError;
use crate::transport::{StreamResult, Transport, TransportMode};

/// Error code returned by application reads and writes once the engine has failed
/// or before it is connected.
pub const ERROR_ENGINE_FAILED: i32 = -1;

const READ_CHUNK: usize = RECORD_HEADER_LEN + MAX_RECORD_PAYLOAD + 16;
const ALERT_LEVEL_WARNING: u8 = 1;
const ALERT_LEVEL_FATAL: u8 = 2;

/// Rejects every certificate; used once the handshake is over.
struct RejectAll;

impl CertificateVerifier for RejectAll {
    fn verify_certificate(&mut self, _certificate: &Certificate, _depth: usize) -> bool {
        false
    }
}

/// Handshake engine with flight-based retransmission for datagram transports.
///
/// Each flight is a single handshake record whose payload is a run of
/// `[message_seq:2][message]` entries. Message sequence numbers let a
/// datagram peer spot a retransmitted flight and answer with its own last
/// flight, which is how a lost final flight is recovered.
pub struct PinEngine {
    mode: TransportMode,
    handshake: Option<Handshake>,
    records: RecordLayer,
    inbound: BytesMut,
    outbound: VecDeque<Bytes>,
    last_flight: Option<Bytes>,
    next_send_seq: u16,
    next_recv_seq: u16,
    timeout: Duration,
    initial_timeout: Duration,
    max_timeout: Duration,
    application: BytesMut,
    peer_closed: bool,
    close_sent: bool,
    transport_end: Option<i32>,
    failed: Option<EngineError>,
}

impl Default for PinEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PinEngine {
    pub fn new() -> Self {
        Self {
            mode: TransportMode::Stream,
            handshake: None,
            records: RecordLayer::new(),
            inbound: BytesMut::new(),
            outbound: VecDeque::new(),
            last_flight: None,
            next_send_seq: 0,
            next_recv_seq: 0,
            timeout: Duration::from_millis(50),
            initial_timeout: Duration::from_millis(50),
            max_timeout: Duration::from_secs(60),
            application: BytesMut::new(),
            peer_closed: false,
            close_sent: false,
            transport_end: None,
            failed: None,
        }
    }

    fn handshake_complete(&self) -> bool {
        self.handshake.as_ref().is_some_and(Handshake::is_complete)
    }

    fn role(&self) -> Option<Role> {
        self.handshake.as_ref().map(Handshake::role)
    }

    // ── Failure handling ────────────────────────────────────────────────

    /// Record a local failure, queue the matching alert and return the engine error.
    fn fail(&mut self, err: PinTrustError) -> EngineError {
        let alert = err.alert().unwrap_or(AlertDescription::HandshakeFailure);
        self.protect_alert();
        let record = [ALERT_LEVEL_FATAL, alert as u8];
        if let Ok(wire) = self.records.seal(ContentType::Alert, &record) {
            self.outbound.push_back(Bytes::from(wire));
        }
        let kind = HandshakeErrorKind::from_alert(alert);
        warn!(role = ?self.role(), ?alert, ?kind, error = %err, "handshake failed");
        let failure = EngineError::Handshake {
            kind,
            alert,
            reason: err.to_string(),
        };
        self.failed = Some(failure.clone());
        failure
    }

    /// Switch to protected alerts if the peer can already derive our write key.
    ///
    /// A client only holds keys after the server's first flight, so the server
    /// seals once that flight is out; a client with keys always seals.
    fn protect_alert(&mut self) {
        if self.records.write_epoch() == EPOCH_PROTECTED {
            return;
        }
        let peer_has_keys = match self.role() {
            Some(Role::Client) => true,
            Some(Role::Server) => self.last_flight.is_some(),
            None => false,
        };
        if !peer_has_keys {
            return;
        }
        if let Ok((suite, keys, role)) = self.negotiated_keys() {
            let (key, iv) = write_half(&keys, role);
            if let Err(err) = self.records.install_write_key(suite, &key, iv) {
                debug!(error = %err, "alert stays unprotected");
            }
        }
    }

    fn peer_failure(&mut self, alert: AlertDescription, reason: String) -> EngineError {
        let kind = HandshakeErrorKind::from_alert(alert);
        warn!(role = ?self.role(), ?alert, ?kind, "peer sent fatal alert");
        let failure = EngineError::Handshake { kind, alert, reason };
        self.failed = Some(failure.clone());
        failure
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    /// Read everything the transport has and process complete records.
    fn pump(
        &mut self,
        io: &mut dyn Transport,
        verifier: &mut dyn CertificateVerifier,
    ) -> Result<(), EngineError> {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match io.read(&mut buf) {
                StreamResult::Success(0) => break,
                StreamResult::Success(n) => {
                    self.inbound.extend_from_slice(&buf[..n]);
                    let processed = self.process_inbound(verifier);
                    if self.mode == TransportMode::Datagram {
                        self.inbound.clear();
                    }
                    processed?;
                }
                StreamResult::WouldBlock => break,
                StreamResult::EndOfStream => {
                    self.transport_end = Some(0);
                    break;
                }
                StreamResult::Error(code) => {
                    self.transport_end = Some(code);
                    break;
                }
            }
        }
        Ok(())
    }

    fn process_inbound(&mut self, verifier: &mut dyn CertificateVerifier) -> Result<(), EngineError> {
        loop {
            let record = match Record::decode(&mut self.inbound) {
                Ok(Some(record)) => record,
                Ok(None) => return Ok(()),
                Err(err) if self.mode == TransportMode::Datagram => {
                    debug!(error = %err, "discarding malformed datagram");
                    return Ok(());
                }
                Err(err) => return Err(self.fail(err)),
            };
            self.process_record(record, verifier)?;
        }
    }

    fn process_record(
        &mut self,
        record: Record,
        verifier: &mut dyn CertificateVerifier,
    ) -> Result<(), EngineError> {
        // Once the peer is keyed, its alerts and any late handshake records
        // can no longer be trusted in the clear. Unprotected alerts are
        // dropped in both modes so they cannot close or kill the session.
        if record.epoch == EPOCH_PLAINTEXT && self.records.has_read_key() {
            match record.content_type {
                ContentType::Alert => {
                    warn!(role = ?self.role(), "ignoring unprotected alert after key exchange");
                    return Ok(());
                }
                ContentType::Handshake if self.handshake_complete() => {
                    if self.mode == TransportMode::Stream {
                        return self.reject(&record, "handshake record after completion");
                    }
                    self.answer_retransmission(&record.payload);
                    return Ok(());
                }
                _ => {}
            }
        }
        if record.epoch == EPOCH_PROTECTED && !self.records.has_read_key() {
            if let Err(err) = self.install_read_key() {
                return Err(self.fail(err));
            }
        }
        let payload = match self.records.open(&record) {
            Ok(payload) => payload,
            Err(err) if self.mode == TransportMode::Datagram => {
                debug!(error = %err, sequence = record.sequence, "discarding unreadable record");
                return Ok(());
            }
            Err(err) => return Err(self.fail(err)),
        };
        match record.content_type {
            ContentType::Handshake => self.process_flight(payload, verifier),
            ContentType::Alert => self.process_alert(&payload),
            ContentType::ApplicationData => {
                trace!(len = payload.len(), "application data received");
                self.application.extend_from_slice(&payload);
                Ok(())
            }
        }
    }

    /// Datagram records that fail checks are dropped; on a stream they end the connection.
    fn reject(&mut self, record: &Record, reason: &str) -> Result<(), EngineError> {
        if self.mode == TransportMode::Datagram {
            debug!(
                content_type = ?record.content_type,
                sequence = record.sequence,
                reason,
                "discarding record"
            );
            return Ok(());
        }
        Err(self.fail(PinTrustError::UnexpectedMessage(reason.into())))
    }

    /// After completion a plaintext flight is only used to spot the peer
    /// resending an old flight; it never reaches the handshake.
    fn answer_retransmission(&mut self, payload: &[u8]) {
        let mut body = payload;
        while body.remaining() >= 2 {
            let seq = body.get_u16();
            if HandshakeMessage::decode(&mut body).is_err() {
                return;
            }
            if seq < self.next_recv_seq {
                debug!(role = ?self.role(), "peer retransmitted; resending last flight");
                self.retransmit();
                return;
            }
        }
    }

    fn process_flight(
        &mut self,
        payload: Bytes,
        verifier: &mut dyn CertificateVerifier,
    ) -> Result<(), EngineError> {
        let mut body = &payload[..];
        let mut peer_retransmitted = false;
        while body.has_remaining() {
            if body.remaining() < 2 {
                return Err(self.fail(PinTrustError::Decode("truncated message sequence".into())));
            }
            let seq = body.get_u16();
            let msg = match HandshakeMessage::decode(&mut body) {
                Ok(msg) => msg,
                Err(err) => return Err(self.fail(err)),
            };
            if seq < self.next_recv_seq {
                peer_retransmitted = true;
                continue;
            }
            if seq > self.next_recv_seq {
                trace!(seq, expected = self.next_recv_seq, "ignoring out-of-order message");
                continue;
            }
            self.next_recv_seq += 1;

            let Some(handshake) = self.handshake.as_mut() else {
                return Err(self.fail(PinTrustError::UnexpectedMessage(
                    "handshake message before begin".into(),
                )));
            };
            let was_complete = handshake.is_complete();
            let flight = match handshake.handle_message(msg, verifier) {
                Ok(flight) => flight,
                Err(err) => return Err(self.fail(err)),
            };
            if !flight.is_empty() {
                if let Err(err) = self.send_flight(flight) {
                    return Err(self.fail(err));
                }
            }
            if !was_complete && self.handshake_complete() {
                if let Err(err) = self.install_keys() {
                    return Err(self.fail(err));
                }
            }
        }
        if peer_retransmitted && self.mode == TransportMode::Datagram {
            debug!(role = ?self.role(), "peer retransmitted; resending last flight");
            self.retransmit();
        }
        Ok(())
    }

    fn process_alert(&mut self, payload: &[u8]) -> Result<(), EngineError> {
        if payload.len() != 2 {
            return Err(self.fail(PinTrustError::Decode("malformed alert".into())));
        }
        match AlertDescription::from_u8(payload[1]) {
            Some(AlertDescription::CloseNotify) => {
                debug!(role = ?self.role(), "peer sent close_notify");
                self.peer_closed = true;
                Ok(())
            }
            Some(alert) => Err(self.peer_failure(alert, format!("peer alert {alert:?}"))),
            None => Err(self.peer_failure(
                AlertDescription::HandshakeFailure,
                format!("unknown peer alert {}", payload[1]),
            )),
        }
    }

    // ── Keys ────────────────────────────────────────────────────────────

    fn install_keys(&mut self) -> pintrust::Result<()> {
        let (suite, keys, role) = self.negotiated_keys()?;
        let (key, iv) = write_half(&keys, role);
        self.records.install_write_key(suite, &key, iv)?;
        if !self.records.has_read_key() {
            self.install_read_key()?;
        }
        Ok(())
    }

    fn install_read_key(&mut self) -> pintrust::Result<()> {
        let (suite, keys, role) = self.negotiated_keys()?;
        let peer = match role {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        };
        let (key, iv) = write_half(&keys, peer);
        self.records.install_read_key(suite, &key, iv)
    }

    fn negotiated_keys(&self) -> pintrust::Result<(CipherSuite, SessionKeys, Role)> {
        let not_ready =
            || PinTrustError::UnexpectedMessage("protected record before key exchange".into());
        let handshake = self.handshake.as_ref().ok_or_else(not_ready)?;
        let suite = handshake.negotiated_cipher_suite().ok_or_else(not_ready)?;
        let keys = handshake.session_keys().ok_or_else(not_ready)?.clone();
        Ok((suite, keys, handshake.role()))
    }

    // ── Outbound ────────────────────────────────────────────────────────

    fn send_flight(&mut self, messages: Vec<HandshakeMessage>) -> pintrust::Result<()> {
        let mut payload = BytesMut::new();
        let names: Vec<&'static str> = messages.iter().map(HandshakeMessage::name).collect();
        for msg in messages {
            payload.put_u16(self.next_send_seq);
            self.next_send_seq += 1;
            payload.put_slice(&msg.encode());
        }
        let wire = Bytes::from(self.records.seal_handshake(&payload)?);
        debug!(role = ?self.role(), messages = ?names, len = wire.len(), "sending flight");
        self.last_flight = Some(wire.clone());
        self.timeout = self.initial_timeout;
        self.outbound.push_back(wire);
        Ok(())
    }

    fn retransmit(&mut self) {
        if let Some(flight) = &self.last_flight {
            self.outbound.push_back(flight.clone());
        }
    }

    /// Write queued records until the transport pushes back.
    fn flush(&mut self, io: &mut dyn Transport) -> Result<(), EngineError> {
        while let Some(front) = self.outbound.front_mut() {
            match io.write(&front[..]) {
                StreamResult::Success(0) => break,
                StreamResult::Success(n)
                    if n >= front.len() || self.mode == TransportMode::Datagram =>
                {
                    self.outbound.pop_front();
                }
                StreamResult::Success(n) => front.advance(n),
                StreamResult::WouldBlock => break,
                StreamResult::EndOfStream => return Err(EngineError::Transport(0)),
                StreamResult::Error(code) => return Err(EngineError::Transport(code)),
            }
        }
        Ok(())
    }

    fn step_outcome(&self) -> StepOutcome {
        if let Some(err) = &self.failed {
            return StepOutcome::Fatal(err.clone());
        }
        if self.handshake_complete() {
            return StepOutcome::Success;
        }
        if let Some(code) = self.transport_end {
            return StepOutcome::Fatal(EngineError::Transport(code));
        }
        if self.peer_closed {
            return StepOutcome::Fatal(EngineError::Transport(0));
        }
        if self.mode == TransportMode::Datagram && self.last_flight.is_some() {
            return StepOutcome::RetryAfter(self.timeout);
        }
        StepOutcome::NeedInput
    }
}

fn write_half(keys: &SessionKeys, role: Role) -> ([u8; 32], [u8; 12]) {
    match role {
        Role::Client => (keys.client_write_key, keys.client_write_iv),
        Role::Server => (keys.server_write_key, keys.server_write_iv),
    }
}

impl CryptoEngine for PinEngine {
    fn begin(
        &mut self,
        config: EngineConfig,
        io: &mut dyn Transport,
        verifier: &mut dyn CertificateVerifier,
    ) -> StepOutcome {
        self.mode = config.mode;
        self.records = match config.mode {
            TransportMode::Stream => RecordLayer::new(),
            TransportMode::Datagram => RecordLayer::for_datagrams(),
        };
        self.initial_timeout = config.initial_timeout;
        self.max_timeout = config.max_timeout.max(config.initial_timeout);
        self.timeout = config.initial_timeout;

        let handshake_config = HandshakeConfig {
            role: config.role,
            max_version: config.max_version,
            identity: config.identity,
            cipher_suites: config.cipher_suites,
            srtp_suites: config.srtp_suites,
            require_client_certificate: config.require_client_certificate,
        };
        let mut handshake = match Handshake::new(handshake_config) {
            Ok(handshake) => handshake,
            Err(err) => return StepOutcome::Fatal(self.fail(err)),
        };
        let flight = match handshake.start() {
            Ok(flight) => flight,
            Err(err) => return StepOutcome::Fatal(self.fail(err)),
        };
        trace!(role = ?config.role, mode = ?self.mode, "engine begin");
        self.handshake = Some(handshake);
        if !flight.is_empty() {
            if let Err(err) = self.send_flight(flight) {
                return StepOutcome::Fatal(self.fail(err));
            }
        }
        self.continue_step(io, verifier)
    }

    fn continue_step(
        &mut self,
        io: &mut dyn Transport,
        verifier: &mut dyn CertificateVerifier,
    ) -> StepOutcome {
        if self.failed.is_none() {
            if let Err(err) = self.pump(io, verifier) {
                // Best effort: the alert may not make it out.
                let _ = self.flush(io);
                return StepOutcome::Fatal(err);
            }
        }
        if let Some(code) = self.transport_end.filter(|_| !self.handshake_complete()) {
            return StepOutcome::Fatal(EngineError::Transport(code));
        }
        if let Err(err) = self.flush(io) {
            return StepOutcome::Fatal(err);
        }
        let outcome = self.step_outcome();
        trace!(role = ?self.role(), ?outcome, "engine step");
        outcome
    }

    fn handle_timeout(&mut self, io: &mut dyn Transport) -> StepOutcome {
        if self.failed.is_some() || self.handshake_complete() || self.last_flight.is_none() {
            return self.step_outcome();
        }
        self.timeout = (self.timeout * 2).min(self.max_timeout);
        debug!(
            role = ?self.role(),
            next_timeout_ms = self.timeout.as_millis() as u64,
            "retransmitting flight"
        );
        self.retransmit();
        if let Err(err) = self.flush(io) {
            return StepOutcome::Fatal(err);
        }
        StepOutcome::RetryAfter(self.timeout)
    }

    fn shutdown(&mut self, io: &mut dyn Transport) -> bool {
        if self.close_sent || !self.is_connected() {
            return false;
        }
        let Ok(wire) = self
            .records
            .seal(ContentType::Alert, &[ALERT_LEVEL_WARNING, AlertDescription::CloseNotify as u8])
        else {
            return false;
        };
        self.outbound.push_back(Bytes::from(wire));
        self.close_sent = true;
        debug!(role = ?self.role(), "sending close_notify");
        self.flush(io).is_ok()
    }

    fn is_connected(&self) -> bool {
        self.failed.is_none() && self.handshake_complete()
    }

    fn peer_certificate(&self) -> Option<&Certificate> {
        self.handshake.as_ref().and_then(Handshake::peer_certificate)
    }

    fn export_keying_material(
        &self,
        label: &str,
        context: Option<&[u8]>,
        length: usize,
    ) -> Result<Vec<u8>, ExportError> {
        if !self.is_connected() {
            return Err(ExportError::NotConnected);
        }
        let handshake = self.handshake.as_ref().ok_or(ExportError::NotConnected)?;
        handshake
            .export_keying_material(label, context, length)
            .map_err(|err| match err {
                PinTrustError::ExportTooLong { requested, max } => {
                    ExportError::LengthTooLarge { requested, max }
                }
                PinTrustError::NotComplete => ExportError::NotConnected,
                other => ExportError::Unsupported(other.to_string()),
            })
    }

    fn negotiated_cipher_suite(&self) -> Option<CipherSuite> {
        self.handshake.as_ref()?.negotiated_cipher_suite()
    }

    fn negotiated_srtp_suite(&self) -> Option<SrtpCryptoSuite> {
        self.handshake.as_ref()?.negotiated_srtp_suite()
    }

    fn negotiated_version(&self) -> Option<ProtocolVersion> {
        self.handshake.as_ref()?.negotiated_version()
    }

    fn failure(&self) -> Option<&EngineError> {
        self.failed.as_ref()
    }

    fn read_application(&mut self, io: &mut dyn Transport, buf: &mut [u8]) -> StreamResult {
        if self.failed.is_some() || !self.handshake_complete() {
            return StreamResult::Error(ERROR_ENGINE_FAILED);
        }
        if let Err(err) = self.pump(io, &mut RejectAll) {
            let _ = self.flush(io);
            return match err {
                EngineError::Transport(code) => StreamResult::Error(code),
                EngineError::Handshake { .. } => StreamResult::Error(ERROR_ENGINE_FAILED),
            };
        }
        if let Err(EngineError::Transport(code)) = self.flush(io) {
            return StreamResult::Error(code);
        }
        if !self.application.is_empty() {
            let n = self.application.len().min(buf.len());
            buf[..n].copy_from_slice(&self.application[..n]);
            self.application.advance(n);
            return StreamResult::Success(n);
        }
        if self.peer_closed {
            return StreamResult::EndOfStream;
        }
        match self.transport_end {
            Some(0) => StreamResult::EndOfStream,
            Some(code) => StreamResult::Error(code),
            None => StreamResult::WouldBlock,
        }
    }

    fn write_application(&mut self, io: &mut dyn Transport, data: &[u8]) -> StreamResult {
        if !self.is_connected() || self.close_sent {
            return StreamResult::Error(ERROR_ENGINE_FAILED);
        }
        for chunk in data.chunks(MAX_RECORD_PAYLOAD) {
            match self.records.seal(ContentType::ApplicationData, chunk) {
                Ok(wire) => self.outbound.push_back(Bytes::from(wire)),
                Err(err) => {
                    warn!(error = %err, "failed to seal application data");
                    return StreamResult::Error(ERROR_ENGINE_FAILED);
                }
            }
        }
        match self.flush(io) {
            Ok(()) => StreamResult::Success(data.len()),
            Err(EngineError::Transport(code)) => StreamResult::Error(code),
            Err(EngineError::Handshake { .. }) => StreamResult::Error(ERROR_ENGINE_FAILED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{EventLoop, SessionToken};
    use crate::transport::memory::{MemoryPipe, PipeEnd};
    use pintrust::{DigestAlgorithm, Identity};

    fn config(role: Role, mode: TransportMode, identity: Option<Identity>) -> EngineConfig {
        EngineConfig {
            role,
            mode,
            max_version: ProtocolVersion::Tls12,
            identity,
            cipher_suites: CipherSuite::ALL.to_vec(),
            srtp_suites: Vec::new(),
            require_client_certificate: role == Role::Server,
            initial_timeout: Duration::from_millis(50),
            max_timeout: Duration::from_millis(300),
        }
    }

    fn accept_all(_: &Certificate, _: usize) -> bool {
        true
    }

    struct Pair {
        client: PinEngine,
        server: PinEngine,
        client_io: MemoryPipe,
        server_io: MemoryPipe,
        control: crate::transport::memory::PipeControl,
        _events: EventLoop,
    }

    fn pair(mode: TransportMode) -> (Pair, StepOutcome, StepOutcome) {
        let events = EventLoop::new();
        let (client_io, server_io, control) =
            MemoryPipe::open_pair(&events.handle(), mode, SessionToken(1), SessionToken(2));
        let mut p = Pair {
            client: PinEngine::new(),
            server: PinEngine::new(),
            client_io,
            server_io,
            control,
            _events: events,
        };
        let server_identity = Identity::generate("server").unwrap();
        let client_identity = Identity::generate("client").unwrap();
        let s = p.server.begin(
            config(Role::Server, mode, Some(server_identity)),
            &mut p.server_io,
            &mut accept_all,
        );
        let c = p.client.begin(
            config(Role::Client, mode, Some(client_identity)),
            &mut p.client_io,
            &mut accept_all,
        );
        (p, s, c)
    }

    /// Forwards to the pipe and keeps a copy of every accepted write.
    struct Tap<'a> {
        inner: &'a mut MemoryPipe,
        written: Vec<Vec<u8>>,
    }

    impl Transport for Tap<'_> {
        fn state(&self) -> crate::transport::StreamState {
            self.inner.state()
        }

        fn read(&mut self, buf: &mut [u8]) -> StreamResult {
            self.inner.read(buf)
        }

        fn write(&mut self, data: &[u8]) -> StreamResult {
            let result = self.inner.write(data);
            if let StreamResult::Success(n) = result {
                self.written.push(data[..n].to_vec());
            }
            result
        }

        fn close(&mut self) {
            self.inner.close()
        }
    }

    /// A plaintext alert record as an on-path sender would frame it.
    fn unprotected_alert(level: u8, description: u8) -> Vec<u8> {
        let mut wire = vec![ContentType::Alert as u8, 0, 0];
        wire.extend_from_slice(&[0u8; 8]);
        wire.extend_from_slice(&[0, 2, level, description]);
        wire
    }

    fn read_all(engine: &mut PinEngine, io: &mut MemoryPipe) -> (Vec<u8>, StreamResult) {
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match engine.read_application(io, &mut buf) {
                StreamResult::Success(n) => received.extend_from_slice(&buf[..n]),
                other => return (received, other),
            }
        }
    }

    fn run_to_completion(p: &mut Pair) {
        for _ in 0..4 {
            p.server.continue_step(&mut p.server_io, &mut accept_all);
            p.client.continue_step(&mut p.client_io, &mut accept_all);
        }
    }

    #[test]
    fn stream_handshake_and_application_data() {
        let (mut p, s, c) = pair(TransportMode::Stream);
        assert_eq!(s, StepOutcome::NeedInput);
        assert_eq!(c, StepOutcome::NeedInput);

        assert_eq!(
            p.server.continue_step(&mut p.server_io, &mut accept_all),
            StepOutcome::NeedInput
        );
        assert_eq!(
            p.client.continue_step(&mut p.client_io, &mut accept_all),
            StepOutcome::Success
        );
        assert_eq!(
            p.server.continue_step(&mut p.server_io, &mut accept_all),
            StepOutcome::Success
        );

        let client_leaf = p.server.peer_certificate().unwrap().clone();
        assert_eq!(client_leaf.common_name, "client");
        assert_eq!(
            p.server.compute_peer_digest(DigestAlgorithm::Sha256),
            Some(client_leaf.compute_digest(DigestAlgorithm::Sha256))
        );

        let ekm_c = p.client.export_keying_material("label", None, 32).unwrap();
        let ekm_s = p.server.export_keying_material("label", None, 32).unwrap();
        assert_eq!(ekm_c, ekm_s);
        assert_eq!(
            p.client.negotiated_cipher_suite(),
            p.server.negotiated_cipher_suite()
        );

        assert_eq!(
            p.client.write_application(&mut p.client_io, b"ping"),
            StreamResult::Success(4)
        );
        let mut buf = [0u8; 16];
        assert_eq!(
            p.server.read_application(&mut p.server_io, &mut buf),
            StreamResult::Success(4)
        );
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(
            p.server.read_application(&mut p.server_io, &mut buf),
            StreamResult::WouldBlock
        );

        assert!(p.client.shutdown(&mut p.client_io));
        assert!(!p.client.shutdown(&mut p.client_io));
        assert_eq!(
            p.server.read_application(&mut p.server_io, &mut buf),
            StreamResult::EndOfStream
        );
    }

    #[test]
    fn large_writes_split_into_records() {
        let (mut p, _, _) = pair(TransportMode::Stream);
        run_to_completion(&mut p);
        let data = vec![0xabu8; MAX_RECORD_PAYLOAD * 2 + 10];
        assert_eq!(
            p.client.write_application(&mut p.client_io, &data),
            StreamResult::Success(data.len())
        );
        let mut received = Vec::new();
        let mut buf = vec![0u8; 4096];
        while let StreamResult::Success(n) = p.server.read_application(&mut p.server_io, &mut buf) {
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, data);
    }

    #[test]
    fn datagram_timeout_doubles_and_caps() {
        let (mut p, _, c) = pair(TransportMode::Datagram);
        assert_eq!(c, StepOutcome::RetryAfter(Duration::from_millis(50)));
        let expected = [100, 200, 300, 300];
        for ms in expected {
            assert_eq!(
                p.client.handle_timeout(&mut p.client_io),
                StepOutcome::RetryAfter(Duration::from_millis(ms))
            );
        }
        assert_eq!(p.control.writes(PipeEnd::A), 1 + expected.len());
    }

    #[test]
    fn duplicate_flight_triggers_resend() {
        let (mut p, _, _) = pair(TransportMode::Datagram);
        p.client.handle_timeout(&mut p.client_io);
        // Server sees ClientHello twice: answers the first, resends for the second.
        assert_eq!(
            p.server.continue_step(&mut p.server_io, &mut accept_all),
            StepOutcome::RetryAfter(Duration::from_millis(50))
        );
        assert_eq!(p.control.writes(PipeEnd::B), 2);
    }

    #[test]
    fn rejected_certificate_fails_both_sides() {
        let (mut p, _, _) = pair(TransportMode::Stream);
        p.server.continue_step(&mut p.server_io, &mut accept_all);
        let mut reject_leaf = |_: &Certificate, depth: usize| depth > 0;
        let outcome = p.client.continue_step(&mut p.client_io, &mut reject_leaf);
        let StepOutcome::Fatal(EngineError::Handshake { kind, alert, .. }) = outcome else {
            panic!("expected fatal outcome, got {outcome:?}");
        };
        assert_eq!(kind, HandshakeErrorKind::VerificationFailed);
        assert_eq!(alert, AlertDescription::BadCertificate);
        assert!(p.client.failure().is_some());

        let outcome = p.server.continue_step(&mut p.server_io, &mut accept_all);
        assert!(matches!(
            outcome,
            StepOutcome::Fatal(EngineError::Handshake {
                kind: HandshakeErrorKind::VerificationFailed,
                ..
            })
        ));
    }

    #[test]
    fn transport_failure_is_fatal() {
        let (mut p, _, _) = pair(TransportMode::Stream);
        p.control.fail(104);
        // ClientHello is still buffered; the error surfaces once it is consumed.
        let outcome = p.server.continue_step(&mut p.server_io, &mut accept_all);
        assert_eq!(outcome, StepOutcome::Fatal(EngineError::Transport(104)));
    }

    #[test]
    fn replayed_application_record_rejected() {
        for mode in [TransportMode::Stream, TransportMode::Datagram] {
            let (mut p, _, _) = pair(mode);
            run_to_completion(&mut p);
            assert!(p.client.is_connected() && p.server.is_connected(), "{mode:?}");

            let mut tap = Tap {
                inner: &mut p.client_io,
                written: Vec::new(),
            };
            assert_eq!(
                p.client.write_application(&mut tap, b"pay 100"),
                StreamResult::Success(7)
            );
            let captured = tap.written.concat();
            let (received, _) = read_all(&mut p.server, &mut p.server_io);
            assert_eq!(received, b"pay 100");

            p.client_io.write(&captured);
            let (received, end) = read_all(&mut p.server, &mut p.server_io);
            assert!(received.is_empty(), "{mode:?}: replay delivered {received:?}");
            match mode {
                TransportMode::Stream => {
                    assert_eq!(end, StreamResult::Error(ERROR_ENGINE_FAILED));
                    assert!(matches!(
                        p.server.failure(),
                        Some(EngineError::Handshake {
                            alert: AlertDescription::UnexpectedMessage,
                            ..
                        })
                    ));
                }
                TransportMode::Datagram => {
                    assert_eq!(end, StreamResult::WouldBlock);
                    p.client.write_application(&mut p.client_io, b"pay 5");
                    let (received, _) = read_all(&mut p.server, &mut p.server_io);
                    assert_eq!(received, b"pay 5");
                }
            }
        }
    }

    #[test]
    fn unprotected_alerts_ignored_once_keyed() {
        for mode in [TransportMode::Stream, TransportMode::Datagram] {
            let (mut p, _, _) = pair(mode);
            run_to_completion(&mut p);

            p.client_io.write(&unprotected_alert(
                ALERT_LEVEL_WARNING,
                AlertDescription::CloseNotify as u8,
            ));
            p.client_io.write(&unprotected_alert(
                ALERT_LEVEL_FATAL,
                AlertDescription::HandshakeFailure as u8,
            ));
            let (received, end) = read_all(&mut p.server, &mut p.server_io);
            assert!(received.is_empty());
            assert_eq!(end, StreamResult::WouldBlock, "{mode:?}");
            assert!(p.server.failure().is_none());
            assert!(p.server.is_connected());

            p.client.write_application(&mut p.client_io, b"still here");
            let (received, _) = read_all(&mut p.server, &mut p.server_io);
            assert_eq!(received, b"still here");

            assert!(p.client.shutdown(&mut p.client_io));
            let (_, end) = read_all(&mut p.server, &mut p.server_io);
            assert_eq!(end, StreamResult::EndOfStream);
        }
    }

    #[test]
    fn late_unprotected_flight_does_not_reach_handshake() {
        let (mut p, _, _) = pair(TransportMode::Datagram);
        run_to_completion(&mut p);
        let mut forged = vec![ContentType::Handshake as u8, 0, 0];
        forged.extend_from_slice(&[0u8; 8]);
        forged.extend_from_slice(&[0, 3, 0, 99, 0xff]);
        p.client_io.write(&forged);

        let (_, end) = read_all(&mut p.server, &mut p.server_io);
        assert_eq!(end, StreamResult::WouldBlock);
        assert!(p.server.is_connected());
    }

    #[test]
    fn server_rejection_after_client_completes_is_authenticated() {
        let (mut p, _, _) = pair(TransportMode::Stream);
        p.server.continue_step(&mut p.server_io, &mut accept_all);
        assert_eq!(
            p.client.continue_step(&mut p.client_io, &mut accept_all),
            StepOutcome::Success
        );
        let mut reject_leaf = |_: &Certificate, depth: usize| depth > 0;
        assert!(matches!(
            p.server.continue_step(&mut p.server_io, &mut reject_leaf),
            StepOutcome::Fatal(EngineError::Handshake { .. })
        ));

        let mut buf = [0u8; 16];
        assert_eq!(
            p.client.read_application(&mut p.client_io, &mut buf),
            StreamResult::Error(ERROR_ENGINE_FAILED)
        );
        assert!(matches!(
            p.client.failure(),
            Some(EngineError::Handshake {
                kind: HandshakeErrorKind::VerificationFailed,
                alert: AlertDescription::BadCertificate,
                ..
            })
        ));
    }

    #[test]
    fn export_before_connected_rejected() {
        let (p, _, _) = pair(TransportMode::Stream);
        assert_eq!(
            p.client.export_keying_material("label", None, 32),
            Err(ExportError::NotConnected)
        );
    }
}
