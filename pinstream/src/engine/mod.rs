//! Cryptographic engine seam.
//!
//! A [`Session`](crate::Session) drives the handshake through the narrow
//! [`CryptoEngine`] trait and classifies every step into one of four
//! [`StepOutcome`]s. [`PinEngine`] is the reference implementation built on
//! `pintrust::handshake`.

pub mod context;
pub mod pin;
pub mod record;

pub use context::CryptoEngineContext;
pub use pin::PinEngine;

use std::time::Duration;

use pintrust::handshake::{AlertDescription, CertificateVerifier};
use pintrust::identity::Certificate;
use pintrust::{
    CipherSuite, DigestAlgorithm, HandshakeErrorKind, Identity, ProtocolVersion, Role,
    SrtpCryptoSuite,
};

use crate::error::ExportError;
use crate::transport::{StreamResult, Transport, TransportMode};

/// Everything `begin` needs to configure the engine for one handshake.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub role: Role,
    pub mode: TransportMode,
    pub max_version: ProtocolVersion,
    pub identity: Option<Identity>,
    pub cipher_suites: Vec<CipherSuite>,
    /// Empty when media-suite negotiation was not requested.
    pub srtp_suites: Vec<SrtpCryptoSuite>,
    pub require_client_certificate: bool,
    pub initial_timeout: Duration,
    pub max_timeout: Duration,
}

/// Fatal engine failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Protocol or trust failure; `alert` was sent or received.
    Handshake {
        kind: HandshakeErrorKind,
        alert: AlertDescription,
        reason: String,
    },
    /// The transport reported end of stream (0) or an error code.
    Transport(i32),
}

/// Classification of one engine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Handshake complete.
    Success,
    /// Waiting for the peer; call `continue_step` when the transport is readable.
    NeedInput,
    /// Waiting for the peer; call `handle_timeout` if nothing arrives within the delay.
    RetryAfter(Duration),
    Fatal(EngineError),
}

/// The operations a session needs from a handshake engine.
///
/// Engines are sans-event: they never arm timers or subscribe to transport
/// events themselves. Every call runs to completion against the transport
/// passed in.
pub trait CryptoEngine {
    /// Configure for one handshake and perform the first step.
    fn begin(
        &mut self,
        config: EngineConfig,
        io: &mut dyn Transport,
        verifier: &mut dyn CertificateVerifier,
    ) -> StepOutcome;

    /// Consume whatever the transport has and advance.
    fn continue_step(
        &mut self,
        io: &mut dyn Transport,
        verifier: &mut dyn CertificateVerifier,
    ) -> StepOutcome;

    /// Retransmit the last flight after a timer expiry.
    fn handle_timeout(&mut self, io: &mut dyn Transport) -> StepOutcome;

    /// Attempt a graceful close. Returns `true` if a close notification was sent.
    fn shutdown(&mut self, io: &mut dyn Transport) -> bool;

    fn is_connected(&self) -> bool;

    /// The peer's leaf certificate, once presented and accepted.
    fn peer_certificate(&self) -> Option<&Certificate>;

    fn compute_peer_digest(&self, algorithm: DigestAlgorithm) -> Option<Vec<u8>> {
        self.peer_certificate()
            .map(|cert| cert.compute_digest(algorithm))
    }

    fn export_keying_material(
        &self,
        label: &str,
        context: Option<&[u8]>,
        length: usize,
    ) -> Result<Vec<u8>, ExportError>;

    /// The fatal error that ended the engine, if any.
    fn failure(&self) -> Option<&EngineError>;

    fn negotiated_cipher_suite(&self) -> Option<CipherSuite>;
    fn negotiated_srtp_suite(&self) -> Option<SrtpCryptoSuite>;
    fn negotiated_version(&self) -> Option<ProtocolVersion>;

    /// Decrypt buffered application data into `buf`.
    fn read_application(&mut self, io: &mut dyn Transport, buf: &mut [u8]) -> StreamResult;

    /// Seal and send `data` as application records.
    fn write_application(&mut self, io: &mut dyn Transport, data: &[u8]) -> StreamResult;
}
