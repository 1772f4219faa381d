// Handshake protocol driver: consumes peer messages, produces the next outbound flight.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::crypto::aead::CipherSuite;
use crate::crypto::exporter;
use crate::crypto::keys::verify_signature;
use crate::crypto::x25519::{
    derive_master_secret, derive_session_keys, finished_verify_data, SessionKeys, X25519KeyPair,
};
use crate::error::{PinTrustError, Result};
use crate::handshake::messages::HandshakeMessage;
use crate::handshake::state::HandshakeState;
use crate::handshake::{ProtocolVersion, Role};
use crate::identity::{Certificate, Identity};
use crate::suite::{select_suite, SrtpCryptoSuite};

const CLIENT_FINISHED: &[u8] = b"client finished";
const SERVER_FINISHED: &[u8] = b"server finished";

/// Decides whether a certificate in the peer's chain is acceptable.
///
/// Called once per certificate, from the highest depth down to the leaf at
/// depth 0. Returning `false` aborts the handshake with a bad_certificate alert.
pub trait CertificateVerifier {
    fn verify_certificate(&mut self, certificate: &Certificate, depth: usize) -> bool;
}

impl<F> CertificateVerifier for F
where
    F: FnMut(&Certificate, usize) -> bool,
{
    fn verify_certificate(&mut self, certificate: &Certificate, depth: usize) -> bool {
        self(certificate, depth)
    }
}

/// Inputs fixed before the handshake starts.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub role: Role,
    pub max_version: ProtocolVersion,
    /// Required for the server; optional for the client.
    pub identity: Option<Identity>,
    /// Record-protection suites in preference order.
    pub cipher_suites: Vec<CipherSuite>,
    /// Media suites to negotiate. Empty means media-suite negotiation was not requested.
    pub srtp_suites: Vec<SrtpCryptoSuite>,
    /// Server only: request a client certificate and fail without one.
    pub require_client_certificate: bool,
}

impl HandshakeConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            max_version: ProtocolVersion::Tls12,
            identity: None,
            cipher_suites: CipherSuite::ALL.to_vec(),
            srtp_suites: Vec::new(),
            require_client_certificate: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Negotiated {
    version: ProtocolVersion,
    cipher_suite: CipherSuite,
    srtp_suite: Option<SrtpCryptoSuite>,
}

/// One side of a handshake. Owns the transcript, ephemeral key and derived secrets.
pub struct Handshake {
    config: HandshakeConfig,
    state: HandshakeState,
    transcript: Sha256,
    client_random: [u8; 32],
    server_random: [u8; 32],
    ephemeral: X25519KeyPair,
    master_secret: Option<Zeroizing<[u8; 32]>>,
    keys: Option<SessionKeys>,
    negotiated: Option<Negotiated>,
    peer_chain: Vec<Certificate>,
}

impl Handshake {
    pub fn new(config: HandshakeConfig) -> Result<Self> {
        if config.role == Role::Server && config.identity.is_none() {
            return Err(PinTrustError::MissingIdentity);
        }
        if config.cipher_suites.is_empty() {
            return Err(PinTrustError::UnsupportedSuite("no cipher suites configured".into()));
        }
        let mut local_random = [0u8; 32];
        OsRng.fill_bytes(&mut local_random);
        let (client_random, server_random) = match config.role {
            Role::Client => (local_random, [0u8; 32]),
            Role::Server => ([0u8; 32], local_random),
        };
        Ok(Self {
            config,
            state: HandshakeState::Idle,
            transcript: Sha256::new(),
            client_random,
            server_random,
            ephemeral: X25519KeyPair::generate(),
            master_secret: None,
            keys: None,
            negotiated: None,
            peer_chain: Vec::new(),
        })
    }

    /// Begin the exchange. The client returns its ClientHello; the server returns nothing.
    pub fn start(&mut self) -> Result<Vec<HandshakeMessage>> {
        if self.state != HandshakeState::Idle {
            return Err(PinTrustError::InvalidStateTransition {
                from: self.state.label().into(),
                to: "started".into(),
            });
        }
        match self.config.role {
            Role::Client => {
                let hello = HandshakeMessage::ClientHello {
                    version: self.config.max_version.wire(),
                    random: self.client_random,
                    key_share: self.ephemeral.public_key_bytes(),
                    cipher_suites: self.config.cipher_suites.iter().map(|s| s.wire_id()).collect(),
                    srtp_suites: self.config.srtp_suites.iter().map(|s| s.id()).collect(),
                };
                self.state = HandshakeState::AwaitServerHello;
                Ok(vec![self.emit(hello)])
            }
            Role::Server => {
                self.state = HandshakeState::AwaitClientHello;
                Ok(Vec::new())
            }
        }
    }

    /// Process one peer message and return the flight to send in response (possibly empty).
    pub fn handle_message(
        &mut self,
        msg: HandshakeMessage,
        verifier: &mut dyn CertificateVerifier,
    ) -> Result<Vec<HandshakeMessage>> {
        trace!(state = self.state.label(), message = msg.name(), "handshake message");
        let hash_before = self.transcript_hash();
        self.transcript.update(msg.encode());

        use HandshakeMessage as M;
        use HandshakeState as S;
        match (self.state, msg) {
            (
                S::AwaitServerHello,
                M::ServerHello {
                    version,
                    random,
                    key_share,
                    cipher_suite,
                    srtp_suite,
                    certificate_request,
                },
            ) => {
                self.on_server_hello(version, random, key_share, cipher_suite, srtp_suite)?;
                self.state = S::AwaitServerCertificate {
                    certificate_requested: certificate_request,
                };
                Ok(Vec::new())
            }
            (S::AwaitServerCertificate { certificate_requested }, M::Certificate { chain }) => {
                self.on_peer_certificate(chain, verifier)?;
                self.state = S::AwaitServerCertificateVerify {
                    certificate_requested,
                };
                Ok(Vec::new())
            }
            (
                S::AwaitServerCertificateVerify {
                    certificate_requested,
                },
                M::CertificateVerify { signature },
            ) => {
                self.on_certificate_verify(&signature, &hash_before)?;
                self.state = S::AwaitServerFinished {
                    certificate_requested,
                };
                Ok(Vec::new())
            }
            (S::AwaitServerFinished { certificate_requested }, M::Finished { verify_data }) => {
                self.check_finished(SERVER_FINISHED, &verify_data, &hash_before)?;
                let flight = self.client_final_flight(certificate_requested)?;
                self.complete();
                Ok(flight)
            }
            (
                S::AwaitClientHello,
                M::ClientHello {
                    version,
                    random,
                    key_share,
                    cipher_suites,
                    srtp_suites,
                },
            ) => self.on_client_hello(version, random, key_share, &cipher_suites, &srtp_suites),
            (S::AwaitClientCertificate, M::Certificate { chain }) => {
                self.on_peer_certificate(chain, verifier)?;
                self.state = S::AwaitClientCertificateVerify;
                Ok(Vec::new())
            }
            (S::AwaitClientCertificateVerify, M::CertificateVerify { signature }) => {
                self.on_certificate_verify(&signature, &hash_before)?;
                self.state = S::AwaitClientFinished;
                Ok(Vec::new())
            }
            (S::AwaitClientFinished, M::Finished { verify_data }) => {
                self.check_finished(CLIENT_FINISHED, &verify_data, &hash_before)?;
                self.complete();
                Ok(Vec::new())
            }
            (state, msg) => Err(PinTrustError::UnexpectedMessage(format!(
                "{} in state {}",
                msg.name(),
                state.label()
            ))),
        }
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == HandshakeState::Complete
    }

    /// The peer's leaf certificate, once its Certificate message has been accepted.
    pub fn peer_certificate(&self) -> Option<&Certificate> {
        self.peer_chain.first()
    }

    pub fn peer_certificate_chain(&self) -> &[Certificate] {
        &self.peer_chain
    }

    pub fn negotiated_version(&self) -> Option<ProtocolVersion> {
        self.negotiated.map(|n| n.version)
    }

    pub fn negotiated_cipher_suite(&self) -> Option<CipherSuite> {
        self.negotiated.map(|n| n.cipher_suite)
    }

    pub fn negotiated_srtp_suite(&self) -> Option<SrtpCryptoSuite> {
        self.negotiated.and_then(|n| n.srtp_suite)
    }

    /// Traffic keys, available once the hello exchange has completed.
    pub fn session_keys(&self) -> Option<&SessionKeys> {
        self.keys.as_ref()
    }

    /// Export keying material; only valid once the handshake is complete.
    pub fn export_keying_material(
        &self,
        label: &str,
        context: Option<&[u8]>,
        length: usize,
    ) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(PinTrustError::NotComplete);
        }
        exporter::export_keying_material(
            self.master()?,
            &self.client_random,
            &self.server_random,
            label,
            context,
            length,
        )
    }

    // ── Client steps ────────────────────────────────────────────────────

    fn on_server_hello(
        &mut self,
        version: u16,
        random: [u8; 32],
        key_share: [u8; 32],
        cipher_suite: u16,
        srtp_suite: Option<u16>,
    ) -> Result<()> {
        let version = ProtocolVersion::from_wire(version)?;
        if version > self.config.max_version {
            return Err(PinTrustError::ProtocolVersion(version.wire()));
        }
        let cipher_suite = CipherSuite::from_wire_id(cipher_suite)
            .filter(|s| self.config.cipher_suites.contains(s))
            .ok_or_else(|| {
                PinTrustError::UnexpectedMessage(format!(
                    "server selected cipher suite 0x{cipher_suite:04x} that was not offered"
                ))
            })?;
        let srtp_suite = match srtp_suite {
            Some(id) => {
                let suite = SrtpCryptoSuite::from_id(id)
                    .ok()
                    .filter(|s| self.config.srtp_suites.contains(s))
                    .ok_or_else(|| {
                        PinTrustError::UnexpectedMessage(format!(
                            "server selected media suite 0x{id:04x} that was not offered"
                        ))
                    })?;
                Some(suite)
            }
            None if !self.config.srtp_suites.is_empty() => {
                return Err(PinTrustError::NoSharedMediaSuite)
            }
            None => None,
        };

        self.server_random = random;
        self.establish_keys(
            &key_share,
            Negotiated {
                version,
                cipher_suite,
                srtp_suite,
            },
        )
    }

    fn client_final_flight(&mut self, certificate_requested: bool) -> Result<Vec<HandshakeMessage>> {
        let mut flight = Vec::with_capacity(3);
        if certificate_requested {
            let chain = self
                .config
                .identity
                .as_ref()
                .map(Identity::certificate_chain)
                .unwrap_or_default();
            let has_certificate = !chain.is_empty();
            flight.push(self.emit(HandshakeMessage::Certificate { chain }));
            if has_certificate {
                let content = verify_content(Role::Client, &self.transcript_hash());
                let signature = self.identity()?.sign(&content);
                flight.push(self.emit(HandshakeMessage::CertificateVerify { signature }));
            }
        }
        let verify_data = finished_verify_data(self.master()?, CLIENT_FINISHED, &self.transcript_hash())?;
        flight.push(self.emit(HandshakeMessage::Finished { verify_data }));
        Ok(flight)
    }

    // ── Server steps ────────────────────────────────────────────────────

    fn on_client_hello(
        &mut self,
        version: u16,
        random: [u8; 32],
        key_share: [u8; 32],
        cipher_suites: &[u16],
        srtp_suites: &[u16],
    ) -> Result<Vec<HandshakeMessage>> {
        let version = ProtocolVersion::negotiate(version, self.config.max_version)?;
        let cipher_suite = cipher_suites
            .iter()
            .filter_map(|&id| CipherSuite::from_wire_id(id))
            .find(|s| self.config.cipher_suites.contains(s))
            .ok_or(PinTrustError::NoSharedCipherSuite)?;
        let srtp_suite = if srtp_suites.is_empty() && self.config.srtp_suites.is_empty() {
            None
        } else {
            let offered: Vec<SrtpCryptoSuite> = srtp_suites
                .iter()
                .filter_map(|&id| SrtpCryptoSuite::from_id(id).ok())
                .collect();
            Some(
                select_suite(&offered, &self.config.srtp_suites)
                    .ok_or(PinTrustError::NoSharedMediaSuite)?,
            )
        };

        self.client_random = random;
        self.establish_keys(
            &key_share,
            Negotiated {
                version,
                cipher_suite,
                srtp_suite,
            },
        )?;

        let certificate_request = self.config.require_client_certificate;
        let mut flight = Vec::with_capacity(4);
        flight.push(self.emit(HandshakeMessage::ServerHello {
            version: version.wire(),
            random: self.server_random,
            key_share: self.ephemeral.public_key_bytes(),
            cipher_suite: cipher_suite.wire_id(),
            srtp_suite: srtp_suite.map(SrtpCryptoSuite::id),
            certificate_request,
        }));
        let chain = self.identity()?.certificate_chain();
        flight.push(self.emit(HandshakeMessage::Certificate { chain }));
        let content = verify_content(Role::Server, &self.transcript_hash());
        let signature = self.identity()?.sign(&content);
        flight.push(self.emit(HandshakeMessage::CertificateVerify { signature }));
        let verify_data = finished_verify_data(self.master()?, SERVER_FINISHED, &self.transcript_hash())?;
        flight.push(self.emit(HandshakeMessage::Finished { verify_data }));

        self.state = if certificate_request {
            HandshakeState::AwaitClientCertificate
        } else {
            HandshakeState::AwaitClientFinished
        };
        Ok(flight)
    }

    // ── Shared steps ────────────────────────────────────────────────────

    fn on_peer_certificate(
        &mut self,
        chain: Vec<Certificate>,
        verifier: &mut dyn CertificateVerifier,
    ) -> Result<()> {
        if chain.is_empty() {
            return Err(PinTrustError::PeerCertificateRequired);
        }
        for (depth, cert) in chain.iter().enumerate().rev() {
            if !verifier.verify_certificate(cert, depth) {
                return Err(PinTrustError::CertificateRejected(format!(
                    "{:?} at depth {depth}",
                    cert.common_name
                )));
            }
        }
        self.peer_chain = chain;
        Ok(())
    }

    fn on_certificate_verify(&self, signature: &[u8; 64], hash_before: &[u8; 32]) -> Result<()> {
        let leaf = self
            .peer_certificate()
            .ok_or(PinTrustError::PeerCertificateRequired)?;
        let peer_role = match self.config.role {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        };
        verify_signature(
            &leaf.subject_public_key,
            &verify_content(peer_role, hash_before),
            signature,
        )
    }

    fn check_finished(&self, label: &[u8], verify_data: &[u8; 32], hash_before: &[u8; 32]) -> Result<()> {
        let expected = finished_verify_data(self.master()?, label, hash_before)?;
        if &expected != verify_data {
            return Err(PinTrustError::FinishedMismatch);
        }
        Ok(())
    }

    fn establish_keys(&mut self, peer_share: &[u8; 32], negotiated: Negotiated) -> Result<()> {
        let shared = self.ephemeral.diffie_hellman(peer_share);
        let master = derive_master_secret(&shared, &self.client_random, &self.server_random)?;
        self.keys = Some(derive_session_keys(&master)?);
        self.master_secret = Some(master);
        debug!(
            role = ?self.config.role,
            version = ?negotiated.version,
            cipher_suite = %negotiated.cipher_suite,
            srtp_suite = ?negotiated.srtp_suite,
            "handshake parameters negotiated"
        );
        self.negotiated = Some(negotiated);
        Ok(())
    }

    fn complete(&mut self) {
        debug!(role = ?self.config.role, "handshake complete");
        self.state = HandshakeState::Complete;
    }

    fn emit(&mut self, msg: HandshakeMessage) -> HandshakeMessage {
        self.transcript.update(msg.encode());
        msg
    }

    fn transcript_hash(&self) -> [u8; 32] {
        self.transcript.clone().finalize().into()
    }

    fn master(&self) -> Result<&[u8; 32]> {
        self.master_secret
            .as_deref()
            .ok_or(PinTrustError::NotComplete)
    }

    fn identity(&self) -> Result<&Identity> {
        self.config
            .identity
            .as_ref()
            .ok_or(PinTrustError::MissingIdentity)
    }
}

/// Content signed by CertificateVerify; the role prefix keeps a signature from being reflected.
fn verify_content(signer: Role, transcript_hash: &[u8; 32]) -> Vec<u8> {
    let context: &[u8] = match signer {
        Role::Client => b"pin client certificate verify\0",
        Role::Server => b"pin server certificate verify\0",
    };
    [context, transcript_hash.as_slice()].concat()
}
