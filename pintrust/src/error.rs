// PinTrust error types

use thiserror::Error;

use crate::handshake::alert::AlertDescription;

/// Top-level error type for the PinTrust crate.
#[derive(Debug, Error)]
pub enum PinTrustError {
    // ── Digest / fingerprint errors ─────────────────────────────────────
    #[error("unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid digest length for {algorithm}: expected {expected}, got {actual}")]
    InvalidDigestLength {
        algorithm: String,
        expected: usize,
        actual: usize,
    },

    #[error("malformed fingerprint: {0}")]
    InvalidFingerprint(String),

    // ── Crypto suite errors ─────────────────────────────────────────────
    #[error("unsupported crypto suite: {0}")]
    UnsupportedSuite(String),

    // ── Crypto errors ───────────────────────────────────────────────────
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("AEAD encryption failed: {0}")]
    Encryption(String),

    #[error("AEAD decryption failed: {0}")]
    Decryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("keying material export of {requested} bytes exceeds maximum {max}")]
    ExportTooLong { requested: usize, max: usize },

    // ── Certificate errors ──────────────────────────────────────────────
    #[error("certificate build error: {0}")]
    CertificateBuild(String),

    #[error("certificate decode error: {0}")]
    CertificateDecode(String),

    // ── Handshake errors ────────────────────────────────────────────────
    #[error("handshake message decode error: {0}")]
    Decode(String),

    #[error("unexpected handshake message: {0}")]
    UnexpectedMessage(String),

    #[error("record {0} replayed or outside the receive window")]
    ReplayedRecord(u64),

    #[error("unsupported protocol version: 0x{0:04x}")]
    ProtocolVersion(u16),

    #[error("no shared cipher suite")]
    NoSharedCipherSuite,

    #[error("no shared media crypto suite")]
    NoSharedMediaSuite,

    #[error("peer certificate rejected: {0}")]
    CertificateRejected(String),

    #[error("peer did not supply a certificate")]
    PeerCertificateRequired,

    #[error("finished verification failed")]
    FinishedMismatch,

    #[error("peer sent fatal alert: {0:?}")]
    PeerAlert(AlertDescription),

    #[error("handshake requires a local identity")]
    MissingIdentity,

    #[error("invalid handshake state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("handshake not complete")]
    NotComplete,
}

impl PinTrustError {
    /// The alert this error should be reported to the peer with, if any.
    ///
    /// Errors that never reach the wire (configuration mistakes, local
    /// export misuse) return `None`.
    pub fn alert(&self) -> Option<AlertDescription> {
        match self {
            PinTrustError::Decode(_) | PinTrustError::CertificateDecode(_) => {
                Some(AlertDescription::DecodeError)
            }
            PinTrustError::UnexpectedMessage(_)
            | PinTrustError::InvalidStateTransition { .. }
            | PinTrustError::ReplayedRecord(_) => Some(AlertDescription::UnexpectedMessage),
            PinTrustError::ProtocolVersion(_) => Some(AlertDescription::ProtocolVersion),
            PinTrustError::NoSharedCipherSuite | PinTrustError::NoSharedMediaSuite => {
                Some(AlertDescription::InsufficientSecurity)
            }
            PinTrustError::CertificateRejected(_) => Some(AlertDescription::BadCertificate),
            PinTrustError::PeerCertificateRequired => Some(AlertDescription::CertificateRequired),
            PinTrustError::SignatureVerification | PinTrustError::FinishedMismatch => {
                Some(AlertDescription::DecryptError)
            }
            PinTrustError::Decryption(_) => Some(AlertDescription::BadRecordMac),
            PinTrustError::InvalidKey(_)
            | PinTrustError::Encryption(_)
            | PinTrustError::KeyDerivation(_)
            | PinTrustError::MissingIdentity => Some(AlertDescription::InternalError),
            PinTrustError::PeerAlert(_)
            | PinTrustError::UnknownAlgorithm(_)
            | PinTrustError::InvalidDigestLength { .. }
            | PinTrustError::InvalidFingerprint(_)
            | PinTrustError::UnsupportedSuite(_)
            | PinTrustError::ExportTooLong { .. }
            | PinTrustError::CertificateBuild(_)
            | PinTrustError::NotComplete => None,
        }
    }
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, PinTrustError>;
