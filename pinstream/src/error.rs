use thiserror::Error;

use pintrust::PinTrustError;

/// Rejected `set_peer_digest` input, or a digest that does not match the peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    #[error("unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid digest length for {algorithm}: expected {expected}, got {actual}")]
    InvalidLength {
        algorithm: String,
        expected: usize,
        actual: usize,
    },

    #[error("peer certificate digest does not match")]
    VerificationFailed,
}

/// Why `start()` refused to begin negotiation. The session state is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("session already started")]
    AlreadyStarted,

    #[error("server role requires an identity")]
    MissingIdentity,

    #[error("transport is closed")]
    TransportClosed,
}

/// Configuration rejected by a setter. The session state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("configuration is fixed once negotiation has started")]
    AlreadyStarted,

    #[error("unsupported crypto suite: {0}")]
    UnsupportedSuite(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Keying material export failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("session is not connected")]
    NotConnected,

    #[error("keying material export is not supported: {0}")]
    Unsupported(String),

    #[error("requested {requested} bytes exceeds export limit {max}")]
    LengthTooLarge { requested: usize, max: usize },
}

/// All errors produced by the PinStream session layer.
#[derive(Debug, Error)]
pub enum PinStreamError {
    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("trust layer error: {0}")]
    Trust(#[from] PinTrustError),

    #[error("crypto engine initialization failed: {0}")]
    EngineInit(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PinStreamError>;
