// PinTrust: certificate fingerprint trust, key schedule and handshake protocol
//
// Crate root: module declarations and public re-exports.

pub mod error;
pub mod crypto;
pub mod identity;
pub mod fingerprint;
pub mod suite;
pub mod handshake;

// Re-export key types at crate root for convenience.
pub use error::{PinTrustError, Result};
pub use crypto::aead::CipherSuite;
pub use crypto::digest::DigestAlgorithm;
pub use crypto::keys::IdentityKeyPair;
pub use fingerprint::Fingerprint;
pub use handshake::{HandshakeErrorKind, ProtocolVersion, Role};
pub use identity::{Certificate, Identity};
pub use suite::{CryptoOptions, SrtpCryptoSuite};
