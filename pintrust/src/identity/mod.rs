// Self-signed certificates and the local identity (keypair + chain) presented in handshakes.

pub mod builder;
pub mod serializer;

use std::time::Duration;

use crate::crypto::digest::DigestAlgorithm;
use crate::crypto::keys::{verify_signature, IdentityKeyPair};
use crate::error::{PinTrustError, Result};

pub use builder::CertificateBuilder;

/// Default lifetime of a generated identity certificate.
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(86400 * 30);

/// A compact Ed25519 certificate.
///
/// Peers never validate the issuer chain; a certificate is trusted only
/// through the digest of its encoded form (see [`crate::fingerprint`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub serial: u64,
    pub common_name: String,
    pub subject_public_key: [u8; 32],
    pub issuer_public_key: [u8; 32],
    pub not_before: u64,
    pub not_after: u64,
    pub signature: [u8; 64],
}

impl Certificate {
    /// Current wire format version.
    pub const VERSION: u8 = 1;

    /// Canonical bytes covered by the issuer signature (everything except the signature).
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = serializer::encode(self);
        buf.truncate(buf.len() - 64);
        buf
    }

    /// Canonical encoding; the input to fingerprint digests.
    pub fn encode(&self) -> Vec<u8> {
        serializer::encode(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        serializer::decode(data)
    }

    /// Digest of the encoded certificate under `algorithm`.
    pub fn compute_digest(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        algorithm.compute(&self.encode())
    }

    pub fn is_self_signed(&self) -> bool {
        self.subject_public_key == self.issuer_public_key
    }

    /// Check the issuer signature over [`Self::signable_bytes`].
    pub fn verify_signature(&self) -> Result<()> {
        verify_signature(&self.issuer_public_key, &self.signable_bytes(), &self.signature)
    }
}

/// Local identity: a signing keypair and the certificate chain presented to peers.
#[derive(Debug, Clone)]
pub struct Identity {
    keypair: IdentityKeyPair,
    certificate: Certificate,
    intermediates: Vec<Certificate>,
}

impl Identity {
    /// Generate a fresh keypair with a self-signed certificate.
    pub fn generate(common_name: &str) -> Result<Self> {
        Self::from_keypair(IdentityKeyPair::generate(), common_name)
    }

    /// Build an identity around an existing keypair.
    pub fn from_keypair(keypair: IdentityKeyPair, common_name: &str) -> Result<Self> {
        let certificate = CertificateBuilder::new(&keypair)
            .common_name(common_name)
            .serial(rand::random())
            .valid_for(DEFAULT_VALIDITY)
            .build()?;
        Ok(Self {
            keypair,
            certificate,
            intermediates: Vec::new(),
        })
    }

    /// Pair a keypair with a certificate issued elsewhere.
    pub fn with_certificate(keypair: IdentityKeyPair, certificate: Certificate) -> Result<Self> {
        if certificate.subject_public_key != keypair.public_key_bytes() {
            return Err(PinTrustError::CertificateBuild(
                "certificate subject does not match keypair".into(),
            ));
        }
        Ok(Self {
            keypair,
            certificate,
            intermediates: Vec::new(),
        })
    }

    /// Append certificates sent after the leaf in the presented chain.
    pub fn with_intermediates(mut self, intermediates: Vec<Certificate>) -> Self {
        self.intermediates = intermediates;
        self
    }

    pub fn keypair(&self) -> &IdentityKeyPair {
        &self.keypair
    }

    /// The leaf certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Leaf first, then intermediates.
    pub fn certificate_chain(&self) -> Vec<Certificate> {
        std::iter::once(self.certificate.clone())
            .chain(self.intermediates.iter().cloned())
            .collect()
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.keypair.sign(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identity_is_self_signed() {
        let id = Identity::generate("alice").unwrap();
        let cert = id.certificate();
        assert!(cert.is_self_signed());
        assert_eq!(cert.common_name, "alice");
        assert!(cert.verify_signature().is_ok());
        assert_eq!(cert.subject_public_key, id.keypair().public_key_bytes());
    }

    #[test]
    fn chain_puts_leaf_first() {
        let ca = Identity::generate("ca").unwrap();
        let id = Identity::generate("leaf")
            .unwrap()
            .with_intermediates(vec![ca.certificate().clone()]);
        let chain = id.certificate_chain();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].common_name, "leaf");
        assert_eq!(chain[1].common_name, "ca");
    }

    #[test]
    fn digest_tracks_encoding() {
        let id = Identity::generate("bob").unwrap();
        let cert = id.certificate();
        let d = cert.compute_digest(DigestAlgorithm::Sha256);
        assert_eq!(d, DigestAlgorithm::Sha256.compute(&cert.encode()));
        assert_eq!(d.len(), 32);
    }

    #[test]
    fn tampered_certificate_fails_signature() {
        let id = Identity::generate("carol").unwrap();
        let mut cert = id.certificate().clone();
        cert.common_name = "mallory".into();
        assert!(cert.verify_signature().is_err());
    }

    #[test]
    fn with_certificate_rejects_foreign_key() {
        let a = Identity::generate("a").unwrap();
        let b = Identity::generate("b").unwrap();
        let err = Identity::with_certificate(a.keypair().clone(), b.certificate().clone());
        assert!(err.is_err());
    }
}
