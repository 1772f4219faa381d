//! Certificate fingerprint trust: the peer is trusted iff its leaf digest matches.

use tracing::{trace, warn};

use pintrust::handshake::CertificateVerifier;
use pintrust::identity::Certificate;
use pintrust::{DigestAlgorithm, Fingerprint};

use crate::error::DigestError;

/// Expected peer digest plus the leaf certificate observed during negotiation.
///
/// Certificates above the leaf are accepted unconditionally: chains are never
/// validated, only the leaf digest is compared.
#[derive(Debug, Default, Clone)]
pub struct PeerTrust {
    expected: Option<Fingerprint>,
    peer_certificate: Option<Certificate>,
    verified: bool,
}

impl PeerTrust {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store the expected digest. Does not verify; see [`PeerTrust::verify_peer_certificate`].
    pub fn set_peer_digest(&mut self, algorithm: &str, digest: &[u8]) -> Result<(), DigestError> {
        let algorithm = DigestAlgorithm::from_name(algorithm)
            .map_err(|_| DigestError::UnknownAlgorithm(algorithm.to_string()))?;
        let fingerprint = Fingerprint::new(algorithm, digest.to_vec()).map_err(|_| {
            DigestError::InvalidLength {
                algorithm: algorithm.name().to_string(),
                expected: algorithm.output_len(),
                actual: digest.len(),
            }
        })?;
        self.expected = Some(fingerprint);
        self.verified = false;
        Ok(())
    }

    pub fn expected(&self) -> Option<&Fingerprint> {
        self.expected.as_ref()
    }

    pub fn has_peer_digest(&self) -> bool {
        self.expected.is_some()
    }

    pub fn peer_certificate(&self) -> Option<&Certificate> {
        self.peer_certificate.as_ref()
    }

    /// True once the recorded leaf matched the expected digest.
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Recompute the leaf digest and byte-compare. False if either side is missing.
    pub fn verify_peer_certificate(&mut self) -> bool {
        self.verified = match (&self.expected, &self.peer_certificate) {
            (Some(expected), Some(cert)) => expected.matches(cert),
            _ => false,
        };
        self.verified
    }
}

impl CertificateVerifier for PeerTrust {
    fn verify_certificate(&mut self, certificate: &Certificate, depth: usize) -> bool {
        if depth > 0 {
            trace!(depth, common_name = %certificate.common_name, "accepting non-leaf certificate");
            return true;
        }
        self.peer_certificate = Some(certificate.clone());
        if !self.has_peer_digest() {
            trace!("peer digest not yet known; deferring verification");
            return true;
        }
        let ok = self.verify_peer_certificate();
        if !ok {
            warn!(common_name = %certificate.common_name, "peer certificate digest mismatch");
        }
        ok
    }
}
