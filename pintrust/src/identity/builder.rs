// Certificate builder: fluent construction and signing of identity certificates.

use std::time::Duration;

use crate::crypto::keys::IdentityKeyPair;
use crate::error::{PinTrustError, Result};
use crate::identity::Certificate;

/// Builder for a [`Certificate`] about `subject`'s key.
///
/// Self-signed unless [`CertificateBuilder::issued_by`] names another signer.
///
/// # Example
/// ```ignore
/// let cert = CertificateBuilder::new(&keypair)
///     .common_name("webrtc")
///     .valid_for(Duration::from_secs(86400))
///     .build()?;
/// ```
pub struct CertificateBuilder<'a> {
    subject: &'a IdentityKeyPair,
    issuer: Option<&'a IdentityKeyPair>,
    common_name: Option<String>,
    serial: u64,
    not_before: Option<u64>,
    not_after: Option<u64>,
}

impl<'a> CertificateBuilder<'a> {
    pub fn new(subject: &'a IdentityKeyPair) -> Self {
        Self {
            subject,
            issuer: None,
            common_name: None,
            serial: 0,
            not_before: None,
            not_after: None,
        }
    }

    pub fn common_name(mut self, name: &str) -> Self {
        self.common_name = Some(name.to_string());
        self
    }

    pub fn serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    /// Sign with `issuer` instead of the subject key.
    pub fn issued_by(mut self, issuer: &'a IdentityKeyPair) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Explicit validity window (unix seconds).
    pub fn validity(mut self, from: u64, until: u64) -> Self {
        self.not_before = Some(from);
        self.not_after = Some(until);
        self
    }

    /// Validity as a duration from the current wall-clock time.
    pub fn valid_for(self, duration: Duration) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.validity(now, now.saturating_add(duration.as_secs()))
    }

    pub fn build(self) -> Result<Certificate> {
        let common_name = self
            .common_name
            .ok_or_else(|| PinTrustError::CertificateBuild("common_name is required".into()))?;
        if common_name.len() > u16::MAX as usize {
            return Err(PinTrustError::CertificateBuild("common_name too long".into()));
        }
        let (not_before, not_after) = match (self.not_before, self.not_after) {
            (Some(from), Some(until)) => (from, until),
            _ => {
                return Err(PinTrustError::CertificateBuild(
                    "validity window is required".into(),
                ))
            }
        };
        if not_after <= not_before {
            return Err(PinTrustError::CertificateBuild(
                "not_after must be after not_before".into(),
            ));
        }

        let issuer = self.issuer.unwrap_or(self.subject);
        let mut cert = Certificate {
            serial: self.serial,
            common_name,
            subject_public_key: self.subject.public_key_bytes(),
            issuer_public_key: issuer.public_key_bytes(),
            not_before,
            not_after,
            signature: [0u8; 64],
        };
        cert.signature = issuer.sign(&cert.signable_bytes());
        Ok(cert)
    }
}
