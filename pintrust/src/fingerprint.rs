// RFC 4572 certificate fingerprints: "<algorithm> <HEX>:<HEX>:...".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::digest::DigestAlgorithm;
use crate::error::{PinTrustError, Result};
use crate::identity::{Certificate, Identity};

/// A digest of an encoded certificate under a named algorithm.
///
/// The fingerprint is the sole trust anchor for a peer: a presented leaf
/// certificate is accepted iff its digest equals [`Fingerprint::digest`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint {
    algorithm: DigestAlgorithm,
    digest: Vec<u8>,
}

impl Fingerprint {
    /// Wrap raw digest bytes, checking the length against the algorithm.
    pub fn new(algorithm: DigestAlgorithm, digest: Vec<u8>) -> Result<Self> {
        if digest.len() != algorithm.output_len() {
            return Err(PinTrustError::InvalidDigestLength {
                algorithm: algorithm.name().to_string(),
                expected: algorithm.output_len(),
                actual: digest.len(),
            });
        }
        Ok(Self { algorithm, digest })
    }

    pub fn from_certificate(algorithm: DigestAlgorithm, cert: &Certificate) -> Self {
        Self {
            algorithm,
            digest: cert.compute_digest(algorithm),
        }
    }

    /// Fingerprint of the identity's leaf certificate.
    pub fn from_identity(algorithm: DigestAlgorithm, identity: &Identity) -> Self {
        Self::from_certificate(algorithm, identity.certificate())
    }

    /// Parse the two halves of an SDP `a=fingerprint` attribute.
    pub fn from_rfc4572(algorithm: &str, fingerprint: &str) -> Result<Self> {
        if algorithm.is_empty() || fingerprint.is_empty() {
            return Err(PinTrustError::InvalidFingerprint("empty input".into()));
        }
        let algorithm = DigestAlgorithm::from_name(algorithm)?;
        let digest = decode_hex_pairs(fingerprint)?;
        Self::new(algorithm, digest)
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Uppercase colon-delimited hex, without the algorithm prefix.
    pub fn rfc4572_fingerprint(&self) -> String {
        let mut out = String::with_capacity(self.digest.len() * 3);
        for (i, b) in self.digest.iter().enumerate() {
            if i > 0 {
                out.push(':');
            }
            out.push_str(&format!("{b:02X}"));
        }
        out
    }

    /// Byte-compare against the digest of `cert` under this fingerprint's algorithm.
    pub fn matches(&self, cert: &Certificate) -> bool {
        cert.compute_digest(self.algorithm) == self.digest
    }
}

fn decode_hex_pairs(s: &str) -> Result<Vec<u8>> {
    s.split(':')
        .map(|pair| {
            if pair.len() != 2 || !pair.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(PinTrustError::InvalidFingerprint(format!(
                    "expected two hex digits, got {pair:?}"
                )));
            }
            u8::from_str_radix(pair, 16)
                .map_err(|_| PinTrustError::InvalidFingerprint(format!("invalid hex {pair:?}")))
        })
        .collect()
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.rfc4572_fingerprint())
    }
}

impl FromStr for Fingerprint {
    type Err = PinTrustError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PinTrustError::InvalidFingerprint("empty input".into()));
        }
        let (algorithm, hex) = s
            .split_once(char::is_whitespace)
            .ok_or_else(|| PinTrustError::InvalidFingerprint("missing digest".into()))?;
        Self::from_rfc4572(algorithm, hex.trim_start())
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = PinTrustError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render_normalizes_case() {
        let fp: Fingerprint = "SHA-1 0a:1b:2c:3d:4e:5f:60:71:82:93:a4:b5:c6:d7:e8:f9:0A:1B:2C:3D"
            .parse()
            .unwrap();
        assert_eq!(fp.algorithm(), DigestAlgorithm::Sha1);
        assert_eq!(
            fp.to_string(),
            "sha-1 0A:1B:2C:3D:4E:5F:60:71:82:93:A4:B5:C6:D7:E8:F9:0A:1B:2C:3D"
        );
    }

    #[test]
    fn rejects_empty() {
        assert!("".parse::<Fingerprint>().is_err());
        assert!(Fingerprint::from_rfc4572("sha-256", "").is_err());
        assert!(Fingerprint::from_rfc4572("", "AB").is_err());
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let err = Fingerprint::from_rfc4572("sha-3", "AB").unwrap_err();
        assert!(matches!(err, PinTrustError::UnknownAlgorithm(_)));
    }

    #[test]
    fn rejects_malformed_hex() {
        for bad in ["ZZ", "A", "ABC", "AB::CD", "AB:", "AB-CD", "+A"] {
            assert!(Fingerprint::from_rfc4572("md5", bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Fingerprint::from_rfc4572("sha-256", "AB:CD").unwrap_err();
        assert!(matches!(
            err,
            PinTrustError::InvalidDigestLength { expected: 32, actual: 2, .. }
        ));
    }

    #[test]
    fn certificate_fingerprint_matches() {
        let id = Identity::generate("fp").unwrap();
        let fp = Fingerprint::from_identity(DigestAlgorithm::Sha256, &id);
        assert!(fp.matches(id.certificate()));
        let other = Identity::generate("other").unwrap();
        assert!(!fp.matches(other.certificate()));
    }

    #[test]
    fn serde_as_string() {
        let fp = Fingerprint::new(DigestAlgorithm::Md5, vec![0xAB; 16]).unwrap();
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"md5 {}\"", ["AB"; 16].join(":")));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }
}
