// Named-algorithm message digests (RFC 4572 hash function textual names).

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::{PinTrustError, Result};

/// A digest algorithm from the fixed fingerprint registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Every registered algorithm, weakest first.
    pub const ALL: [DigestAlgorithm; 6] = [
        DigestAlgorithm::Md5,
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha224,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
    ];

    /// Look up an algorithm by its registry name.
    ///
    /// Names are matched case-insensitively; `"SHA-256"` and `"sha-256"` are
    /// the same algorithm.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha-1" => Ok(DigestAlgorithm::Sha1),
            "sha-224" => Ok(DigestAlgorithm::Sha224),
            "sha-256" => Ok(DigestAlgorithm::Sha256),
            "sha-384" => Ok(DigestAlgorithm::Sha384),
            "sha-512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(PinTrustError::UnknownAlgorithm(name.to_string())),
        }
    }

    /// The lower-case registry name.
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha1 => "sha-1",
            DigestAlgorithm::Sha224 => "sha-224",
            DigestAlgorithm::Sha256 => "sha-256",
            DigestAlgorithm::Sha384 => "sha-384",
            DigestAlgorithm::Sha512 => "sha-512",
        }
    }

    /// Digest output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 16,
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha224 => 28,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// FIPS 180 algorithms are the ones RFC 4572 allows for self-signed
    /// certificates. Only MD5 is excluded.
    pub fn is_fips180(self) -> bool {
        !matches!(self, DigestAlgorithm::Md5)
    }

    /// Hash `data`, returning exactly `output_len()` bytes.
    pub fn compute(self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Md5 => Md5::digest(data).to_vec(),
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha224 => Sha224::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = PinTrustError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

impl TryFrom<String> for DigestAlgorithm {
    type Error = PinTrustError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_name(&value)
    }
}

impl From<DigestAlgorithm> for String {
    fn from(value: DigestAlgorithm) -> Self {
        value.name().to_string()
    }
}

/// Compute the digest of `data` under the algorithm registered as `name`.
pub fn compute_digest(name: &str, data: &[u8]) -> Result<Vec<u8>> {
    Ok(DigestAlgorithm::from_name(name)?.compute(data))
}
