// Secure-media (SRTP) crypto suite table and offer-list negotiation.
//
// Wire ids follow the DTLS-SRTP protection profile registry:
//   0x0001 AES_CM_128_HMAC_SHA1_80   (RFC 5764)
//   0x0002 AES_CM_128_HMAC_SHA1_32   (RFC 5764)
//   0x0007 AEAD_AES_128_GCM          (RFC 7714)
//   0x0008 AEAD_AES_256_GCM          (RFC 7714)

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{PinTrustError, Result};

/// Exporter label for DTLS-SRTP keying material.
pub const SRTP_EXPORTER_LABEL: &str = "EXTRACTOR-dtls_srtp";

/// A secure-media crypto suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SrtpCryptoSuite {
    AesCm128HmacSha1_80,
    AesCm128HmacSha1_32,
    AeadAes128Gcm,
    AeadAes256Gcm,
}

impl SrtpCryptoSuite {
    pub fn id(self) -> u16 {
        match self {
            SrtpCryptoSuite::AesCm128HmacSha1_80 => 0x0001,
            SrtpCryptoSuite::AesCm128HmacSha1_32 => 0x0002,
            SrtpCryptoSuite::AeadAes128Gcm => 0x0007,
            SrtpCryptoSuite::AeadAes256Gcm => 0x0008,
        }
    }

    pub fn from_id(id: u16) -> Result<Self> {
        match id {
            0x0001 => Ok(SrtpCryptoSuite::AesCm128HmacSha1_80),
            0x0002 => Ok(SrtpCryptoSuite::AesCm128HmacSha1_32),
            0x0007 => Ok(SrtpCryptoSuite::AeadAes128Gcm),
            0x0008 => Ok(SrtpCryptoSuite::AeadAes256Gcm),
            other => Err(PinTrustError::UnsupportedSuite(format!("0x{other:04x}"))),
        }
    }

    /// Symbolic name as used in SDP `a=crypto` lines.
    pub fn name(self) -> &'static str {
        match self {
            SrtpCryptoSuite::AesCm128HmacSha1_80 => "AES_CM_128_HMAC_SHA1_80",
            SrtpCryptoSuite::AesCm128HmacSha1_32 => "AES_CM_128_HMAC_SHA1_32",
            SrtpCryptoSuite::AeadAes128Gcm => "AEAD_AES_128_GCM",
            SrtpCryptoSuite::AeadAes256Gcm => "AEAD_AES_256_GCM",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "AES_CM_128_HMAC_SHA1_80" => Ok(SrtpCryptoSuite::AesCm128HmacSha1_80),
            "AES_CM_128_HMAC_SHA1_32" => Ok(SrtpCryptoSuite::AesCm128HmacSha1_32),
            "AEAD_AES_128_GCM" => Ok(SrtpCryptoSuite::AeadAes128Gcm),
            "AEAD_AES_256_GCM" => Ok(SrtpCryptoSuite::AeadAes256Gcm),
            other => Err(PinTrustError::UnsupportedSuite(other.to_string())),
        }
    }

    /// Master key and master salt lengths in bytes.
    pub fn key_and_salt_lengths(self) -> (usize, usize) {
        match self {
            SrtpCryptoSuite::AesCm128HmacSha1_80 | SrtpCryptoSuite::AesCm128HmacSha1_32 => (16, 14),
            SrtpCryptoSuite::AeadAes128Gcm => (16, 12),
            SrtpCryptoSuite::AeadAes256Gcm => (32, 12),
        }
    }

    pub fn is_gcm(self) -> bool {
        matches!(
            self,
            SrtpCryptoSuite::AeadAes128Gcm | SrtpCryptoSuite::AeadAes256Gcm
        )
    }

    /// Bytes of exporter output needed for both directions' key and salt.
    pub fn keying_material_len(self) -> usize {
        let (key, salt) = self.key_and_salt_lengths();
        2 * (key + salt)
    }
}

impl fmt::Display for SrtpCryptoSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for SrtpCryptoSuite {
    type Error = PinTrustError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_name(&s)
    }
}

impl From<SrtpCryptoSuite> for String {
    fn from(suite: SrtpCryptoSuite) -> Self {
        suite.name().to_string()
    }
}

/// Feature switches for the media crypto suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoOptions {
    /// Offer the AEAD GCM suites ahead of the baseline suites.
    pub enable_gcm_crypto_suites: bool,
    /// Carried through to the media layer; the handshake does not act on it.
    pub enable_encrypted_rtp_header_extensions: bool,
}

impl CryptoOptions {
    pub fn no_gcm() -> Self {
        Self {
            enable_gcm_crypto_suites: false,
            ..Self::default()
        }
    }
}

/// Every suite the local side can use, most preferred first.
pub fn supported_crypto_suites(options: &CryptoOptions) -> Vec<SrtpCryptoSuite> {
    let mut suites = Vec::with_capacity(4);
    if options.enable_gcm_crypto_suites {
        suites.push(SrtpCryptoSuite::AeadAes256Gcm);
        suites.push(SrtpCryptoSuite::AeadAes128Gcm);
    }
    // SHA1_80 is mandatory to implement; SHA1_32 saves bytes per packet when chosen.
    suites.push(SrtpCryptoSuite::AesCm128HmacSha1_32);
    suites.push(SrtpCryptoSuite::AesCm128HmacSha1_80);
    suites
}

/// Produce the ordered list of suites to offer from a candidate id list.
///
/// GCM suites are prepended (256 before 128) when enabled and dropped
/// otherwise; baseline candidates keep their order with duplicates removed.
/// Any unknown id fails the whole list.
pub fn build_offer_list(candidates: &[u16], options: &CryptoOptions) -> Result<Vec<SrtpCryptoSuite>> {
    if candidates.is_empty() {
        return Err(PinTrustError::UnsupportedSuite("empty candidate list".into()));
    }
    let candidates = candidates
        .iter()
        .map(|&id| SrtpCryptoSuite::from_id(id))
        .collect::<Result<Vec<_>>>()?;

    let mut offer = Vec::with_capacity(4);
    if options.enable_gcm_crypto_suites {
        offer.push(SrtpCryptoSuite::AeadAes256Gcm);
        offer.push(SrtpCryptoSuite::AeadAes128Gcm);
    }
    for suite in candidates {
        if !suite.is_gcm() && !offer.contains(&suite) {
            offer.push(suite);
        }
    }
    if offer.is_empty() {
        return Err(PinTrustError::UnsupportedSuite(
            "no baseline suite among candidates".into(),
        ));
    }
    Ok(offer)
}

/// Pick the first suite in the client's preference order that the server also supports.
pub fn select_suite(offered: &[SrtpCryptoSuite], local: &[SrtpCryptoSuite]) -> Option<SrtpCryptoSuite> {
    offered.iter().copied().find(|s| local.contains(s))
}

/// SRTP master keys and salts for both directions.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SrtpKeys {
    pub client_key: Vec<u8>,
    pub server_key: Vec<u8>,
    pub client_salt: Vec<u8>,
    pub server_salt: Vec<u8>,
}

impl fmt::Debug for SrtpKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrtpKeys").finish_non_exhaustive()
    }
}

/// Split exporter output laid out as client_key | server_key | client_salt | server_salt.
pub fn split_srtp_keying_material(suite: SrtpCryptoSuite, material: &[u8]) -> Result<SrtpKeys> {
    let (key, salt) = suite.key_and_salt_lengths();
    if material.len() != suite.keying_material_len() {
        return Err(PinTrustError::KeyDerivation(format!(
            "{} needs {} bytes of keying material, got {}",
            suite,
            suite.keying_material_len(),
            material.len()
        )));
    }
    let (client_key, rest) = material.split_at(key);
    let (server_key, rest) = rest.split_at(key);
    let (client_salt, server_salt) = rest.split_at(salt);
    Ok(SrtpKeys {
        client_key: client_key.to_vec(),
        server_key: server_key.to_vec(),
        client_salt: client_salt.to_vec(),
        server_salt: server_salt.to_vec(),
    })
}
