// Record protection: AES-256-GCM and ChaCha20-Poly1305 (RFC 8439).
//
// Handshake cipher suite wire ids:
//   0x0001 PIN_X25519_ED25519_AES256GCM_SHA256
//   0x0002 PIN_X25519_ED25519_CHACHA20POLY1305_SHA256

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};

use crate::error::{PinTrustError, Result};

/// Length of the authentication tag appended to every sealed record.
pub const TAG_LEN: usize = 16;

/// Cipher suite protecting handshake-encrypted records and application data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u16)]
pub enum CipherSuite {
    Aes256Gcm = 0x0001,
    ChaCha20Poly1305 = 0x0002,
}

impl CipherSuite {
    /// Preference order used when offering suites.
    pub const ALL: [CipherSuite; 2] = [CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305];

    pub fn wire_id(self) -> u16 {
        self as u16
    }

    pub fn from_wire_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|suite| suite.wire_id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherSuite::Aes256Gcm => "PIN_X25519_ED25519_AES256GCM_SHA256",
            CipherSuite::ChaCha20Poly1305 => "PIN_X25519_ED25519_CHACHA20POLY1305_SHA256",
        }
    }
}

impl std::fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

enum Inner {
    Aes(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

/// A keyed AEAD instance for one direction of a connection.
pub struct AeadKey {
    suite: CipherSuite,
    inner: Inner,
}

impl AeadKey {
    /// Construct from a 32-byte key and the negotiated cipher suite.
    pub fn new(suite: CipherSuite, key: &[u8; 32]) -> Result<Self> {
        let inner = match suite {
            CipherSuite::Aes256Gcm => Inner::Aes(Box::new(
                Aes256Gcm::new_from_slice(key)
                    .map_err(|e| PinTrustError::InvalidKey(format!("aes-gcm init: {e}")))?,
            )),
            CipherSuite::ChaCha20Poly1305 => Inner::ChaCha(Box::new(
                ChaCha20Poly1305::new_from_slice(key)
                    .map_err(|e| PinTrustError::InvalidKey(format!("chacha init: {e}")))?,
            )),
        };
        Ok(Self { suite, inner })
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Encrypt `plaintext`, returning ciphertext || 16-byte tag.
    pub fn encrypt(&self, nonce: &[u8; 12], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload { msg: plaintext, aad };
        let sealed = match &self.inner {
            Inner::Aes(c) => c.encrypt(nonce, payload),
            Inner::ChaCha(c) => c.encrypt(nonce, payload),
        };
        sealed.map_err(|e| PinTrustError::Encryption(format!("{e}")))
    }

    /// Decrypt `ciphertext` (tag appended) with the `aad` used during encryption.
    pub fn decrypt(&self, nonce: &[u8; 12], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_LEN {
            return Err(PinTrustError::Decryption("record shorter than tag".into()));
        }
        let nonce = Nonce::from_slice(nonce);
        let sealed = Payload { msg: ciphertext, aad };
        let opened = match &self.inner {
            Inner::Aes(c) => c.decrypt(nonce, sealed),
            Inner::ChaCha(c) => c.decrypt(nonce, sealed),
        };
        opened.map_err(|e| PinTrustError::Decryption(format!("{e}")))
    }
}

/// Per-record nonce: the static write IV XORed with the big-endian sequence number.
pub fn record_nonce(iv: &[u8; 12], sequence: u64) -> [u8; 12] {
    let mut nonce = *iv;
    for (n, s) in nonce[4..].iter_mut().zip(sequence.to_be_bytes()) {
        *n ^= s;
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_gcm_roundtrip_with_aad() {
        let key = AeadKey::new(CipherSuite::Aes256Gcm, &[0x99u8; 32]).unwrap();
        let nonce = [1u8; 12];
        let ct = key.encrypt(&nonce, b"media keys", b"header").unwrap();
        assert_eq!(ct.len(), b"media keys".len() + TAG_LEN);
        let pt = key.decrypt(&nonce, &ct, b"header").unwrap();
        assert_eq!(pt, b"media keys");
    }

    #[test]
    fn chacha_wrong_aad_fails() {
        let key = AeadKey::new(CipherSuite::ChaCha20Poly1305, &[0xAAu8; 32]).unwrap();
        let nonce = [2u8; 12];
        let ct = key.encrypt(&nonce, b"data", b"good aad").unwrap();
        assert!(key.decrypt(&nonce, &ct, b"bad aad").is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let enc = AeadKey::new(CipherSuite::Aes256Gcm, &[0x11u8; 32]).unwrap();
        let dec = AeadKey::new(CipherSuite::Aes256Gcm, &[0x22u8; 32]).unwrap();
        let nonce = [0u8; 12];
        let ct = enc.encrypt(&nonce, b"secret", b"").unwrap();
        assert!(dec.decrypt(&nonce, &ct, b"").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = AeadKey::new(CipherSuite::ChaCha20Poly1305, &[0xBBu8; 32]).unwrap();
        let nonce = [3u8; 12];
        let mut ct = key.encrypt(&nonce, b"data", b"").unwrap();
        ct[0] ^= 0xFF;
        assert!(key.decrypt(&nonce, &ct, b"").is_err());
    }

    #[test]
    fn truncated_record_rejected() {
        let key = AeadKey::new(CipherSuite::Aes256Gcm, &[0x01u8; 32]).unwrap();
        let err = key.decrypt(&[0u8; 12], &[0u8; 4], b"").unwrap_err();
        assert!(matches!(err, PinTrustError::Decryption(_)));
    }

    #[test]
    fn record_nonce_mixes_sequence() {
        let iv = [0u8; 12];
        assert_eq!(record_nonce(&iv, 0), iv);
        let n = record_nonce(&iv, 0x0102);
        assert_eq!(&n[10..], &[0x01, 0x02]);
        assert_ne!(record_nonce(&iv, 1), record_nonce(&iv, 2));
    }

    #[test]
    fn cipher_suite_wire_ids() {
        assert_eq!(CipherSuite::Aes256Gcm.wire_id(), 0x0001);
        assert_eq!(CipherSuite::ChaCha20Poly1305.wire_id(), 0x0002);
        assert_eq!(CipherSuite::from_wire_id(0x0002), Some(CipherSuite::ChaCha20Poly1305));
        assert_eq!(CipherSuite::from_wire_id(0x9999), None);
    }
}
