// Ed25519 identity keys used to sign certificates and CertificateVerify

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{PinTrustError, Result};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Long-term key behind a local identity. The public half is what ends up
/// in the certificate, and therefore in the fingerprint the peer pins.
#[derive(Debug, Clone)]
pub struct IdentityKeyPair {
    secret: SigningKey,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        Self {
            secret: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Handy for reproducible
    /// certificates in tests.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            secret: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.secret.verifying_key().to_bytes()
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.secret.sign(message).to_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> Result<()> {
        check(&self.secret.verifying_key(), message, signature)
    }
}

/// Check `signature` over `message` against a bare public key, as carried in
/// a certificate's issuer field.
pub fn verify_signature(
    public_key: &[u8; PUBLIC_KEY_LEN],
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<()> {
    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| PinTrustError::InvalidKey(e.to_string()))?;
    check(&key, message, signature)
}

fn check(key: &VerifyingKey, message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> Result<()> {
    key.verify(message, &Signature::from_bytes(signature))
        .map_err(|_| PinTrustError::SignatureVerification)
}
