// X25519 Diffie-Hellman key exchange and the handshake key schedule.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{PinTrustError, Result};

/// Ephemeral key share for a single handshake. Dropped once the master
/// secret has been derived.
pub struct X25519KeyPair {
    secret: StaticSecret,
}

impl X25519KeyPair {
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        PublicKey::from(&self.secret).to_bytes()
    }

    /// Shared secret with the peer's key share.
    pub fn diffie_hellman(&self, peer_share: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_share));
        Zeroizing::new(shared.to_bytes())
    }
}

/// Per-direction record protection keys derived from the master secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub client_write_key: [u8; 32],
    pub server_write_key: [u8; 32],
    pub client_write_iv: [u8; 12],
    pub server_write_iv: [u8; 12],
}

/// Derive the 32-byte master secret from the DH shared secret.
///
/// ```text
/// master_secret = HKDF-Expand(HKDF-Extract(salt = client_random || server_random,
///                                          ikm  = shared_secret),
///                             "pin master secret", 32)
/// ```
pub fn derive_master_secret(
    shared_secret: &[u8; 32],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(client_random);
    salt[32..].copy_from_slice(server_random);
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);

    let mut master = Zeroizing::new([0u8; 32]);
    hk.expand(b"pin master secret", master.as_mut())
        .map_err(|e| PinTrustError::KeyDerivation(format!("hkdf: {e}")))?;
    Ok(master)
}

/// Derive record protection keys from the master secret.
///
/// ```text
/// client_write_key = HKDF-Expand(master, "client write key", 32)
/// server_write_key = HKDF-Expand(master, "server write key", 32)
/// client_write_iv  = HKDF-Expand(master, "client write iv",  12)
/// server_write_iv  = HKDF-Expand(master, "server write iv",  12)
/// ```
pub fn derive_session_keys(master_secret: &[u8; 32]) -> Result<SessionKeys> {
    let hk = Hkdf::<Sha256>::new(None, master_secret);
    let expand = |label: &[u8], out: &mut [u8]| {
        hk.expand(label, out)
            .map_err(|e| PinTrustError::KeyDerivation(format!("hkdf: {e}")))
    };

    let mut keys = SessionKeys {
        client_write_key: [0u8; 32],
        server_write_key: [0u8; 32],
        client_write_iv: [0u8; 12],
        server_write_iv: [0u8; 12],
    };
    expand(b"client write key", &mut keys.client_write_key)?;
    expand(b"server write key", &mut keys.server_write_key)?;
    expand(b"client write iv", &mut keys.client_write_iv)?;
    expand(b"server write iv", &mut keys.server_write_iv)?;
    Ok(keys)
}

/// Compute Finished verify data binding the master secret to the transcript.
pub fn finished_verify_data(
    master_secret: &[u8; 32],
    label: &[u8],
    transcript_hash: &[u8; 32],
) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, master_secret);
    let mut out = [0u8; 32];
    hk.expand_multi_info(&[label, &transcript_hash[..]], &mut out)
        .map_err(|e| PinTrustError::KeyDerivation(format!("hkdf: {e}")))?;
    Ok(out)
}
