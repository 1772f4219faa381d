// Integration tests for key agreement, record protection and exporter primitives.

use pintrust::crypto::aead::{record_nonce, AeadKey, CipherSuite};
use pintrust::crypto::exporter::{export_keying_material, MAX_EXPORT_LEN};
use pintrust::crypto::keys::{verify_signature, IdentityKeyPair};
use pintrust::crypto::x25519::{derive_master_secret, derive_session_keys, X25519KeyPair};
use pintrust::suite::{split_srtp_keying_material, SrtpCryptoSuite, SRTP_EXPORTER_LABEL};

#[test]
fn both_sides_derive_identical_traffic_keys() {
    let client = X25519KeyPair::generate();
    let server = X25519KeyPair::generate();
    let (cr, sr) = ([0x11u8; 32], [0x22u8; 32]);

    let client_master =
        derive_master_secret(&client.diffie_hellman(&server.public_key_bytes()), &cr, &sr).unwrap();
    let server_master =
        derive_master_secret(&server.diffie_hellman(&client.public_key_bytes()), &cr, &sr).unwrap();
    assert_eq!(*client_master, *server_master);

    let keys = derive_session_keys(&client_master).unwrap();
    for suite in CipherSuite::ALL {
        let writer = AeadKey::new(suite, &keys.client_write_key).unwrap();
        let reader = AeadKey::new(suite, &derive_session_keys(&server_master).unwrap().client_write_key)
            .unwrap();
        let nonce = record_nonce(&keys.client_write_iv, 7);
        let sealed = writer.encrypt(&nonce, b"application data", b"hdr").unwrap();
        assert_eq!(reader.decrypt(&nonce, &sealed, b"hdr").unwrap(), b"application data");
    }
}

#[test]
fn sequence_numbers_produce_distinct_ciphertexts() {
    let key = AeadKey::new(CipherSuite::Aes256Gcm, &[5u8; 32]).unwrap();
    let iv = [9u8; 12];
    let a = key.encrypt(&record_nonce(&iv, 0), b"same", b"").unwrap();
    let b = key.encrypt(&record_nonce(&iv, 1), b"same", b"").unwrap();
    assert_ne!(a, b);
    assert!(key.decrypt(&record_nonce(&iv, 1), &a, b"").is_err());
}

#[test]
fn signatures_verify_with_public_key_only() {
    let kp = IdentityKeyPair::generate();
    let sig = kp.sign(b"transcript");
    assert!(verify_signature(&kp.public_key_bytes(), b"transcript", &sig).is_ok());
    assert!(verify_signature(&kp.public_key_bytes(), b"other", &sig).is_err());
}

#[test]
fn srtp_material_splits_per_suite() {
    let master = [0x33u8; 32];
    for suite in [SrtpCryptoSuite::AesCm128HmacSha1_80, SrtpCryptoSuite::AeadAes256Gcm] {
        let material = export_keying_material(
            &master,
            &[1u8; 32],
            &[2u8; 32],
            SRTP_EXPORTER_LABEL,
            None,
            suite.keying_material_len(),
        )
        .unwrap();
        let keys = split_srtp_keying_material(suite, &material).unwrap();
        let (key_len, salt_len) = suite.key_and_salt_lengths();
        assert_eq!(keys.client_key.len(), key_len);
        assert_eq!(keys.server_salt.len(), salt_len);
        assert_ne!(keys.client_key, keys.server_key);
    }
}

#[test]
fn exporter_limit_is_hkdf_limit() {
    let master = [0u8; 32];
    assert!(export_keying_material(&master, &[0; 32], &[0; 32], "l", None, MAX_EXPORT_LEN).is_ok());
    assert!(export_keying_material(&master, &[0; 32], &[0; 32], "l", None, MAX_EXPORT_LEN + 1).is_err());
}
