// Certificate binary encoding.
//
// Wire format (big-endian):
// [version:1B][serial:8B][cn_len:2B][cn:cn_lenB]
// [subject_pk:32B][issuer_pk:32B]
// [not_before:8B][not_after:8B]
// [signature:64B]

use bytes::{Buf, BufMut};

use crate::error::{PinTrustError, Result};
use crate::identity::Certificate;

const FIXED_LEN: usize = 1 + 8 + 2 + 32 + 32 + 8 + 8 + 64;

pub fn encode(cert: &Certificate) -> Vec<u8> {
    let cn = cert.common_name.as_bytes();
    let mut buf = Vec::with_capacity(FIXED_LEN + cn.len());
    buf.put_u8(Certificate::VERSION);
    buf.put_u64(cert.serial);
    buf.put_u16(cn.len() as u16);
    buf.put_slice(cn);
    buf.put_slice(&cert.subject_public_key);
    buf.put_slice(&cert.issuer_public_key);
    buf.put_u64(cert.not_before);
    buf.put_u64(cert.not_after);
    buf.put_slice(&cert.signature);
    buf
}

pub fn decode(mut data: &[u8]) -> Result<Certificate> {
    let short = || PinTrustError::CertificateDecode("unexpected end of data".into());

    if data.remaining() < 1 + 8 + 2 {
        return Err(short());
    }
    let version = data.get_u8();
    if version != Certificate::VERSION {
        return Err(PinTrustError::CertificateDecode(format!(
            "unsupported certificate version {version}"
        )));
    }
    let serial = data.get_u64();
    let cn_len = data.get_u16() as usize;
    if data.remaining() < cn_len {
        return Err(short());
    }
    let common_name = String::from_utf8(data[..cn_len].to_vec())
        .map_err(|e| PinTrustError::CertificateDecode(format!("invalid utf8: {e}")))?;
    data.advance(cn_len);

    if data.remaining() < 32 + 32 + 8 + 8 + 64 {
        return Err(short());
    }
    let mut subject_public_key = [0u8; 32];
    data.copy_to_slice(&mut subject_public_key);
    let mut issuer_public_key = [0u8; 32];
    data.copy_to_slice(&mut issuer_public_key);
    let not_before = data.get_u64();
    let not_after = data.get_u64();
    let mut signature = [0u8; 64];
    data.copy_to_slice(&mut signature);

    if data.has_remaining() {
        return Err(PinTrustError::CertificateDecode(format!(
            "{} trailing bytes",
            data.remaining()
        )));
    }

    Ok(Certificate {
        serial,
        common_name,
        subject_public_key,
        issuer_public_key,
        not_before,
        not_after,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::IdentityKeyPair;
    use crate::identity::CertificateBuilder;

    fn sample() -> Certificate {
        let kp = IdentityKeyPair::from_seed(&[3u8; 32]);
        CertificateBuilder::new(&kp)
            .common_name("sample")
            .serial(42)
            .validity(100, 200)
            .build()
            .unwrap()
    }

    #[test]
    fn roundtrip() {
        let cert = sample();
        let bytes = encode(&cert);
        assert_eq!(bytes.len(), FIXED_LEN + "sample".len());
        assert_eq!(decode(&bytes).unwrap(), cert);
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(encode(&sample()), encode(&sample()));
    }

    #[test]
    fn truncated_rejected() {
        let bytes = encode(&sample());
        for cut in [0, 5, 20, bytes.len() - 1] {
            assert!(decode(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode(&sample());
        bytes.push(0);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn bad_version_rejected() {
        let mut bytes = encode(&sample());
        bytes[0] = 9;
        assert!(matches!(decode(&bytes), Err(PinTrustError::CertificateDecode(_))));
    }
}
