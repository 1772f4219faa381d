// Handshake messages and their binary codec.
//
// Framing (big-endian): [msg_type:1B][length:4B][body:lengthB]
//
//   1 ClientHello        [version:2][random:32][key_share:32]
//                        [n_suites:2][suite:2]*[n_srtp:2][srtp:2]*
//   2 ServerHello        [version:2][random:32][key_share:32][suite:2]
//                        [srtp:2 (0 = none)][certificate_request:1]
//  11 Certificate        [n_certs:2]([len:4][cert])*
//  15 CertificateVerify  [signature:64]
//  20 Finished           [verify_data:32]

use bytes::{Buf, BufMut};

use crate::error::{PinTrustError, Result};
use crate::identity::Certificate;

const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    ClientHello {
        version: u16,
        random: [u8; 32],
        key_share: [u8; 32],
        cipher_suites: Vec<u16>,
        srtp_suites: Vec<u16>,
    },
    ServerHello {
        version: u16,
        random: [u8; 32],
        key_share: [u8; 32],
        cipher_suite: u16,
        srtp_suite: Option<u16>,
        certificate_request: bool,
    },
    Certificate {
        chain: Vec<Certificate>,
    },
    CertificateVerify {
        signature: [u8; 64],
    },
    Finished {
        verify_data: [u8; 32],
    },
}

impl HandshakeMessage {
    pub fn msg_type(&self) -> u8 {
        match self {
            HandshakeMessage::ClientHello { .. } => 1,
            HandshakeMessage::ServerHello { .. } => 2,
            HandshakeMessage::Certificate { .. } => 11,
            HandshakeMessage::CertificateVerify { .. } => 15,
            HandshakeMessage::Finished { .. } => 20,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HandshakeMessage::ClientHello { .. } => "ClientHello",
            HandshakeMessage::ServerHello { .. } => "ServerHello",
            HandshakeMessage::Certificate { .. } => "Certificate",
            HandshakeMessage::CertificateVerify { .. } => "CertificateVerify",
            HandshakeMessage::Finished { .. } => "Finished",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            HandshakeMessage::ClientHello {
                version,
                random,
                key_share,
                cipher_suites,
                srtp_suites,
            } => {
                body.put_u16(*version);
                body.put_slice(random);
                body.put_slice(key_share);
                put_u16_list(&mut body, cipher_suites);
                put_u16_list(&mut body, srtp_suites);
            }
            HandshakeMessage::ServerHello {
                version,
                random,
                key_share,
                cipher_suite,
                srtp_suite,
                certificate_request,
            } => {
                body.put_u16(*version);
                body.put_slice(random);
                body.put_slice(key_share);
                body.put_u16(*cipher_suite);
                body.put_u16(srtp_suite.unwrap_or(0));
                body.put_u8(u8::from(*certificate_request));
            }
            HandshakeMessage::Certificate { chain } => {
                body.put_u16(chain.len() as u16);
                for cert in chain {
                    let encoded = cert.encode();
                    body.put_u32(encoded.len() as u32);
                    body.put_slice(&encoded);
                }
            }
            HandshakeMessage::CertificateVerify { signature } => body.put_slice(signature),
            HandshakeMessage::Finished { verify_data } => body.put_slice(verify_data),
        }

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.put_u8(self.msg_type());
        out.put_u32(body.len() as u32);
        out.put_slice(&body);
        out
    }

    /// Decode one message from the front of `buf`, advancing past it.
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        if buf.remaining() < HEADER_LEN {
            return Err(PinTrustError::Decode("truncated message header".into()));
        }
        let msg_type = buf.get_u8();
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(PinTrustError::Decode(format!(
                "message body needs {len} bytes, {} available",
                buf.remaining()
            )));
        }
        let mut body = &buf[..len];
        buf.advance(len);

        let msg = match msg_type {
            1 => {
                need(&body, 2 + 32 + 32)?;
                let version = body.get_u16();
                let random = get_array(&mut body);
                let key_share = get_array(&mut body);
                let cipher_suites = get_u16_list(&mut body)?;
                let srtp_suites = get_u16_list(&mut body)?;
                HandshakeMessage::ClientHello {
                    version,
                    random,
                    key_share,
                    cipher_suites,
                    srtp_suites,
                }
            }
            2 => {
                need(&body, 2 + 32 + 32 + 2 + 2 + 1)?;
                let version = body.get_u16();
                let random = get_array(&mut body);
                let key_share = get_array(&mut body);
                let cipher_suite = body.get_u16();
                let srtp_suite = match body.get_u16() {
                    0 => None,
                    id => Some(id),
                };
                let certificate_request = match body.get_u8() {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(PinTrustError::Decode(format!(
                            "invalid certificate_request flag {other}"
                        )))
                    }
                };
                HandshakeMessage::ServerHello {
                    version,
                    random,
                    key_share,
                    cipher_suite,
                    srtp_suite,
                    certificate_request,
                }
            }
            11 => {
                need(&body, 2)?;
                let count = body.get_u16() as usize;
                let mut chain = Vec::with_capacity(count.min(8));
                for _ in 0..count {
                    need(&body, 4)?;
                    let cert_len = body.get_u32() as usize;
                    need(&body, cert_len)?;
                    chain.push(Certificate::decode(&body[..cert_len])?);
                    body.advance(cert_len);
                }
                HandshakeMessage::Certificate { chain }
            }
            15 => {
                need(&body, 64)?;
                HandshakeMessage::CertificateVerify {
                    signature: get_array(&mut body),
                }
            }
            20 => {
                need(&body, 32)?;
                HandshakeMessage::Finished {
                    verify_data: get_array(&mut body),
                }
            }
            other => {
                return Err(PinTrustError::Decode(format!(
                    "unknown handshake message type {other}"
                )))
            }
        };

        if body.has_remaining() {
            return Err(PinTrustError::Decode(format!(
                "{} trailing bytes in {}",
                body.remaining(),
                msg.name()
            )));
        }
        Ok(msg)
    }
}

fn need(body: &&[u8], n: usize) -> Result<()> {
    if body.remaining() < n {
        return Err(PinTrustError::Decode("truncated message body".into()));
    }
    Ok(())
}

fn get_array<const N: usize>(body: &mut &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    body.copy_to_slice(&mut out);
    out
}

fn put_u16_list(buf: &mut Vec<u8>, items: &[u16]) {
    buf.put_u16(items.len() as u16);
    for item in items {
        buf.put_u16(*item);
    }
}

fn get_u16_list(body: &mut &[u8]) -> Result<Vec<u16>> {
    need(body, 2)?;
    let count = body.get_u16() as usize;
    need(body, count * 2)?;
    Ok((0..count).map(|_| body.get_u16()).collect())
}
