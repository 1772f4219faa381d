// Sans-I/O handshake: roles, protocol versions, messages, alerts and the per-role state machine.
//
//   Client                                   Server
//     |--- ClientHello ------------------------>|
//     |<-- ServerHello, Certificate,            |
//     |    CertificateVerify, Finished ---------|
//     |--- [Certificate, CertificateVerify],    |
//     |    Finished --------------------------->|

pub mod alert;
pub mod messages;
pub mod protocol;
pub mod state;

use serde::{Deserialize, Serialize};

use crate::error::{PinTrustError, Result};

pub use alert::{AlertDescription, HandshakeErrorKind};
pub use messages::HandshakeMessage;
pub use protocol::{CertificateVerifier, Handshake, HandshakeConfig};
pub use state::HandshakeState;

/// Which side of the handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

/// Protocol version ceiling. Ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "1.0")]
    Tls10,
    #[serde(rename = "1.1")]
    Tls11,
    #[serde(rename = "1.2")]
    Tls12,
}

impl ProtocolVersion {
    /// DTLS 1.0 is the datagram counterpart of TLS 1.1.
    pub const DTLS10: ProtocolVersion = ProtocolVersion::Tls11;
    /// DTLS 1.2 is the datagram counterpart of TLS 1.2.
    pub const DTLS12: ProtocolVersion = ProtocolVersion::Tls12;

    pub fn wire(self) -> u16 {
        match self {
            ProtocolVersion::Tls10 => 0x0301,
            ProtocolVersion::Tls11 => 0x0302,
            ProtocolVersion::Tls12 => 0x0303,
        }
    }

    pub fn from_wire(version: u16) -> Result<Self> {
        match version {
            0x0301 => Ok(ProtocolVersion::Tls10),
            0x0302 => Ok(ProtocolVersion::Tls11),
            0x0303 => Ok(ProtocolVersion::Tls12),
            other => Err(PinTrustError::ProtocolVersion(other)),
        }
    }

    /// Server-side choice: the lower of the client's offer and the local ceiling.
    ///
    /// Offers newer than any known version are treated as the newest known one;
    /// offers older than 1.0 are refused.
    pub fn negotiate(offered: u16, local_max: ProtocolVersion) -> Result<Self> {
        if offered < ProtocolVersion::Tls10.wire() {
            return Err(PinTrustError::ProtocolVersion(offered));
        }
        let offered = Self::from_wire(offered).unwrap_or(ProtocolVersion::Tls12);
        Ok(offered.min(local_max))
    }
}
