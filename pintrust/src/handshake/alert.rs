// Alert descriptions (RFC 5246 §7.2 numbering) and the failure categories reported to consumers.

use serde::{Deserialize, Serialize};

/// Alert description carried in an alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    HandshakeFailure = 40,
    BadCertificate = 42,
    IllegalParameter = 47,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    CertificateRequired = 116,
}

impl AlertDescription {
    pub fn from_u8(value: u8) -> Option<Self> {
        use AlertDescription::*;
        Some(match value {
            0 => CloseNotify,
            10 => UnexpectedMessage,
            20 => BadRecordMac,
            40 => HandshakeFailure,
            42 => BadCertificate,
            47 => IllegalParameter,
            50 => DecodeError,
            51 => DecryptError,
            70 => ProtocolVersion,
            71 => InsufficientSecurity,
            80 => InternalError,
            116 => CertificateRequired,
            _ => return None,
        })
    }

    /// Everything except close_notify terminates the connection with an error.
    pub fn is_fatal(self) -> bool {
        self != AlertDescription::CloseNotify
    }
}

/// Category of a fatal handshake failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeErrorKind {
    Unknown,
    IncompatibleCipherSuite,
    IncompatibleProtocolVersion,
    VerificationFailed,
}

impl HandshakeErrorKind {
    /// Classify a sent or received alert.
    pub fn from_alert(alert: AlertDescription) -> Self {
        match alert {
            AlertDescription::InsufficientSecurity => HandshakeErrorKind::IncompatibleCipherSuite,
            AlertDescription::ProtocolVersion => HandshakeErrorKind::IncompatibleProtocolVersion,
            AlertDescription::BadCertificate | AlertDescription::CertificateRequired => {
                HandshakeErrorKind::VerificationFailed
            }
            _ => HandshakeErrorKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_codes_roundtrip() {
        for code in 0u8..=255 {
            if let Some(alert) = AlertDescription::from_u8(code) {
                assert_eq!(alert as u8, code);
            }
        }
        assert_eq!(AlertDescription::from_u8(116), Some(AlertDescription::CertificateRequired));
        assert_eq!(AlertDescription::from_u8(1), None);
    }

    #[test]
    fn categories() {
        assert_eq!(
            HandshakeErrorKind::from_alert(AlertDescription::InsufficientSecurity),
            HandshakeErrorKind::IncompatibleCipherSuite
        );
        assert_eq!(
            HandshakeErrorKind::from_alert(AlertDescription::CertificateRequired),
            HandshakeErrorKind::VerificationFailed
        );
        assert_eq!(
            HandshakeErrorKind::from_alert(AlertDescription::DecodeError),
            HandshakeErrorKind::Unknown
        );
        assert!(!AlertDescription::CloseNotify.is_fatal());
    }
}
