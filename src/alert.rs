//! Alert protocol.
//!
//! Alerts are two-byte payloads carrying a level and a description.
//! After the handshake every alert travels encrypted under the current
//! writer key with inner content type `alert`.

use crate::codec::Reader;
use crate::{Error, Result};

/// Alert level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    /// Warning.
    Warning = 1,
    /// Fatal.
    Fatal = 2,
}

impl AlertLevel {
    /// Parse from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(AlertLevel::Warning),
            2 => Some(AlertLevel::Fatal),
            _ => None,
        }
    }
}

/// TLS alert description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    InappropriateFallback = 86,
    UserCanceled = 90,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    BadCertificateStatusResponse = 113,
    UnknownPskIdentity = 115,
    CertificateRequired = 116,
    NoApplicationProtocol = 120,
}

impl AlertDescription {
    /// Parse from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AlertDescription::CloseNotify),
            10 => Some(AlertDescription::UnexpectedMessage),
            20 => Some(AlertDescription::BadRecordMac),
            22 => Some(AlertDescription::RecordOverflow),
            40 => Some(AlertDescription::HandshakeFailure),
            42 => Some(AlertDescription::BadCertificate),
            43 => Some(AlertDescription::UnsupportedCertificate),
            44 => Some(AlertDescription::CertificateRevoked),
            45 => Some(AlertDescription::CertificateExpired),
            46 => Some(AlertDescription::CertificateUnknown),
            47 => Some(AlertDescription::IllegalParameter),
            48 => Some(AlertDescription::UnknownCa),
            49 => Some(AlertDescription::AccessDenied),
            50 => Some(AlertDescription::DecodeError),
            51 => Some(AlertDescription::DecryptError),
            70 => Some(AlertDescription::ProtocolVersion),
            71 => Some(AlertDescription::InsufficientSecurity),
            80 => Some(AlertDescription::InternalError),
            86 => Some(AlertDescription::InappropriateFallback),
            90 => Some(AlertDescription::UserCanceled),
            109 => Some(AlertDescription::MissingExtension),
            110 => Some(AlertDescription::UnsupportedExtension),
            112 => Some(AlertDescription::UnrecognizedName),
            113 => Some(AlertDescription::BadCertificateStatusResponse),
            115 => Some(AlertDescription::UnknownPskIdentity),
            116 => Some(AlertDescription::CertificateRequired),
            120 => Some(AlertDescription::NoApplicationProtocol),
            _ => None,
        }
    }
}

/// A decoded alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    /// Level.
    pub level: AlertLevel,
    /// Description.
    pub description: AlertDescription,
}

impl Alert {
    /// Create a warning alert.
    pub fn warning(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Warning,
            description,
        }
    }

    /// Create a fatal alert.
    pub fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    /// The close_notify alert.
    pub fn close_notify() -> Self {
        Self::warning(AlertDescription::CloseNotify)
    }

    /// Whether this alert terminates the connection.
    ///
    /// close_notify is warning-level but still ends the peer's write
    /// side; it is handled separately by the state machine.
    pub fn is_fatal(&self) -> bool {
        self.level == AlertLevel::Fatal
    }

    /// Serialize to the two-byte payload.
    pub fn to_bytes(&self) -> [u8; 2] {
        [self.level as u8, self.description as u8]
    }

    /// Parse from an alert record payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let level = AlertLevel::from_byte(r.u8()?).ok_or(Error::Decode("alert level"))?;
        let description =
            AlertDescription::from_byte(r.u8()?).ok_or(Error::Decode("alert description"))?;
        r.expect_empty("alert")?;
        Ok(Self { level, description })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_roundtrip() {
        let alert = Alert::fatal(AlertDescription::HandshakeFailure);
        let bytes = alert.to_bytes();
        assert_eq!(bytes, [2, 40]);
        assert_eq!(Alert::from_bytes(&bytes).unwrap(), alert);
    }

    #[test]
    fn test_close_notify_is_warning() {
        let alert = Alert::close_notify();
        assert_eq!(alert.to_bytes(), [1, 0]);
        assert!(!alert.is_fatal());
    }

    #[test]
    fn test_alert_rejects_garbage() {
        assert!(Alert::from_bytes(&[3, 0]).is_err());
        assert!(Alert::from_bytes(&[1]).is_err());
        assert!(Alert::from_bytes(&[1, 0, 0]).is_err());
    }
}
