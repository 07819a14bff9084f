//! TLS 1.3 client engine
//!
//! This crate implements the client side of a TLS 1.3 (RFC 8446)
//! connection as a sans-I/O state machine: the host owns the transport
//! and feeds raw bytes in, the engine hands records and events back.
//!
//! # Architecture
//!
//! The engine is organized into:
//!
//! - `codec`: length-prefixed wire encoding primitives
//! - `provider`: pluggable cryptographic primitives (AEAD, HKDF, X25519)
//! - `suite`: cipher suite descriptors and negotiation tables
//! - `transcript`: running handshake transcript hash
//! - `key_schedule`: the HKDF-based TLS 1.3 key schedule
//! - `record`: record-layer framing and AEAD protection
//! - `handshake`: handshake message encoding and reassembly
//! - `extensions`: ClientHello/ServerHello extension handling
//! - `alert`: alert encoding and classification
//! - `client`: the client handshake state machine
//! - `config`: client configuration

pub mod alert;
pub mod client;
pub mod codec;
pub mod config;
pub mod extensions;
pub mod handshake;
pub mod key_schedule;
pub mod provider;
pub mod record;
pub mod suite;
pub mod transcript;

use core::fmt;

use alert::AlertDescription;

pub use client::{Connection, Event, HandshakeState, SessionTicket};
pub use config::{
    AcceptAnyServerCert, ClientConfig, ClientConfigBuilder, ServerCertVerifier, VerifyError,
};
pub use provider::{CryptoProvider, RustCryptoProvider};
pub use suite::{CipherSuite, NamedGroup, SignatureScheme};

/// TLS engine error types.
///
/// Every variant maps to the RFC 8446 alert the engine queues before
/// closing; see [`Error::alert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed length, truncation, or trailing bytes.
    Decode(&'static str),
    /// Wrong message for the current state.
    UnexpectedMessage(&'static str),
    /// Record version or supported_versions mismatch.
    ProtocolVersion,
    /// Unacceptable parameter value from the peer.
    IllegalParameter(&'static str),
    /// No acceptable cipher suite or group.
    HandshakeFailure(&'static str),
    /// AEAD open failure.
    BadRecordMac,
    /// Record longer than the protocol allows.
    RecordOverflow,
    /// Certificate rejected by the verify callback.
    BadCertificate(&'static str),
    /// The verify callback could not build a chain to a trusted root.
    UnknownCa,
    /// Finished mismatch or CertificateVerify signature invalid.
    DecryptError,
    /// Required extension absent.
    MissingExtension(&'static str),
    /// Host-initiated shutdown mid-handshake.
    UserCanceled,
    /// Crypto provider failure.
    Internal(&'static str),
    /// The peer sent a fatal alert.
    PeerAlert(AlertDescription),
    /// The connection is closed; no further operations are possible.
    Closed,
}

impl Error {
    /// The alert queued for the peer when this error is raised locally.
    pub fn alert(&self) -> AlertDescription {
        match self {
            Error::Decode(_) => AlertDescription::DecodeError,
            Error::UnexpectedMessage(_) => AlertDescription::UnexpectedMessage,
            Error::ProtocolVersion => AlertDescription::ProtocolVersion,
            Error::IllegalParameter(_) => AlertDescription::IllegalParameter,
            Error::HandshakeFailure(_) => AlertDescription::HandshakeFailure,
            Error::BadRecordMac => AlertDescription::BadRecordMac,
            Error::RecordOverflow => AlertDescription::RecordOverflow,
            Error::BadCertificate(_) => AlertDescription::BadCertificate,
            Error::UnknownCa => AlertDescription::UnknownCa,
            Error::DecryptError => AlertDescription::DecryptError,
            Error::MissingExtension(_) => AlertDescription::MissingExtension,
            Error::UserCanceled => AlertDescription::UserCanceled,
            Error::Internal(_) => AlertDescription::InternalError,
            Error::PeerAlert(_) => AlertDescription::CloseNotify,
            Error::Closed => AlertDescription::CloseNotify,
        }
    }

    /// Whether the error closes the connection.
    ///
    /// Only `UserCanceled` is a warning; everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::UserCanceled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Decode(what) => write!(f, "decode error: {}", what),
            Error::UnexpectedMessage(what) => write!(f, "unexpected message: {}", what),
            Error::ProtocolVersion => write!(f, "protocol version mismatch"),
            Error::IllegalParameter(what) => write!(f, "illegal parameter: {}", what),
            Error::HandshakeFailure(what) => write!(f, "handshake failure: {}", what),
            Error::BadRecordMac => write!(f, "bad record MAC"),
            Error::RecordOverflow => write!(f, "record overflow"),
            Error::BadCertificate(what) => write!(f, "bad certificate: {}", what),
            Error::UnknownCa => write!(f, "unknown CA"),
            Error::DecryptError => write!(f, "decrypt error"),
            Error::MissingExtension(what) => write!(f, "missing extension: {}", what),
            Error::UserCanceled => write!(f, "user canceled"),
            Error::Internal(what) => write!(f, "internal error: {}", what),
            Error::PeerAlert(desc) => write!(f, "fatal alert received: {:?}", desc),
            Error::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_alert_codes() {
        assert_eq!(Error::DecryptError.alert() as u8, 51);
        assert_eq!(Error::BadRecordMac.alert() as u8, 20);
        assert_eq!(Error::ProtocolVersion.alert() as u8, 70);
        assert_eq!(Error::Decode("x").alert() as u8, 50);
    }

    #[test]
    fn test_user_canceled_is_warning() {
        assert!(!Error::UserCanceled.is_fatal());
        assert!(Error::BadRecordMac.is_fatal());
    }
}
