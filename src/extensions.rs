//! TLS extension encoding and decoding.
//!
//! ClientHello extensions are built; server extensions are parsed under
//! two policies. ServerHello is strict (only supported_versions and
//! key_share, plus cookie inside a HelloRetryRequest); EncryptedExtensions
//! and NewSessionTicket tolerate unknown types, which are retained as
//! opaque values rather than rejected.

use crate::codec::{put_u16, put_vec, Reader};
use crate::suite::{NamedGroup, SignatureScheme};
use crate::{Error, Result};

/// TLS extension type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ExtensionType {
    ServerName = 0,
    MaxFragmentLength = 1,
    StatusRequest = 5,
    SupportedGroups = 10,
    SignatureAlgorithms = 13,
    UseSrtp = 14,
    Heartbeat = 15,
    ApplicationLayerProtocolNegotiation = 16,
    SignedCertificateTimestamp = 18,
    ClientCertificateType = 19,
    ServerCertificateType = 20,
    Padding = 21,
    PreSharedKey = 41,
    EarlyData = 42,
    SupportedVersions = 43,
    Cookie = 44,
    PskKeyExchangeModes = 45,
    CertificateAuthorities = 47,
    OidFilters = 48,
    PostHandshakeAuth = 49,
    SignatureAlgorithmsCert = 50,
    KeyShare = 51,
}

impl ExtensionType {
    /// Parse from u16.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ExtensionType::ServerName),
            1 => Some(ExtensionType::MaxFragmentLength),
            5 => Some(ExtensionType::StatusRequest),
            10 => Some(ExtensionType::SupportedGroups),
            13 => Some(ExtensionType::SignatureAlgorithms),
            14 => Some(ExtensionType::UseSrtp),
            15 => Some(ExtensionType::Heartbeat),
            16 => Some(ExtensionType::ApplicationLayerProtocolNegotiation),
            18 => Some(ExtensionType::SignedCertificateTimestamp),
            19 => Some(ExtensionType::ClientCertificateType),
            20 => Some(ExtensionType::ServerCertificateType),
            21 => Some(ExtensionType::Padding),
            41 => Some(ExtensionType::PreSharedKey),
            42 => Some(ExtensionType::EarlyData),
            43 => Some(ExtensionType::SupportedVersions),
            44 => Some(ExtensionType::Cookie),
            45 => Some(ExtensionType::PskKeyExchangeModes),
            47 => Some(ExtensionType::CertificateAuthorities),
            48 => Some(ExtensionType::OidFilters),
            49 => Some(ExtensionType::PostHandshakeAuth),
            50 => Some(ExtensionType::SignatureAlgorithmsCert),
            51 => Some(ExtensionType::KeyShare),
            _ => None,
        }
    }
}

/// A raw extension: `type(2) || length(2) || body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// Extension type.
    pub extension_type: u16,
    /// Extension body.
    pub data: Vec<u8>,
}

impl Extension {
    /// Create a new extension.
    pub fn new(extension_type: u16, data: Vec<u8>) -> Self {
        Self {
            extension_type,
            data,
        }
    }

    /// Create Server Name Indication extension.
    pub fn server_name(hostname: &str) -> Self {
        let mut entry = Vec::new();
        entry.push(0); // NameType.host_name
        put_vec(&mut entry, 2, hostname.as_bytes());

        let mut data = Vec::new();
        put_vec(&mut data, 2, &entry);
        Self::new(ExtensionType::ServerName as u16, data)
    }

    /// Create Supported Versions extension (TLS 1.3 only).
    pub fn supported_versions() -> Self {
        Self::new(ExtensionType::SupportedVersions as u16, vec![2, 0x03, 0x04])
    }

    /// Create Supported Groups extension.
    pub fn supported_groups(groups: &[NamedGroup]) -> Self {
        let mut list = Vec::new();
        for g in groups {
            put_u16(&mut list, *g as u16);
        }
        let mut data = Vec::new();
        put_vec(&mut data, 2, &list);
        Self::new(ExtensionType::SupportedGroups as u16, data)
    }

    /// Create Signature Algorithms extension.
    pub fn signature_algorithms(schemes: &[SignatureScheme]) -> Self {
        let mut list = Vec::new();
        for s in schemes {
            put_u16(&mut list, *s as u16);
        }
        let mut data = Vec::new();
        put_vec(&mut data, 2, &list);
        Self::new(ExtensionType::SignatureAlgorithms as u16, data)
    }

    /// Create Key Share extension with a single entry.
    pub fn key_share(entry: &KeyShareEntry) -> Self {
        let entry_bytes = entry.to_bytes();
        let mut data = Vec::new();
        put_vec(&mut data, 2, &entry_bytes);
        Self::new(ExtensionType::KeyShare as u16, data)
    }

    /// Create ALPN extension.
    pub fn alpn(protocols: &[Vec<u8>]) -> Self {
        let mut list = Vec::new();
        for proto in protocols {
            put_vec(&mut list, 1, proto);
        }
        let mut data = Vec::new();
        put_vec(&mut data, 2, &list);
        Self::new(
            ExtensionType::ApplicationLayerProtocolNegotiation as u16,
            data,
        )
    }

    /// Create Cookie extension echoing a HelloRetryRequest cookie.
    pub fn cookie(cookie: &[u8]) -> Self {
        let mut data = Vec::new();
        put_vec(&mut data, 2, cookie);
        Self::new(ExtensionType::Cookie as u16, data)
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.data.len());
        put_u16(&mut data, self.extension_type);
        put_vec(&mut data, 2, &self.data);
        data
    }
}

/// Parse a whole extensions block into raw extensions.
pub fn parse_extensions_raw(data: &[u8]) -> Result<Vec<Extension>> {
    let mut extensions = Vec::new();
    let mut r = Reader::new(data);
    while !r.is_empty() {
        let extension_type = r.u16()?;
        let body = r.vec(2)?;
        extensions.push(Extension::new(extension_type, body.to_vec()));
    }
    Ok(extensions)
}

/// Key share entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry {
    /// Named group.
    pub group: NamedGroup,
    /// Key exchange data.
    pub key_exchange: Vec<u8>,
}

impl KeyShareEntry {
    /// Create a new key share entry.
    pub fn new(group: NamedGroup, key_exchange: Vec<u8>) -> Self {
        Self {
            group,
            key_exchange,
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.key_exchange.len());
        put_u16(&mut data, self.group as u16);
        put_vec(&mut data, 2, &self.key_exchange);
        data
    }

    /// Parse from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let group = NamedGroup::from_u16(r.u16()?).ok_or(Error::Decode("named group"))?;
        let key_exchange = r.vec(2)?.to_vec();
        r.expect_empty("key share entry")?;
        Ok(Self {
            group,
            key_exchange,
        })
    }
}

/// A decoded server-side extension.
///
/// Unknown types inside tolerant contexts are preserved rather than
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerExtension {
    /// Selected protocol version (ServerHello).
    SupportedVersions(u16),
    /// Server key share (ServerHello).
    KeyShare(KeyShareEntry),
    /// Group to retry with (HelloRetryRequest key_share form).
    RetryGroup(NamedGroup),
    /// Cookie to echo (HelloRetryRequest).
    Cookie(Vec<u8>),
    /// Selected ALPN protocol (EncryptedExtensions).
    Alpn(Vec<u8>),
    /// server_name acknowledgement (EncryptedExtensions).
    ServerNameAck,
    /// Retained unknown extension.
    Unknown(u16, Vec<u8>),
}

/// Interpret ServerHello extensions under the strict policy.
///
/// Only supported_versions and key_share are allowed, plus cookie when
/// the hello is a HelloRetryRequest; key_share uses the group-only form
/// in a HelloRetryRequest.
pub fn interpret_server_hello_extensions(
    extensions: &[Extension],
    hrr: bool,
) -> Result<Vec<ServerExtension>> {
    let mut out = Vec::new();
    for ext in extensions {
        let body = ext.data.as_slice();
        match ExtensionType::from_u16(ext.extension_type) {
            Some(ExtensionType::SupportedVersions) => {
                let mut b = Reader::new(body);
                let version = b.u16()?;
                b.expect_empty("supported_versions")?;
                out.push(ServerExtension::SupportedVersions(version));
            }
            Some(ExtensionType::KeyShare) if hrr => {
                let mut b = Reader::new(body);
                let group = NamedGroup::from_u16(b.u16()?).ok_or(Error::Decode("retry group"))?;
                b.expect_empty("key_share")?;
                out.push(ServerExtension::RetryGroup(group));
            }
            Some(ExtensionType::KeyShare) => {
                out.push(ServerExtension::KeyShare(KeyShareEntry::from_bytes(body)?));
            }
            Some(ExtensionType::Cookie) if hrr => {
                let mut b = Reader::new(body);
                let cookie = b.vec(2)?.to_vec();
                b.expect_empty("cookie")?;
                out.push(ServerExtension::Cookie(cookie));
            }
            _ => return Err(Error::IllegalParameter("extension not allowed in ServerHello")),
        }
    }
    Ok(out)
}

/// Interpret EncryptedExtensions under the tolerant policy.
///
/// Known types are decoded, unknown types retained; extensions that may
/// only appear in ServerHello are still rejected.
pub fn interpret_encrypted_extensions(extensions: &[Extension]) -> Result<Vec<ServerExtension>> {
    let mut out = Vec::new();
    for ext in extensions {
        let body = ext.data.as_slice();
        match ExtensionType::from_u16(ext.extension_type) {
            Some(ExtensionType::SupportedVersions)
            | Some(ExtensionType::KeyShare)
            | Some(ExtensionType::Cookie)
            | Some(ExtensionType::PreSharedKey) => {
                return Err(Error::IllegalParameter(
                    "extension not allowed in EncryptedExtensions",
                ));
            }
            Some(ExtensionType::ApplicationLayerProtocolNegotiation) => {
                let mut b = Reader::new(body);
                let mut list = b.sub(2)?;
                let proto = list.vec(1)?.to_vec();
                list.expect_empty("alpn protocol list")?;
                b.expect_empty("alpn")?;
                out.push(ServerExtension::Alpn(proto));
            }
            Some(ExtensionType::ServerName) => {
                // Acknowledgement form: empty body.
                if !body.is_empty() {
                    return Err(Error::Decode("server_name ack"));
                }
                out.push(ServerExtension::ServerNameAck);
            }
            _ => out.push(ServerExtension::Unknown(ext.extension_type, body.to_vec())),
        }
    }
    Ok(out)
}
