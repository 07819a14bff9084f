//! Handshake message encoding, decoding and reassembly.
//!
//! Handshake messages are framed as `type(1) || length(3) || body` and
//! may be split across records or coalesced within one. The
//! [`HandshakeBuffer`] keeps the pending bytes and emits whole messages
//! as they complete.

use crate::codec::{put_u16, put_u24, put_u32, put_vec, Reader};
use crate::extensions::{parse_extensions_raw, Extension};
use crate::suite::{CipherSuite, SignatureScheme};
use crate::{Error, Result};

/// Handshake message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    EndOfEarlyData = 5,
    EncryptedExtensions = 8,
    Certificate = 11,
    CertificateRequest = 13,
    CertificateVerify = 15,
    Finished = 20,
    KeyUpdate = 24,
    MessageHash = 254,
}

impl HandshakeType {
    /// Parse from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(HandshakeType::ClientHello),
            2 => Some(HandshakeType::ServerHello),
            4 => Some(HandshakeType::NewSessionTicket),
            5 => Some(HandshakeType::EndOfEarlyData),
            8 => Some(HandshakeType::EncryptedExtensions),
            11 => Some(HandshakeType::Certificate),
            13 => Some(HandshakeType::CertificateRequest),
            15 => Some(HandshakeType::CertificateVerify),
            20 => Some(HandshakeType::Finished),
            24 => Some(HandshakeType::KeyUpdate),
            254 => Some(HandshakeType::MessageHash),
            _ => None,
        }
    }
}

/// Frame a handshake body with its 4-byte header.
pub fn wire(typ: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.push(typ as u8);
    put_u24(&mut out, body.len());
    out.extend_from_slice(body);
    out
}

/// Reassembles handshake messages from record fragments.
#[derive(Debug, Default)]
pub struct HandshakeBuffer {
    buffer: Vec<u8>,
}

impl HandshakeBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append one record's worth of handshake bytes.
    pub fn append(&mut self, fragment: &[u8]) {
        self.buffer.extend_from_slice(fragment);
    }

    /// Whether a partial message is pending.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Emit the next whole message, header included.
    pub fn next_message(&mut self) -> Result<Option<(HandshakeType, Vec<u8>)>> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }

        let typ =
            HandshakeType::from_byte(self.buffer[0]).ok_or(Error::Decode("handshake type"))?;
        let length = ((self.buffer[1] as usize) << 16)
            | ((self.buffer[2] as usize) << 8)
            | (self.buffer[3] as usize);

        if self.buffer.len() < 4 + length {
            return Ok(None);
        }

        let message: Vec<u8> = self.buffer.drain(..4 + length).collect();
        Ok(Some((typ, message)))
    }
}

/// A decoded handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    EncryptedExtensions(EncryptedExtensions),
    CertificateRequest(CertificateRequest),
    Certificate(CertificateMsg),
    CertificateVerify(CertificateVerify),
    Finished(Finished),
    NewSessionTicket(NewSessionTicket),
    KeyUpdate(KeyUpdate),
    EndOfEarlyData,
}

impl HandshakeMessage {
    /// Decode a message body for `typ`.
    pub fn decode(typ: HandshakeType, body: &[u8]) -> Result<Self> {
        match typ {
            HandshakeType::ClientHello => Ok(Self::ClientHello(ClientHello::from_body(body)?)),
            HandshakeType::ServerHello => Ok(Self::ServerHello(ServerHello::from_body(body)?)),
            HandshakeType::EncryptedExtensions => Ok(Self::EncryptedExtensions(
                EncryptedExtensions::from_body(body)?,
            )),
            HandshakeType::CertificateRequest => Ok(Self::CertificateRequest(
                CertificateRequest::from_body(body)?,
            )),
            HandshakeType::Certificate => Ok(Self::Certificate(CertificateMsg::from_body(body)?)),
            HandshakeType::CertificateVerify => Ok(Self::CertificateVerify(
                CertificateVerify::from_body(body)?,
            )),
            HandshakeType::Finished => Ok(Self::Finished(Finished {
                verify_data: body.to_vec(),
            })),
            HandshakeType::NewSessionTicket => Ok(Self::NewSessionTicket(
                NewSessionTicket::from_body(body)?,
            )),
            HandshakeType::KeyUpdate => Ok(Self::KeyUpdate(KeyUpdate::from_body(body)?)),
            HandshakeType::EndOfEarlyData => {
                if body.is_empty() {
                    Ok(Self::EndOfEarlyData)
                } else {
                    Err(Error::Decode("end_of_early_data"))
                }
            }
            HandshakeType::MessageHash => {
                // Synthetic transcript entry; never legal on the wire.
                Err(Error::UnexpectedMessage("message_hash"))
            }
        }
    }

    /// Serialize with the 4-byte handshake header.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::ClientHello(m) => wire(HandshakeType::ClientHello, &m.body()),
            Self::ServerHello(m) => wire(HandshakeType::ServerHello, &m.body()),
            Self::EncryptedExtensions(m) => wire(HandshakeType::EncryptedExtensions, &m.body()),
            Self::CertificateRequest(m) => wire(HandshakeType::CertificateRequest, &m.body()),
            Self::Certificate(m) => wire(HandshakeType::Certificate, &m.body()),
            Self::CertificateVerify(m) => wire(HandshakeType::CertificateVerify, &m.body()),
            Self::Finished(m) => wire(HandshakeType::Finished, &m.verify_data),
            Self::NewSessionTicket(m) => wire(HandshakeType::NewSessionTicket, &m.body()),
            Self::KeyUpdate(m) => wire(HandshakeType::KeyUpdate, &[m.request as u8]),
            Self::EndOfEarlyData => wire(HandshakeType::EndOfEarlyData, &[]),
        }
    }
}

fn serialize_extensions(extensions: &[Extension]) -> Vec<u8> {
    let mut block = Vec::new();
    for ext in extensions {
        block.extend_from_slice(&ext.to_bytes());
    }
    block
}

/// ClientHello message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Random bytes.
    pub random: [u8; 32],
    /// Legacy session ID (32 random bytes in compatibility mode).
    pub session_id: Vec<u8>,
    /// Offered cipher suites.
    pub cipher_suites: Vec<CipherSuite>,
    /// Extensions.
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    /// Serialize the body (without handshake header).
    pub fn body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&[0x03, 0x03]);
        out.extend_from_slice(&self.random);
        put_vec(&mut out, 1, &self.session_id);

        let mut suites = Vec::with_capacity(self.cipher_suites.len() * 2);
        for suite in &self.cipher_suites {
            put_u16(&mut suites, suite.to_id());
        }
        put_vec(&mut out, 2, &suites);

        // legacy_compression_methods: null only.
        out.extend_from_slice(&[0x01, 0x00]);

        put_vec(&mut out, 2, &serialize_extensions(&self.extensions));
        out
    }

    /// Parse from a handshake body.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let version = r.take(2)?;
        if version != [0x03, 0x03] {
            return Err(Error::ProtocolVersion);
        }
        let mut random = [0u8; 32];
        random.copy_from_slice(r.take(32)?);
        let session_id = r.vec(1)?.to_vec();

        let mut suites = r.sub(2)?;
        let mut cipher_suites = Vec::new();
        while !suites.is_empty() {
            let id = suites.u16()?;
            if let Some(suite) = CipherSuite::from_id(id) {
                cipher_suites.push(suite);
            }
        }

        let compression = r.vec(1)?;
        if compression != [0x00] {
            return Err(Error::IllegalParameter("compression methods"));
        }

        let extensions = parse_extensions_raw(r.vec(2)?)?;
        r.expect_empty("client hello")?;

        Ok(Self {
            random,
            session_id,
            cipher_suites,
            extensions,
        })
    }
}

/// ServerHello message (also carries HelloRetryRequest).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    /// Random bytes (the HRR sentinel for a HelloRetryRequest).
    pub random: [u8; 32],
    /// Echo of the client's legacy session ID.
    pub session_id_echo: Vec<u8>,
    /// Selected cipher suite.
    pub cipher_suite: CipherSuite,
    /// Raw extensions; interpreted under the strict ServerHello policy.
    pub extensions: Vec<Extension>,
}

/// The fixed random value that marks a ServerHello as a
/// HelloRetryRequest (RFC 8446 4.1.3).
pub const HELLO_RETRY_REQUEST_RANDOM: [u8; 32] = [
    0xCF, 0x21, 0xAD, 0x74, 0xE5, 0x9A, 0x61, 0x11, 0xBE, 0x1D, 0x8C, 0x02, 0x1E, 0x65, 0xB8,
    0x91, 0xC2, 0xA2, 0x11, 0x16, 0x7A, 0xBB, 0x8C, 0x5E, 0x07, 0x9E, 0x09, 0xE2, 0xC8, 0xA8,
    0x33, 0x9C,
];

impl ServerHello {
    /// Check if this is a HelloRetryRequest.
    pub fn is_hello_retry_request(&self) -> bool {
        self.random == HELLO_RETRY_REQUEST_RANDOM
    }

    /// Serialize the body (without handshake header).
    pub fn body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&[0x03, 0x03]);
        out.extend_from_slice(&self.random);
        put_vec(&mut out, 1, &self.session_id_echo);
        put_u16(&mut out, self.cipher_suite.to_id());
        out.push(0x00); // legacy_compression_method
        put_vec(&mut out, 2, &serialize_extensions(&self.extensions));
        out
    }

    /// Parse from a handshake body.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let version = r.take(2)?;
        if version != [0x03, 0x03] {
            return Err(Error::ProtocolVersion);
        }
        let mut random = [0u8; 32];
        random.copy_from_slice(r.take(32)?);
        let session_id_echo = r.vec(1)?.to_vec();
        let suite_id = r.u16()?;
        let cipher_suite =
            CipherSuite::from_id(suite_id).ok_or(Error::HandshakeFailure("cipher suite"))?;
        if r.u8()? != 0 {
            return Err(Error::IllegalParameter("compression method"));
        }
        let extensions = parse_extensions_raw(r.vec(2)?)?;
        r.expect_empty("server hello")?;

        Ok(Self {
            random,
            session_id_echo,
            cipher_suite,
            extensions,
        })
    }
}

/// EncryptedExtensions message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedExtensions {
    /// Raw extensions; interpreted under the tolerant policy.
    pub extensions: Vec<Extension>,
}

impl EncryptedExtensions {
    fn body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_vec(&mut out, 2, &serialize_extensions(&self.extensions));
        out
    }

    fn from_body(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let extensions = parse_extensions_raw(r.vec(2)?)?;
        r.expect_empty("encrypted extensions")?;
        Ok(Self { extensions })
    }
}

/// CertificateRequest message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Certificate request context, echoed in the client Certificate.
    pub context: Vec<u8>,
    /// Raw extensions.
    pub extensions: Vec<Extension>,
}

impl CertificateRequest {
    fn body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_vec(&mut out, 1, &self.context);
        put_vec(&mut out, 2, &serialize_extensions(&self.extensions));
        out
    }

    fn from_body(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let context = r.vec(1)?.to_vec();
        let extensions = parse_extensions_raw(r.vec(2)?)?;
        r.expect_empty("certificate request")?;
        Ok(Self {
            context,
            extensions,
        })
    }

    /// Signature schemes the server asks for, when present.
    pub fn signature_schemes(&self) -> Result<Vec<SignatureScheme>> {
        for ext in &self.extensions {
            if ext.extension_type == 13 {
                let mut r = Reader::new(&ext.data);
                let mut list = r.sub(2)?;
                let mut schemes = Vec::new();
                while !list.is_empty() {
                    // Unknown schemes are skipped, not fatal.
                    if let Some(scheme) = SignatureScheme::from_u16(list.u16()?) {
                        schemes.push(scheme);
                    }
                }
                r.expect_empty("signature_algorithms")?;
                return Ok(schemes);
            }
        }
        Err(Error::MissingExtension("signature_algorithms"))
    }
}

/// One entry in a Certificate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    /// DER-encoded certificate.
    pub cert_data: Vec<u8>,
    /// Per-certificate extensions (retained opaque).
    pub extensions: Vec<Extension>,
}

/// Certificate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMsg {
    /// Certificate request context (empty for server authentication).
    pub context: Vec<u8>,
    /// Certificate chain, leaf first.
    pub entries: Vec<CertificateEntry>,
}

impl CertificateMsg {
    fn body(&self) -> Vec<u8> {
        let mut list = Vec::new();
        for entry in &self.entries {
            put_vec(&mut list, 3, &entry.cert_data);
            put_vec(&mut list, 2, &serialize_extensions(&entry.extensions));
        }
        let mut out = Vec::new();
        put_vec(&mut out, 1, &self.context);
        put_vec(&mut out, 3, &list);
        out
    }

    fn from_body(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let context = r.vec(1)?.to_vec();
        let mut list = r.sub(3)?;
        let mut entries = Vec::new();
        while !list.is_empty() {
            let cert_data = list.vec(3)?.to_vec();
            let extensions = parse_extensions_raw(list.vec(2)?)?;
            entries.push(CertificateEntry {
                cert_data,
                extensions,
            });
        }
        r.expect_empty("certificate")?;
        Ok(Self { context, entries })
    }
}

/// CertificateVerify message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    /// Signature scheme.
    pub scheme: SignatureScheme,
    /// Signature over the transcript.
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    fn body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u16(&mut out, self.scheme as u16);
        put_vec(&mut out, 2, &self.signature);
        out
    }

    fn from_body(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let scheme =
            SignatureScheme::from_u16(r.u16()?).ok_or(Error::Decode("signature scheme"))?;
        let signature = r.vec(2)?.to_vec();
        r.expect_empty("certificate verify")?;
        Ok(Self { scheme, signature })
    }
}

/// Finished message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    /// HMAC over the transcript hash.
    pub verify_data: Vec<u8>,
}

/// NewSessionTicket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket {
    /// Ticket lifetime in seconds.
    pub lifetime: u32,
    /// Obfuscation offset for the ticket age.
    pub age_add: u32,
    /// Nonce feeding the resumption PSK derivation.
    pub nonce: Vec<u8>,
    /// The opaque ticket.
    pub ticket: Vec<u8>,
    /// Raw extensions (retained opaque).
    pub extensions: Vec<Extension>,
}

impl NewSessionTicket {
    fn body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u32(&mut out, self.lifetime);
        put_u32(&mut out, self.age_add);
        put_vec(&mut out, 1, &self.nonce);
        put_vec(&mut out, 2, &self.ticket);
        put_vec(&mut out, 2, &serialize_extensions(&self.extensions));
        out
    }

    fn from_body(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let lifetime = r.u32()?;
        let age_add = r.u32()?;
        let nonce = r.vec(1)?.to_vec();
        let ticket = r.vec(2)?.to_vec();
        let extensions = parse_extensions_raw(r.vec(2)?)?;
        r.expect_empty("new session ticket")?;
        Ok(Self {
            lifetime,
            age_add,
            nonce,
            ticket,
            extensions,
        })
    }
}

/// key_update request flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyUpdateRequest {
    /// The peer need not respond.
    UpdateNotRequested = 0,
    /// The peer must send its own KeyUpdate.
    UpdateRequested = 1,
}

/// KeyUpdate message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUpdate {
    /// Whether the sender asks for a reciprocal update.
    pub request: KeyUpdateRequest,
}

impl KeyUpdate {
    fn from_body(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let request = match r.u8()? {
            0 => KeyUpdateRequest::UpdateNotRequested,
            1 => KeyUpdateRequest::UpdateRequested,
            _ => return Err(Error::Decode("key_update request")),
        };
        r.expect_empty("key update")?;
        Ok(Self { request })
    }
}
