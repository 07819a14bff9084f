//! TLS record layer protocol.
//!
//! This module frames outgoing data into `TLSPlaintext` /
//! `TLSCiphertext` records, applies AEAD protection with per-direction
//! sequence numbers, and reassembles incoming records from a byte
//! stream.

use std::sync::Arc;

use log::trace;

use crate::key_schedule::TrafficKeys;
use crate::provider::CryptoProvider;
use crate::suite::AeadAlgorithm;
use crate::{Error, Result};

/// Maximum plaintext fragment size (2^14).
pub const MAX_FRAGMENT_SIZE: usize = 16384;

/// Maximum ciphertext body size (2^14 + 256).
pub const MAX_CIPHERTEXT_SIZE: usize = MAX_FRAGMENT_SIZE + 256;

/// Content type for TLS records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    /// Change cipher spec (compatibility only).
    ChangeCipherSpec = 20,
    /// Alert.
    Alert = 21,
    /// Handshake.
    Handshake = 22,
    /// Application data.
    ApplicationData = 23,
}

impl ContentType {
    /// Parse from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            _ => None,
        }
    }
}

/// One framed record read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Outer content type.
    pub content_type: ContentType,
    /// Legacy record version bytes.
    pub version: [u8; 2],
    /// Record body.
    pub fragment: Vec<u8>,
}

/// Accumulates raw transport bytes until whole records are available.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    buffer: Vec<u8>,
}

impl RecordBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append transport bytes.
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract the next complete record.
    ///
    /// Validates the header: a strict content type, legacy version
    /// 0x0303 and a body no longer than 2^14 + 256.
    pub fn try_read_record(&mut self) -> Result<Option<Record>> {
        if self.buffer.len() < 5 {
            return Ok(None);
        }

        let content_type =
            ContentType::from_byte(self.buffer[0]).ok_or(Error::Decode("content type"))?;
        let version = [self.buffer[1], self.buffer[2]];
        if version != [0x03, 0x03] {
            return Err(Error::ProtocolVersion);
        }

        let length = u16::from_be_bytes([self.buffer[3], self.buffer[4]]) as usize;
        if length > MAX_CIPHERTEXT_SIZE {
            return Err(Error::RecordOverflow);
        }

        if self.buffer.len() < 5 + length {
            return Ok(None);
        }

        let fragment = self.buffer[5..5 + length].to_vec();
        self.buffer.drain(..5 + length);

        Ok(Some(Record {
            content_type,
            version,
            fragment,
        }))
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// AEAD state for one direction.
struct Direction {
    protection: Option<Protection>,
}

struct Protection {
    aead: AeadAlgorithm,
    keys: TrafficKeys,
    tag_len: usize,
}

impl Protection {
    /// nonce = iv XOR big_endian_pad(seq, iv_len).
    fn nonce(&self) -> Vec<u8> {
        let mut nonce = self.keys.iv.clone();
        let seq_bytes = self.keys.seq.to_be_bytes();
        let start = nonce.len() - 8;
        for i in 0..8 {
            nonce[start + i] ^= seq_bytes[i];
        }
        nonce
    }
}

/// Record protection and framing for both directions of a connection.
pub struct RecordLayer {
    provider: Arc<dyn CryptoProvider>,
    read: Direction,
    write: Direction,
}

impl RecordLayer {
    /// Create an unprotected record layer.
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self {
            provider,
            read: Direction { protection: None },
            write: Direction { protection: None },
        }
    }

    /// Install reader keys; the next incoming record uses seq 0.
    pub fn install_read(&mut self, aead: AeadAlgorithm, tag_len: usize, keys: TrafficKeys) {
        debug_assert_eq!(keys.seq, 0);
        trace!("record layer: reader re-keyed");
        self.read.protection = Some(Protection {
            aead,
            keys,
            tag_len,
        });
    }

    /// Install writer keys; the next outgoing record uses seq 0.
    pub fn install_write(&mut self, aead: AeadAlgorithm, tag_len: usize, keys: TrafficKeys) {
        debug_assert_eq!(keys.seq, 0);
        trace!("record layer: writer re-keyed");
        self.write.protection = Some(Protection {
            aead,
            keys,
            tag_len,
        });
    }

    /// Whether incoming application_data records are decrypted.
    pub fn is_read_protected(&self) -> bool {
        self.read.protection.is_some()
    }

    /// Whether outgoing records are encrypted.
    pub fn is_write_protected(&self) -> bool {
        self.write.protection.is_some()
    }

    /// Current writer sequence number.
    pub fn write_seq(&self) -> u64 {
        self.write.protection.as_ref().map_or(0, |p| p.keys.seq)
    }

    /// Frame (and encrypt, once writer keys are installed) `payload`
    /// into one or more records, returning the wire bytes.
    pub fn seal(&mut self, content_type: ContentType, payload: &[u8]) -> Result<Vec<u8>> {
        if self.write.protection.is_some() {
            self.seal_protected(content_type, payload)
        } else {
            Ok(seal_plaintext(content_type, payload))
        }
    }

    fn seal_protected(&mut self, content_type: ContentType, payload: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(payload.len() + 64);
        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&[][..]]
        } else {
            payload.chunks(MAX_FRAGMENT_SIZE).collect()
        };

        for chunk in chunks {
            // Inner plaintext: content || type || 0..=10 zero bytes,
            // capped so the whole inner plaintext stays within
            // 2^14 + 1.
            let mut rand_byte = [0u8; 1];
            self.provider.fill_random(&mut rand_byte)?;
            let padding = ((rand_byte[0] % 11) as usize).min(MAX_FRAGMENT_SIZE - chunk.len());

            let mut inner = Vec::with_capacity(chunk.len() + 1 + padding);
            inner.extend_from_slice(chunk);
            inner.push(content_type as u8);
            inner.extend(std::iter::repeat(0u8).take(padding));

            let protection = self
                .write
                .protection
                .as_mut()
                .ok_or(Error::Internal("writer keys missing"))?;

            let body_len = inner.len() + protection.tag_len;
            let header = [
                ContentType::ApplicationData as u8,
                0x03,
                0x03,
                (body_len >> 8) as u8,
                body_len as u8,
            ];

            let nonce = protection.nonce();
            let sealed = self.provider.aead_seal(
                protection.aead,
                &protection.keys.key,
                &nonce,
                &header,
                &inner,
            )?;
            protection.keys.seq += 1;

            out.extend_from_slice(&header);
            out.extend_from_slice(&sealed);
        }
        Ok(out)
    }

    /// Recover the true content type and payload of an incoming record.
    ///
    /// Encrypted records (outer type application_data while reader keys
    /// are installed) are opened; everything else passes through for
    /// the state machine to judge.
    pub fn open(&mut self, record: Record) -> Result<(ContentType, Vec<u8>)> {
        let protection = match (&mut self.read.protection, record.content_type) {
            (Some(p), ContentType::ApplicationData) => p,
            _ => return Ok((record.content_type, record.fragment)),
        };

        let body_len = record.fragment.len();
        let header = [
            ContentType::ApplicationData as u8,
            record.version[0],
            record.version[1],
            (body_len >> 8) as u8,
            body_len as u8,
        ];

        let nonce = protection.nonce();
        let mut inner = self.provider.aead_open(
            protection.aead,
            &protection.keys.key,
            &nonce,
            &header,
            &record.fragment,
        )?;
        protection.keys.seq += 1;

        // Strip zero padding; the last non-zero byte is the true type.
        let content_end = match inner.iter().rposition(|&b| b != 0) {
            Some(pos) => pos,
            None => return Err(Error::UnexpectedMessage("empty inner plaintext")),
        };
        let content_type = ContentType::from_byte(inner[content_end])
            .ok_or(Error::Decode("inner content type"))?;
        inner.truncate(content_end);

        Ok((content_type, inner))
    }
}

/// Frame unprotected records, fragmenting at 2^14.
///
/// The first handshake record carries legacy version 0x0301, every
/// later fragment 0x0303.
fn seal_plaintext(content_type: ContentType, payload: &[u8]) -> Vec<u8> {
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&[][..]]
    } else {
        payload.chunks(MAX_FRAGMENT_SIZE).collect()
    };

    let mut out = Vec::with_capacity(payload.len() + 5 * chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        out.push(content_type as u8);
        if i == 0 && content_type == ContentType::Handshake {
            out.extend_from_slice(&[0x03, 0x01]);
        } else {
            out.extend_from_slice(&[0x03, 0x03]);
        }
        out.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
        out.extend_from_slice(chunk);
    }
    out
}
