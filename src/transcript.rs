//! Handshake transcript hash.
//!
//! The transcript is the running hash of every handshake message's wire
//! encoding (4-byte header included), excluding record framing. The
//! hash algorithm is only known once the server picks a cipher suite,
//! so the transcript buffers raw bytes until then and feeds them into
//! an incremental hash at negotiation time.

use crate::handshake::HandshakeType;
use crate::provider::{CryptoProvider, HashContext};
use crate::suite::HashAlgorithm;

enum State {
    /// Cipher suite not yet known; raw message bytes accumulate.
    Buffering(Vec<u8>),
    /// Hash negotiated; messages stream into the context.
    Hashing(Box<dyn HashContext>),
}

/// Running transcript of all handshake messages.
pub struct Transcript {
    state: State,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self {
            state: State::Buffering(Vec::new()),
        }
    }

    /// Append one handshake message (full wire encoding).
    pub fn add(&mut self, message: &[u8]) {
        match &mut self.state {
            State::Buffering(buf) => buf.extend_from_slice(message),
            State::Hashing(ctx) => ctx.update(message),
        }
    }

    /// Switch to incremental hashing, replaying anything buffered.
    ///
    /// Must be called exactly once, when the ServerHello fixes the
    /// suite hash.
    pub fn start_hashing(&mut self, provider: &dyn CryptoProvider, alg: HashAlgorithm) {
        let buffered = match &mut self.state {
            State::Buffering(buf) => core::mem::take(buf),
            State::Hashing(_) => return,
        };
        let mut ctx = provider.hash_context(alg);
        ctx.update(&buffered);
        self.state = State::Hashing(ctx);
    }

    /// Replace the transcript with the HelloRetryRequest synthetic form.
    ///
    /// RFC 8446 4.4.1: when a HelloRetryRequest arrives, the first
    /// ClientHello is collapsed into a `message_hash` entry
    /// `254 || 0 0 hash_len || Hash(ClientHello1)` before the
    /// HelloRetryRequest itself is appended.
    pub fn rewrite_with_message_hash(
        &mut self,
        provider: &dyn CryptoProvider,
        alg: HashAlgorithm,
    ) {
        let first_hello = match &mut self.state {
            State::Buffering(buf) => core::mem::take(buf),
            // The transcript only buffers before the first ServerHello,
            // and an HRR is only legal as the first ServerHello.
            State::Hashing(_) => return,
        };
        let digest = provider.hash(alg, &first_hello);

        let mut ctx = provider.hash_context(alg);
        let mut synthetic = Vec::with_capacity(4 + digest.len());
        synthetic.push(HandshakeType::MessageHash as u8);
        synthetic.extend_from_slice(&[0, 0, digest.len() as u8]);
        synthetic.extend_from_slice(&digest);
        ctx.update(&synthetic);
        self.state = State::Hashing(ctx);
    }

    /// Snapshot of the hash over everything appended so far.
    ///
    /// Only valid after `start_hashing` / `rewrite_with_message_hash`.
    pub fn current_hash(&self) -> Vec<u8> {
        match &self.state {
            State::Buffering(_) => Vec::new(),
            State::Hashing(ctx) => ctx.finish(),
        }
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RustCryptoProvider;

    #[test]
    fn test_incremental_equals_one_shot() {
        let p = RustCryptoProvider::new();
        let msg_a = [1u8, 0, 0, 2, 0xAA, 0xBB];
        let msg_b = [2u8, 0, 0, 1, 0xCC];

        let mut t = Transcript::new();
        t.add(&msg_a);
        t.start_hashing(&p, HashAlgorithm::Sha256);
        t.add(&msg_b);

        let mut concat = Vec::new();
        concat.extend_from_slice(&msg_a);
        concat.extend_from_slice(&msg_b);
        assert_eq!(t.current_hash(), p.hash(HashAlgorithm::Sha256, &concat));
    }

    #[test]
    fn test_snapshot_does_not_consume() {
        let p = RustCryptoProvider::new();
        let mut t = Transcript::new();
        t.start_hashing(&p, HashAlgorithm::Sha256);
        t.add(&[1, 2, 3]);
        let before = t.current_hash();
        assert_eq!(before, t.current_hash());
        t.add(&[4]);
        assert_ne!(before, t.current_hash());
    }

    #[test]
    fn test_message_hash_rewrite() {
        let p = RustCryptoProvider::new();
        let client_hello = [1u8, 0, 0, 3, 9, 9, 9];

        let mut t = Transcript::new();
        t.add(&client_hello);
        t.rewrite_with_message_hash(&p, HashAlgorithm::Sha256);

        let digest = p.hash(HashAlgorithm::Sha256, &client_hello);
        let mut expected = vec![254u8, 0, 0, 32];
        expected.extend_from_slice(&digest);
        assert_eq!(t.current_hash(), p.hash(HashAlgorithm::Sha256, &expected));
    }
}
