//! Cryptographic provider interface.
//!
//! The engine never touches primitive crypto directly: AEAD sealing,
//! HKDF, hashing and X25519 all go through [`CryptoProvider`]. The
//! default [`RustCryptoProvider`] wires the trait to the RustCrypto
//! crates; a test build can substitute a deterministic provider.

use aes::Aes128;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use ccm::consts::{U12, U16, U8};
use ccm::Ccm;
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha384};

use crate::suite::{AeadAlgorithm, HashAlgorithm};
use crate::{Error, Result};

type Aes128CcmFull = Ccm<Aes128, U16, U12>;
type Aes128CcmShort = Ccm<Aes128, U8, U12>;

/// An incremental hash with a cheap snapshot.
///
/// `finish` must not consume the state: Finished and CertificateVerify
/// need the transcript hash up to but not including their own message.
pub trait HashContext: Send {
    /// Absorb bytes.
    fn update(&mut self, data: &[u8]);
    /// Digest of everything absorbed so far.
    fn finish(&self) -> Vec<u8>;
    /// Independent copy of the running state.
    fn fork(&self) -> Box<dyn HashContext>;
}

/// Primitive crypto operations required by the engine.
///
/// A provider instance shared between connections must be thread-safe;
/// the `Send + Sync` bound enforces that. Individual connections are
/// not safe for concurrent use regardless.
pub trait CryptoProvider: Send + Sync {
    /// One-shot digest.
    fn hash(&self, alg: HashAlgorithm, data: &[u8]) -> Vec<u8>;

    /// Incremental digest for the handshake transcript.
    fn hash_context(&self, alg: HashAlgorithm) -> Box<dyn HashContext>;

    /// HMAC with the suite hash.
    fn hmac(&self, alg: HashAlgorithm, key: &[u8], data: &[u8]) -> Vec<u8>;

    /// HKDF-Extract (RFC 5869).
    fn hkdf_extract(&self, alg: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Vec<u8>;

    /// HKDF-Expand (RFC 5869).
    fn hkdf_expand(
        &self,
        alg: HashAlgorithm,
        prk: &[u8],
        info: &[u8],
        out_len: usize,
    ) -> Result<Vec<u8>>;

    /// AEAD seal; returns ciphertext followed by the tag.
    fn aead_seal(
        &self,
        alg: AeadAlgorithm,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>>;

    /// AEAD open; fails with `BadRecordMac` on any authentication error.
    fn aead_open(
        &self,
        alg: AeadAlgorithm,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>>;

    /// X25519 scalar multiplication of `private` with `peer_public`.
    fn x25519(&self, private: &[u8; 32], peer_public: &[u8; 32]) -> [u8; 32];

    /// X25519 public key for `private`.
    fn x25519_public(&self, private: &[u8; 32]) -> [u8; 32];

    /// Fill `buf` with cryptographically secure random bytes.
    fn fill_random(&self, buf: &mut [u8]) -> Result<()>;
}

/// Default provider backed by the RustCrypto crates.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoProvider;

impl RustCryptoProvider {
    /// Create a provider.
    pub fn new() -> Self {
        Self
    }
}

fn seal_with<A: Aead>(a: &A, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    a.encrypt(GenericArray::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| Error::Internal("AEAD seal"))
}

fn open_with<A: Aead>(a: &A, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    a.decrypt(GenericArray::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| Error::BadRecordMac)
}

impl CryptoProvider for RustCryptoProvider {
    fn hash(&self, alg: HashAlgorithm, data: &[u8]) -> Vec<u8> {
        match alg {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        }
    }

    fn hash_context(&self, alg: HashAlgorithm) -> Box<dyn HashContext> {
        match alg {
            HashAlgorithm::Sha256 => Box::new(Sha256Context(Sha256::new())),
            HashAlgorithm::Sha384 => Box::new(Sha384Context(Sha384::new())),
        }
    }

    fn hmac(&self, alg: HashAlgorithm, key: &[u8], data: &[u8]) -> Vec<u8> {
        match alg {
            HashAlgorithm::Sha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).expect("any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            HashAlgorithm::Sha384 => {
                let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key).expect("any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    fn hkdf_extract(&self, alg: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
        match alg {
            HashAlgorithm::Sha256 => Hkdf::<Sha256>::extract(Some(salt), ikm).0.to_vec(),
            HashAlgorithm::Sha384 => Hkdf::<Sha384>::extract(Some(salt), ikm).0.to_vec(),
        }
    }

    fn hkdf_expand(
        &self,
        alg: HashAlgorithm,
        prk: &[u8],
        info: &[u8],
        out_len: usize,
    ) -> Result<Vec<u8>> {
        let mut okm = vec![0u8; out_len];
        match alg {
            HashAlgorithm::Sha256 => Hkdf::<Sha256>::from_prk(prk)
                .map_err(|_| Error::Internal("HKDF PRK length"))?
                .expand(info, &mut okm)
                .map_err(|_| Error::Internal("HKDF expand length"))?,
            HashAlgorithm::Sha384 => Hkdf::<Sha384>::from_prk(prk)
                .map_err(|_| Error::Internal("HKDF PRK length"))?
                .expand(info, &mut okm)
                .map_err(|_| Error::Internal("HKDF expand length"))?,
        }
        Ok(okm)
    }

    fn aead_seal(
        &self,
        alg: AeadAlgorithm,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        match alg {
            AeadAlgorithm::Aes128Gcm => {
                let a = Aes128Gcm::new_from_slice(key).map_err(|_| Error::Internal("key len"))?;
                seal_with(&a, nonce, aad, plaintext)
            }
            AeadAlgorithm::Aes256Gcm => {
                let a = Aes256Gcm::new_from_slice(key).map_err(|_| Error::Internal("key len"))?;
                seal_with(&a, nonce, aad, plaintext)
            }
            AeadAlgorithm::Chacha20Poly1305 => {
                let a =
                    ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::Internal("key len"))?;
                seal_with(&a, nonce, aad, plaintext)
            }
            AeadAlgorithm::Aes128Ccm => {
                let a =
                    Aes128CcmFull::new_from_slice(key).map_err(|_| Error::Internal("key len"))?;
                seal_with(&a, nonce, aad, plaintext)
            }
            AeadAlgorithm::Aes128Ccm8 => {
                let a =
                    Aes128CcmShort::new_from_slice(key).map_err(|_| Error::Internal("key len"))?;
                seal_with(&a, nonce, aad, plaintext)
            }
        }
    }

    fn aead_open(
        &self,
        alg: AeadAlgorithm,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        match alg {
            AeadAlgorithm::Aes128Gcm => {
                let a = Aes128Gcm::new_from_slice(key).map_err(|_| Error::Internal("key len"))?;
                open_with(&a, nonce, aad, ciphertext)
            }
            AeadAlgorithm::Aes256Gcm => {
                let a = Aes256Gcm::new_from_slice(key).map_err(|_| Error::Internal("key len"))?;
                open_with(&a, nonce, aad, ciphertext)
            }
            AeadAlgorithm::Chacha20Poly1305 => {
                let a =
                    ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::Internal("key len"))?;
                open_with(&a, nonce, aad, ciphertext)
            }
            AeadAlgorithm::Aes128Ccm => {
                let a =
                    Aes128CcmFull::new_from_slice(key).map_err(|_| Error::Internal("key len"))?;
                open_with(&a, nonce, aad, ciphertext)
            }
            AeadAlgorithm::Aes128Ccm8 => {
                let a =
                    Aes128CcmShort::new_from_slice(key).map_err(|_| Error::Internal("key len"))?;
                open_with(&a, nonce, aad, ciphertext)
            }
        }
    }

    fn x25519(&self, private: &[u8; 32], peer_public: &[u8; 32]) -> [u8; 32] {
        x25519_dalek::x25519(*private, *peer_public)
    }

    fn x25519_public(&self, private: &[u8; 32]) -> [u8; 32] {
        x25519_dalek::x25519(*private, x25519_dalek::X25519_BASEPOINT_BYTES)
    }

    fn fill_random(&self, buf: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|_| Error::Internal("OS RNG"))
    }
}

struct Sha256Context(Sha256);

impl HashContext for Sha256Context {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(&self) -> Vec<u8> {
        self.0.clone().finalize().to_vec()
    }

    fn fork(&self) -> Box<dyn HashContext> {
        Box::new(Sha256Context(self.0.clone()))
    }
}

struct Sha384Context(Sha384);

impl HashContext for Sha384Context {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(&self) -> Vec<u8> {
        self.0.clone().finalize().to_vec()
    }

    fn fork(&self) -> Box<dyn HashContext> {
        Box::new(Sha384Context(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty() {
        let p = RustCryptoProvider::new();
        assert_eq!(
            p.hash(HashAlgorithm::Sha256, b""),
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap()
        );
    }

    #[test]
    fn test_hkdf_rfc5869_case_1() {
        // RFC 5869 A.1: basic SHA-256 test case.
        let p = RustCryptoProvider::new();
        let ikm = [0x0bu8; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let prk = p.hkdf_extract(HashAlgorithm::Sha256, &salt, &ikm);
        assert_eq!(
            prk,
            hex::decode("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5")
                .unwrap()
        );

        let okm = p.hkdf_expand(HashAlgorithm::Sha256, &prk, &info, 42).unwrap();
        assert_eq!(
            okm,
            hex::decode(
                "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
            )
            .unwrap()
        );
    }

    #[test]
    fn test_aead_seal_open_roundtrip() {
        let p = RustCryptoProvider::new();
        let key16 = [0x42u8; 16];
        let key32 = [0x42u8; 32];
        let nonce = [0x24u8; 12];
        let aad = b"header";
        let msg = b"attack at dawn";

        for (alg, key) in [
            (AeadAlgorithm::Aes128Gcm, &key16[..]),
            (AeadAlgorithm::Aes256Gcm, &key32[..]),
            (AeadAlgorithm::Chacha20Poly1305, &key32[..]),
            (AeadAlgorithm::Aes128Ccm, &key16[..]),
            (AeadAlgorithm::Aes128Ccm8, &key16[..]),
        ] {
            let sealed = p.aead_seal(alg, key, &nonce, aad, msg).unwrap();
            assert!(sealed.len() > msg.len());
            let opened = p.aead_open(alg, key, &nonce, aad, &sealed).unwrap();
            assert_eq!(opened, msg);
        }
    }

    #[test]
    fn test_aead_open_rejects_tamper() {
        let p = RustCryptoProvider::new();
        let key = [0x42u8; 16];
        let nonce = [0x24u8; 12];
        let mut sealed = p
            .aead_seal(AeadAlgorithm::Aes128Gcm, &key, &nonce, b"aad", b"msg")
            .unwrap();
        sealed[0] ^= 1;
        assert_eq!(
            p.aead_open(AeadAlgorithm::Aes128Gcm, &key, &nonce, b"aad", &sealed),
            Err(crate::Error::BadRecordMac)
        );
    }

    #[test]
    fn test_hash_context_snapshot() {
        let p = RustCryptoProvider::new();
        let mut ctx = p.hash_context(HashAlgorithm::Sha256);
        ctx.update(b"hello ");
        let snapshot = ctx.finish();
        ctx.update(b"world");
        assert_eq!(snapshot, p.hash(HashAlgorithm::Sha256, b"hello "));
        assert_eq!(ctx.finish(), p.hash(HashAlgorithm::Sha256, b"hello world"));
    }

    #[test]
    fn test_x25519_public_matches_scalarmult() {
        let p = RustCryptoProvider::new();
        let a = [1u8; 32];
        let b = [2u8; 32];
        let shared_ab = p.x25519(&a, &p.x25519_public(&b));
        let shared_ba = p.x25519(&b, &p.x25519_public(&a));
        assert_eq!(shared_ab, shared_ba);
    }
}
