//! Cipher suites and negotiation tables.
//!
//! TLS 1.3 cipher suites pair an AEAD with a hash; the descriptor for
//! the negotiated suite parameterizes the key schedule and the record
//! layer.

/// TLS 1.3 cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    /// TLS_AES_128_GCM_SHA256.
    Aes128GcmSha256,
    /// TLS_AES_256_GCM_SHA384.
    Aes256GcmSha384,
    /// TLS_CHACHA20_POLY1305_SHA256.
    Chacha20Poly1305Sha256,
    /// TLS_AES_128_CCM_SHA256.
    Aes128CcmSha256,
    /// TLS_AES_128_CCM_8_SHA256.
    Aes128Ccm8Sha256,
}

/// Suites offered by default, in preference order.
pub const DEFAULT_OFFERED_SUITES: &[CipherSuite] = &[
    CipherSuite::Aes128GcmSha256,
    CipherSuite::Aes256GcmSha384,
    CipherSuite::Aes128CcmSha256,
    CipherSuite::Chacha20Poly1305Sha256,
];

impl CipherSuite {
    /// Get cipher suite ID.
    pub fn to_id(&self) -> u16 {
        match self {
            CipherSuite::Aes128GcmSha256 => 0x1301,
            CipherSuite::Aes256GcmSha384 => 0x1302,
            CipherSuite::Chacha20Poly1305Sha256 => 0x1303,
            CipherSuite::Aes128CcmSha256 => 0x1304,
            CipherSuite::Aes128Ccm8Sha256 => 0x1305,
        }
    }

    /// Parse from ID.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0x1301 => Some(CipherSuite::Aes128GcmSha256),
            0x1302 => Some(CipherSuite::Aes256GcmSha384),
            0x1303 => Some(CipherSuite::Chacha20Poly1305Sha256),
            0x1304 => Some(CipherSuite::Aes128CcmSha256),
            0x1305 => Some(CipherSuite::Aes128Ccm8Sha256),
            _ => None,
        }
    }

    /// The immutable parameter record for this suite.
    pub fn descriptor(&self) -> SuiteDescriptor {
        match self {
            CipherSuite::Aes128GcmSha256 => SuiteDescriptor {
                suite: *self,
                aead: AeadAlgorithm::Aes128Gcm,
                hash: HashAlgorithm::Sha256,
                key_len: 16,
                iv_len: 12,
                tag_len: 16,
            },
            CipherSuite::Aes256GcmSha384 => SuiteDescriptor {
                suite: *self,
                aead: AeadAlgorithm::Aes256Gcm,
                hash: HashAlgorithm::Sha384,
                key_len: 32,
                iv_len: 12,
                tag_len: 16,
            },
            CipherSuite::Chacha20Poly1305Sha256 => SuiteDescriptor {
                suite: *self,
                aead: AeadAlgorithm::Chacha20Poly1305,
                hash: HashAlgorithm::Sha256,
                key_len: 32,
                iv_len: 12,
                tag_len: 16,
            },
            CipherSuite::Aes128CcmSha256 => SuiteDescriptor {
                suite: *self,
                aead: AeadAlgorithm::Aes128Ccm,
                hash: HashAlgorithm::Sha256,
                key_len: 16,
                iv_len: 12,
                tag_len: 16,
            },
            CipherSuite::Aes128Ccm8Sha256 => SuiteDescriptor {
                suite: *self,
                aead: AeadAlgorithm::Aes128Ccm8,
                hash: HashAlgorithm::Sha256,
                key_len: 16,
                iv_len: 12,
                tag_len: 8,
            },
        }
    }
}

/// Cipher suite parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteDescriptor {
    /// The suite itself.
    pub suite: CipherSuite,
    /// AEAD algorithm.
    pub aead: AeadAlgorithm,
    /// Transcript / HKDF hash.
    pub hash: HashAlgorithm,
    /// AEAD key length in bytes.
    pub key_len: usize,
    /// AEAD nonce length in bytes.
    pub iv_len: usize,
    /// AEAD tag length in bytes.
    pub tag_len: usize,
}

/// AEAD algorithm identifier handed to the crypto provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    Aes128Gcm,
    Aes256Gcm,
    Chacha20Poly1305,
    Aes128Ccm,
    Aes128Ccm8,
}

/// Hash algorithm identifier handed to the crypto provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
        }
    }
}

/// Named group (elliptic curves and DH groups).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NamedGroup {
    // ECDH curves
    Secp256r1 = 0x0017,
    Secp384r1 = 0x0018,
    Secp521r1 = 0x0019,
    X25519 = 0x001D,
    X448 = 0x001E,

    // FFDH groups
    Ffdhe2048 = 0x0100,
    Ffdhe3072 = 0x0101,
    Ffdhe4096 = 0x0102,
    Ffdhe6144 = 0x0103,
    Ffdhe8192 = 0x0104,
}

impl NamedGroup {
    /// Parse from u16.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0017 => Some(NamedGroup::Secp256r1),
            0x0018 => Some(NamedGroup::Secp384r1),
            0x0019 => Some(NamedGroup::Secp521r1),
            0x001D => Some(NamedGroup::X25519),
            0x001E => Some(NamedGroup::X448),
            0x0100 => Some(NamedGroup::Ffdhe2048),
            0x0101 => Some(NamedGroup::Ffdhe3072),
            0x0102 => Some(NamedGroup::Ffdhe4096),
            0x0103 => Some(NamedGroup::Ffdhe6144),
            0x0104 => Some(NamedGroup::Ffdhe8192),
            _ => None,
        }
    }
}

/// Signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SignatureScheme {
    // RSASSA-PKCS1-v1_5
    RsaPkcs1Sha256 = 0x0401,
    RsaPkcs1Sha384 = 0x0501,
    RsaPkcs1Sha512 = 0x0601,

    // ECDSA
    EcdsaSecp256r1Sha256 = 0x0403,
    EcdsaSecp384r1Sha384 = 0x0503,
    EcdsaSecp521r1Sha512 = 0x0603,

    // RSASSA-PSS with public key OID rsaEncryption
    RsaPssRsaeSha256 = 0x0804,
    RsaPssRsaeSha384 = 0x0805,
    RsaPssRsaeSha512 = 0x0806,

    // EdDSA
    Ed25519 = 0x0807,
    Ed448 = 0x0808,

    // RSASSA-PSS with public key OID rsassa-pss
    RsaPssPssSha256 = 0x0809,
    RsaPssPssSha384 = 0x080A,
    RsaPssPssSha512 = 0x080B,

    // Legacy algorithms
    RsaPkcs1Sha1 = 0x0201,
    EcdsaSha1 = 0x0203,
}

/// Schemes offered by default, in wire order.
pub const DEFAULT_SIGNATURE_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::RsaPkcs1Sha256,
    SignatureScheme::RsaPkcs1Sha384,
    SignatureScheme::RsaPkcs1Sha512,
    SignatureScheme::EcdsaSecp256r1Sha256,
    SignatureScheme::EcdsaSecp384r1Sha384,
    SignatureScheme::EcdsaSecp521r1Sha512,
    SignatureScheme::RsaPssRsaeSha256,
    SignatureScheme::RsaPssRsaeSha384,
    SignatureScheme::RsaPssRsaeSha512,
    SignatureScheme::Ed25519,
    SignatureScheme::Ed448,
    SignatureScheme::RsaPssPssSha256,
    SignatureScheme::RsaPssPssSha384,
    SignatureScheme::RsaPssPssSha512,
    SignatureScheme::RsaPkcs1Sha1,
    SignatureScheme::EcdsaSha1,
];

impl SignatureScheme {
    /// Parse from u16.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0401 => Some(SignatureScheme::RsaPkcs1Sha256),
            0x0501 => Some(SignatureScheme::RsaPkcs1Sha384),
            0x0601 => Some(SignatureScheme::RsaPkcs1Sha512),
            0x0403 => Some(SignatureScheme::EcdsaSecp256r1Sha256),
            0x0503 => Some(SignatureScheme::EcdsaSecp384r1Sha384),
            0x0603 => Some(SignatureScheme::EcdsaSecp521r1Sha512),
            0x0804 => Some(SignatureScheme::RsaPssRsaeSha256),
            0x0805 => Some(SignatureScheme::RsaPssRsaeSha384),
            0x0806 => Some(SignatureScheme::RsaPssRsaeSha512),
            0x0807 => Some(SignatureScheme::Ed25519),
            0x0808 => Some(SignatureScheme::Ed448),
            0x0809 => Some(SignatureScheme::RsaPssPssSha256),
            0x080A => Some(SignatureScheme::RsaPssPssSha384),
            0x080B => Some(SignatureScheme::RsaPssPssSha512),
            0x0201 => Some(SignatureScheme::RsaPkcs1Sha1),
            0x0203 => Some(SignatureScheme::EcdsaSha1),
            _ => None,
        }
    }
}
