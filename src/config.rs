//! Client connection configuration.

use std::sync::Arc;

use crate::provider::{CryptoProvider, RustCryptoProvider};
use crate::suite::{
    CipherSuite, NamedGroup, SignatureScheme, DEFAULT_OFFERED_SUITES, DEFAULT_SIGNATURE_SCHEMES,
};

/// Outcome of certificate verification the engine cannot interpret
/// further; each variant picks the alert sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// The certificate itself is unacceptable.
    BadCertificate,
    /// No chain to a trusted root.
    UnknownCa,
    /// The CertificateVerify signature over the transcript is invalid.
    BadSignature,
}

/// Host-supplied certificate and transcript-signature verification.
///
/// The engine surfaces the peer's certificate chain, the signature
/// scheme and signature from CertificateVerify, and the transcript
/// hash the signature covers (up to but not including the
/// CertificateVerify message itself). X.509 path building and the
/// actual signature check are the host's responsibility; skipping the
/// signature check leaves the handshake unauthenticated.
pub trait ServerCertVerifier: Send + Sync {
    /// Verify the chain (leaf first) and the transcript signature.
    fn verify_server_cert(
        &self,
        certs: &[Vec<u8>],
        scheme: SignatureScheme,
        signature: &[u8],
        transcript_hash: &[u8],
    ) -> core::result::Result<(), VerifyError>;
}

/// Verifier that accepts any certificate without checking anything.
///
/// The default, mirroring an unauthenticated test client. Production
/// configurations must install a real verifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _certs: &[Vec<u8>],
        _scheme: SignatureScheme,
        _signature: &[u8],
        _transcript_hash: &[u8],
    ) -> core::result::Result<(), VerifyError> {
        Ok(())
    }
}

/// TLS client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Server name for SNI; skipped on the wire when it is an IP
    /// literal.
    pub server_name: String,
    /// Middlebox compatibility mode: a 32-byte legacy_session_id is
    /// sent and must be echoed, and a change_cipher_spec record is
    /// emitted before the client Finished.
    pub compatibility_mode: bool,
    /// Cipher suites to offer, in preference order.
    pub offered_suites: Vec<CipherSuite>,
    /// Groups advertised in supported_groups.
    pub offered_groups: Vec<NamedGroup>,
    /// Signature schemes advertised in signature_algorithms.
    pub offered_signature_schemes: Vec<SignatureScheme>,
    /// ALPN protocols, most preferred first; empty disables ALPN.
    pub alpn: Vec<Vec<u8>>,
    /// Certificate verification callback.
    pub verifier: Arc<dyn ServerCertVerifier>,
    /// Cryptographic primitives.
    pub provider: Arc<dyn CryptoProvider>,
}

impl ClientConfig {
    /// Configuration with the default offer lists for `server_name`.
    pub fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            compatibility_mode: true,
            offered_suites: DEFAULT_OFFERED_SUITES.to_vec(),
            offered_groups: vec![NamedGroup::X25519],
            offered_signature_schemes: DEFAULT_SIGNATURE_SCHEMES.to_vec(),
            alpn: Vec::new(),
            verifier: Arc::new(AcceptAnyServerCert),
            provider: Arc::new(RustCryptoProvider::new()),
        }
    }

    /// Start building a configuration.
    pub fn builder(server_name: &str) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::new(server_name),
        }
    }
}

/// Builder for [`ClientConfig`].
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Enable or disable middlebox compatibility mode.
    pub fn compatibility_mode(mut self, enabled: bool) -> Self {
        self.config.compatibility_mode = enabled;
        self
    }

    /// Replace the offered cipher suites.
    pub fn cipher_suites(mut self, suites: Vec<CipherSuite>) -> Self {
        self.config.offered_suites = suites;
        self
    }

    /// Replace the advertised groups.
    pub fn groups(mut self, groups: Vec<NamedGroup>) -> Self {
        self.config.offered_groups = groups;
        self
    }

    /// Replace the advertised signature schemes.
    pub fn signature_schemes(mut self, schemes: Vec<SignatureScheme>) -> Self {
        self.config.offered_signature_schemes = schemes;
        self
    }

    /// Add an ALPN protocol.
    pub fn alpn_protocol(mut self, protocol: &[u8]) -> Self {
        self.config.alpn.push(protocol.to_vec());
        self
    }

    /// Install a certificate verifier.
    pub fn verifier(mut self, verifier: Arc<dyn ServerCertVerifier>) -> Self {
        self.config.verifier = verifier;
        self
    }

    /// Install a crypto provider.
    pub fn provider(mut self, provider: Arc<dyn CryptoProvider>) -> Self {
        self.config.provider = provider;
        self
    }

    /// Finish building.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::new("example.com");
        assert!(config.compatibility_mode);
        assert_eq!(config.offered_suites.len(), 4);
        assert_eq!(config.offered_groups, vec![NamedGroup::X25519]);
        assert!(config.alpn.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder("example.com")
            .compatibility_mode(false)
            .cipher_suites(vec![CipherSuite::Aes128GcmSha256])
            .alpn_protocol(b"h2")
            .alpn_protocol(b"http/1.1")
            .build();
        assert!(!config.compatibility_mode);
        assert_eq!(config.offered_suites, vec![CipherSuite::Aes128GcmSha256]);
        assert_eq!(config.alpn, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
    }
}
