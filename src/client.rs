//! Client handshake state machine.
//!
//! [`Connection`] drives one TLS 1.3 connection from ClientHello
//! through Finished and into application data. It owns the record
//! layer, key schedule and transcript, consumes raw transport bytes
//! via [`Connection::received`], and queues outbound bytes the host
//! drains with [`Connection::take_output`]. There is no internal I/O
//! and no suspension: every call runs to completion.

use std::sync::Arc;

use log::{debug, trace, warn};
use zeroize::Zeroize;

use crate::alert::{Alert, AlertDescription};
use crate::config::{ClientConfig, VerifyError};
use crate::extensions::{
    interpret_encrypted_extensions, interpret_server_hello_extensions, Extension, KeyShareEntry,
    ServerExtension,
};
use crate::handshake::{
    wire, ClientHello, EncryptedExtensions, Finished, HandshakeBuffer, HandshakeMessage,
    HandshakeType, KeyUpdate, KeyUpdateRequest, NewSessionTicket, ServerHello,
};
use crate::key_schedule::KeySchedule;
use crate::provider::CryptoProvider;
use crate::record::{ContentType, RecordBuffer, RecordLayer};
use crate::suite::{CipherSuite, NamedGroup, SignatureScheme, SuiteDescriptor};
use crate::transcript::Transcript;
use crate::{Error, Result};

/// Client handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Created, ClientHello not yet sent.
    Start,
    /// ClientHello sent.
    WaitServerHello,
    /// Handshake keys installed.
    WaitEncryptedExtensions,
    /// Either CertificateRequest or Certificate comes next.
    WaitCertCr,
    /// Certificate comes next.
    WaitCert,
    /// CertificateVerify comes next.
    WaitCertVerify,
    /// Server Finished comes next.
    WaitFinished,
    /// Handshake complete.
    Connected,
    /// Closed by either side or by a fatal error.
    Closed,
}

/// A NewSessionTicket surfaced to the host for optional persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    /// Ticket lifetime in seconds.
    pub lifetime: u32,
    /// Obfuscation offset for the ticket age.
    pub age_add: u32,
    /// Nonce feeding the resumption PSK derivation.
    pub nonce: Vec<u8>,
    /// The opaque ticket.
    pub ticket: Vec<u8>,
    /// Raw ticket extensions.
    pub extensions: Vec<Extension>,
}

/// Events surfaced by [`Connection::received`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The handshake finished; application data may flow.
    HandshakeComplete {
        /// Negotiated ALPN protocol, if any.
        alpn: Option<Vec<u8>>,
        /// The server certificate chain, leaf first (DER).
        peer_certs: Vec<Vec<u8>>,
        /// The server name sent in SNI, if any.
        sni: Option<String>,
    },
    /// Decrypted application data.
    ApplicationData(Vec<u8>),
    /// A post-handshake session ticket.
    SessionTicket(SessionTicket),
    /// The peer asked us to update our keys (already answered).
    KeyUpdateRequested,
    /// The peer sent close_notify; its write side is closed.
    PeerClosed,
}

/// A TLS 1.3 client connection.
pub struct Connection {
    config: ClientConfig,
    provider: Arc<dyn CryptoProvider>,
    state: HandshakeState,
    record: RecordLayer,
    incoming: RecordBuffer,
    parser: HandshakeBuffer,
    transcript: Transcript,
    schedule: Option<KeySchedule>,
    suite: Option<SuiteDescriptor>,

    client_random: [u8; 32],
    session_id: Vec<u8>,
    x25519_private: [u8; 32],
    x25519_public: [u8; 32],

    /// Suite pinned by a HelloRetryRequest; the retried ServerHello
    /// must select it again.
    retry_suite: Option<CipherSuite>,
    retry_cookie: Option<Vec<u8>>,

    client_hs_secret: Vec<u8>,
    server_hs_secret: Vec<u8>,
    client_app_secret: Vec<u8>,
    server_app_secret: Vec<u8>,
    exporter_secret: Vec<u8>,
    resumption_secret: Vec<u8>,

    peer_certs: Vec<Vec<u8>>,
    requested_schemes: Option<Vec<SignatureScheme>>,
    alpn: Option<Vec<u8>>,

    output: Vec<u8>,
    fatal: Option<Error>,
    sent_close_notify: bool,
}

impl Connection {
    /// Create a connection; nothing is sent until [`Connection::start`].
    pub fn new(config: ClientConfig) -> Self {
        let provider = config.provider.clone();
        let record = RecordLayer::new(provider.clone());
        Self {
            config,
            provider,
            state: HandshakeState::Start,
            record,
            incoming: RecordBuffer::new(),
            parser: HandshakeBuffer::new(),
            transcript: Transcript::new(),
            schedule: None,
            suite: None,
            client_random: [0u8; 32],
            session_id: Vec::new(),
            x25519_private: [0u8; 32],
            x25519_public: [0u8; 32],
            retry_suite: None,
            retry_cookie: None,
            client_hs_secret: Vec::new(),
            server_hs_secret: Vec::new(),
            client_app_secret: Vec::new(),
            server_app_secret: Vec::new(),
            exporter_secret: Vec::new(),
            resumption_secret: Vec::new(),
            peer_certs: Vec::new(),
            requested_schemes: None,
            alpn: None,
            output: Vec::new(),
            fatal: None,
            sent_close_notify: false,
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether the handshake is complete.
    pub fn is_connected(&self) -> bool {
        self.state == HandshakeState::Connected
    }

    /// Negotiated ALPN protocol.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.alpn.as_deref()
    }

    /// The server certificate chain, leaf first.
    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        &self.peer_certs
    }

    /// Signature schemes from a CertificateRequest, if one arrived.
    pub fn requested_signature_schemes(&self) -> Option<&[SignatureScheme]> {
        self.requested_schemes.as_deref()
    }

    /// Exporter master secret, available once connected.
    pub fn exporter_secret(&self) -> Option<&[u8]> {
        if self.exporter_secret.is_empty() {
            None
        } else {
            Some(&self.exporter_secret)
        }
    }

    /// Resumption master secret, available once connected.
    ///
    /// Feeds no send path here; tickets are handed to the host.
    pub fn resumption_secret(&self) -> Option<&[u8]> {
        if self.resumption_secret.is_empty() {
            None
        } else {
            Some(&self.resumption_secret)
        }
    }

    /// Begin the handshake; returns the ClientHello record bytes.
    pub fn start(&mut self) -> Result<Vec<u8>> {
        if self.state != HandshakeState::Start {
            return Err(Error::UnexpectedMessage("handshake already started"));
        }

        self.provider.fill_random(&mut self.client_random)?;
        if self.config.compatibility_mode {
            let mut session_id = vec![0u8; 32];
            self.provider.fill_random(&mut session_id)?;
            self.session_id = session_id;
        }
        self.provider.fill_random(&mut self.x25519_private)?;
        self.x25519_public = self.provider.x25519_public(&self.x25519_private);

        let hello = self.build_client_hello();
        let hello_wire = wire(HandshakeType::ClientHello, &hello.body());
        self.transcript.add(&hello_wire);
        let bytes = self.record.seal(ContentType::Handshake, &hello_wire)?;

        debug!("client hello sent ({} suites offered)", hello.cipher_suites.len());
        self.state = HandshakeState::WaitServerHello;
        Ok(bytes)
    }

    /// Feed bytes from the peer; returns the events they produced.
    ///
    /// Outbound bytes generated while processing (client Finished,
    /// KeyUpdate replies, alerts) are queued for
    /// [`Connection::take_output`].
    pub fn received(&mut self, data: &[u8]) -> Result<Vec<Event>> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }

        let mut events = Vec::new();
        self.incoming.append(data);
        match self.process_records(&mut events) {
            Ok(()) => Ok(events),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Drain bytes queued for the peer.
    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.output)
    }

    /// Encrypt application data; valid only once connected.
    pub fn send(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        match self.state {
            HandshakeState::Connected => self.record.seal(ContentType::ApplicationData, data),
            HandshakeState::Closed => Err(Error::Closed),
            _ => Err(Error::UnexpectedMessage("handshake incomplete")),
        }
    }

    /// Initiate a key update for our write direction.
    ///
    /// The message travels under the old key; the new key applies from
    /// the next record on.
    pub fn initiate_key_update(&mut self, request_peer: bool) -> Result<Vec<u8>> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        if self.state != HandshakeState::Connected {
            return Err(Error::UnexpectedMessage("key update before handshake"));
        }

        let request = if request_peer {
            KeyUpdateRequest::UpdateRequested
        } else {
            KeyUpdateRequest::UpdateNotRequested
        };
        let message = HandshakeMessage::KeyUpdate(KeyUpdate { request }).encode();
        let bytes = self.record.seal(ContentType::Handshake, &message)?;
        self.rotate_write_key()?;
        Ok(bytes)
    }

    /// Close the connection; emits close_notify at most once.
    ///
    /// Mid-handshake a warning user_canceled precedes it.
    pub fn close(&mut self) -> Result<Vec<u8>> {
        if self.sent_close_notify || self.fatal.is_some() {
            self.state = HandshakeState::Closed;
            return Ok(Vec::new());
        }

        let mut bytes = Vec::new();
        let handshaking = !matches!(
            self.state,
            HandshakeState::Start | HandshakeState::Connected | HandshakeState::Closed
        );
        if handshaking {
            let canceled = Alert::warning(AlertDescription::UserCanceled);
            bytes.extend_from_slice(&self.record.seal(ContentType::Alert, &canceled.to_bytes())?);
        }
        let close = Alert::close_notify();
        bytes.extend_from_slice(&self.record.seal(ContentType::Alert, &close.to_bytes())?);

        self.sent_close_notify = true;
        self.state = HandshakeState::Closed;
        self.wipe_secrets();
        Ok(bytes)
    }

    fn process_records(&mut self, events: &mut Vec<Event>) -> Result<()> {
        while let Some(record) = self.incoming.try_read_record()? {
            if self.state == HandshakeState::Closed {
                // Reader half-closed; drop whatever still arrives.
                trace!("record after close discarded");
                return Ok(());
            }

            let outer_type = record.content_type;
            let was_protected = self.record.is_read_protected();
            let (content_type, payload) = self.record.open(record)?;

            match content_type {
                ContentType::ChangeCipherSpec => {
                    self.handle_change_cipher_spec(&payload)?;
                }
                ContentType::Alert => {
                    self.handle_alert(&payload, events)?;
                }
                ContentType::Handshake => {
                    if outer_type == ContentType::Handshake && was_protected {
                        return Err(Error::UnexpectedMessage(
                            "plaintext handshake after key installation",
                        ));
                    }
                    self.parser.append(&payload);
                    while let Some((typ, message)) = self.parser.next_message()? {
                        self.handle_handshake(typ, message, events)?;
                    }
                }
                ContentType::ApplicationData => {
                    if self.state != HandshakeState::Connected {
                        return Err(Error::UnexpectedMessage(
                            "application data during handshake",
                        ));
                    }
                    events.push(Event::ApplicationData(payload));
                }
            }
        }
        Ok(())
    }

    /// Queue the alert for a local failure and make the error sticky.
    fn fail(&mut self, err: Error) -> Error {
        if let Some(existing) = &self.fatal {
            return existing.clone();
        }

        // Incoming close_notify and peer fatal alerts already closed
        // the peer's side; everything else gets a best-effort alert.
        if !matches!(err, Error::PeerAlert(_)) {
            let alert = if err.is_fatal() {
                Alert::fatal(err.alert())
            } else {
                Alert::warning(err.alert())
            };
            if let Ok(bytes) = self.record.seal(ContentType::Alert, &alert.to_bytes()) {
                self.output.extend_from_slice(&bytes);
            }
        }

        debug!("connection failed: {}", err);
        self.state = HandshakeState::Closed;
        self.wipe_secrets();
        self.fatal = Some(err.clone());
        err
    }

    fn handle_change_cipher_spec(&mut self, payload: &[u8]) -> Result<()> {
        if payload != [0x01] {
            return Err(Error::Decode("change_cipher_spec"));
        }
        let in_handshake = !matches!(
            self.state,
            HandshakeState::Start | HandshakeState::Connected | HandshakeState::Closed
        );
        if !in_handshake {
            return Err(Error::UnexpectedMessage("change_cipher_spec"));
        }
        // Middlebox compatibility: ignored.
        trace!("change_cipher_spec ignored");
        Ok(())
    }

    fn handle_alert(&mut self, payload: &[u8], events: &mut Vec<Event>) -> Result<()> {
        let alert = Alert::from_bytes(payload)?;
        if alert.description == AlertDescription::CloseNotify {
            debug!("peer sent close_notify");
            events.push(Event::PeerClosed);
            self.state = HandshakeState::Closed;
            self.wipe_secrets();
            return Ok(());
        }
        if alert.is_fatal() {
            return Err(Error::PeerAlert(alert.description));
        }
        warn!("ignoring warning alert: {:?}", alert.description);
        Ok(())
    }

    fn handle_handshake(
        &mut self,
        typ: HandshakeType,
        message: Vec<u8>,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        let decoded = HandshakeMessage::decode(typ, &message[4..])?;
        trace!("handshake message {:?} in {:?}", typ, self.state);

        match (self.state, decoded) {
            (HandshakeState::WaitServerHello, HandshakeMessage::ServerHello(hello)) => {
                if hello.is_hello_retry_request() {
                    self.handle_hello_retry_request(hello, &message)
                } else {
                    self.handle_server_hello(hello, &message)
                }
            }
            (
                HandshakeState::WaitEncryptedExtensions,
                HandshakeMessage::EncryptedExtensions(ee),
            ) => self.handle_encrypted_extensions(ee, &message),
            (HandshakeState::WaitCertCr, HandshakeMessage::CertificateRequest(cr)) => {
                self.transcript.add(&message);
                self.requested_schemes = Some(cr.signature_schemes()?);
                self.state = HandshakeState::WaitCert;
                Ok(())
            }
            (
                HandshakeState::WaitCertCr | HandshakeState::WaitCert,
                HandshakeMessage::Certificate(cert),
            ) => {
                if cert.entries.is_empty() {
                    return Err(Error::BadCertificate("empty certificate chain"));
                }
                self.transcript.add(&message);
                self.peer_certs = cert.entries.into_iter().map(|e| e.cert_data).collect();
                self.state = HandshakeState::WaitCertVerify;
                Ok(())
            }
            (HandshakeState::WaitCertVerify, HandshakeMessage::CertificateVerify(cv)) => {
                // The signature covers the transcript up to but not
                // including this message.
                let transcript_hash = self.transcript.current_hash();
                self.config
                    .verifier
                    .verify_server_cert(&self.peer_certs, cv.scheme, &cv.signature, &transcript_hash)
                    .map_err(|e| match e {
                        VerifyError::BadCertificate => Error::BadCertificate("verifier rejected"),
                        VerifyError::UnknownCa => Error::UnknownCa,
                        VerifyError::BadSignature => Error::DecryptError,
                    })?;
                self.transcript.add(&message);
                self.state = HandshakeState::WaitFinished;
                Ok(())
            }
            (HandshakeState::WaitFinished, HandshakeMessage::Finished(finished)) => {
                self.handle_server_finished(finished, &message, events)
            }
            (HandshakeState::Connected, HandshakeMessage::NewSessionTicket(ticket)) => {
                self.handle_new_session_ticket(ticket, events)
            }
            (HandshakeState::Connected, HandshakeMessage::KeyUpdate(update)) => {
                self.handle_key_update(update, events)
            }
            _ => Err(Error::UnexpectedMessage("handshake message out of order")),
        }
    }

    fn build_client_hello(&self) -> ClientHello {
        let mut extensions = Vec::new();
        if !self.config.server_name.is_empty()
            && self.config.server_name.parse::<std::net::IpAddr>().is_err()
        {
            extensions.push(Extension::server_name(&self.config.server_name));
        }
        extensions.push(Extension::supported_versions());
        extensions.push(Extension::signature_algorithms(
            &self.config.offered_signature_schemes,
        ));
        extensions.push(Extension::supported_groups(&self.config.offered_groups));
        extensions.push(Extension::key_share(&KeyShareEntry::new(
            NamedGroup::X25519,
            self.x25519_public.to_vec(),
        )));
        if let Some(cookie) = &self.retry_cookie {
            extensions.push(Extension::cookie(cookie));
        }
        if !self.config.alpn.is_empty() {
            extensions.push(Extension::alpn(&self.config.alpn));
        }

        ClientHello {
            random: self.client_random,
            session_id: self.session_id.clone(),
            cipher_suites: self.config.offered_suites.clone(),
            extensions,
        }
    }

    fn check_hello_common(&self, hello: &ServerHello) -> Result<()> {
        if hello.session_id_echo != self.session_id {
            return Err(Error::IllegalParameter("legacy_session_id_echo"));
        }
        if !self.config.offered_suites.contains(&hello.cipher_suite) {
            return Err(Error::IllegalParameter("cipher suite not offered"));
        }
        if let Some(pinned) = self.retry_suite {
            if hello.cipher_suite != pinned {
                return Err(Error::IllegalParameter("cipher suite changed after retry"));
            }
        }
        Ok(())
    }

    fn handle_hello_retry_request(&mut self, hello: ServerHello, message: &[u8]) -> Result<()> {
        if self.retry_suite.is_some() {
            return Err(Error::UnexpectedMessage("second HelloRetryRequest"));
        }
        self.check_hello_common(&hello)?;

        let extensions = interpret_server_hello_extensions(&hello.extensions, true)?;
        let mut version = None;
        for ext in extensions {
            match ext {
                ServerExtension::SupportedVersions(v) => version = Some(v),
                ServerExtension::RetryGroup(group) => {
                    if group != NamedGroup::X25519 {
                        return Err(Error::HandshakeFailure("no common group"));
                    }
                }
                ServerExtension::Cookie(cookie) => self.retry_cookie = Some(cookie),
                _ => {}
            }
        }
        match version {
            Some(0x0304) => {}
            Some(_) => return Err(Error::ProtocolVersion),
            None => return Err(Error::MissingExtension("supported_versions")),
        }

        debug!("hello retry request; resending client hello");
        self.retry_suite = Some(hello.cipher_suite);

        // Collapse ClientHello1 into a message_hash transcript entry,
        // then append the HelloRetryRequest and the new ClientHello.
        let hash = hello.cipher_suite.descriptor().hash;
        self.transcript
            .rewrite_with_message_hash(self.provider.as_ref(), hash);
        self.transcript.add(message);

        let hello2 = self.build_client_hello();
        let hello2_wire = wire(HandshakeType::ClientHello, &hello2.body());
        self.transcript.add(&hello2_wire);
        let bytes = self.record.seal(ContentType::Handshake, &hello2_wire)?;
        self.output.extend_from_slice(&bytes);

        self.state = HandshakeState::WaitServerHello;
        Ok(())
    }

    fn handle_server_hello(&mut self, hello: ServerHello, message: &[u8]) -> Result<()> {
        self.check_hello_common(&hello)?;

        let extensions = interpret_server_hello_extensions(&hello.extensions, false)?;
        let mut version = None;
        let mut key_share = None;
        for ext in extensions {
            match ext {
                ServerExtension::SupportedVersions(v) => version = Some(v),
                ServerExtension::KeyShare(entry) => key_share = Some(entry),
                _ => {}
            }
        }
        match version {
            Some(0x0304) => {}
            Some(_) => return Err(Error::ProtocolVersion),
            None => return Err(Error::MissingExtension("supported_versions")),
        }
        let key_share = key_share.ok_or(Error::MissingExtension("key_share"))?;
        if key_share.group != NamedGroup::X25519 {
            return Err(Error::IllegalParameter("key share group"));
        }
        let peer_public: [u8; 32] = key_share
            .key_exchange
            .as_slice()
            .try_into()
            .map_err(|_| Error::IllegalParameter("key share length"))?;

        let descriptor = hello.cipher_suite.descriptor();
        debug!("negotiated {:?}", hello.cipher_suite);

        // The hash is now fixed; the buffered ClientHello (if any)
        // streams into the transcript before the ServerHello.
        self.transcript
            .start_hashing(self.provider.as_ref(), descriptor.hash);
        self.transcript.add(message);

        let mut ecdhe = self.provider.x25519(&self.x25519_private, &peer_public);
        self.x25519_private.zeroize();

        let mut schedule =
            KeySchedule::new(self.provider.clone(), descriptor.hash, None);
        schedule.advance_to_handshake(&ecdhe)?;
        ecdhe.zeroize();

        let transcript_hash = self.transcript.current_hash();
        let (client_hs, server_hs) = schedule.handshake_traffic_secrets(&transcript_hash)?;

        let read_keys =
            schedule.traffic_keys(&server_hs, descriptor.key_len, descriptor.iv_len)?;
        self.record
            .install_read(descriptor.aead, descriptor.tag_len, read_keys);

        self.client_hs_secret = client_hs;
        self.server_hs_secret = server_hs;
        self.schedule = Some(schedule);
        self.suite = Some(descriptor);
        self.state = HandshakeState::WaitEncryptedExtensions;
        Ok(())
    }

    fn handle_encrypted_extensions(
        &mut self,
        ee: EncryptedExtensions,
        message: &[u8],
    ) -> Result<()> {
        self.transcript.add(message);
        for ext in interpret_encrypted_extensions(&ee.extensions)? {
            match ext {
                ServerExtension::Alpn(protocol) => {
                    if !self.config.alpn.contains(&protocol) {
                        return Err(Error::IllegalParameter("alpn protocol not offered"));
                    }
                    self.alpn = Some(protocol);
                }
                ServerExtension::ServerNameAck => {}
                ServerExtension::Unknown(typ, _) => {
                    trace!("ignoring unknown encrypted extension {:#06x}", typ);
                }
                _ => {}
            }
        }
        self.state = HandshakeState::WaitCertCr;
        Ok(())
    }

    fn handle_server_finished(
        &mut self,
        finished: Finished,
        message: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<()> {
        // The reader re-keys below; a handshake message half-received
        // under the old keys can never complete.
        if self.parser.has_partial() {
            return Err(Error::UnexpectedMessage("handshake message spans key change"));
        }

        let descriptor = self.suite.ok_or(Error::Internal("suite missing"))?;
        let transcript_hash = self.transcript.current_hash();
        {
            let schedule = self.schedule.as_ref().ok_or(Error::Internal("no schedule"))?;
            let expected = schedule.verify_data(&self.server_hs_secret, &transcript_hash)?;
            if !constant_time_eq(&expected, &finished.verify_data) {
                return Err(Error::DecryptError);
            }
        }
        debug!("server finished verified");
        self.transcript.add(message);

        let schedule = self.schedule.as_mut().ok_or(Error::Internal("no schedule"))?;
        schedule.advance_to_master()?;

        // Application secrets cover the transcript through the server
        // Finished.
        let server_done_hash = self.transcript.current_hash();
        let (client_app, server_app) = schedule.application_traffic_secrets(&server_done_hash)?;
        self.exporter_secret = schedule.exporter_master_secret(&server_done_hash)?;

        // Compatibility change_cipher_spec precedes the client
        // Finished, still in plaintext.
        if self.config.compatibility_mode {
            let ccs = self.record.seal(ContentType::ChangeCipherSpec, &[0x01])?;
            self.output.extend_from_slice(&ccs);
        }

        // Client Finished travels under the handshake keys.
        let write_keys = {
            let schedule = self.schedule.as_ref().unwrap();
            schedule.traffic_keys(&self.client_hs_secret, descriptor.key_len, descriptor.iv_len)?
        };
        self.record
            .install_write(descriptor.aead, descriptor.tag_len, write_keys);

        let schedule = self.schedule.as_ref().unwrap();
        let verify_data = schedule.verify_data(&self.client_hs_secret, &self.transcript.current_hash())?;
        let finished_wire = wire(HandshakeType::Finished, &verify_data);
        self.transcript.add(&finished_wire);
        let bytes = self.record.seal(ContentType::Handshake, &finished_wire)?;
        self.output.extend_from_slice(&bytes);

        // Resumption covers the client Finished as well.
        self.resumption_secret = schedule.resumption_master_secret(&self.transcript.current_hash())?;

        // Swap both directions to the application keys and drop the
        // handshake secrets.
        let read_keys =
            schedule.traffic_keys(&server_app, descriptor.key_len, descriptor.iv_len)?;
        let write_keys =
            schedule.traffic_keys(&client_app, descriptor.key_len, descriptor.iv_len)?;
        self.record
            .install_read(descriptor.aead, descriptor.tag_len, read_keys);
        self.record
            .install_write(descriptor.aead, descriptor.tag_len, write_keys);

        self.client_hs_secret.zeroize();
        self.server_hs_secret.zeroize();
        self.client_hs_secret = Vec::new();
        self.server_hs_secret = Vec::new();
        self.client_app_secret = client_app;
        self.server_app_secret = server_app;

        debug!("handshake complete");
        self.state = HandshakeState::Connected;
        events.push(Event::HandshakeComplete {
            alpn: self.alpn.clone(),
            peer_certs: self.peer_certs.clone(),
            sni: if self.config.server_name.is_empty() {
                None
            } else {
                Some(self.config.server_name.clone())
            },
        });
        Ok(())
    }

    fn handle_new_session_ticket(
        &mut self,
        ticket: NewSessionTicket,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        trace!("session ticket received (lifetime {}s)", ticket.lifetime);
        events.push(Event::SessionTicket(SessionTicket {
            lifetime: ticket.lifetime,
            age_add: ticket.age_add,
            nonce: ticket.nonce,
            ticket: ticket.ticket,
            extensions: ticket.extensions,
        }));
        Ok(())
    }

    fn handle_key_update(&mut self, update: KeyUpdate, events: &mut Vec<Event>) -> Result<()> {
        if self.parser.has_partial() {
            return Err(Error::UnexpectedMessage("handshake message spans key change"));
        }
        let descriptor = self.suite.ok_or(Error::Internal("suite missing"))?;
        let schedule = self.schedule.as_ref().ok_or(Error::Internal("no schedule"))?;

        // The peer switches to its next generation immediately.
        let next_server = schedule.next_application_secret(&self.server_app_secret)?;
        let read_keys =
            schedule.traffic_keys(&next_server, descriptor.key_len, descriptor.iv_len)?;
        self.record
            .install_read(descriptor.aead, descriptor.tag_len, read_keys);
        self.server_app_secret.zeroize();
        self.server_app_secret = next_server;
        debug!("reader keys rotated by peer key update");

        if update.request == KeyUpdateRequest::UpdateRequested {
            // Answer under the old writer key, then rotate ours.
            let reply = HandshakeMessage::KeyUpdate(KeyUpdate {
                request: KeyUpdateRequest::UpdateNotRequested,
            })
            .encode();
            let bytes = self.record.seal(ContentType::Handshake, &reply)?;
            self.output.extend_from_slice(&bytes);
            self.rotate_write_key()?;
            events.push(Event::KeyUpdateRequested);
        }
        Ok(())
    }

    fn rotate_write_key(&mut self) -> Result<()> {
        let descriptor = self.suite.ok_or(Error::Internal("suite missing"))?;
        let schedule = self.schedule.as_ref().ok_or(Error::Internal("no schedule"))?;
        let next_client = schedule.next_application_secret(&self.client_app_secret)?;
        let write_keys =
            schedule.traffic_keys(&next_client, descriptor.key_len, descriptor.iv_len)?;
        self.record
            .install_write(descriptor.aead, descriptor.tag_len, write_keys);
        self.client_app_secret.zeroize();
        self.client_app_secret = next_client;
        debug!("writer keys rotated");
        Ok(())
    }

    fn wipe_secrets(&mut self) {
        self.x25519_private.zeroize();
        self.client_hs_secret.zeroize();
        self.server_hs_secret.zeroize();
        self.client_app_secret.zeroize();
        self.server_app_secret.zeroize();
        self.resumption_secret.zeroize();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.wipe_secrets();
        self.exporter_secret.zeroize();
    }
}

/// Constant-time byte comparison for Finished verification.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
