//! End-to-end handshake scenarios against a minimal in-process server
//! half built from the crate's own record layer and key schedule.

use std::sync::Arc;

use tls13_engine::codec::Reader;
use tls13_engine::extensions::{Extension, KeyShareEntry};
use tls13_engine::handshake::{
    wire, CertificateEntry, CertificateMsg, CertificateRequest, CertificateVerify, ClientHello,
    EncryptedExtensions, HandshakeBuffer, HandshakeMessage, HandshakeType, KeyUpdate,
    KeyUpdateRequest, NewSessionTicket, ServerHello, HELLO_RETRY_REQUEST_RANDOM,
};
use tls13_engine::key_schedule::KeySchedule;
use tls13_engine::provider::{CryptoProvider, RustCryptoProvider};
use tls13_engine::record::{ContentType, RecordBuffer, RecordLayer};
use tls13_engine::suite::{CipherSuite, HashAlgorithm, NamedGroup, SignatureScheme, SuiteDescriptor};
use tls13_engine::transcript::Transcript;
use tls13_engine::{ClientConfig, Connection, Error, Event, HandshakeState};

const SERVER_CERT: &[u8] = &[0x30, 0x82, 0x01, 0x0A, 0x02, 0x01, 0x01];

/// Frame a plaintext record with the standard 0x0303 version.
fn frame_plaintext(content_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![content_type, 0x03, 0x03];
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split concatenated records, tolerating the 0x0301 first-record
/// version the client uses for its plaintext ClientHello.
fn parse_records(bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 5 <= bytes.len() {
        let typ = bytes[i];
        let len = u16::from_be_bytes([bytes[i + 3], bytes[i + 4]]) as usize;
        out.push((typ, bytes[i + 5..i + 5 + len].to_vec()));
        i += 5 + len;
    }
    assert_eq!(i, bytes.len(), "trailing partial record");
    out
}

/// What the test server saw in one batch of client bytes.
#[derive(Debug, PartialEq)]
enum Seen {
    App(Vec<u8>),
    KeyUpdate(KeyUpdateRequest),
    Alert(u8, u8),
}

/// A minimal TLS 1.3 server half for driving the client under test.
struct TestServer {
    provider: Arc<dyn CryptoProvider>,
    descriptor: SuiteDescriptor,
    record: RecordLayer,
    incoming: RecordBuffer,
    parser: HandshakeBuffer,
    transcript: Transcript,
    schedule: Option<KeySchedule>,
    client_hs_secret: Vec<u8>,
    client_app_secret: Vec<u8>,
    server_app_secret: Vec<u8>,
    alpn: Vec<Vec<u8>>,
    request_client_cert: bool,
    client_finished_ok: bool,
}

impl TestServer {
    fn new() -> Self {
        let provider: Arc<dyn CryptoProvider> = Arc::new(RustCryptoProvider::new());
        Self {
            provider: provider.clone(),
            descriptor: CipherSuite::Aes128GcmSha256.descriptor(),
            record: RecordLayer::new(provider),
            incoming: RecordBuffer::new(),
            parser: HandshakeBuffer::new(),
            transcript: Transcript::new(),
            schedule: None,
            client_hs_secret: Vec::new(),
            client_app_secret: Vec::new(),
            server_app_secret: Vec::new(),
            alpn: Vec::new(),
            request_client_cert: false,
            client_finished_ok: false,
        }
    }

    fn with_alpn(protocol: &[u8]) -> Self {
        let mut server = Self::new();
        server.alpn = vec![protocol.to_vec()];
        server
    }

    fn read_client_hello(bytes: &[u8]) -> (Vec<u8>, ClientHello) {
        let records = parse_records(bytes);
        assert_eq!(records[0].0, 22);
        let hello_wire = records[0].1.clone();
        assert_eq!(hello_wire[0], HandshakeType::ClientHello as u8);
        let hello = ClientHello::from_body(&hello_wire[4..]).unwrap();
        (hello_wire, hello)
    }

    fn client_x25519_share(hello: &ClientHello) -> [u8; 32] {
        for ext in &hello.extensions {
            if ext.extension_type == 51 {
                let mut r = Reader::new(&ext.data);
                let mut list = r.sub(2).unwrap();
                while !list.is_empty() {
                    let group = list.u16().unwrap();
                    let key = list.vec(2).unwrap();
                    if group == NamedGroup::X25519 as u16 {
                        return key.try_into().unwrap();
                    }
                }
            }
        }
        panic!("client offered no x25519 key share");
    }

    /// Answer a ClientHello with the full server flight:
    /// ServerHello, change_cipher_spec, EncryptedExtensions (split
    /// across two records), Certificate, CertificateVerify, Finished.
    fn respond(&mut self, client_hello_bytes: &[u8], tamper_finished: bool) -> Vec<u8> {
        let (hello_wire, hello) = Self::read_client_hello(client_hello_bytes);
        let peer_public = Self::client_x25519_share(&hello);
        self.transcript.add(&hello_wire);

        let server_private = [0x5Au8; 32];
        let server_public = self.provider.x25519_public(&server_private);

        let server_hello = ServerHello {
            random: [0xA5u8; 32],
            session_id_echo: hello.session_id.clone(),
            cipher_suite: self.descriptor.suite,
            extensions: vec![
                Extension::new(43, vec![0x03, 0x04]),
                Extension::new(
                    51,
                    KeyShareEntry::new(NamedGroup::X25519, server_public.to_vec()).to_bytes(),
                ),
            ],
        };
        let server_hello_wire = HandshakeMessage::ServerHello(server_hello).encode();
        self.transcript
            .start_hashing(self.provider.as_ref(), HashAlgorithm::Sha256);
        self.transcript.add(&server_hello_wire);

        let mut out = frame_plaintext(22, &server_hello_wire);
        // Middlebox-compatibility CCS; the client must ignore it.
        out.extend_from_slice(&frame_plaintext(20, &[0x01]));

        let ecdhe = self.provider.x25519(&server_private, &peer_public);
        let mut schedule =
            KeySchedule::new(self.provider.clone(), HashAlgorithm::Sha256, None);
        schedule.advance_to_handshake(&ecdhe).unwrap();

        let transcript_hash = self.transcript.current_hash();
        let (client_hs, server_hs) = schedule.handshake_traffic_secrets(&transcript_hash).unwrap();
        let d = self.descriptor;
        self.record.install_write(
            d.aead,
            d.tag_len,
            schedule.traffic_keys(&server_hs, d.key_len, d.iv_len).unwrap(),
        );
        self.record.install_read(
            d.aead,
            d.tag_len,
            schedule.traffic_keys(&client_hs, d.key_len, d.iv_len).unwrap(),
        );

        // EncryptedExtensions, split across two records to exercise
        // client-side reassembly.
        let mut ee_extensions = Vec::new();
        if let Some(protocol) = self.alpn.first() {
            ee_extensions.push(Extension::alpn(&[protocol.clone()]));
        }
        let ee_wire = HandshakeMessage::EncryptedExtensions(EncryptedExtensions {
            extensions: ee_extensions,
        })
        .encode();
        let (head, tail) = ee_wire.split_at(ee_wire.len() / 2);
        out.extend_from_slice(&self.record.seal(ContentType::Handshake, head).unwrap());
        out.extend_from_slice(&self.record.seal(ContentType::Handshake, tail).unwrap());
        self.transcript.add(&ee_wire);

        if self.request_client_cert {
            let request_wire = HandshakeMessage::CertificateRequest(CertificateRequest {
                context: vec![0x01],
                extensions: vec![Extension::signature_algorithms(&[
                    SignatureScheme::EcdsaSecp256r1Sha256,
                    SignatureScheme::RsaPssRsaeSha256,
                ])],
            })
            .encode();
            out.extend_from_slice(&self.record.seal(ContentType::Handshake, &request_wire).unwrap());
            self.transcript.add(&request_wire);
        }

        let certificate_wire = HandshakeMessage::Certificate(CertificateMsg {
            context: Vec::new(),
            entries: vec![CertificateEntry {
                cert_data: SERVER_CERT.to_vec(),
                extensions: Vec::new(),
            }],
        })
        .encode();
        out.extend_from_slice(&self.record.seal(ContentType::Handshake, &certificate_wire).unwrap());
        self.transcript.add(&certificate_wire);

        let verify_wire = HandshakeMessage::CertificateVerify(CertificateVerify {
            scheme: SignatureScheme::RsaPssRsaeSha256,
            signature: vec![0x42; 64],
        })
        .encode();
        out.extend_from_slice(&self.record.seal(ContentType::Handshake, &verify_wire).unwrap());
        self.transcript.add(&verify_wire);

        let mut verify_data = schedule
            .verify_data(&server_hs, &self.transcript.current_hash())
            .unwrap();
        if tamper_finished {
            verify_data[0] ^= 0x01;
        }
        let finished_wire = wire(HandshakeType::Finished, &verify_data);
        out.extend_from_slice(&self.record.seal(ContentType::Handshake, &finished_wire).unwrap());
        self.transcript.add(&finished_wire);

        schedule.advance_to_master().unwrap();
        let done_hash = self.transcript.current_hash();
        let (client_app, server_app) =
            schedule.application_traffic_secrets(&done_hash).unwrap();

        self.client_hs_secret = client_hs;
        self.client_app_secret = client_app;
        self.server_app_secret = server_app;
        self.schedule = Some(schedule);
        out
    }

    /// Answer the first ClientHello with a HelloRetryRequest carrying
    /// a cookie.
    fn respond_with_hrr(&mut self, client_hello_bytes: &[u8], cookie: &[u8]) -> Vec<u8> {
        let (hello_wire, hello) = Self::read_client_hello(client_hello_bytes);
        self.transcript.add(&hello_wire);
        self.transcript
            .rewrite_with_message_hash(self.provider.as_ref(), HashAlgorithm::Sha256);

        let retry = ServerHello {
            random: HELLO_RETRY_REQUEST_RANDOM,
            session_id_echo: hello.session_id,
            cipher_suite: self.descriptor.suite,
            extensions: vec![
                Extension::new(43, vec![0x03, 0x04]),
                Extension::new(51, vec![0x00, 0x1D]),
                Extension::cookie(cookie),
            ],
        };
        let retry_wire = HandshakeMessage::ServerHello(retry).encode();
        self.transcript.add(&retry_wire);
        frame_plaintext(22, &retry_wire)
    }

    /// Consume the client's change_cipher_spec and Finished flight,
    /// verify it, and switch to the application keys.
    fn process_client_finished(&mut self, bytes: &[u8]) {
        self.incoming.append(bytes);
        while let Some(record) = self.incoming.try_read_record().unwrap() {
            let (typ, payload) = self.record.open(record).unwrap();
            match typ {
                ContentType::ChangeCipherSpec => assert_eq!(payload, [0x01]),
                ContentType::Handshake => {
                    self.parser.append(&payload);
                    while let Some((t, message)) = self.parser.next_message().unwrap() {
                        assert_eq!(t, HandshakeType::Finished);
                        let expected = self
                            .schedule
                            .as_ref()
                            .unwrap()
                            .verify_data(&self.client_hs_secret, &self.transcript.current_hash())
                            .unwrap();
                        assert_eq!(&message[4..], expected, "client Finished mismatch");
                        self.transcript.add(&message);
                        self.client_finished_ok = true;

                        let d = self.descriptor;
                        let schedule = self.schedule.as_ref().unwrap();
                        self.record.install_read(
                            d.aead,
                            d.tag_len,
                            schedule
                                .traffic_keys(&self.client_app_secret, d.key_len, d.iv_len)
                                .unwrap(),
                        );
                        self.record.install_write(
                            d.aead,
                            d.tag_len,
                            schedule
                                .traffic_keys(&self.server_app_secret, d.key_len, d.iv_len)
                                .unwrap(),
                        );
                    }
                }
                other => panic!("unexpected content type {:?}", other),
            }
        }
        assert!(self.client_finished_ok, "client Finished not received");
    }

    /// Open a batch of client records after the handshake.
    fn receive(&mut self, bytes: &[u8]) -> Vec<Seen> {
        let mut seen = Vec::new();
        self.incoming.append(bytes);
        while let Some(record) = self.incoming.try_read_record().unwrap() {
            let (typ, payload) = self.record.open(record).unwrap();
            match typ {
                ContentType::ApplicationData => seen.push(Seen::App(payload)),
                ContentType::Alert => seen.push(Seen::Alert(payload[0], payload[1])),
                ContentType::Handshake => {
                    self.parser.append(&payload);
                    while let Some((t, message)) = self.parser.next_message().unwrap() {
                        assert_eq!(t, HandshakeType::KeyUpdate);
                        let update = match HandshakeMessage::decode(t, &message[4..]).unwrap() {
                            HandshakeMessage::KeyUpdate(u) => u,
                            other => panic!("unexpected message {:?}", other),
                        };
                        // The client switched its writer; rotate our
                        // reader to follow.
                        let schedule = self.schedule.as_ref().unwrap();
                        let next = schedule
                            .next_application_secret(&self.client_app_secret)
                            .unwrap();
                        let d = self.descriptor;
                        self.record.install_read(
                            d.aead,
                            d.tag_len,
                            schedule.traffic_keys(&next, d.key_len, d.iv_len).unwrap(),
                        );
                        self.client_app_secret = next;
                        seen.push(Seen::KeyUpdate(update.request));
                    }
                }
                other => panic!("unexpected content type {:?}", other),
            }
        }
        seen
    }

    fn send_app(&mut self, data: &[u8]) -> Vec<u8> {
        self.record.seal(ContentType::ApplicationData, data).unwrap()
    }

    fn send_handshake(&mut self, message: HandshakeMessage) -> Vec<u8> {
        self.record
            .seal(ContentType::Handshake, &message.encode())
            .unwrap()
    }

    fn send_close_notify(&mut self) -> Vec<u8> {
        self.record.seal(ContentType::Alert, &[1, 0]).unwrap()
    }

    /// Ask the client to update keys, rotating our writer afterwards.
    fn request_key_update(&mut self) -> Vec<u8> {
        let bytes = self.send_handshake(HandshakeMessage::KeyUpdate(KeyUpdate {
            request: KeyUpdateRequest::UpdateRequested,
        }));
        let schedule = self.schedule.as_ref().unwrap();
        let next = schedule
            .next_application_secret(&self.server_app_secret)
            .unwrap();
        let d = self.descriptor;
        self.record.install_write(
            d.aead,
            d.tag_len,
            schedule.traffic_keys(&next, d.key_len, d.iv_len).unwrap(),
        );
        self.server_app_secret = next;
        bytes
    }
}

fn connect(server: &mut TestServer, config: ClientConfig) -> Connection {
    let mut client = Connection::new(config);
    let client_hello = client.start().unwrap();
    let flight = server.respond(&client_hello, false);
    let events = client.received(&flight).unwrap();
    assert!(matches!(events[0], Event::HandshakeComplete { .. }));
    server.process_client_finished(&client.take_output());
    client
}

#[test]
fn happy_path_handshake() {
    let mut server = TestServer::with_alpn(b"h2");
    let config = ClientConfig::builder("example.com")
        .alpn_protocol(b"h2")
        .build();

    let mut client = Connection::new(config);
    let client_hello = client.start().unwrap();
    let flight = server.respond(&client_hello, false);

    // The whole server flight arrives in one read: ServerHello, a
    // compatibility CCS, a split EncryptedExtensions, Certificate,
    // CertificateVerify and Finished.
    let events = client.received(&flight).unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::HandshakeComplete {
            alpn,
            peer_certs,
            sni,
        } => {
            assert_eq!(alpn.as_deref(), Some(&b"h2"[..]));
            assert_eq!(peer_certs.len(), 1);
            assert_eq!(peer_certs[0], SERVER_CERT);
            assert_eq!(sni.as_deref(), Some("example.com"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(client.is_connected());
    assert_eq!(client.alpn_protocol(), Some(&b"h2"[..]));
    assert!(client.exporter_secret().is_some());

    server.process_client_finished(&client.take_output());
}

#[test]
fn application_ping_pong() {
    let mut server = TestServer::new();
    let mut client = connect(&mut server, ClientConfig::new("example.com"));

    let ping = client.send(b"ping\n").unwrap();
    // Encrypted records carry the application_data outer type.
    assert_eq!(ping[0], 23);
    assert_eq!(server.receive(&ping), vec![Seen::App(b"ping\n".to_vec())]);

    let pong = server.send_app(b"pong\n");
    let events = client.received(&pong).unwrap();
    assert_eq!(events, vec![Event::ApplicationData(b"pong\n".to_vec())]);
}

#[test]
fn client_hello_is_reproducible_with_fixed_randomness() {
    /// Provider whose randomness is a fixed byte, making every
    /// client-side choice deterministic.
    #[derive(Debug)]
    struct FixedRandom(RustCryptoProvider);

    impl CryptoProvider for FixedRandom {
        fn hash(&self, alg: HashAlgorithm, data: &[u8]) -> Vec<u8> {
            self.0.hash(alg, data)
        }
        fn hash_context(
            &self,
            alg: HashAlgorithm,
        ) -> Box<dyn tls13_engine::provider::HashContext> {
            self.0.hash_context(alg)
        }
        fn hmac(&self, alg: HashAlgorithm, key: &[u8], data: &[u8]) -> Vec<u8> {
            self.0.hmac(alg, key, data)
        }
        fn hkdf_extract(&self, alg: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
            self.0.hkdf_extract(alg, salt, ikm)
        }
        fn hkdf_expand(
            &self,
            alg: HashAlgorithm,
            prk: &[u8],
            info: &[u8],
            out_len: usize,
        ) -> tls13_engine::Result<Vec<u8>> {
            self.0.hkdf_expand(alg, prk, info, out_len)
        }
        fn aead_seal(
            &self,
            alg: tls13_engine::suite::AeadAlgorithm,
            key: &[u8],
            nonce: &[u8],
            aad: &[u8],
            plaintext: &[u8],
        ) -> tls13_engine::Result<Vec<u8>> {
            self.0.aead_seal(alg, key, nonce, aad, plaintext)
        }
        fn aead_open(
            &self,
            alg: tls13_engine::suite::AeadAlgorithm,
            key: &[u8],
            nonce: &[u8],
            aad: &[u8],
            ciphertext: &[u8],
        ) -> tls13_engine::Result<Vec<u8>> {
            self.0.aead_open(alg, key, nonce, aad, ciphertext)
        }
        fn x25519(&self, private: &[u8; 32], peer_public: &[u8; 32]) -> [u8; 32] {
            self.0.x25519(private, peer_public)
        }
        fn x25519_public(&self, private: &[u8; 32]) -> [u8; 32] {
            self.0.x25519_public(private)
        }
        fn fill_random(&self, buf: &mut [u8]) -> tls13_engine::Result<()> {
            buf.fill(0x2A);
            Ok(())
        }
    }

    let config = || {
        ClientConfig::builder("example.com")
            .provider(Arc::new(FixedRandom(RustCryptoProvider::new())))
            .build()
    };
    let first = Connection::new(config()).start().unwrap();
    let second = Connection::new(config()).start().unwrap();
    assert_eq!(first, second);
}

#[test]
fn bad_server_finished_is_fatal() {
    let mut server = TestServer::new();
    let mut client = Connection::new(ClientConfig::new("example.com"));

    let client_hello = client.start().unwrap();
    let flight = server.respond(&client_hello, true);

    let err = client.received(&flight).unwrap_err();
    assert_eq!(err, Error::DecryptError);

    // A fatal decrypt_error alert (code 51) is queued, still in
    // plaintext: the client never installed its write keys.
    let out = client.take_output();
    let records = parse_records(&out);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, 21);
    assert_eq!(records[0].1, vec![2, 51]);

    // The error is sticky.
    assert_eq!(client.received(b"").unwrap_err(), Error::DecryptError);
    assert_eq!(client.send(b"x").unwrap_err(), Error::DecryptError);
}

#[test]
fn hello_retry_request_with_cookie() {
    let cookie = [0xC7u8; 32];
    let mut server = TestServer::new();
    let mut client = Connection::new(ClientConfig::new("example.com"));

    let first_hello = client.start().unwrap();
    let retry = server.respond_with_hrr(&first_hello, &cookie);
    let events = client.received(&retry).unwrap();
    assert!(events.is_empty());
    assert_eq!(client.state(), HandshakeState::WaitServerHello);

    // The retried ClientHello echoes the cookie.
    let second_hello = client.take_output();
    let (_, hello2) = TestServer::read_client_hello(&second_hello);
    let cookie_ext = hello2
        .extensions
        .iter()
        .find(|e| e.extension_type == 44)
        .expect("cookie echoed");
    let mut expected = vec![0x00, 0x20];
    expected.extend_from_slice(&cookie);
    assert_eq!(cookie_ext.data, expected);

    // The handshake then completes over the synthetic transcript.
    let flight = server.respond(&second_hello, false);
    let events = client.received(&flight).unwrap();
    assert!(matches!(events[0], Event::HandshakeComplete { .. }));
    server.process_client_finished(&client.take_output());

    let ping = client.send(b"ping\n").unwrap();
    assert_eq!(server.receive(&ping), vec![Seen::App(b"ping\n".to_vec())]);
}

#[test]
fn second_hello_retry_request_is_fatal() {
    let cookie = [0xC7u8; 32];
    let mut server = TestServer::new();
    let mut client = Connection::new(ClientConfig::new("example.com"));

    let first_hello = client.start().unwrap();
    let retry = server.respond_with_hrr(&first_hello, &cookie);
    client.received(&retry).unwrap();
    let second_hello = client.take_output();

    // Replay another HelloRetryRequest instead of a ServerHello.
    let mut replay_server = TestServer::new();
    let retry_again = replay_server.respond_with_hrr(&second_hello, &cookie);
    let err = client.received(&retry_again).unwrap_err();
    assert_eq!(err, Error::UnexpectedMessage("second HelloRetryRequest"));
}

#[test]
fn session_ticket_is_surfaced() {
    let mut server = TestServer::new();
    let mut client = connect(&mut server, ClientConfig::new("example.com"));

    let ticket = NewSessionTicket {
        lifetime: 7200,
        age_add: 0x11223344,
        nonce: vec![0, 1],
        ticket: vec![0xAB; 24],
        extensions: Vec::new(),
    };
    let bytes = server.send_handshake(HandshakeMessage::NewSessionTicket(ticket));
    let events = client.received(&bytes).unwrap();
    match &events[0] {
        Event::SessionTicket(t) => {
            assert_eq!(t.lifetime, 7200);
            assert_eq!(t.age_add, 0x11223344);
            assert_eq!(t.nonce, vec![0, 1]);
            assert_eq!(t.ticket, vec![0xAB; 24]);
            assert!(t.extensions.is_empty());
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn key_update_requested_rotates_both_directions() {
    let mut server = TestServer::new();
    let mut client = connect(&mut server, ClientConfig::new("example.com"));

    // Traffic before the update.
    let before = client.send(b"before").unwrap();
    assert_eq!(server.receive(&before), vec![Seen::App(b"before".to_vec())]);

    // Server demands an update; the client answers with its own
    // KeyUpdate (update_not_requested) and rotates its writer.
    let update = server.request_key_update();
    let events = client.received(&update).unwrap();
    assert_eq!(events, vec![Event::KeyUpdateRequested]);

    let reply = client.take_output();
    let seen = server.receive(&reply);
    assert_eq!(seen, vec![Seen::KeyUpdate(KeyUpdateRequest::UpdateNotRequested)]);

    // Traffic still flows both ways under the new keys, and the
    // client's next record restarts at sequence zero.
    let after = client.send(b"after").unwrap();
    assert_eq!(server.receive(&after), vec![Seen::App(b"after".to_vec())]);

    let reverse = server.send_app(b"reverse");
    let events = client.received(&reverse).unwrap();
    assert_eq!(events, vec![Event::ApplicationData(b"reverse".to_vec())]);
}

#[test]
fn close_notify_half_close() {
    let mut server = TestServer::new();
    let mut client = connect(&mut server, ClientConfig::new("example.com"));

    // close() emits exactly one encrypted close_notify.
    let bytes = client.close().unwrap();
    let records = parse_records(&bytes);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, 23);
    assert_eq!(server.receive(&bytes), vec![Seen::Alert(1, 0)]);

    // Writes are refused afterwards, and a second close is a no-op.
    assert_eq!(client.send(b"late").unwrap_err(), Error::Closed);
    assert!(client.close().unwrap().is_empty());
}

#[test]
fn peer_close_notify_is_surfaced() {
    let mut server = TestServer::new();
    let mut client = connect(&mut server, ClientConfig::new("example.com"));

    let bytes = server.send_close_notify();
    let events = client.received(&bytes).unwrap();
    assert_eq!(events, vec![Event::PeerClosed]);
    assert_eq!(client.state(), HandshakeState::Closed);
}

#[test]
fn certificate_request_branch() {
    let mut server = TestServer::new();
    server.request_client_cert = true;
    let mut client = Connection::new(ClientConfig::new("example.com"));

    let client_hello = client.start().unwrap();
    let flight = server.respond(&client_hello, false);
    let events = client.received(&flight).unwrap();
    assert!(matches!(events[0], Event::HandshakeComplete { .. }));

    // The requested schemes are stashed for the host.
    assert_eq!(
        client.requested_signature_schemes(),
        Some(
            &[
                SignatureScheme::EcdsaSecp256r1Sha256,
                SignatureScheme::RsaPssRsaeSha256
            ][..]
        )
    );
    server.process_client_finished(&client.take_output());
}

#[test]
fn close_during_handshake_sends_user_canceled() {
    let mut client = Connection::new(ClientConfig::new("example.com"));
    client.start().unwrap();

    let bytes = client.close().unwrap();
    let records = parse_records(&bytes);
    assert_eq!(records.len(), 2);
    // A warning user_canceled, then close_notify, both still in
    // plaintext: no writer key exists yet.
    assert_eq!(records[0].0, 21);
    assert_eq!(records[0].1, vec![1, 90]);
    assert_eq!(records[1].0, 21);
    assert_eq!(records[1].1, vec![1, 0]);
}

#[test]
fn handshake_without_compatibility_mode() {
    let mut server = TestServer::new();
    let config = ClientConfig::builder("example.com")
        .compatibility_mode(false)
        .build();
    let mut client = Connection::new(config);

    let client_hello = client.start().unwrap();
    let (_, hello) = TestServer::read_client_hello(&client_hello);
    assert!(hello.session_id.is_empty());

    let flight = server.respond(&client_hello, false);
    let events = client.received(&flight).unwrap();
    assert!(matches!(events[0], Event::HandshakeComplete { .. }));

    // Without compatibility mode no change_cipher_spec precedes the
    // Finished: the first outbound record is already encrypted.
    let out = client.take_output();
    assert_eq!(out[0], 23);
    server.process_client_finished(&out);
}

#[test]
fn wrong_session_id_echo_is_rejected() {
    let mut client = Connection::new(ClientConfig::new("example.com"));
    client.start().unwrap();

    let hello = ServerHello {
        random: [0x11u8; 32],
        session_id_echo: vec![9u8; 16],
        cipher_suite: CipherSuite::Aes128GcmSha256,
        extensions: Vec::new(),
    };
    let bytes = frame_plaintext(22, &HandshakeMessage::ServerHello(hello).encode());
    let err = client.received(&bytes).unwrap_err();
    assert_eq!(err, Error::IllegalParameter("legacy_session_id_echo"));
}

#[test]
fn large_application_write_fragments() {
    let mut server = TestServer::new();
    let mut client = connect(&mut server, ClientConfig::new("example.com"));

    // One byte past 2^14 forces a second record.
    let payload = vec![0x61u8; 16384 + 1];
    let bytes = client.send(&payload).unwrap();
    let records = parse_records(&bytes);
    assert_eq!(records.len(), 2);

    let seen = server.receive(&bytes);
    let reassembled: Vec<u8> = seen
        .into_iter()
        .map(|s| match s {
            Seen::App(data) => data,
            other => panic!("unexpected {:?}", other),
        })
        .flatten()
        .collect();
    assert_eq!(reassembled, payload);
}
