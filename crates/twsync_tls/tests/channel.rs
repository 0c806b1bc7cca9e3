//! Secure channel tests against the loopback TLS server.

use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};
use twsync_protocol::{Account, CodecError, Cursor, Message, Record};
use twsync_testkit::pki::{Authority, LeafSpec, TestPki, SERVER_NAME};
use twsync_testkit::server::{LoopbackServer, Reply, ServerSetup};
use twsync_testkit::init_test_logging;
use twsync_tls::{
    CancelToken, CertificateReason, ChannelConfig, ChannelError, HandshakeError, SecureChannel,
    ServerAddress, TcpTransport, TlsVersions, ValidatorConfig,
};
use uuid::Uuid;

const TIMEOUT: Duration = Duration::from_secs(5);

fn account() -> Account {
    Account::new("Public", "alice", Uuid::nil())
}

fn request() -> Message {
    Message::sync_request(
        &account(),
        &Cursor::new("C0"),
        vec![Record::new("T1").with_attribute("description", "buy milk")],
    )
}

fn config() -> ChannelConfig {
    ChannelConfig::new(SERVER_NAME)
        .with_handshake_timeout(TIMEOUT)
        .with_read_slice(Duration::from_millis(20))
}

fn open(
    server: &LoopbackServer,
    pki: &TestPki,
    config: &ChannelConfig,
) -> Result<SecureChannel<TcpTransport>, HandshakeError> {
    SecureChannel::open(
        server.connect(),
        &pki.client_credentials(),
        &ValidatorConfig::new(),
        config,
    )
}

#[test]
fn exchange_over_mutual_tls() {
    init_test_logging();
    let pki = TestPki::new();
    let reply = Message::sync_accepted(
        &Cursor::new("C1"),
        vec![Record::new("T2").with_attribute("description", "walk dog")],
    );
    let server = LoopbackServer::replying(ServerSetup::from_pki(&pki), Reply::Send(reply.clone()));

    let mut channel = open(&server, &pki, &config()).unwrap();
    assert!(channel.is_open());
    channel.send(&request(), TIMEOUT).unwrap();
    let received = channel.receive(TIMEOUT).unwrap();

    assert_eq!(received, reply);
    assert_eq!(server.received(), vec![request()]);
}

#[test]
fn several_messages_share_one_session() {
    let pki = TestPki::new();
    let server = LoopbackServer::start(ServerSetup::from_pki(&pki), |message| {
        let cursor = message.cursor().unwrap_or_default();
        Reply::Send(Message::sync_accepted(&Cursor::new(format!("{cursor}+")), vec![]))
    });

    let mut channel = open(&server, &pki, &config()).unwrap();
    for round in 0..3 {
        let cursor = Cursor::new(format!("C{round}"));
        channel
            .send(&Message::sync_request(&account(), &cursor, vec![]), TIMEOUT)
            .unwrap();
        let reply = channel.receive(TIMEOUT).unwrap();
        assert_eq!(reply.cursor(), Some(Cursor::new(format!("C{round}+"))));
    }
    assert_eq!(server.connections(), 1);
}

#[test]
fn tls12_session_works() {
    let pki = TestPki::new();
    let reply = Message::sync_accepted(&Cursor::new("C1"), vec![]);
    let server = LoopbackServer::replying(
        ServerSetup::from_pki(&pki).tls12_only(),
        Reply::Send(reply.clone()),
    );

    let mut channel = open(&server, &pki, &config()).unwrap();
    channel.send(&request(), TIMEOUT).unwrap();
    assert_eq!(channel.receive(TIMEOUT).unwrap(), reply);
}

#[test]
fn untrusted_client_certificate_fails_open() {
    let pki = TestPki::new();
    let other_root = Authority::root("unrelated client root");
    let server = LoopbackServer::replying(
        ServerSetup::from_pki(&pki)
            .with_client_roots(vec![other_root.der()])
            .tls12_only(),
        Reply::Hang,
    );

    let err = open(&server, &pki, &config()).unwrap_err();
    assert!(
        matches!(err, HandshakeError::Protocol(_) | HandshakeError::PeerClosed),
        "unexpected error: {err}"
    );
    assert!(server.received().is_empty());
}

#[test]
fn untrusted_client_certificate_fails_open_with_tls13() {
    let pki = TestPki::new();
    let other_root = Authority::root("unrelated client root");
    let server = LoopbackServer::replying(
        ServerSetup::from_pki(&pki).with_client_roots(vec![other_root.der()]),
        Reply::Send(Message::sync_accepted(&Cursor::new("C1"), vec![])),
    );

    let config = config().with_versions(TlsVersions::Tls13Only);
    let err = open(&server, &pki, &config).unwrap_err();
    assert!(
        matches!(err, HandshakeError::Protocol(_) | HandshakeError::PeerClosed),
        "unexpected error: {err}"
    );
    assert!(server.received().is_empty());
}

#[test]
fn untrusted_client_certificate_fails_open_with_default_versions() {
    let pki = TestPki::new();
    let other_root = Authority::root("unrelated client root");
    let server = LoopbackServer::replying(
        ServerSetup::from_pki(&pki).with_client_roots(vec![other_root.der()]),
        Reply::Send(Message::sync_accepted(&Cursor::new("C1"), vec![])),
    );

    let config = ChannelConfig::new(SERVER_NAME).with_handshake_timeout(TIMEOUT);
    assert_eq!(config.versions, TlsVersions::default());
    match open(&server, &pki, &config) {
        Err(HandshakeError::Protocol(message)) => assert!(message.contains("alert"), "{message}"),
        Err(HandshakeError::PeerClosed) => {}
        other => panic!("expected the server to refuse the client, got {other:?}"),
    }
    assert!(server.received().is_empty());
}

#[test]
fn accepted_client_certificate_opens_promptly_with_tls13() {
    let pki = TestPki::new();
    let server = LoopbackServer::replying(ServerSetup::from_pki(&pki), Reply::Hang);

    let config = config()
        .with_versions(TlsVersions::Tls13Only)
        .with_verdict_wait(TIMEOUT);
    let started = Instant::now();
    let channel = open(&server, &pki, &config).unwrap();
    assert!(channel.is_open());
    assert!(started.elapsed() < TIMEOUT);
}

#[test]
fn untrusted_server_chain_aborts_handshake() {
    let pki = TestPki::new();
    let rogue_root = Authority::root("rogue root");
    let rogue = rogue_root.issue(&LeafSpec::server()).with_issuer(&rogue_root);
    let server = LoopbackServer::replying(
        ServerSetup::from_pki(&pki).with_identity(rogue),
        Reply::Hang,
    );

    match open(&server, &pki, &config()) {
        Err(HandshakeError::PeerValidation(err)) => {
            assert_eq!(err.reason, CertificateReason::UntrustedChain)
        }
        other => panic!("expected a peer validation failure, got {other:?}"),
    }
    assert!(server.received().is_empty());
}

#[test]
fn expired_server_leaf_aborts_handshake() {
    let pki = TestPki::new();
    let expired = pki.issue_server(&LeafSpec::server().expired());
    let server = LoopbackServer::replying(
        ServerSetup::from_pki(&pki).with_identity(expired),
        Reply::Hang,
    );

    match open(&server, &pki, &config()) {
        Err(HandshakeError::PeerValidation(err)) => {
            assert_eq!(err.reason, CertificateReason::Expired)
        }
        other => panic!("expected a peer validation failure, got {other:?}"),
    }
}

#[test]
fn server_name_is_the_default_identity() {
    let pki = TestPki::new();
    let server = LoopbackServer::replying(ServerSetup::from_pki(&pki), Reply::Hang);

    let wrong_name = config();
    let wrong_name = ChannelConfig {
        server_name: "tasks.example.com".into(),
        ..wrong_name
    };
    match open(&server, &pki, &wrong_name) {
        Err(HandshakeError::PeerValidation(err)) => {
            assert_eq!(err.reason, CertificateReason::IdentityMismatch)
        }
        other => panic!("expected an identity mismatch, got {other:?}"),
    }

    let channel = SecureChannel::open(
        server.connect(),
        &pki.client_credentials(),
        &ValidatorConfig::new().with_expected_identity(SERVER_NAME),
        &wrong_name,
    );
    assert!(channel.is_ok());
}

#[test]
fn pinned_server_is_accepted_and_other_leaf_refused() {
    let pki = TestPki::new();
    let server = LoopbackServer::replying(ServerSetup::from_pki(&pki), Reply::Hang);

    let pinned = ValidatorConfig::new().with_pin(pki.server.fingerprint());
    SecureChannel::open(server.connect(), &pki.client_credentials(), &pinned, &config()).unwrap();

    let other = ValidatorConfig::new().with_pin(pki.issue_server(&LeafSpec::server()).fingerprint());
    match SecureChannel::open(server.connect(), &pki.client_credentials(), &other, &config()) {
        Err(HandshakeError::PeerValidation(err)) => {
            assert_eq!(err.reason, CertificateReason::PinMismatch)
        }
        other => panic!("expected a pin mismatch, got {other:?}"),
    }
}

#[test]
fn silent_server_times_out_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let holder = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(500));
        drop(stream);
    });

    let pki = TestPki::new();
    let transport = TcpTransport::connect(&ServerAddress::new("127.0.0.1", port), TIMEOUT).unwrap();
    let config = config().with_handshake_timeout(Duration::from_millis(100));
    let err = SecureChannel::open(
        transport,
        &pki.client_credentials(),
        &ValidatorConfig::new(),
        &config,
    )
    .unwrap_err();
    assert!(matches!(err, HandshakeError::Timeout), "unexpected error: {err}");
    holder.join().unwrap();
}

#[test]
fn peer_closing_during_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let closer = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
    });

    let pki = TestPki::new();
    let transport = TcpTransport::connect(&ServerAddress::new("127.0.0.1", port), TIMEOUT).unwrap();
    closer.join().unwrap();
    let err = SecureChannel::open(
        transport,
        &pki.client_credentials(),
        &ValidatorConfig::new(),
        &config(),
    )
    .unwrap_err();
    assert!(matches!(err, HandshakeError::PeerClosed), "unexpected error: {err}");
}

#[test]
fn receive_timeout_closes_channel() {
    let pki = TestPki::new();
    let server = LoopbackServer::replying(ServerSetup::from_pki(&pki), Reply::Hang);

    let mut channel = open(&server, &pki, &config()).unwrap();
    channel.send(&request(), TIMEOUT).unwrap();
    let err = channel.receive(Duration::from_millis(150)).unwrap_err();
    assert!(matches!(err, ChannelError::Timeout));
    assert!(!channel.is_open());
    assert!(matches!(
        channel.send(&request(), TIMEOUT),
        Err(ChannelError::Closed)
    ));
}

#[test]
fn cancellation_interrupts_receive() {
    let pki = TestPki::new();
    let server = LoopbackServer::replying(ServerSetup::from_pki(&pki), Reply::Hang);

    let token = CancelToken::new();
    let mut channel = open(&server, &pki, &config())
        .unwrap()
        .with_cancel_token(token.clone());
    channel.send(&request(), TIMEOUT).unwrap();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        token.cancel();
    });
    let started = Instant::now();
    let err = channel.receive(Duration::from_secs(30)).unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, ChannelError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!channel.is_open());
}

#[test]
fn cancelled_token_refuses_send() {
    let pki = TestPki::new();
    let server = LoopbackServer::replying(ServerSetup::from_pki(&pki), Reply::Hang);

    let mut channel = open(&server, &pki, &config()).unwrap();
    channel.cancel_token().cancel();
    assert!(matches!(
        channel.send(&request(), TIMEOUT),
        Err(ChannelError::Cancelled)
    ));
    assert!(!channel.is_open());
}

#[test]
fn server_close_notify_is_closed() {
    let pki = TestPki::new();
    let server = LoopbackServer::replying(ServerSetup::from_pki(&pki), Reply::Close);

    let mut channel = open(&server, &pki, &config()).unwrap();
    channel.send(&request(), TIMEOUT).unwrap();
    assert!(matches!(channel.receive(TIMEOUT), Err(ChannelError::Closed)));
}

#[test]
fn bad_frame_closes_channel() {
    let pki = TestPki::new();
    let server = LoopbackServer::replying(ServerSetup::from_pki(&pki), Reply::Raw(vec![0, 0, 0, 1]));

    let mut channel = open(&server, &pki, &config()).unwrap();
    channel.send(&request(), TIMEOUT).unwrap();
    match channel.receive(TIMEOUT) {
        Err(ChannelError::Codec(CodecError::Framing { .. })) => {}
        other => panic!("expected a framing error, got {other:?}"),
    }
    assert!(!channel.is_open());
}

#[test]
fn unencodable_message_keeps_channel_open() {
    let pki = TestPki::new();
    let reply = Message::sync_accepted(&Cursor::new("C1"), vec![]);
    let server = LoopbackServer::replying(ServerSetup::from_pki(&pki), Reply::Send(reply.clone()));

    let mut channel = open(&server, &pki, &config()).unwrap();
    let bad = request().with_header("bad key", "value\n");
    assert!(matches!(
        channel.send(&bad, TIMEOUT),
        Err(ChannelError::Codec(CodecError::Encoding { .. }))
    ));
    assert!(channel.is_open());

    channel.send(&request(), TIMEOUT).unwrap();
    assert_eq!(channel.receive(TIMEOUT).unwrap(), reply);
    assert_eq!(server.received().len(), 1);
}

#[test]
fn malformed_frame_is_skipped() {
    let pki = TestPki::new();
    let good = Message::sync_accepted(&Cursor::new("C2"), vec![]);
    let mut garbage = 13u32.to_be_bytes().to_vec();
    garbage.extend_from_slice(b"garbage\n\n");
    let mut replies = vec![Reply::Send(good.clone()), Reply::Raw(garbage)];
    let server = LoopbackServer::start(ServerSetup::from_pki(&pki), move |_| {
        replies.pop().unwrap_or(Reply::Hang)
    });

    let mut channel = open(&server, &pki, &config()).unwrap();
    channel.send(&request(), TIMEOUT).unwrap();
    match channel.receive(TIMEOUT) {
        Err(ChannelError::Codec(CodecError::Malformed { .. })) => {}
        other => panic!("expected a malformed frame, got {other:?}"),
    }
    assert!(channel.is_open());

    channel.send(&request(), TIMEOUT).unwrap();
    assert_eq!(channel.receive(TIMEOUT).unwrap(), good);
}

#[test]
fn close_is_idempotent() {
    let pki = TestPki::new();
    let server = LoopbackServer::replying(ServerSetup::from_pki(&pki), Reply::Hang);

    let mut channel = open(&server, &pki, &config()).unwrap();
    channel.close();
    channel.close();
    assert!(!channel.is_open());
    assert!(matches!(channel.receive(TIMEOUT), Err(ChannelError::Closed)));
    drop(channel);
}
