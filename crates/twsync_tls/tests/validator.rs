//! Certificate validator tests against freshly minted chains.

use rustls_pki_types::UnixTime;
use std::time::Duration;
use twsync_testkit::pki::{Authority, LeafSpec, TestPki, SERVER_NAME};
use twsync_tls::{
    validate, CertificateReason, CertificateValidator, Fingerprint, ValidatorConfig,
};

fn validator(pki: &TestPki, config: ValidatorConfig) -> CertificateValidator {
    CertificateValidator::new(pki.trust_anchors(), config)
}

#[test]
fn complete_chain_is_accepted() {
    let pki = TestPki::new();
    validate(&pki.server.chain(), &pki.trust_anchors(), Some(SERVER_NAME)).unwrap();
    validate(&pki.server.chain(), &pki.trust_anchors(), Some("127.0.0.1")).unwrap();
    validate(&pki.server.chain(), &pki.trust_anchors(), None).unwrap();
}

#[test]
fn expired_leaf_is_rejected() {
    let pki = TestPki::new();
    let expired = pki.issue_server(&LeafSpec::server().expired());
    let err = validate(&expired.chain(), &pki.trust_anchors(), Some(SERVER_NAME)).unwrap_err();
    assert_eq!(err.reason, CertificateReason::Expired);
}

#[test]
fn future_leaf_is_rejected() {
    let pki = TestPki::new();
    let early = pki.issue_server(&LeafSpec::server().not_yet_valid());
    let err = validate(&early.chain(), &pki.trust_anchors(), None).unwrap_err();
    assert_eq!(err.reason, CertificateReason::NotYetValid);
}

#[test]
fn missing_intermediate_is_untrusted() {
    let pki = TestPki::new();
    let leaf_only = vec![pki.server.leaf()];
    let err = validate(&leaf_only, &pki.trust_anchors(), Some(SERVER_NAME)).unwrap_err();
    assert_eq!(err.reason, CertificateReason::UntrustedChain);
}

#[test]
fn unknown_root_is_untrusted() {
    let pki = TestPki::new();
    let rogue_root = Authority::root("rogue root");
    let rogue_intermediate = rogue_root.intermediate("rogue intermediate");
    let rogue = rogue_intermediate
        .issue(&LeafSpec::server())
        .with_issuer(&rogue_intermediate);

    let err = validate(&rogue.chain(), &pki.trust_anchors(), Some(SERVER_NAME)).unwrap_err();
    assert_eq!(err.reason, CertificateReason::UntrustedChain);
}

#[test]
fn leaf_signed_by_root_directly_is_accepted() {
    let pki = TestPki::new();
    let direct = pki.root.issue(&LeafSpec::server());
    validate(&direct.chain(), &pki.trust_anchors(), Some(SERVER_NAME)).unwrap();
}

#[test]
fn wrong_identity_is_rejected() {
    let pki = TestPki::new();
    let err = validate(
        &pki.server.chain(),
        &pki.trust_anchors(),
        Some("tasks.example.com"),
    )
    .unwrap_err();
    assert_eq!(err.reason, CertificateReason::IdentityMismatch);
}

#[test]
fn pin_must_match_leaf() {
    let pki = TestPki::new();

    let pinned = validator(
        &pki,
        ValidatorConfig::new().with_pin(pki.server.fingerprint()),
    );
    pinned.validate(&pki.server.chain(), UnixTime::now()).unwrap();

    let other = pki.issue_server(&LeafSpec::server());
    let err = pinned
        .validate(&other.chain(), UnixTime::now())
        .unwrap_err();
    assert_eq!(err.reason, CertificateReason::PinMismatch);
}

#[test]
fn pin_does_not_replace_chain_checks() {
    let pki = TestPki::new();
    let rogue_root = Authority::root("rogue root");
    let rogue = rogue_root.issue(&LeafSpec::server());

    let pinned = validator(&pki, ValidatorConfig::new().with_pin(rogue.fingerprint()));
    let err = pinned.validate(&rogue.chain(), UnixTime::now()).unwrap_err();
    assert_eq!(err.reason, CertificateReason::UntrustedChain);
}

#[test]
fn pin_parsed_from_hex() {
    let pki = TestPki::new();
    let text = pki.server.fingerprint().to_string();
    let pin = Fingerprint::from_hex(&text).unwrap();
    validator(&pki, ValidatorConfig::new().with_pin(pin))
        .validate(&pki.server.chain(), UnixTime::now())
        .unwrap();
}

#[test]
fn clock_skew_tolerance_applies_to_not_after() {
    let pki = TestPki::new();
    let leaf = pki.issue_server(&LeafSpec::server().valid((2020, 1, 1), (2030, 1, 1)));
    // One minute after 2030-01-01T00:00:00Z.
    let now = UnixTime::since_unix_epoch(Duration::from_secs(1_893_456_000 + 60));

    let strict = validator(&pki, ValidatorConfig::new());
    let err = strict.validate(&leaf.chain(), now).unwrap_err();
    assert_eq!(err.reason, CertificateReason::Expired);

    let lenient = validator(
        &pki,
        ValidatorConfig::new().with_clock_skew(Duration::from_secs(120)),
    );
    lenient.validate(&leaf.chain(), now).unwrap();

    let too_far = UnixTime::since_unix_epoch(Duration::from_secs(1_893_456_000 + 600));
    let err = lenient.validate(&leaf.chain(), too_far).unwrap_err();
    assert_eq!(err.reason, CertificateReason::Expired);
}

#[test]
fn sub_second_skew_is_not_dropped() {
    let pki = TestPki::new();
    let leaf = pki.issue_server(&LeafSpec::server().valid((2020, 1, 1), (2030, 1, 1)));
    let now = UnixTime::since_unix_epoch(Duration::from_secs(1_893_456_000 + 1));

    let err = validator(&pki, ValidatorConfig::new())
        .validate(&leaf.chain(), now)
        .unwrap_err();
    assert_eq!(err.reason, CertificateReason::Expired);

    validator(&pki, ValidatorConfig::new().with_clock_skew(Duration::from_millis(500)))
        .validate(&leaf.chain(), now)
        .unwrap();
}

#[test]
fn clock_skew_tolerance_applies_to_not_before() {
    let pki = TestPki::new();
    let leaf = pki.issue_server(&LeafSpec::server().valid((2030, 1, 1), (2031, 1, 1)));
    let now = UnixTime::since_unix_epoch(Duration::from_secs(1_893_456_000 - 60));

    let err = validator(&pki, ValidatorConfig::new())
        .validate(&leaf.chain(), now)
        .unwrap_err();
    assert_eq!(err.reason, CertificateReason::NotYetValid);

    validator(
        &pki,
        ValidatorConfig::new().with_clock_skew(Duration::from_secs(120)),
    )
    .validate(&leaf.chain(), now)
    .unwrap();
}

#[test]
fn client_leaf_is_not_a_server_certificate() {
    let pki = TestPki::new();
    let err = validate(&pki.client.chain(), &pki.trust_anchors(), None).unwrap_err();
    assert_eq!(err.reason, CertificateReason::Malformed);
}
