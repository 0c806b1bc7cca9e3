//! Server certificate chain validation.
//!
//! The whole chain is checked against the trust anchors: path to an
//! anchor, validity period of every certificate, every signature, the
//! server identity and an optional leaf pin. The first failure rejects the
//! chain; there is no warn-and-continue mode.

use crate::credentials::TrustAnchors;
use crate::error::{CertificateError, CertificateReason, CredentialsError};
use rustls::crypto::CryptoProvider;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use webpki::{EndEntityCert, KeyUsage};

/// SHA-256 digest of a DER-encoded certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Computes the fingerprint of a DER certificate.
    pub fn of(der: &[u8]) -> Self {
        Self(Sha256::digest(der).into())
    }

    /// Parses a hex fingerprint. Colons between bytes are accepted.
    pub fn from_hex(text: &str) -> Result<Self, CredentialsError> {
        let compact: String = text.chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(compact)
            .map_err(|e| CredentialsError::Invalid(format!("invalid fingerprint: {e}")))?;
        let digest: [u8; 32] = bytes.try_into().map_err(|_| {
            CredentialsError::Invalid("fingerprint must be 32 bytes of SHA-256".into())
        })?;
        Ok(Self(digest))
    }

    /// Returns the raw digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Validation options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorConfig {
    /// Name the server leaf must be valid for. A channel falls back to
    /// its server name when this is unset.
    pub expected_identity: Option<String>,
    /// Required fingerprint of the server leaf.
    pub pin: Option<Fingerprint>,
    /// Tolerance applied to both ends of every validity period.
    /// Certificate times have whole-second precision, so a fractional
    /// tolerance is rounded up to the next second.
    pub clock_skew: Duration,
}

impl ValidatorConfig {
    /// Creates a configuration with no identity, no pin and no skew.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expected server identity.
    pub fn with_expected_identity(mut self, identity: impl Into<String>) -> Self {
        self.expected_identity = Some(identity.into());
        self
    }

    /// Pins the server leaf.
    pub fn with_pin(mut self, pin: Fingerprint) -> Self {
        self.pin = Some(pin);
        self
    }

    /// Sets the clock skew tolerance.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }
}

/// Validate a peer chain with the current time and default options.
///
/// `peer_chain` is leaf first. `expected_identity`, when given, must be a
/// DNS name or IP address the leaf is valid for.
pub fn validate(
    peer_chain: &[CertificateDer<'_>],
    trust_anchors: &TrustAnchors,
    expected_identity: Option<&str>,
) -> Result<(), CertificateError> {
    let mut config = ValidatorConfig::new();
    config.expected_identity = expected_identity.map(str::to_string);
    CertificateValidator::new(trust_anchors.clone(), config).validate(peer_chain, UnixTime::now())
}

/// Checks server chains against a fixed set of anchors.
#[derive(Debug, Clone)]
pub struct CertificateValidator {
    anchors: TrustAnchors,
    config: ValidatorConfig,
    provider: Arc<CryptoProvider>,
}

impl CertificateValidator {
    /// Creates a validator using the `ring` provider's algorithms.
    pub fn new(anchors: TrustAnchors, config: ValidatorConfig) -> Self {
        Self::with_provider(
            anchors,
            config,
            Arc::new(rustls::crypto::ring::default_provider()),
        )
    }

    /// Creates a validator using `provider`'s signature algorithms.
    pub fn with_provider(
        anchors: TrustAnchors,
        config: ValidatorConfig,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            anchors,
            config,
            provider,
        }
    }

    /// Returns the validation options.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validates `chain` (leaf first) as of `now`, checking the configured
    /// identity if any.
    pub fn validate(
        &self,
        chain: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), CertificateError> {
        let identity = self.config.expected_identity.as_deref();
        self.validate_for(chain, identity, now)
    }

    /// Validates `chain` as of `now` against an explicit identity.
    pub fn validate_for(
        &self,
        chain: &[CertificateDer<'_>],
        identity: Option<&str>,
        now: UnixTime,
    ) -> Result<(), CertificateError> {
        let (leaf, intermediates) = chain.split_first().ok_or_else(|| {
            CertificateError::new(CertificateReason::Malformed, "peer sent no certificate")
        })?;
        let cert = EndEntityCert::try_from(leaf).map_err(|e| classify(e, "leaf"))?;

        self.verify_path(&cert, intermediates, now)?;

        if let Some(identity) = identity {
            let name = ServerName::try_from(identity).map_err(|_| {
                CertificateError::new(
                    CertificateReason::IdentityMismatch,
                    format!("'{identity}' is not a valid server identity"),
                )
            })?;
            cert.verify_is_valid_for_subject_name(&name)
                .map_err(|e| classify(e, identity))?;
        }

        if let Some(pin) = &self.config.pin {
            let actual = Fingerprint::of(leaf.as_ref());
            if actual != *pin {
                return Err(CertificateError::new(
                    CertificateReason::PinMismatch,
                    format!("leaf fingerprint {actual} does not match pin {pin}"),
                ));
            }
        }

        Ok(())
    }

    /// Builds and checks the path, retrying once with the clock shifted by
    /// the skew tolerance when only a validity period failed.
    fn verify_path(
        &self,
        cert: &EndEntityCert<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), CertificateError> {
        let first = self.verify_at(cert, intermediates, now);
        let skew = whole_seconds(self.config.clock_skew);
        let shifted = match &first {
            Err(webpki::Error::CertExpired { .. }) if skew > 0 => {
                now.as_secs().saturating_sub(skew)
            }
            Err(webpki::Error::CertNotValidYet { .. }) if skew > 0 => {
                now.as_secs().saturating_add(skew)
            }
            _ => return first.map_err(|e| classify(e, "chain")),
        };
        let shifted = UnixTime::since_unix_epoch(Duration::from_secs(shifted));
        self.verify_at(cert, intermediates, shifted)
            .map_err(|e| classify(e, "chain"))
    }

    fn verify_at(
        &self,
        cert: &EndEntityCert<'_>,
        intermediates: &[CertificateDer<'_>],
        time: UnixTime,
    ) -> Result<(), webpki::Error> {
        cert.verify_for_usage(
            self.provider.signature_verification_algorithms.all,
            self.anchors.anchors(),
            intermediates,
            time,
            KeyUsage::server_auth(),
            None,
            None,
        )
        .map(|_| ())
    }
}

fn whole_seconds(skew: Duration) -> u64 {
    skew.as_secs() + u64::from(skew.subsec_nanos() > 0)
}

fn classify(error: webpki::Error, subject: &str) -> CertificateError {
    use webpki::Error as E;

    let reason = match &error {
        E::UnknownIssuer => CertificateReason::UntrustedChain,
        E::CertExpired { .. } => CertificateReason::Expired,
        E::CertNotValidYet { .. } => CertificateReason::NotYetValid,
        E::InvalidSignatureForPublicKey
        | E::SignatureAlgorithmMismatch
        | E::UnsupportedSignatureAlgorithmContext(_)
        | E::UnsupportedSignatureAlgorithmForPublicKeyContext(_) => {
            CertificateReason::BadSignature
        }
        E::CertNotValidForName(_) => CertificateReason::IdentityMismatch,
        _ => CertificateReason::Malformed,
    };
    CertificateError::new(reason, format!("{subject}: {error}"))
}
