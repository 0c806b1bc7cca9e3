//! Bridge from the certificate validator into the rustls handshake.

use crate::error::{CertificateError, CertificateReason};
use crate::validator::CertificateValidator;
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::Arc;

/// Runs [`CertificateValidator`] on the server chain during the handshake.
///
/// The classified failure is kept so the channel can report it instead of
/// the generic rustls error.
#[derive(Debug)]
pub(crate) struct PeerVerifier {
    validator: CertificateValidator,
    provider: Arc<CryptoProvider>,
    failure: Mutex<Option<CertificateError>>,
}

impl PeerVerifier {
    pub(crate) fn new(validator: CertificateValidator, provider: Arc<CryptoProvider>) -> Self {
        Self {
            validator,
            provider,
            failure: Mutex::new(None),
        }
    }

    /// Takes the recorded validation failure, if any.
    pub(crate) fn take_failure(&self) -> Option<CertificateError> {
        self.failure.lock().take()
    }
}

impl ServerCertVerifier for PeerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let mut chain = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());

        let fallback = server_name.to_str();
        let identity = self
            .validator
            .config()
            .expected_identity
            .as_deref()
            .unwrap_or(&fallback);

        match self.validator.validate_for(&chain, Some(identity), now) {
            Ok(()) => Ok(ServerCertVerified::assertion()),
            Err(err) => {
                let mapped = to_rustls(err.reason);
                *self.failure.lock() = Some(err);
                Err(rustls::Error::InvalidCertificate(mapped))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn to_rustls(reason: CertificateReason) -> rustls::CertificateError {
    match reason {
        CertificateReason::UntrustedChain => rustls::CertificateError::UnknownIssuer,
        CertificateReason::Expired => rustls::CertificateError::Expired,
        CertificateReason::NotYetValid => rustls::CertificateError::NotValidYet,
        CertificateReason::BadSignature => rustls::CertificateError::BadSignature,
        CertificateReason::IdentityMismatch => rustls::CertificateError::NotValidForName,
        CertificateReason::PinMismatch => rustls::CertificateError::ApplicationVerificationFailure,
        CertificateReason::Malformed => rustls::CertificateError::BadEncoding,
    }
}
