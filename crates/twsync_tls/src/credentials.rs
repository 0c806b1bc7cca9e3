//! Client credentials and trust anchors.
//!
//! Both are plain values parsed from in-memory PEM or DER. Reading them
//! from disk is left to the caller.

use crate::error::CredentialsError;
use rustls_pki_types::pem::{self, PemObject};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, TrustAnchor};
use std::fmt;

/// Certificates the client accepts as roots of a server chain.
#[derive(Clone, Default)]
pub struct TrustAnchors {
    anchors: Vec<TrustAnchor<'static>>,
    certificates: Vec<CertificateDer<'static>>,
}

impl TrustAnchors {
    /// Creates an empty anchor set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every certificate in a PEM bundle.
    ///
    /// # Errors
    ///
    /// Fails if the bundle holds no certificate or one cannot be used as
    /// an anchor.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CredentialsError> {
        let certificates = parse_certificates(pem)?;
        Self::from_der(certificates)
    }

    /// Builds an anchor set from DER certificates.
    pub fn from_der(
        certificates: impl IntoIterator<Item = CertificateDer<'static>>,
    ) -> Result<Self, CredentialsError> {
        let mut anchors = Self::new();
        for certificate in certificates {
            anchors.add(certificate)?;
        }
        Ok(anchors)
    }

    /// Adds one trusted certificate.
    pub fn add(&mut self, certificate: CertificateDer<'static>) -> Result<(), CredentialsError> {
        let anchor = webpki::anchor_from_trusted_cert(&certificate)
            .map_err(|e| CredentialsError::Invalid(format!("unusable trust anchor: {e}")))?
            .to_owned();
        self.anchors.push(anchor);
        self.certificates.push(certificate);
        Ok(())
    }

    /// Returns the parsed anchors.
    pub fn anchors(&self) -> &[TrustAnchor<'static>] {
        &self.anchors
    }

    /// Returns the anchor certificates as given.
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    /// Returns the number of anchors.
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Returns true if no anchor has been added.
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

impl fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchors")
            .field("len", &self.anchors.len())
            .finish()
    }
}

/// Client certificate chain, private key and server trust anchors.
///
/// Immutable once built; a channel borrows it only while opening.
pub struct Credentials {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    anchors: TrustAnchors,
}

impl Credentials {
    /// Assembles credentials from parsed parts.
    pub fn new(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        anchors: TrustAnchors,
    ) -> Result<Self, CredentialsError> {
        if cert_chain.is_empty() {
            return Err(CredentialsError::NoCertificate);
        }
        if anchors.is_empty() {
            return Err(CredentialsError::Invalid("no trust anchors".into()));
        }
        Ok(Self {
            cert_chain,
            key,
            anchors,
        })
    }

    /// Parses a client certificate chain, its key and a CA bundle.
    pub fn from_pem(
        cert_chain_pem: &[u8],
        key_pem: &[u8],
        ca_pem: &[u8],
    ) -> Result<Self, CredentialsError> {
        let cert_chain = parse_certificates(cert_chain_pem)?;
        let key = PrivateKeyDer::from_pem_slice(key_pem).map_err(|e| match e {
            pem::Error::NoItemsFound => CredentialsError::NoPrivateKey,
            other => CredentialsError::Pem(other.to_string()),
        })?;
        let anchors = TrustAnchors::from_pem(ca_pem)?;
        Self::new(cert_chain, key, anchors)
    }

    /// Returns the client certificate chain, leaf first.
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    /// Returns the client private key.
    pub fn key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    /// Returns the server trust anchors.
    pub fn anchors(&self) -> &TrustAnchors {
        &self.anchors
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
            anchors: self.anchors.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cert_chain", &self.cert_chain.len())
            .field("anchors", &self.anchors)
            .finish_non_exhaustive()
    }
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, CredentialsError> {
    let certificates = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CredentialsError::Pem(e.to_string()))?;
    if certificates.is_empty() {
        return Err(CredentialsError::NoCertificate);
    }
    Ok(certificates)
}
