//! Throwaway certificate authorities for TLS tests.
//!
//! Certificates are minted with `rcgen` at test time: a root, an
//! intermediate below it, and leaves for the server and the client.

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use twsync_tls::{Credentials, Fingerprint, TrustAnchors};

pub use rcgen::date_time_ymd;

/// Server name carried by the default server leaf.
pub const SERVER_NAME: &str = "localhost";

/// What a leaf certificate may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafUsage {
    /// TLS server authentication.
    Server,
    /// TLS client authentication.
    Client,
}

/// Parameters of a leaf certificate.
#[derive(Debug, Clone)]
pub struct LeafSpec {
    /// Common name.
    pub common_name: String,
    /// Subject alternative names (DNS names or IP addresses).
    pub names: Vec<String>,
    /// Extended key usage.
    pub usage: LeafUsage,
    /// Start of the validity period, `(year, month, day)`.
    pub not_before: (i32, u8, u8),
    /// End of the validity period, `(year, month, day)`.
    pub not_after: (i32, u8, u8),
}

impl LeafSpec {
    /// A server leaf for `localhost` and `127.0.0.1`.
    pub fn server() -> Self {
        Self {
            common_name: SERVER_NAME.into(),
            names: vec![SERVER_NAME.into(), "127.0.0.1".into()],
            usage: LeafUsage::Server,
            not_before: (2000, 1, 1),
            not_after: (4000, 1, 1),
        }
    }

    /// A client leaf for `name`.
    pub fn client(name: &str) -> Self {
        Self {
            common_name: name.into(),
            names: Vec::new(),
            usage: LeafUsage::Client,
            not_before: (2000, 1, 1),
            not_after: (4000, 1, 1),
        }
    }

    /// Replaces the subject alternative names.
    pub fn with_names(mut self, names: &[&str]) -> Self {
        self.names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Replaces the validity period.
    pub fn valid(mut self, not_before: (i32, u8, u8), not_after: (i32, u8, u8)) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    /// Makes the leaf expired since 2001.
    pub fn expired(self) -> Self {
        self.valid((2000, 1, 1), (2001, 1, 1))
    }

    /// Makes the leaf valid only from the year 3000.
    pub fn not_yet_valid(self) -> Self {
        self.valid((3000, 1, 1), (3001, 1, 1))
    }
}

/// A certificate authority able to sign intermediates and leaves.
pub struct Authority {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl Authority {
    /// Creates a self-signed root named `name`.
    pub fn root(name: &str) -> Self {
        let key = KeyPair::generate().expect("generate root key");
        let cert = ca_params(name)
            .self_signed(&key)
            .expect("self-sign root");
        Self { cert, key }
    }

    /// Creates an intermediate authority signed by `self`.
    pub fn intermediate(&self, name: &str) -> Self {
        let key = KeyPair::generate().expect("generate intermediate key");
        let cert = ca_params(name)
            .signed_by(&key, &self.cert, &self.key)
            .expect("sign intermediate");
        Self { cert, key }
    }

    /// Issues a leaf. The returned chain holds only the leaf.
    pub fn issue(&self, spec: &LeafSpec) -> Identity {
        let key = KeyPair::generate().expect("generate leaf key");
        let mut params = CertificateParams::new(spec.names.clone()).expect("leaf names");
        params
            .distinguished_name
            .push(DnType::CommonName, spec.common_name.as_str());
        let (year, month, day) = spec.not_before;
        params.not_before = date_time_ymd(year, month, day);
        let (year, month, day) = spec.not_after;
        params.not_after = date_time_ymd(year, month, day);
        params.extended_key_usages = vec![match spec.usage {
            LeafUsage::Server => ExtendedKeyUsagePurpose::ServerAuth,
            LeafUsage::Client => ExtendedKeyUsagePurpose::ClientAuth,
        }];
        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .expect("sign leaf");
        Identity {
            chain: vec![cert.der().clone()],
            chain_pem: cert.pem(),
            key: key.serialize_der(),
            key_pem: key.serialize_pem(),
        }
    }

    /// Returns the authority certificate.
    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// Returns the authority certificate as PEM.
    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    /// Returns a trust anchor set holding only this authority.
    pub fn trust_anchors(&self) -> TrustAnchors {
        TrustAnchors::from_der([self.der()]).expect("authority is a valid anchor")
    }
}

fn ca_params(name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("empty names");
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

/// A certificate chain (leaf first) with its private key.
#[derive(Clone)]
pub struct Identity {
    chain: Vec<CertificateDer<'static>>,
    chain_pem: String,
    key: Vec<u8>,
    key_pem: String,
}

impl Identity {
    /// Appends the issuing authority so the chain can be presented whole.
    pub fn with_issuer(mut self, authority: &Authority) -> Self {
        self.chain.push(authority.der());
        self.chain_pem.push_str(&authority.pem());
        self
    }

    /// Returns the chain, leaf first.
    pub fn chain(&self) -> Vec<CertificateDer<'static>> {
        self.chain.clone()
    }

    /// Returns the leaf.
    pub fn leaf(&self) -> CertificateDer<'static> {
        self.chain[0].clone()
    }

    /// Returns the leaf fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.chain[0].as_ref())
    }

    /// Returns the private key.
    pub fn key(&self) -> PrivateKeyDer<'static> {
        PrivatePkcs8KeyDer::from(self.key.clone()).into()
    }

    /// Returns the chain as concatenated PEM blocks.
    pub fn chain_pem(&self) -> String {
        self.chain_pem.clone()
    }

    /// Returns the private key as PEM.
    pub fn key_pem(&self) -> String {
        self.key_pem.clone()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("chain", &self.chain.len())
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// A ready-made PKI: root, intermediate, a server identity and a client
/// identity, both issued by the intermediate and carrying it in their
/// chains.
pub struct TestPki {
    /// Root authority trusted by both sides.
    pub root: Authority,
    /// Intermediate authority that issued both leaves.
    pub intermediate: Authority,
    /// Server identity for [`SERVER_NAME`].
    pub server: Identity,
    /// Client identity.
    pub client: Identity,
}

impl TestPki {
    /// Mints a fresh PKI.
    pub fn new() -> Self {
        let root = Authority::root("twsync test root");
        let intermediate = root.intermediate("twsync test intermediate");
        let server = intermediate
            .issue(&LeafSpec::server())
            .with_issuer(&intermediate);
        let client = intermediate
            .issue(&LeafSpec::client("alice"))
            .with_issuer(&intermediate);
        Self {
            root,
            intermediate,
            server,
            client,
        }
    }

    /// Issues another server identity from the intermediate.
    pub fn issue_server(&self, spec: &LeafSpec) -> Identity {
        self.intermediate.issue(spec).with_issuer(&self.intermediate)
    }

    /// Returns anchors holding the root.
    pub fn trust_anchors(&self) -> TrustAnchors {
        self.root.trust_anchors()
    }

    /// Returns client credentials that trust the root.
    pub fn client_credentials(&self) -> Credentials {
        self.credentials_for(&self.client)
    }

    /// Returns credentials presenting `identity` and trusting the root.
    pub fn credentials_for(&self, identity: &Identity) -> Credentials {
        Credentials::new(identity.chain(), identity.key(), self.trust_anchors())
            .expect("test credentials are complete")
    }
}

impl Default for TestPki {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls_pki_types::UnixTime;
    use twsync_tls::{CertificateValidator, ValidatorConfig};

    #[test]
    fn server_chain_validates_against_root() {
        let pki = TestPki::new();
        let validator = CertificateValidator::new(
            pki.trust_anchors(),
            ValidatorConfig::new().with_expected_identity(SERVER_NAME),
        );
        validator
            .validate(&pki.server.chain(), UnixTime::now())
            .unwrap();
    }

    #[test]
    fn pem_output_parses_back() {
        let pki = TestPki::new();
        let credentials = Credentials::from_pem(
            pki.client.chain_pem().as_bytes(),
            pki.client.key_pem().as_bytes(),
            pki.root.pem().as_bytes(),
        )
        .unwrap();
        assert_eq!(credentials.cert_chain(), pki.client.chain().as_slice());
    }
}
