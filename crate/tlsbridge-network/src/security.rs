use crate::error::TransportError;
use rustls::pki_types::pem::PemObject as _;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub use rustls::crypto::aws_lc_rs::default_provider;

/// Certificate chain and private key presented by a server.
pub struct ServerCredentials {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ServerCredentials {
    /// Build credentials from an already parsed certificate chain and
    /// key. The chain starts with the server's own certificate.
    pub fn new(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, TransportError> {
        if cert_chain.is_empty() {
            return Err(TransportError::Credential(
                "no certificate in chain".to_string(),
            ));
        }

        Ok(Self { cert_chain, key })
    }

    /// Parse PEM-encoded certificate chain and private key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TransportError> {
        let cert_chain = parse_certificates(cert_pem)
            .map_err(|err| TransportError::Credential(format!("certificate: {err}")))?;
        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|err| TransportError::Credential(format!("private key: {err:?}")))?;

        Self::new(cert_chain, key)
    }

    /// Load PEM-encoded certificate chain and private key from files.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TransportError> {
        let cert_chain = parse_certificates(&read_file(cert_path)?)
            .map_err(|err| TransportError::Credential(format!("{}: {err}", cert_path.display())))?;
        let key = PrivateKeyDer::from_pem_slice(&read_file(key_path)?).map_err(|err| {
            TransportError::Credential(format!("{}: {err:?}", key_path.display()))
        })?;

        Self::new(cert_chain, key)
    }
}

impl Clone for ServerCredentials {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl fmt::Debug for ServerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCredentials")
            .field("cert_chain_len", &self.cert_chain.len())
            .finish_non_exhaustive()
    }
}

/// Certificates a client trusts to sign server certificates.
#[derive(Clone, Debug, Default)]
pub enum TrustAnchors {
    /// Root certificates of the host.
    #[default]
    System,

    /// An explicit set of root certificates.
    Certificates(Vec<CertificateDer<'static>>),
}

impl TrustAnchors {
    /// Parse PEM-encoded root certificates.
    pub fn from_pem(pem: &[u8]) -> Result<Self, TransportError> {
        let certs = parse_certificates(pem)
            .map_err(|err| TransportError::Credential(format!("trust anchors: {err}")))?;

        Ok(TrustAnchors::Certificates(certs))
    }

    /// Load PEM-encoded root certificates from a file.
    pub fn from_pem_file(path: &Path) -> Result<Self, TransportError> {
        let certs = parse_certificates(&read_file(path)?)
            .map_err(|err| TransportError::Credential(format!("{}: {err}", path.display())))?;

        Ok(TrustAnchors::Certificates(certs))
    }

    /// Build the root store used to verify servers.
    pub(crate) fn root_store(&self) -> Result<RootCertStore, TransportError> {
        let mut roots = RootCertStore::empty();
        match self {
            TrustAnchors::System => {
                let native = rustls_native_certs::load_native_certs();
                for err in &native.errors {
                    log::debug!("Skipping system certificate: {err}");
                }
                let (added, ignored) = roots.add_parsable_certificates(native.certs);
                log::debug!("Loaded {added} system root certificates ({ignored} ignored)");
            }
            TrustAnchors::Certificates(certs) => {
                for cert in certs {
                    roots.add(cert.clone()).map_err(|err| {
                        TransportError::Credential(format!("invalid trust anchor: {err}"))
                    })?;
                }
            }
        }
        if roots.is_empty() {
            return Err(TransportError::Credential(
                "no usable trust anchor".to_string(),
            ));
        }

        Ok(roots)
    }
}

/// Create a [TlsAcceptor] (server-side) presenting the given credentials.
///
/// Clients aren't asked for a certificate.
pub(crate) fn make_tls_acceptor(
    credentials: &ServerCredentials,
) -> Result<TlsAcceptor, TransportError> {
    let config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|err| TransportError::Credential(err.to_string()))?
        .with_no_client_auth()
        .with_single_cert(
            credentials.cert_chain.clone(),
            credentials.key.clone_key(),
        )
        .map_err(|err| TransportError::Credential(err.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Create a [TlsConnector] (client-side) that verifies servers
/// against the given trust anchors.
pub(crate) fn make_tls_connector(anchors: &TrustAnchors) -> Result<TlsConnector, TransportError> {
    let config = ClientConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|err| TransportError::Credential(err.to_string()))?
        .with_root_certificates(anchors.root_store()?)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("{err:?}"))?;
    if certs.is_empty() {
        return Err("no certificate found".to_string());
    }

    Ok(certs)
}

fn read_file(path: &Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path)
        .map_err(|err| TransportError::Credential(format!("{}: {err}", path.display())))
}
