use std::io;
use tlsbridge_types::RegistryError;

/// Errors reported while setting up or using TLS connections.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Certificate, key or trust anchors could not be loaded.
    #[error("invalid credentials: {0}")]
    Credential(String),

    #[error("invalid address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("cannot listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The listener was closed; it won't accept any more connections.
    #[error("listener closed")]
    ListenerClosed,

    /// The listening socket failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("connection to {0} timed out")]
    Timeout(String),

    /// The peer certificate was rejected.
    #[error("untrusted certificate: {0}")]
    Trust(#[source] rustls::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Classify an error returned by a TLS handshake.
    pub(crate) fn from_handshake(err: io::Error) -> Self {
        let rejected = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            .filter(|inner| matches!(inner, rustls::Error::InvalidCertificate(_)))
            .cloned();
        match rejected {
            Some(rustls_err) => TransportError::Trust(rustls_err),
            None => TransportError::Handshake(err),
        }
    }
}

/// Errors returned to the application by [crate::Bridge].
///
/// Network errors never show up here; they're handled by the
/// bridge's background tasks.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The bridge was closed.
    #[error("bridge closed")]
    Closed,

    /// The registry doesn't accept this envelope.
    #[error(transparent)]
    Rejected(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_error_with_bad_certificate_is_trust_error() {
        let err = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        assert!(matches!(
            TransportError::from_handshake(err),
            TransportError::Trust(rustls::Error::InvalidCertificate(
                rustls::CertificateError::UnknownIssuer
            ))
        ));
    }

    #[test]
    fn other_handshake_errors() {
        let err = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::General("boom".to_string()),
        );
        assert!(matches!(
            TransportError::from_handshake(err),
            TransportError::Handshake(_)
        ));

        let err = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(
            TransportError::from_handshake(err),
            TransportError::Handshake(_)
        ));
    }
}
