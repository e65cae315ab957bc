//! TLS over TCP.
//!
//! A [Listener] accepts TCP connections and hands them out as
//! [Incoming], whose TLS handshake is done separately, usually in the
//! task that serves the peer. A [Dialer] opens TLS connections to a
//! remote address. Either way, the result is a [Connection].

use crate::codec::{BoxRead, BoxWrite, EnvelopeReader, EnvelopeWriter};
use crate::error::TransportError;
use crate::hostport::HostPort;
use crate::security::{self, ServerCredentials, TrustAnchors};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tlsbridge_types::Registry;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

/// Bind the given address and accept TLS connections on it, presenting
/// the given credentials.
pub async fn listen(
    address: &str,
    credentials: &ServerCredentials,
) -> Result<Listener, TransportError> {
    let acceptor = security::make_tls_acceptor(credentials)?;
    let hostport = HostPort::parse(address).await?;
    let tcp = TcpListener::bind(hostport.addr())
        .await
        .map_err(|source| TransportError::Bind {
            address: address.to_string(),
            source,
        })?;
    let local_addr = tcp.local_addr()?;
    log::info!("Listening for connections on {local_addr}");

    Ok(Listener {
        tcp: Some(tcp),
        acceptor,
        local_addr,
    })
}

/// A listening socket.
pub struct Listener {
    /// None once closed.
    tcp: Option<TcpListener>,
    acceptor: TlsAcceptor,
    local_addr: SocketAddr,
}

impl Listener {
    /// Wait for the next inbound connection.
    ///
    /// Fails with [TransportError::ListenerClosed] once the listener
    /// has been closed. Any other error means the socket is no longer
    /// usable.
    pub async fn accept(&mut self) -> Result<Incoming, TransportError> {
        let tcp = self.tcp.as_ref().ok_or(TransportError::ListenerClosed)?;
        let (stream, peer_addr) = tcp.accept().await.map_err(TransportError::Accept)?;

        Ok(Incoming {
            stream,
            peer_addr,
            acceptor: self.acceptor.clone(),
        })
    }

    /// Release the socket.
    pub fn close(&mut self) {
        if self.tcp.take().is_some() {
            log::info!("Stopped listening on {}", self.local_addr);
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// An accepted TCP connection, before the TLS handshake.
pub struct Incoming {
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
}

impl Incoming {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Run the server side of the TLS handshake.
    pub async fn handshake(self) -> Result<Connection, TransportError> {
        self.stream.set_nodelay(true)?;
        let tls = self
            .acceptor
            .accept(self.stream)
            .await
            .map_err(TransportError::from_handshake)?;

        Ok(Connection {
            stream: TlsStream::from(tls),
            peer_addr: self.peer_addr,
        })
    }
}

/// Opens TLS connections to a remote address.
///
/// The address is resolved again on every attempt, so a peer that
/// moved is found on the next dial.
pub struct Dialer {
    address: String,
    connector: TlsConnector,
    domain: Option<String>,
}

impl Dialer {
    /// Create a dialer that checks server certificates against
    /// `anchors`.
    ///
    /// The name checked is the host part of `address`, unless `domain`
    /// is set.
    pub fn new(
        address: &str,
        anchors: &TrustAnchors,
        domain: Option<String>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            address: address.to_string(),
            connector: security::make_tls_connector(anchors)?,
            domain,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect and run the TLS handshake.
    ///
    /// Fails with [TransportError::Timeout] if this takes longer than
    /// `timeout`, with [TransportError::Trust] if the server
    /// certificate isn't trusted.
    pub async fn dial(&self, timeout: Duration) -> Result<Connection, TransportError> {
        tokio::time::timeout(timeout, self.connect())
            .await
            .map_err(|_| TransportError::Timeout(self.address.clone()))?
    }

    async fn connect(&self) -> Result<Connection, TransportError> {
        let hostport = HostPort::parse(&self.address).await?;
        let server_name = hostport.server_name(self.domain.as_deref())?;
        let stream = TcpStream::connect(hostport.addr()).await?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let tls = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(TransportError::from_handshake)?;

        Ok(Connection {
            stream: TlsStream::from(tls),
            peer_addr,
        })
    }
}

/// An established TLS connection.
pub struct Connection {
    stream: TlsStream<TcpStream>,
    peer_addr: SocketAddr,
}

impl Connection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Split the connection into a read path and a write path that
    /// can be used from different tasks.
    ///
    /// The connection is closed once both halves are gone.
    pub fn split(self, registry: Arc<Registry>) -> (EnvelopeReader, EnvelopeWriter) {
        let (read, write) = tokio::io::split(self.stream);
        let read: BoxRead = Box::new(read);
        let write: BoxWrite = Box::new(write);

        (
            EnvelopeReader::new(read, Arc::clone(&registry)),
            EnvelopeWriter::new(write, registry),
        )
    }
}
