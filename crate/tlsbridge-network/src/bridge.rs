use crate::acceptor;
use crate::codec::EnvelopeWriter;
use crate::current::{CurrentConnection, OutboundConnection};
use crate::error::{BridgeError, TransportError};
use crate::relay;
use crate::security::{ServerCredentials, TrustAnchors};
use crate::session;
use crate::transport::{self, Dialer};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tlsbridge_types::{Envelope, Registry};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Number of envelopes each queue holds before [Bridge::send] or the
/// readers have to wait.
pub const QUEUE_CAPACITY: usize = 100;

/// How long a client waits for a connection to the server to be
/// established.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// How long a client waits after a failed connection attempt.
pub const RETRY_DELAY: Duration = Duration::from_secs(3);

/// How long a client waits before reconnecting after losing its
/// connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepts connections.
    Server,

    /// Connects to a server.
    Client,
}

impl Role {
    /// Short name, used as metric label.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether a bridge has a connection to send envelopes on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,

    /// Client only: a connection is being established, or will be
    /// once the retry delay is over.
    Connecting,

    Connected,
}

/// State of the listener of a server bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptorState {
    Listening,

    /// No new connection will be accepted anymore.
    Stopped,
}

/// Options for [Bridge::client].
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    /// Name to check the server certificate against instead of the
    /// host part of the remote address.
    pub domain: Option<String>,
}

/// Delays used by the client loop.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Timing {
    pub(crate) dial_timeout: Duration,
    pub(crate) retry_delay: Duration,
    pub(crate) reconnect_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            dial_timeout: DIAL_TIMEOUT,
            retry_delay: RETRY_DELAY,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// State shared by the background tasks of a bridge.
pub(crate) struct BridgeContext {
    pub(crate) registry: Arc<Registry>,
    pub(crate) current: CurrentConnection,
    pub(crate) inbound: mpsc::Sender<Envelope>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tracker: TaskTracker,
    pub(crate) timing: Timing,
    state: watch::Sender<ConnectionState>,
    next_id: AtomicU64,
}

impl BridgeContext {
    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;

            true
        });
    }

    /// Make the write path of a new connection the current one.
    ///
    /// Returns an id to pass to [BridgeContext::uninstall].
    pub(crate) fn install(&self, peer_addr: SocketAddr, writer: EnvelopeWriter) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(OutboundConnection::new(id, peer_addr, writer));
        let previous = self
            .current
            .register(conn, || self.set_state(ConnectionState::Connected));
        if let Some(previous) = previous {
            log::debug!(
                "@{} Outbound connection replaced by @{peer_addr}",
                previous.peer_addr()
            );
        }

        id
    }

    /// Forget the connection installed as `id` and return it.
    ///
    /// If it was current, the connection installed before it that is
    /// still open becomes current. If there is none, the state becomes
    /// `idle`.
    pub(crate) fn uninstall(
        &self,
        id: u64,
        idle: ConnectionState,
    ) -> Option<Arc<OutboundConnection>> {
        self.current.unregister(id, |replacement| match replacement {
            Some(conn) => {
                log::debug!("@{} Outbound connection is current again", conn.peer_addr());
            }
            None => self.set_state(idle),
        })
    }
}

/// A bidirectional envelope pipe to a peer.
///
/// Connecting, reconnecting and moving envelopes from and to the
/// network is done by background tasks that run until
/// [Bridge::close] is called or the bridge is dropped.
pub struct Bridge {
    role: Role,
    ctx: Arc<BridgeContext>,
    outbound: mpsc::Sender<Envelope>,
    inbound: Mutex<mpsc::Receiver<Envelope>>,
    state: watch::Receiver<ConnectionState>,
    acceptor_state: Option<watch::Receiver<AcceptorState>>,
    local_addr: Option<SocketAddr>,
}

impl Bridge {
    /// Listen on `listen_address` and exchange envelopes with whoever
    /// connects.
    ///
    /// Envelopes from all peers end up in the same inbound queue.
    /// Envelopes are sent to the peer that connected last, among those
    /// that are still connected.
    pub async fn server(
        listen_address: &str,
        credentials: &ServerCredentials,
        registry: Arc<Registry>,
    ) -> Result<Self, TransportError> {
        let listener = transport::listen(listen_address, credentials).await?;
        let local_addr = listener.local_addr();
        let (state_tx, state_rx) = watch::channel(AcceptorState::Listening);

        let mut bridge = Self::start(Role::Server, registry, Timing::default());
        bridge.local_addr = Some(local_addr);
        bridge.acceptor_state = Some(state_rx);
        bridge.ctx.tracker.spawn(acceptor::accept_loop(
            listener,
            Arc::clone(&bridge.ctx),
            state_tx,
        ));

        Ok(bridge)
    }

    /// Same as [Bridge::server], with credentials read from PEM files.
    pub async fn server_from_files(
        listen_address: &str,
        cert_path: &Path,
        key_path: &Path,
        registry: Arc<Registry>,
    ) -> Result<Self, TransportError> {
        let credentials = ServerCredentials::from_pem_files(cert_path, key_path)?;

        Self::server(listen_address, &credentials, registry).await
    }

    /// Connect to the server at `remote_address` and stay connected.
    ///
    /// This returns immediately; the connection is established in the
    /// background. Envelopes sent in the meantime wait in the queue.
    ///
    /// Must be called from within a tokio runtime.
    pub fn client(
        remote_address: &str,
        anchors: &TrustAnchors,
        registry: Arc<Registry>,
        options: ClientOptions,
    ) -> Result<Self, TransportError> {
        Self::start_client(remote_address, anchors, registry, options, Timing::default())
    }

    /// Same as [Bridge::client], trusting the certificates of the given
    /// PEM file.
    pub fn client_from_file(
        remote_address: &str,
        trust_anchor_path: &Path,
        registry: Arc<Registry>,
    ) -> Result<Self, TransportError> {
        let anchors = TrustAnchors::from_pem_file(trust_anchor_path)?;

        Self::client(remote_address, &anchors, registry, ClientOptions::default())
    }

    pub(crate) fn start_client(
        remote_address: &str,
        anchors: &TrustAnchors,
        registry: Arc<Registry>,
        options: ClientOptions,
        timing: Timing,
    ) -> Result<Self, TransportError> {
        let dialer = Dialer::new(remote_address, anchors, options.domain)?;
        let bridge = Self::start(Role::Client, registry, timing);
        bridge
            .ctx
            .tracker
            .spawn(session::client_loop(dialer, Arc::clone(&bridge.ctx)));

        Ok(bridge)
    }

    fn start(role: Role, registry: Arc<Registry>, timing: Timing) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::NotConnected);
        let ctx = Arc::new(BridgeContext {
            registry,
            current: CurrentConnection::new(),
            inbound: inbound_tx,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            timing,
            state: state_tx,
            next_id: AtomicU64::new(1),
        });
        ctx.tracker.spawn(relay::send_loop(outbound_rx, Arc::clone(&ctx)));

        Self {
            role,
            ctx,
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            state: state_rx,
            acceptor_state: None,
            local_addr: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Address the server listens on. None for clients.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// State of the listener. None for clients.
    pub fn acceptor_state(&self) -> Option<watch::Receiver<AcceptorState>> {
        self.acceptor_state.clone()
    }

    /// Queue an envelope for sending.
    ///
    /// Waits only if the outbound queue is full. Returning doesn't mean
    /// the envelope was sent; if it later fails to be written, it is
    /// logged and dropped.
    pub async fn send(&self, envelope: Envelope) -> Result<(), BridgeError> {
        if self.ctx.shutdown.is_cancelled() {
            return Err(BridgeError::Closed);
        }
        self.ctx.registry.check(&envelope)?;

        tokio::select!(
            biased;
            _ = self.ctx.shutdown.cancelled() => Err(BridgeError::Closed),
            res = self.outbound.send(envelope) => res.map_err(|_| BridgeError::Closed),
        )
    }

    /// Wait for the next envelope from the peer.
    pub async fn receive(&self) -> Result<Envelope, BridgeError> {
        let shutdown = &self.ctx.shutdown;
        let mut inbound = tokio::select!(
            biased;
            _ = shutdown.cancelled() => return Err(BridgeError::Closed),
            inbound = self.inbound.lock() => inbound,
        );

        tokio::select!(
            biased;
            _ = shutdown.cancelled() => Err(BridgeError::Closed),
            envelope = inbound.recv() => envelope.ok_or(BridgeError::Closed),
        )
    }

    /// Stop the bridge.
    ///
    /// Returns once all background tasks are done, that is, once the
    /// listener and all connections are closed. Envelopes still in the
    /// queues are dropped.
    pub async fn close(&self) {
        self.ctx.shutdown.cancel();
        self.ctx.tracker.close();
        self.ctx.tracker.wait().await;
        self.ctx.set_state(ConnectionState::NotConnected);
        log::debug!("{} bridge closed", self.role);
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.ctx.shutdown.cancel();
    }
}
