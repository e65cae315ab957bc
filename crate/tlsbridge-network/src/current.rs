use crate::codec::{EncodeError, EnvelopeWriter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tlsbridge_types::Envelope;
use tokio::sync::{Mutex, watch};

/// How long to wait for a peer to take the TLS close_notify.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// The write path of a connection, as used by the send loop.
pub(crate) struct OutboundConnection {
    id: u64,
    peer_addr: SocketAddr,
    writer: Mutex<EnvelopeWriter>,
}

impl OutboundConnection {
    pub(crate) fn new(id: u64, peer_addr: SocketAddr, writer: EnvelopeWriter) -> Self {
        Self {
            id,
            peer_addr,
            writer: Mutex::new(writer),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub(crate) async fn send(&self, envelope: &Envelope) -> Result<(), EncodeError> {
        self.writer.lock().await.encode(envelope).await
    }

    /// Tell the peer we're done writing, if it's still listening.
    pub(crate) async fn close(&self) {
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::debug!("@{} Failed to close connection: {err}", self.peer_addr),
            Err(_) => log::debug!("@{} Timed out closing connection", self.peer_addr),
        }
    }
}

/// The connection envelopes are currently sent on, if any.
///
/// Connections are kept in the order they registered. The current
/// connection is the one that registered last and is still open, so
/// when it goes away, sending falls back to the one before it.
///
/// A connection is never modified once registered, only added or
/// removed.
#[derive(Clone)]
pub(crate) struct CurrentConnection {
    tx: Arc<watch::Sender<Vec<Arc<OutboundConnection>>>>,
}

impl CurrentConnection {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(vec![]);

        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn get(&self) -> Option<Arc<OutboundConnection>> {
        self.tx.borrow().last().cloned()
    }

    /// Make `conn` current and return the connection it replaces.
    ///
    /// `then` is called before anyone else can see or change the
    /// connections.
    pub(crate) fn register(
        &self,
        conn: Arc<OutboundConnection>,
        then: impl FnOnce(),
    ) -> Option<Arc<OutboundConnection>> {
        let mut previous = None;
        self.tx.send_modify(|live| {
            previous = live.last().cloned();
            live.push(conn);
            then();
        });

        previous
    }

    /// Remove the connection with the given id and return it.
    ///
    /// If it was current, `then` is called with the connection that
    /// replaces it, before anyone else can see or change the
    /// connections.
    pub(crate) fn unregister(
        &self,
        id: u64,
        then: impl FnOnce(Option<&Arc<OutboundConnection>>),
    ) -> Option<Arc<OutboundConnection>> {
        let mut removed = None;
        self.tx.send_if_modified(|live| {
            let Some(pos) = live.iter().position(|c| c.id() == id) else {
                return false;
            };
            let was_current = pos + 1 == live.len();
            removed = Some(live.remove(pos));
            if was_current {
                then(live.last());
            }

            true
        });

        removed
    }

    /// Wait until a connection is registered and return the current
    /// one.
    ///
    /// Returns immediately if there is one already.
    pub(crate) async fn wait(&self) -> Arc<OutboundConnection> {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(conn) = rx.borrow_and_update().last().cloned() {
                return conn;
            }
            if rx.changed().await.is_err() {
                // The sender lives in self, so this can't happen.
                std::future::pending::<()>().await;
            }
        }
    }
}
