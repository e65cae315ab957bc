use crate::bridge::{AcceptorState, BridgeContext, ConnectionState, Role};
use crate::error::TransportError;
use crate::metrics;
use crate::relay::{self, ReceiveEnd};
use crate::transport::{Incoming, Listener};
use std::sync::Arc;
use tokio::sync::watch;

/// Accept peers until the listener fails or the bridge shuts down.
///
/// Each peer is served by its own task. Once this returns, the
/// listener is closed and no new peer is ever accepted; peers that
/// are already connected are still served.
pub(crate) async fn accept_loop(
    mut listener: Listener,
    ctx: Arc<BridgeContext>,
    state: watch::Sender<AcceptorState>,
) {
    loop {
        let res = tokio::select!(
            _ = ctx.shutdown.cancelled() => break,
            res = listener.accept() => res,
        );
        match res {
            Ok(incoming) => {
                ctx.tracker.spawn(serve_inbound(incoming, Arc::clone(&ctx)));
            }
            Err(TransportError::ListenerClosed) => break,
            Err(err) => {
                log::error!(
                    "Listener on {} failed, no longer accepting connections: {err}",
                    listener.local_addr()
                );
                break;
            }
        }
    }
    listener.close();
    state.send_replace(AcceptorState::Stopped);
}

/// Serve one peer: make it the current connection and feed what it
/// sends into the inbound queue.
async fn serve_inbound(incoming: Incoming, ctx: Arc<BridgeContext>) {
    let peer_addr = incoming.peer_addr();
    let res = tokio::select!(
        _ = ctx.shutdown.cancelled() => return,
        res = incoming.handshake() => res,
    );
    let conn = match res {
        Ok(conn) => conn,
        Err(err) => {
            log::debug!("@{peer_addr} Connection rejected: {err}");
            return;
        }
    };
    log::info!("@{peer_addr} Accepted connection");
    metrics::METRIC_CONNECTION_COUNT
        .with_label_values(&[Role::Server.label()])
        .inc();

    let (mut reader, writer) = conn.split(Arc::clone(&ctx.registry));
    let id = ctx.install(peer_addr, writer);
    let end = relay::receive_loop(&mut reader, peer_addr, &ctx).await;
    let conn = ctx.uninstall(id, ConnectionState::NotConnected);
    if let (ReceiveEnd::Shutdown, Some(conn)) = (end, conn) {
        conn.close().await;
    }
}
