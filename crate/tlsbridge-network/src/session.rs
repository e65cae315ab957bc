use crate::async_utils::sleep_or_cancel;
use crate::bridge::{BridgeContext, ConnectionState, Role};
use crate::metrics;
use crate::relay::{self, ReceiveEnd};
use crate::transport::Dialer;
use std::sync::Arc;

/// Keep a connection to the server open until the bridge shuts down.
///
/// Dials until a connection succeeds, then reads from it until it
/// fails, waits a bit and dials again. Failures are only logged;
/// this never gives up.
pub(crate) async fn client_loop(dialer: Dialer, ctx: Arc<BridgeContext>) {
    let timing = ctx.timing;
    let address = dialer.address().to_string();
    loop {
        ctx.set_state(ConnectionState::Connecting);
        let res = tokio::select!(
            _ = ctx.shutdown.cancelled() => break,
            res = dialer.dial(timing.dial_timeout) => res,
        );
        let conn = match res {
            Ok(conn) => conn,
            Err(err) => {
                metrics::METRIC_DIAL_FAILURE_COUNT.inc();
                log::warn!(
                    "@{address} Connection failed, retrying in {:?}: {err}",
                    timing.retry_delay
                );
                if !sleep_or_cancel(timing.retry_delay, &ctx.shutdown).await {
                    break;
                }
                continue;
            }
        };

        let peer_addr = conn.peer_addr();
        log::info!("@{address} Connected to {peer_addr}");
        metrics::METRIC_CONNECTION_COUNT
            .with_label_values(&[Role::Client.label()])
            .inc();
        let (mut reader, writer) = conn.split(Arc::clone(&ctx.registry));
        let id = ctx.install(peer_addr, writer);
        let end = relay::receive_loop(&mut reader, peer_addr, &ctx).await;
        if let ReceiveEnd::Shutdown = end {
            if let Some(conn) = ctx.uninstall(id, ConnectionState::NotConnected) {
                conn.close().await;
            }
            break;
        }

        // Straight from Connected to Connecting.
        ctx.uninstall(id, ConnectionState::Connecting);
        log::info!(
            "@{address} Connection lost, reconnecting in {:?}",
            timing.reconnect_delay
        );
        if !sleep_or_cancel(timing.reconnect_delay, &ctx.shutdown).await {
            break;
        }
    }
    ctx.set_state(ConnectionState::NotConnected);
}
