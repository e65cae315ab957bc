//! Loops moving envelopes between the queues and the connections.

use crate::bridge::BridgeContext;
use crate::codec::{DecodeError, EnvelopeReader};
use crate::metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tlsbridge_types::Envelope;
use tokio::sync::mpsc;

/// Write envelopes from the outbound queue onto the current
/// connection, in order.
///
/// Envelopes wait in the queue until there's a connection. An
/// envelope that cannot be written is dropped.
pub(crate) async fn send_loop(mut outbound: mpsc::Receiver<Envelope>, ctx: Arc<BridgeContext>) {
    let shutdown = &ctx.shutdown;
    loop {
        let envelope = tokio::select!(
            _ = shutdown.cancelled() => break,
            envelope = outbound.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        );
        let conn = tokio::select!(
            _ = shutdown.cancelled() => break,
            conn = ctx.current.wait() => conn,
        );
        let res = tokio::select!(
            _ = shutdown.cancelled() => break,
            res = conn.send(&envelope) => res,
        );
        match res {
            Ok(()) => {
                metrics::METRIC_ENVELOPE_SENT_COUNT.inc();
                log::debug!("@{} Sent {}", conn.peer_addr(), envelope.kind);
            }
            Err(err) => {
                metrics::METRIC_ENCODE_ERROR_COUNT.inc();
                log::warn!(
                    "@{} Dropped envelope of type '{}': {err}",
                    conn.peer_addr(),
                    envelope.kind
                );
            }
        }
    }
    log::debug!("Send loop stopped");
}

/// Why [receive_loop] returned.
#[derive(Debug)]
pub(crate) enum ReceiveEnd {
    /// The bridge is shutting down.
    Shutdown,

    /// The connection is done. Nothing more can be read from it.
    Failed(DecodeError),
}

/// Push envelopes read from `reader` into the inbound queue until the
/// connection ends or the bridge shuts down.
///
/// Waits for room in the inbound queue before reading more.
pub(crate) async fn receive_loop(
    reader: &mut EnvelopeReader,
    peer_addr: SocketAddr,
    ctx: &BridgeContext,
) -> ReceiveEnd {
    let shutdown = &ctx.shutdown;
    loop {
        let res = tokio::select!(
            _ = shutdown.cancelled() => return ReceiveEnd::Shutdown,
            res = reader.decode() => res,
        );
        let envelope = match res {
            Ok(envelope) => envelope,
            Err(DecodeError::EndOfStream) => {
                log::info!("@{peer_addr} Connection closed by peer");
                return ReceiveEnd::Failed(DecodeError::EndOfStream);
            }
            Err(err) => {
                metrics::METRIC_DECODE_ERROR_COUNT
                    .with_label_values(&[err.reason()])
                    .inc();
                log::warn!("@{peer_addr} Dropping connection: {err}");
                return ReceiveEnd::Failed(err);
            }
        };
        metrics::METRIC_ENVELOPE_RECEIVED_COUNT.inc();
        log::debug!("@{peer_addr} Received {}", envelope.kind);

        tokio::select!(
            _ = shutdown.cancelled() => return ReceiveEnd::Shutdown,
            res = ctx.inbound.send(envelope) => {
                if res.is_err() {
                    return ReceiveEnd::Shutdown;
                }
            },
        );
    }
}
