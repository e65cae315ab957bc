use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use prometheus::{Encoder as _, IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec};
use tokio::net::TcpListener;

lazy_static::lazy_static! {
    pub(crate) static ref METRIC_ENVELOPE_SENT_COUNT: IntCounter =
        register_int_counter!(
            "tlsbridge_envelope_sent_count",
            "Number of envelopes written to a peer").unwrap();
    pub(crate) static ref METRIC_ENVELOPE_RECEIVED_COUNT: IntCounter =
        register_int_counter!(
            "tlsbridge_envelope_received_count",
            "Number of envelopes read from a peer").unwrap();
    pub(crate) static ref METRIC_ENCODE_ERROR_COUNT: IntCounter =
        register_int_counter!(
            "tlsbridge_encode_error_count",
            "Number of envelopes that could not be sent and were dropped").unwrap();
    pub(crate) static ref METRIC_DECODE_ERROR_COUNT: IntCounterVec =
        register_int_counter_vec!(
            "tlsbridge_decode_error_count",
            "Number of connections dropped because of a read error",
            &["reason"]).unwrap();
    pub(crate) static ref METRIC_CONNECTION_COUNT: IntCounterVec =
        register_int_counter_vec!(
            "tlsbridge_connection_count",
            "Number of TLS connections established, by role",
            &["role"]).unwrap();
    pub(crate) static ref METRIC_DIAL_FAILURE_COUNT: IntCounter =
        register_int_counter!(
            "tlsbridge_dial_failure_count",
            "Number of failed attempts at connecting to the server").unwrap();
}

/// Serve metrics on `/metrics` at the given address.
///
/// The server runs in the background for as long as the runtime. Each
/// scraper is served by its own task, so a slow one doesn't hold up
/// the others.
pub async fn export_metrics(metrics_addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(metrics_addr).await?;
    let local_addr = listener.local_addr()?;
    log::info!("[metrics] server listening on {local_addr}");
    tokio::spawn(async move {
        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(err) => {
                    log::debug!("[metrics] accept on {local_addr} failed: {err}");
                    continue;
                }
            };
            tokio::spawn(async move {
                let res = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), hyper::service::service_fn(serve_metrics))
                    .await;
                if let Err(err) = res {
                    log::debug!("[metrics] connection failed: {err}");
                }
            });
        }
    });

    Ok(())
}

async fn serve_metrics(
    req: hyper::Request<hyper::body::Incoming>,
) -> anyhow::Result<hyper::Response<String>> {
    if req.uri().path() != "/metrics" {
        return Ok(hyper::Response::builder()
            .status(hyper::StatusCode::NOT_FOUND)
            .body("Not found".to_string())?);
    }

    let metrics = prometheus::gather();
    let encoder = prometheus::TextEncoder::new();

    Ok(hyper::Response::builder()
        .status(hyper::StatusCode::OK)
        .header(
            hyper::header::CONTENT_TYPE,
            encoder.format_type().to_string(),
        )
        .body(encoder.encode_to_string(&metrics)?)?)
}
