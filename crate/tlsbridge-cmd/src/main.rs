//! Command-line bridge between stdin/stdout and a TLS peer.

mod logging;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use futures_util::stream::StreamExt as _;
use prometheus::{IntCounter, register_int_counter};
use signal_hook_tokio::Signals;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tlsbridge_network::config::{BridgeConfig, ClientConfig, ServerConfig};
use tlsbridge_network::{Bridge, Envelope, Registry, metrics};
use tokio::io::{AsyncBufReadExt as _, BufReader};

/// Exchange lines of text with a peer over TLS.
///
/// Each line read from stdin is sent to the peer as an envelope of
/// the type given by --kind. Envelopes received from the peer are
/// written to stdout as type<TAB>content. Stop it with SIGTERM or
/// SIGINT.
///
/// A server sends to the peer that connected last. A client
/// reconnects whenever it loses its connection.
///
/// By default, outputs errors and warnings to stderr. To configure
/// the output, set the env variable RUST_LOG. Set the env variable
/// RUST_LOG_FORMAT=SYSTEMD to a systemd-friendly log output.
#[derive(Parser, Debug)]
#[command(name = "tlsbridge", author, version, about, long_about, verbatim_doc_comment)]
struct Cli {
    /// Path to a TOML configuration file, instead of a subcommand
    #[arg(long)]
    config: Option<PathBuf>,

    /// Type of the envelopes sent for each line of input
    #[arg(long, default_value = "text")]
    kind: String,

    /// Address to export prometheus metrics (host:port, optional)
    #[arg(long)]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections from peers
    Serve {
        /// TCP address to listen on
        #[arg(long)]
        address: String,

        /// Path to the PEM-encoded certificate chain
        #[arg(long)]
        cert: PathBuf,

        /// Path to the PEM-encoded private key
        #[arg(long)]
        key: PathBuf,
    },

    /// Connect to a server
    Connect {
        /// Address of the server (host:port)
        #[arg(long)]
        address: String,

        /// PEM file of the certificates to trust (default: system roots)
        #[arg(long)]
        trust: Option<PathBuf>,

        /// Name to check the server certificate against, if not the
        /// host of --address
        #[arg(long)]
        domain: Option<String>,
    },
}

impl From<Command> for BridgeConfig {
    fn from(command: Command) -> Self {
        match command {
            Command::Serve { address, cert, key } => BridgeConfig {
                server: Some(ServerConfig { address, cert, key }),
                client: None,
            },
            Command::Connect {
                address,
                trust,
                domain,
            } => BridgeConfig {
                server: None,
                client: Some(ClientConfig {
                    address,
                    trust,
                    domain,
                }),
            },
        }
    }
}

lazy_static::lazy_static! {
    static ref METRIC_UP: IntCounter =
        register_int_counter!("tlsbridge_up", "Bridge is up").unwrap();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&["tlsbridge", "tlsbridge_network"]);

    if let Err(err) = execute(cli).await {
        eprintln!("ERROR: {err:#}");
        process::exit(1);
    };

    // Don't wait for the read on stdin, which can't be interrupted.
    process::exit(0);
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = match (cli.config, cli.command) {
        (Some(path), None) => BridgeConfig::load(&path)?,
        (None, Some(command)) => BridgeConfig::from(command),
        (Some(_), Some(_)) => anyhow::bail!("--config cannot be combined with a subcommand"),
        (None, None) => anyhow::bail!("either --config or a subcommand is required"),
    };

    if let Some(addr) = &cli.metrics_addr {
        metrics::export_metrics(addr)
            .await
            .with_context(|| format!("Failed to export metrics on {addr}"))?;
        log::info!("Metrics available on http://{addr}/metrics");
    }

    let bridge = config.open(Arc::new(Registry::permissive())).await?;
    if let Some(addr) = bridge.local_addr() {
        log::info!("Listening on {addr}");
        println!("Listening on {addr}");
    }

    let mut signals = Signals::new([
        signal_hook::consts::SIGHUP,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGQUIT,
    ])?;
    METRIC_UP.inc();

    tokio::select!(
        _ = signals.next() => {
            log::info!("Interrupted. Shutting down..");
        }
        res = async {
            forward_stdin(&bridge, &cli.kind).await?;
            std::future::pending::<anyhow::Result<()>>().await
        } => res?,
        res = print_received(&bridge) => res?,
    );
    signals.handle().close(); // A 2nd signal kills the process
    bridge.close().await;

    Ok(())
}

/// Send each line of stdin to the peer, until stdin ends.
async fn forward_stdin(bridge: &Bridge, kind: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        bridge.send(Envelope::new(kind, line)).await?;
    }
    log::info!("End of input");

    Ok(())
}

/// Write envelopes received from the peer to stdout.
async fn print_received(bridge: &Bridge) -> anyhow::Result<()> {
    loop {
        let envelope = bridge.receive().await?;
        println!("{envelope}");
    }
}
