use crate::error::AppError;
use bridgetap_core::BRIDGE_PORT;
use bridgetap_core::capture::CaptureBuffer;
use bridgetap_core::sink::ByteSink;
use bridgetap_server::listen::{RelayMode, RelayServer, ServerConfig};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::lookup_host;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Forward both directions to the real collector.
    Relay,
    /// Terminate locally, acknowledge chunks, capture traffic to pcap.
    Spoof,
    /// Log all received bytes, never forward.
    Sink,
}

#[derive(Debug, Parser, Default)]
struct PreCli {
    /// Optional `.env` file path for loading environment variables.
    #[clap(short, long, value_name = "ENV_FILE")]
    env_file: Option<String>,
}

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Deployment variant to run.
    #[clap(
        short,
        long,
        value_name = "MODE",
        env = "BRIDGETAP_MODE",
        default_value = "relay",
        value_enum
    )]
    mode: Mode,

    /// Port to listen on for bridge connections.
    #[clap(
        short = 'p',
        long,
        value_name = "LOCAL_PORT",
        env = "BRIDGETAP_LOCAL_PORT",
        default_value = "8051"
    )]
    local_port: u16,

    /// Collector host to relay to, e.g. col.panpwrws.com or 192.168.0.10.
    #[clap(
        long,
        value_name = "REMOTE_HOST",
        env = "BRIDGETAP_REMOTE_HOST",
        default_value = "col.panpwrws.com"
    )]
    remote_host: String,

    /// Collector port to relay to.
    #[clap(
        long,
        value_name = "REMOTE_PORT",
        env = "BRIDGETAP_REMOTE_PORT",
        default_value = "8051"
    )]
    remote_port: u16,

    /// Capture output file; defaults to bridge_capture.pcap in spoof mode.
    #[clap(long, value_name = "PCAP_FILE", env = "BRIDGETAP_PCAP_FILE")]
    pcap_file: Option<PathBuf>,

    /// Host used as the collector endpoint of synthetic capture frames.
    #[clap(
        long,
        value_name = "CAPTURE_HOST",
        env = "BRIDGETAP_CAPTURE_HOST",
        default_value = "col.panpwrws.com"
    )]
    capture_host: String,

    /// Raw byte log written in sink mode.
    #[clap(
        long,
        value_name = "DATA_LOG",
        env = "BRIDGETAP_DATA_LOG",
        default_value = "bridge_data.log"
    )]
    data_log: PathBuf,

    /// Timestamped hex log written in sink mode.
    #[clap(
        long,
        value_name = "HEX_LOG",
        env = "BRIDGETAP_HEX_LOG",
        default_value = "bridge_data_hex.log"
    )]
    hex_log: PathBuf,

    /// Optional `.env` file path for loading environment variables.
    #[clap(short, long, value_name = "ENV_FILE")]
    env_file: Option<String>,

    /// Optional log level.
    #[clap(
        short = 'l',
        long,
        value_name = "LOG_LEVEL",
        env = "BRIDGETAP_LOG_LEVEL",
        default_value = "info"
    )]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let pre = PreCli::try_parse().unwrap_or_default();

    if let Some(env_file) = pre.env_file {
        dotenvy::from_filename(env_file).expect("failed to load .env file");
    } else {
        dotenvy::dotenv().ok();
    }

    let cli = Cli::parse();

    let env = EnvFilter::new(format!(
        "bridgetap={0},bridgetap_core={0},bridgetap_server={0},info",
        cli.log_level
    ));
    tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(env)
        .init();

    let cancellation_token = CancellationToken::new();
    {
        let token = cancellation_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Stopping proxy...");
                token.cancel();
            }
        });
    }

    let mode = match cli.mode {
        Mode::Relay => RelayMode::Relay {
            remote_addr: format!("{}:{}", cli.remote_host, cli.remote_port),
        },
        Mode::Spoof => RelayMode::Spoof,
        Mode::Sink => RelayMode::Sink,
    };

    let pcap_file = match (cli.pcap_file, cli.mode) {
        (Some(path), _) => Some(path),
        (None, Mode::Spoof) => Some(PathBuf::from("bridge_capture.pcap")),
        (None, _) => None,
    };

    let capture = if pcap_file.is_some() {
        let collector_ip = resolve_capture_host(&cli.capture_host).await;
        Some(Arc::new(CaptureBuffer::new(collector_ip)))
    } else {
        None
    };

    let sink = match cli.mode {
        Mode::Sink => Some(Arc::new(ByteSink::open(&cli.data_log, &cli.hex_log)?)),
        _ => None,
    };

    let config = ServerConfig {
        listen_addr: SocketAddr::from(([0, 0, 0, 0], cli.local_port)),
        mode,
        pcap_file,
    };

    let server = RelayServer::bind(config, capture, sink, cancellation_token).await?;
    server.run().await?;
    Ok(())
}

/// Best-effort resolution of the capture tag host. The address only
/// labels synthetic frames, so an unresolvable host degrades to an
/// unspecified placeholder instead of failing startup.
async fn resolve_capture_host(host: &str) -> Ipv4Addr {
    match lookup_host((host, BRIDGE_PORT)).await {
        Ok(mut addrs) => match addrs.find_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        }) {
            Some(ip) => ip,
            None => {
                warn!("No IPv4 address for capture host {host}");
                Ipv4Addr::UNSPECIFIED
            }
        },
        Err(e) => {
            warn!("Failed to resolve capture host {host}: {e}");
            Ipv4Addr::UNSPECIFIED
        }
    }
}
