use crate::connection;
use crate::error::{ServerError, ServerErrorKind};
use bridgetap_core::capture::CaptureBuffer;
use bridgetap_core::sink::ByteSink;
use log::{error, info};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Number of pending connections the listening socket will queue.
pub const LISTEN_BACKLOG: u32 = 5;

/// Which of the three deployment variants this server runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMode {
    /// Forward both directions to a live collector.
    Relay { remote_addr: String },
    /// Terminate locally, acknowledge every chunk, capture traffic.
    Spoof,
    /// Log received bytes, never answer, never forward.
    Sink,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub mode: RelayMode,
    /// Capture output, written once at shutdown.
    pub pcap_file: Option<PathBuf>,
}

/// Owns the listening socket and the set of in-flight connection
/// handlers. Lifecycle: bind, accept until cancelled or the listener
/// fails, drain handlers, flush the capture.
pub struct RelayServer {
    listener: TcpListener,
    config: ServerConfig,
    capture: Option<Arc<CaptureBuffer>>,
    sink: Option<Arc<ByteSink>>,
    cancellation_token: CancellationToken,
}

impl RelayServer {
    /// Binds the listening socket. Bind failure is fatal and surfaces to
    /// the caller; everything after a successful bind is contained per
    /// connection.
    pub async fn bind(
        config: ServerConfig,
        capture: Option<Arc<CaptureBuffer>>,
        sink: Option<Arc<ByteSink>>,
        cancellation_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        if matches!(config.mode, RelayMode::Sink) && sink.is_none() {
            return Err(ServerError::new(
                ServerErrorKind::ArgumentError,
                "sink mode requires a byte sink",
            ));
        }
        let socket = match config.listen_addr {
            SocketAddr::V4(_) => tokio::net::TcpSocket::new_v4()?,
            SocketAddr::V6(_) => tokio::net::TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(config.listen_addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        info!("Proxy listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            config,
            capture,
            sink,
            cancellation_token,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop plus orderly shutdown. Each accepted connection is
    /// dispatched to its handler without blocking the loop; handlers are
    /// only joined collectively while draining.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut handlers: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    info!("Stop requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Accepted connection from {peer}");
                        self.dispatch(&mut handlers, stream, peer);
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        self.cancellation_token.cancel();
                        break;
                    }
                }
            }
        }

        // Close the listening socket before draining so late connection
        // attempts are refused rather than queued.
        drop(self.listener);
        while handlers.join_next().await.is_some() {}

        if let (Some(capture), Some(path)) = (&self.capture, &self.config.pcap_file) {
            if !capture.is_empty() {
                match capture.flush_to_file(path) {
                    Ok(count) => info!("Saved {count} packets to {}", path.display()),
                    Err(e) => error!("Failed to write capture file: {e}"),
                }
            }
        }
        info!("Proxy server stopped");
        Ok(())
    }

    fn dispatch(&self, handlers: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let cancellation_token = self.cancellation_token.clone();
        match &self.config.mode {
            RelayMode::Relay { remote_addr } => {
                let remote_addr = remote_addr.clone();
                let capture = self.capture.clone();
                handlers.spawn(async move {
                    if let Err(e) = connection::handle_relay(
                        stream,
                        peer,
                        remote_addr,
                        capture,
                        cancellation_token,
                    )
                    .await
                    {
                        error!("Error handling client connection from {peer}: {e}");
                    }
                });
            }
            RelayMode::Spoof => {
                let capture = self.capture.clone();
                handlers.spawn(async move {
                    if let Err(e) =
                        connection::handle_spoof(stream, peer, capture, cancellation_token).await
                    {
                        error!("Error handling client connection from {peer}: {e}");
                    }
                });
            }
            RelayMode::Sink => {
                // Presence is validated at bind time.
                let Some(sink) = self.sink.clone() else {
                    error!("Sink mode without a byte sink, dropping connection from {peer}");
                    return;
                };
                handlers.spawn(async move {
                    if let Err(e) =
                        connection::handle_sink(stream, peer, sink, cancellation_token).await
                    {
                        error!("Error handling client {peer}: {e}");
                    }
                });
            }
        }
    }
}
