use crate::error::ServerError;
use bridgetap_core::capture::CaptureBuffer;
use bridgetap_core::error::{DisconnectClass, disconnect_class};
use bridgetap_core::pump::{CHUNK_SIZE, Direction, POLL_INTERVAL, RelayPolicy, pump};
use bridgetap_core::sink::{ByteSink, hex_string};
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Full two-way relay: dials the real collector and runs one pump per
/// direction. A failed dial aborts this connection only; the device is
/// expected to reconnect. When the first pump finishes, the connection
/// token tears down the opposite direction within one poll interval, and
/// both streams close exactly once when their halves drop.
pub async fn handle_relay(
    client: TcpStream,
    peer: SocketAddr,
    remote_addr: String,
    capture: Option<Arc<CaptureBuffer>>,
    cancellation_token: CancellationToken,
) -> Result<(), ServerError> {
    let remote = TcpStream::connect(&remote_addr).await.map_err(|e| {
        error!("Failed to connect to {remote_addr}: {e}");
        ServerError::from(e)
    })?;
    info!("Connected to {remote_addr}");

    let connection_token = cancellation_token.child_token();
    let (client_read, client_write) = client.into_split();
    let (remote_read, remote_write) = remote.into_split();

    let mut pumps = JoinSet::new();
    {
        let capture = capture.clone();
        let token = connection_token.clone();
        pumps.spawn(async move {
            if let Err(e) = pump(
                client_read,
                remote_write,
                Direction::ClientToRemote,
                peer,
                RelayPolicy::Forward,
                capture,
                token,
            )
            .await
            {
                error!("Error in {} forwarding: {e}", Direction::ClientToRemote);
            }
        });
    }
    {
        let token = connection_token.clone();
        pumps.spawn(async move {
            if let Err(e) = pump(
                remote_read,
                client_write,
                Direction::RemoteToClient,
                peer,
                RelayPolicy::Forward,
                capture,
                token,
            )
            .await
            {
                error!("Error in {} forwarding: {e}", Direction::RemoteToClient);
            }
        });
    }

    while let Some(finished) = pumps.join_next().await {
        // One direction ending ends the connection; stop the other pump.
        connection_token.cancel();
        if let Err(e) = finished {
            error!("Pump task for {peer} failed: {e}");
        }
    }
    debug!("Connection from {peer} finished");
    Ok(())
}

/// Capture/spoof variant: no real remote exists. The client stream is
/// both source and destination of a single pump whose acknowledge policy
/// answers every chunk with the keep-alive token.
pub async fn handle_spoof(
    client: TcpStream,
    peer: SocketAddr,
    capture: Option<Arc<CaptureBuffer>>,
    cancellation_token: CancellationToken,
) -> Result<(), ServerError> {
    info!("Handling connection from {peer}");
    let (client_read, client_write) = client.into_split();
    pump(
        client_read,
        client_write,
        Direction::ClientToRemote,
        peer,
        RelayPolicy::Acknowledge,
        capture,
        cancellation_token.child_token(),
    )
    .await
    .map_err(ServerError::from)
}

/// Terminal sink: reads in a tight loop and appends every chunk to the
/// byte sink. An empty read or any error ends the connection.
pub async fn handle_sink(
    mut client: TcpStream,
    peer: SocketAddr,
    sink: Arc<ByteSink>,
    cancellation_token: CancellationToken,
) -> Result<(), ServerError> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    while !cancellation_token.is_cancelled() {
        let read = match timeout(POLL_INTERVAL, client.read(&mut buffer)).await {
            Err(_) => continue,
            Ok(Ok(0)) => {
                info!("Connection closed by {peer}");
                break;
            }
            Ok(Ok(read)) => read,
            Ok(Err(e)) => match disconnect_class(&e) {
                DisconnectClass::ExpectedShutdown => {
                    debug!("{peer} disconnected: {e}");
                    break;
                }
                DisconnectClass::Unexpected => {
                    error!("Error handling client {peer}: {e}");
                    break;
                }
            },
        };

        let chunk = &buffer[..read];
        sink.record(peer, chunk)?;

        let hex = hex_string(chunk);
        info!("Received {read} bytes from {peer}");
        info!("First 60 bytes (hex): {}...", &hex[..hex.len().min(120)]);
    }
    Ok(())
}
