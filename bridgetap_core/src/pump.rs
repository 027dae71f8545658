use crate::capture::CaptureBuffer;
use crate::error::{CoreError, DisconnectClass, disconnect_class};
use crate::sink::hex_string;
use log::{debug, info};
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Upper bound on a single read from the source stream.
pub const CHUNK_SIZE: usize = 4096;

/// Bounded wait for reads and the sole cancellation polling point; a stop
/// request is observed within one interval.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Keep-alive token the spoof variant answers with instead of forwarding.
pub const ACK_TOKEN: u8 = 0x5a;

/// Label for one side of a duplex relay. Logging only, never protocol
/// semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToRemote,
    RemoteToClient,
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToRemote => write!(f, "CLIENT_TO_SERVER"),
            Direction::RemoteToClient => write!(f, "SERVER_TO_CLIENT"),
        }
    }
}

/// What the pump does with an observed chunk: forward it unmodified, or
/// answer with a single [`ACK_TOKEN`] byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPolicy {
    Forward,
    Acknowledge,
}

/// Transfers bytes from `source` to `destination` until the source
/// closes, the token is cancelled, or an unrecoverable error occurs.
///
/// Every observed chunk is logged as a hex traffic record and, when a
/// capture buffer is attached, appended as a synthetic frame. Connection
/// resets, broken pipes and the like are normal terminations; only errors
/// classified as unexpected surface to the caller. The destination is
/// shut down on every exit path so a peer waiting for EOF unblocks, and
/// both streams close exactly once when the pump drops them.
pub async fn pump<R, W>(
    mut source: R,
    mut destination: W,
    direction: Direction,
    peer: SocketAddr,
    policy: RelayPolicy,
    capture: Option<Arc<CaptureBuffer>>,
    cancellation_token: CancellationToken,
) -> Result<(), CoreError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = pump_loop(
        &mut source,
        &mut destination,
        direction,
        peer,
        policy,
        capture.as_deref(),
        &cancellation_token,
    )
    .await;
    // Best-effort; both ends are being discarded anyway.
    let _ = destination.shutdown().await;
    outcome
}

async fn pump_loop<R, W>(
    source: &mut R,
    destination: &mut W,
    direction: Direction,
    peer: SocketAddr,
    policy: RelayPolicy,
    capture: Option<&CaptureBuffer>,
    cancellation_token: &CancellationToken,
) -> Result<(), CoreError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; CHUNK_SIZE];
    while !cancellation_token.is_cancelled() {
        let read = match timeout(POLL_INTERVAL, source.read(&mut buffer)).await {
            // Poll interval elapsed with no data; recheck the token.
            Err(_) => continue,
            Ok(Ok(0)) => {
                debug!("{direction}: connection closed by peer {peer}");
                break;
            }
            Ok(Ok(read)) => read,
            Ok(Err(e)) => match disconnect_class(&e) {
                DisconnectClass::ExpectedShutdown => {
                    debug!("{direction}: {peer} disconnected: {e}");
                    break;
                }
                DisconnectClass::Unexpected => return Err(CoreError::from(e)),
            },
        };

        let chunk = &buffer[..read];
        info!("{direction} -> {}", hex_string(chunk));
        if let Some(capture) = capture {
            capture.record(peer, direction, chunk);
        }

        let written = match policy {
            RelayPolicy::Forward => destination.write_all(chunk).await,
            RelayPolicy::Acknowledge => destination.write_all(&[ACK_TOKEN]).await,
        };
        if let Err(e) = written {
            match disconnect_class(&e) {
                DisconnectClass::ExpectedShutdown => {
                    debug!("{direction}: {peer} disconnected: {e}");
                    break;
                }
                DisconnectClass::Unexpected => return Err(CoreError::from(e)),
            }
        }
    }
    Ok(())
}
