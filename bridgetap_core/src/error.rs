use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CoreErrorKind {
    #[error("Frame could not be constructed")]
    FrameConstructionError,
    #[error("Capture file error")]
    CaptureFileError,
    #[error("Traffic log error")]
    TrafficLogError,
    #[error("I/O error from Tokio")]
    IoError,
}

#[derive(Debug, Clone)]
pub struct CoreError {
    pub error_kind: CoreErrorKind,
    pub message: String,
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Core Error: {}: {}", self.error_kind, self.message)
    }
}

impl Error for CoreError {}

impl CoreError {
    pub fn new(error_kind: CoreErrorKind, message: &str) -> Self {
        Self {
            error_kind,
            message: message.to_owned(),
        }
    }
}

impl From<io::Error> for CoreError {
    fn from(value: io::Error) -> Self {
        Self::new(CoreErrorKind::IoError, value.to_string().as_str())
    }
}

impl From<pcap_file::PcapError> for CoreError {
    fn from(value: pcap_file::PcapError) -> Self {
        Self::new(CoreErrorKind::CaptureFileError, value.to_string().as_str())
    }
}

/// How a socket error observed by a pump should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectClass {
    /// Raised by the peer going away or our own teardown; the pump
    /// terminates quietly.
    ExpectedShutdown,
    /// Everything else; logged before the pump terminates. Pumps never
    /// retry a hard error.
    Unexpected,
}

/// Maps the platform I/O error taxonomy onto the relay's two terminal
/// conditions. An orderly close is a zero-length read, not an error, and
/// is handled directly in the pump loop.
pub fn disconnect_class(error: &io::Error) -> DisconnectClass {
    match error.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => DisconnectClass::ExpectedShutdown,
        _ => DisconnectClass::Unexpected,
    }
}
