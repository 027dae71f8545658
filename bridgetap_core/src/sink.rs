use crate::error::CoreError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Renders raw bytes as a lowercase hex string, the way every traffic
/// record in the logs is formatted.
pub fn hex_string(data: &[u8]) -> String {
    use std::fmt::Write;
    data.iter()
        .fold(String::with_capacity(data.len() * 2), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Append-only record of observed bridge traffic: the raw bytes
/// concatenated with no framing, plus a timestamped hex rendering keyed
/// by the peer address. Writers are serialized so concurrent connections
/// cannot interleave within one record.
pub struct ByteSink {
    data_log: Mutex<File>,
    hex_log: Mutex<File>,
}

impl ByteSink {
    pub fn open(data_path: &Path, hex_path: &Path) -> Result<Self, CoreError> {
        Ok(Self {
            data_log: Mutex::new(Self::open_append(data_path)?),
            hex_log: Mutex::new(Self::open_append(hex_path)?),
        })
    }

    fn open_append(path: &Path) -> Result<File, CoreError> {
        Ok(OpenOptions::new().append(true).create(true).open(path)?)
    }

    pub fn record(&self, peer: SocketAddr, data: &[u8]) -> Result<(), CoreError> {
        let timestamp = unix_timestamp();
        let hex = hex_string(data);
        {
            let mut file = self.data_log.lock().expect("Poisoned");
            file.write_all(data)?;
        }
        {
            let mut file = self.hex_log.lock().expect("Poisoned");
            writeln!(file, "{timestamp} - {peer} - {hex}")?;
        }
        Ok(())
    }
}
