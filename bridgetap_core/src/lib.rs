pub mod capture;
pub mod error;
pub mod pump;
pub mod sink;

/// TCP port the bridge protocol uses on both the device and collector side.
pub const BRIDGE_PORT: u16 = 8051;
