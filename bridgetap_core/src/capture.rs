use crate::BRIDGE_PORT;
use crate::error::{CoreError, CoreErrorKind};
use crate::pump::Direction;
use log::debug;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::{DataLink, Endianness};
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::tcp::{self, MutableTcpPacket, TcpFlags};
use pnet::util::MacAddr;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const ETHERNET_HEADER_LEN: usize = 14;
const IPV4_HEADER_LEN: usize = 20;
const TCP_HEADER_LEN: usize = 20;

/// One observed application chunk, reconstructed as if it were a
/// standalone network packet. Not an actually captured frame; the
/// endpoints are derived from the connection's peer address and the
/// bridge port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticFrame {
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
    pub timestamp: Duration,
    pub payload: Vec<u8>,
}

/// Accumulates synthetic frames from all connections for the lifetime of
/// the server process. Appends are mutually exclusive and the stored
/// order is the order chunks were observed system-wide; that order is
/// part of the serialized capture's contract.
pub struct CaptureBuffer {
    frames: Mutex<Vec<SyntheticFrame>>,
    collector_ip: Ipv4Addr,
}

impl CaptureBuffer {
    /// `collector_ip` labels the remote end of every synthetic frame. It
    /// is a capture annotation only and never dialed.
    pub fn new(collector_ip: Ipv4Addr) -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            collector_ip,
        }
    }

    pub fn record(&self, peer: SocketAddr, direction: Direction, payload: &[u8]) {
        let SocketAddr::V4(peer) = peer else {
            debug!("Skipping capture of non-IPv4 peer {peer}");
            return;
        };
        let device = SocketAddrV4::new(*peer.ip(), peer.port());
        let collector = SocketAddrV4::new(self.collector_ip, BRIDGE_PORT);
        let (source, destination) = match direction {
            Direction::ClientToRemote => (device, collector),
            Direction::RemoteToClient => (collector, device),
        };
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut frames = self.frames.lock().expect("Poisoned");
        frames.push(SyntheticFrame {
            source,
            destination,
            timestamp,
            payload: payload.to_vec(),
        });
    }

    pub fn len(&self) -> usize {
        self.frames.lock().expect("Poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes every accumulated frame, in observation order, as a
    /// classic pcap stream of Ethernet/IPv4/TCP packets. Returns the
    /// number of packets written.
    pub fn write_pcap<W: Write>(&self, writer: W) -> Result<usize, CoreError> {
        let header = PcapHeader {
            endianness: Endianness::native(),
            datalink: DataLink::ETHERNET,
            ..Default::default()
        };
        let mut writer = PcapWriter::with_header(writer, header)?;
        let frames = self.frames.lock().expect("Poisoned");
        for frame in frames.iter() {
            let packet = build_packet(frame)?;
            writer.write_packet(&PcapPacket::new(
                frame.timestamp,
                packet.len() as u32,
                &packet,
            ))?;
        }
        Ok(frames.len())
    }

    /// Single-shot flush at shutdown; the capture file is never written
    /// incrementally.
    pub fn flush_to_file(&self, path: &Path) -> Result<usize, CoreError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let count = self.write_pcap(&mut writer)?;
        writer.flush().map_err(CoreError::from)?;
        Ok(count)
    }
}

/// Wraps a frame's payload in zero-MAC Ethernet, IPv4 and TCP headers
/// with valid lengths and checksums so standard capture tooling will
/// dissect it.
fn build_packet(frame: &SyntheticFrame) -> Result<Vec<u8>, CoreError> {
    let construction_error =
        || CoreError::new(CoreErrorKind::FrameConstructionError, "buffer too small");
    let total_len = ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + TCP_HEADER_LEN + frame.payload.len();
    let mut buffer = vec![0u8; total_len];

    {
        let mut ethernet =
            MutableEthernetPacket::new(&mut buffer).ok_or_else(construction_error)?;
        ethernet.set_source(MacAddr::zero());
        ethernet.set_destination(MacAddr::zero());
        ethernet.set_ethertype(EtherTypes::Ipv4);
    }
    {
        let mut ip = MutableIpv4Packet::new(&mut buffer[ETHERNET_HEADER_LEN..])
            .ok_or_else(construction_error)?;
        ip.set_version(4);
        ip.set_header_length((IPV4_HEADER_LEN / 4) as u8);
        ip.set_total_length((IPV4_HEADER_LEN + TCP_HEADER_LEN + frame.payload.len()) as u16);
        ip.set_ttl(64);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
        ip.set_source(*frame.source.ip());
        ip.set_destination(*frame.destination.ip());
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }
    {
        let mut tcp = MutableTcpPacket::new(&mut buffer[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..])
            .ok_or_else(construction_error)?;
        tcp.set_source(frame.source.port());
        tcp.set_destination(frame.destination.port());
        tcp.set_data_offset((TCP_HEADER_LEN / 4) as u8);
        tcp.set_flags(TcpFlags::PSH | TcpFlags::ACK);
        tcp.set_window(u16::MAX);
        tcp.set_payload(&frame.payload);
        let checksum = tcp::ipv4_checksum(
            &tcp.to_immutable(),
            frame.source.ip(),
            frame.destination.ip(),
        );
        tcp.set_checksum(checksum);
    }

    Ok(buffer)
}
