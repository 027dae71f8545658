use bridgetap_core::capture::CaptureBuffer;
use bridgetap_core::pump::ACK_TOKEN;
use bridgetap_core::sink::ByteSink;
use bridgetap_server::listen::{RelayMode, RelayServer, ServerConfig};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

fn loopback_config(mode: RelayMode, pcap_file: Option<PathBuf>) -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        mode,
        pcap_file,
    }
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("bridgetap-test-{}-{name}", std::process::id()))
}

#[tokio::test]
async fn relay_forwards_both_directions_unmodified() {
    let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = remote_listener.local_addr().unwrap();
    let remote_task = tokio::spawn(async move {
        let (mut stream, _) = remote_listener.accept().await.unwrap();
        let mut request = [0u8; 3];
        stream.read_exact(&mut request).await.unwrap();
        assert_eq!(&request, b"\x01\x02\x03");
        stream.write_all(b"\xaa").await.unwrap();
        // wait for the relay to propagate the client's close
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
        rest
    });

    let token = CancellationToken::new();
    let server = RelayServer::bind(
        loopback_config(
            RelayMode::Relay {
                remote_addr: remote_addr.to_string(),
            },
            None,
        ),
        None,
        None,
        token.clone(),
    )
    .await
    .unwrap();
    let server_addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(server.run());

    let mut client = TcpStream::connect(server_addr).await.unwrap();
    client.write_all(b"\x01\x02\x03").await.unwrap();
    let mut reply = [0u8; 1];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0xaa);
    drop(client);

    let unforwarded = remote_task.await.unwrap();
    assert!(unforwarded.is_empty());

    token.cancel();
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn spoof_acknowledges_and_flushes_capture() {
    let pcap_path = temp_path("spoof.pcap");
    let _ = std::fs::remove_file(&pcap_path);

    let capture = Arc::new(CaptureBuffer::new(Ipv4Addr::new(203, 0, 113, 1)));
    let token = CancellationToken::new();
    let server = RelayServer::bind(
        loopback_config(RelayMode::Spoof, Some(pcap_path.clone())),
        Some(capture.clone()),
        None,
        token.clone(),
    )
    .await
    .unwrap();
    let server_addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(server.run());

    let mut client = TcpStream::connect(server_addr).await.unwrap();
    client.write_all(b"\x01\x02\x03").await.unwrap();
    let mut ack = [0u8; 1];
    client.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack[0], ACK_TOKEN);
    drop(client);

    token.cancel();
    server_task.await.unwrap().unwrap();

    assert_eq!(capture.len(), 1);
    let bytes = std::fs::read(&pcap_path).unwrap();
    let mut reader = pcap_file::pcap::PcapReader::new(std::io::Cursor::new(bytes)).unwrap();
    let packet = reader.next_packet().unwrap().unwrap();
    assert!(packet.data.ends_with(b"\x01\x02\x03"));
    assert!(reader.next_packet().is_none());

    let _ = std::fs::remove_file(&pcap_path);
}

#[tokio::test]
async fn capture_preserves_order_across_connections() {
    let capture = Arc::new(CaptureBuffer::new(Ipv4Addr::new(203, 0, 113, 1)));
    let token = CancellationToken::new();
    let server = RelayServer::bind(
        loopback_config(RelayMode::Spoof, None),
        Some(capture.clone()),
        None,
        token.clone(),
    )
    .await
    .unwrap();
    let server_addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(server.run());

    for chunk in [&b"\x10"[..], &b"\x20"[..], &b"\x30"[..]] {
        let mut client = TcpStream::connect(server_addr).await.unwrap();
        client.write_all(chunk).await.unwrap();
        let mut ack = [0u8; 1];
        client.read_exact(&mut ack).await.unwrap();
        drop(client);
    }

    token.cancel();
    server_task.await.unwrap().unwrap();

    let mut serialized = Vec::new();
    assert_eq!(capture.write_pcap(&mut serialized).unwrap(), 3);
    let mut reader = pcap_file::pcap::PcapReader::new(std::io::Cursor::new(serialized)).unwrap();
    for expected in [0x10u8, 0x20, 0x30] {
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(packet.data.last(), Some(&expected));
    }
}

#[tokio::test]
async fn stop_refuses_new_connections() {
    let token = CancellationToken::new();
    let server = RelayServer::bind(loopback_config(RelayMode::Spoof, None), None, None, token.clone())
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(server.run());

    token.cancel();
    server_task.await.unwrap().unwrap();

    assert!(TcpStream::connect(server_addr).await.is_err());
}

#[tokio::test]
async fn sink_records_raw_bytes_and_hex_lines() {
    let data_path = temp_path("sink-data.log");
    let hex_path = temp_path("sink-hex.log");
    let _ = std::fs::remove_file(&data_path);
    let _ = std::fs::remove_file(&hex_path);

    let sink = Arc::new(ByteSink::open(&data_path, &hex_path).unwrap());
    let token = CancellationToken::new();
    let server = RelayServer::bind(
        loopback_config(RelayMode::Sink, None),
        None,
        Some(sink),
        token.clone(),
    )
    .await
    .unwrap();
    let server_addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(server.run());

    let mut client = TcpStream::connect(server_addr).await.unwrap();
    client.write_all(b"\x01\x02\x03").await.unwrap();
    client.shutdown().await.unwrap();
    // the handler drops the stream after it sees EOF, which unblocks this read
    let mut rest = Vec::new();
    let _ = client.read_to_end(&mut rest).await;
    drop(client);

    token.cancel();
    server_task.await.unwrap().unwrap();

    assert_eq!(std::fs::read(&data_path).unwrap(), b"\x01\x02\x03");
    let hex = std::fs::read_to_string(&hex_path).unwrap();
    assert!(hex.contains("010203"));

    let _ = std::fs::remove_file(&data_path);
    let _ = std::fs::remove_file(&hex_path);
}

#[tokio::test]
async fn sink_mode_requires_a_byte_sink() {
    let outcome = RelayServer::bind(
        loopback_config(RelayMode::Sink, None),
        None,
        None,
        CancellationToken::new(),
    )
    .await;
    assert!(outcome.is_err());
}
