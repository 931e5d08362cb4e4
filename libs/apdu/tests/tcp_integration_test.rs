//! TCP Server Integration Tests
//!
//! These tests verify the APDU daemon works correctly with real network
//! connections and that connections do not share request state.

use signet_apdu::dispatch::version_bytes;
use signet_apdu::envelope::{CLA, P1_CONTINUATION, P1_FIRST};
use signet_apdu::server::ApduServer;
use signet_apdu::status::{Reply, StatusWord};
use signet_apdu::test_utils::{TestBackend, apdu_packet, sample_sign_body};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

fn start_server(port: u16) -> SocketAddr {
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let server = ApduServer::new(addr, TestBackend::new(), Some(Duration::from_secs(5)))
        .with_max_connections(10);
    std::thread::spawn(move || {
        let _ = server.run();
    });
    // Give the server time to start and bind
    std::thread::sleep(Duration::from_millis(500));
    addr
}

fn exchange(stream: &mut TcpStream, packet: &[u8]) -> Reply {
    let len = u16::try_from(packet.len()).unwrap();
    stream.write_all(&len.to_be_bytes()).unwrap();
    stream.write_all(packet).unwrap();
    stream.flush().unwrap();

    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).unwrap();
    let mut reply = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut reply).unwrap();
    Reply::from_bytes(&reply).unwrap()
}

#[test]
fn test_tcp_get_version() {
    let addr = start_server(19090);
    let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5)).unwrap();

    let reply = exchange(&mut stream, &apdu_packet(CLA, 0x00, 0x00, 0x00, &[]));
    assert_eq!(reply.status, StatusWord::Ok);
    assert_eq!(reply.data, version_bytes().to_vec());
}

#[test]
fn test_tcp_sign_transaction_chunked() {
    let addr = start_server(19091);
    let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5)).unwrap();

    let body = sample_sign_body(&[0x42; 120]);
    let (first, rest) = body.split_at(60);

    let reply = exchange(&mut stream, &apdu_packet(CLA, 0x04, P1_FIRST, 0x00, first));
    assert_eq!(reply, Reply::status(StatusWord::Ok));

    let reply = exchange(
        &mut stream,
        &apdu_packet(CLA, 0x04, P1_CONTINUATION, 0x00, rest),
    );
    assert_eq!(reply.status, StatusWord::Ok);
    assert_eq!(reply.data.len(), 64);
}

#[test]
fn test_tcp_unknown_ins_rejected() {
    let addr = start_server(19092);
    let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5)).unwrap();

    let reply = exchange(&mut stream, &apdu_packet(CLA, 0x5A, 0x12, 0x34, &[0xFF]));
    assert_eq!(reply, Reply::status(StatusWord::InsNotSupported));

    // The connection survives rejected packets
    let reply = exchange(&mut stream, &apdu_packet(CLA, 0x00, 0x00, 0x00, &[]));
    assert_eq!(reply.status, StatusWord::Ok);
}

#[test]
fn test_tcp_connections_do_not_share_request_state() {
    let addr = start_server(19093);
    let mut first_conn = TcpStream::connect_timeout(&addr, Duration::from_secs(5)).unwrap();
    let mut second_conn = TcpStream::connect_timeout(&addr, Duration::from_secs(5)).unwrap();

    let body = sample_sign_body(&[0x42; 32]);
    let (first, rest) = body.split_at(20);

    // Start a signing command on the first connection
    let reply = exchange(&mut first_conn, &apdu_packet(CLA, 0x04, P1_FIRST, 0x00, first));
    assert_eq!(reply, Reply::status(StatusWord::Ok));

    // The second connection has no in-flight command to continue
    let reply = exchange(
        &mut second_conn,
        &apdu_packet(CLA, 0x04, P1_CONTINUATION, 0x00, rest),
    );
    assert_eq!(reply, Reply::status(StatusWord::BadState));

    // The first connection's command is unaffected and completes
    let reply = exchange(
        &mut first_conn,
        &apdu_packet(CLA, 0x04, P1_CONTINUATION, 0x00, rest),
    );
    assert_eq!(reply.status, StatusWord::Ok);
    assert_eq!(reply.data.len(), 64);
}

#[test]
fn test_tcp_concurrent_connections() {
    let addr = start_server(19094);

    let mut thread_handles = vec![];
    for _ in 0..5 {
        let addr_copy = addr;
        let join_handle = std::thread::spawn(move || {
            let mut stream =
                TcpStream::connect_timeout(&addr_copy, Duration::from_secs(5)).unwrap();
            let reply = exchange(&mut stream, &apdu_packet(CLA, 0x00, 0x00, 0x00, &[]));
            reply.status == StatusWord::Ok
        });
        thread_handles.push(join_handle);
    }

    for join_handle in thread_handles {
        assert!(join_handle.join().unwrap());
    }
}
