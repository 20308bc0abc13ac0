//! End-to-end over a real loopback socket. Runs on the real clock; the
//! virtual-time suite lives in its own binary.

use std::{thread, time::Duration as StdDuration};

use rsock::{
    Connection, ConnectionOptions, EchoResponder, Payload, RSocket, StreamOutcome,
    transport::{TcpAcceptor, TcpTransport},
};

fn localhost() -> std::net::SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[test]
fn tcp_request_response_roundtrip() {
    let mut acceptor = TcpAcceptor::bind(localhost()).unwrap();
    let addr = acceptor.local_addr().unwrap();

    let transport = TcpTransport::connect(addr).unwrap();
    let mut client = Connection::client(transport, ConnectionOptions::default()).unwrap();

    let mut server: Option<EchoResponder> = None;
    let stream = client.request(Payload::from_data(b"over tcp".to_vec()));

    for _ in 0..2_000 {
        if server.is_none() {
            if let Some(transport) = acceptor.accept().unwrap() {
                server = Some(EchoResponder::serve(transport));
            }
        }
        if let Some(server) = &mut server {
            server.poll();
        }
        client.poll();
        if stream.is_terminated() {
            break;
        }
        thread::sleep(StdDuration::from_millis(1));
    }

    match stream.poll() {
        Some(StreamOutcome::Response(p)) => assert_eq!(p.data_utf8(), Some("over tcp")),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn tcp_peer_disconnect_fails_streams() {
    let mut acceptor = TcpAcceptor::bind(localhost()).unwrap();
    let addr = acceptor.local_addr().unwrap();

    let transport = TcpTransport::connect(addr).unwrap();
    let mut client = Connection::client(transport, ConnectionOptions::default()).unwrap();
    let stream = client.request(Payload::from_data(b"doomed".to_vec()));

    let mut server: Option<Connection> = None;
    for _ in 0..2_000 {
        if server.is_none() {
            if let Some(transport) = acceptor.accept().unwrap() {
                let mut conn = Connection::server(transport, ConnectionOptions::default());
                conn.poll();
                conn.close();
                server = Some(conn);
            }
        }
        client.poll();
        if stream.is_terminated() {
            break;
        }
        thread::sleep(StdDuration::from_millis(1));
    }

    match stream.poll() {
        Some(StreamOutcome::Error(_)) => {}
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(client.is_closed());
}
