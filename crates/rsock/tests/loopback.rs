mod common;

use common::RawPeer;
use rsock::{
    Connection, ConnectionEvent, ConnectionOptions, Payload, RSocket, StreamErrorKind,
    StreamOutcome,
    transport::MemoryTransport,
    wire::{Body, ErrorCode, Flags, Frame, FrameType},
};

fn echo_pair() -> (Connection, Connection) {
    let (ct, st) = MemoryTransport::pair();
    let client = Connection::client(ct, ConnectionOptions::default()).unwrap();
    let server = Connection::server(st, ConnectionOptions::default());
    (client, server)
}

fn pump_echo(client: &mut Connection, server: &mut Connection) {
    for _ in 0..4 {
        server.poll_with(|conn, ev| {
            if let ConnectionEvent::Request { stream_id, payload } = ev {
                conn.respond(stream_id, payload).unwrap();
            }
        });
        client.poll();
    }
}

#[test]
fn request_response_roundtrip() {
    let (mut client, mut server) = echo_pair();
    let stream = client.request(Payload::from_data(b"hello".to_vec()).with_metadata(b"m".to_vec()));
    assert_eq!(stream.id(), 2);

    let mut server_stream_id = None;
    for _ in 0..4 {
        server.poll_with(|conn, ev| {
            if let ConnectionEvent::Request { stream_id, payload } = ev {
                server_stream_id = Some(stream_id);
                conn.respond(stream_id, payload).unwrap();
            }
        });
        client.poll();
    }

    assert_eq!(server_stream_id, Some(2));
    match stream.poll() {
        Some(StreamOutcome::Response(p)) => {
            assert_eq!(p.data_utf8(), Some("hello"));
            assert_eq!(p.metadata.as_deref(), Some(b"m".as_slice()));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    // exactly one terminal: a second poll returns the same settled outcome
    assert!(matches!(stream.poll(), Some(StreamOutcome::Response(_))));
    assert_eq!(client.active_streams(), 0);
    assert_eq!(server.active_streams(), 0);
}

#[test]
fn interleaved_requests_resolve_independently() {
    let (mut client, mut server) = echo_pair();
    let a = client.request(Payload::from_data(b"a".to_vec()));
    let b = client.request(Payload::from_data(b"b".to_vec()));
    pump_echo(&mut client, &mut server);
    match (a.poll(), b.poll()) {
        (Some(StreamOutcome::Response(pa)), Some(StreamOutcome::Response(pb))) => {
            assert_eq!(pa.data_utf8(), Some("a"));
            assert_eq!(pb.data_utf8(), Some("b"));
        }
        other => panic!("unexpected outcomes {other:?}"),
    }
}

#[test]
fn fragmented_response_is_reassembled() {
    let (ct, st) = MemoryTransport::pair();
    let mut client = Connection::client(ct, ConnectionOptions::default()).unwrap();
    let mut peer = RawPeer::new(st);

    let stream = client.request(Payload::from_data(b"frag".to_vec()));
    let inbound = peer.read_frames();
    assert_eq!(inbound.len(), 1 + 1, "setup plus request");
    assert_eq!(inbound[1].frame_type(), FrameType::RequestResponse);

    peer.send(
        &Frame::new(2, Body::Response).with_flags(Flags::FOLLOWS).with_data(Some(b"he".to_vec())),
    );
    client.poll();
    assert!(!stream.is_terminated());

    peer.send(&Frame::new(2, Body::Response).with_data(Some(b"llo".to_vec())));
    client.poll();
    match stream.poll() {
        Some(StreamOutcome::Response(p)) => assert_eq!(p.data_utf8(), Some("hello")),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn duplicate_setup_is_refused() {
    let (ct, st) = MemoryTransport::pair();
    let mut server = Connection::server(st, ConnectionOptions::default());
    let mut peer = RawPeer::new(ct);

    let setup = Frame::new(
        0,
        Body::Setup {
            version: 0,
            keepalive_ms: 1000,
            max_lifetime_ms: 10_000,
            metadata_encoding: "utf-8".to_owned(),
            data_encoding: "utf-8".to_owned(),
        },
    );
    peer.send(&setup);
    server.poll();
    assert!(server.is_ready());

    peer.send(&setup);
    server.poll();
    let replies = peer.read_frames();
    assert!(
        replies.iter().any(|f| matches!(
            f.body,
            Body::Error { code: ErrorCode::RejectedSetup }
        ) && f.stream_id == 0),
        "expected REJECTED_SETUP, got {replies:?}"
    );
    // the first setup stays authoritative
    assert!(server.is_ready());
}

#[test]
fn setup_error_is_fatal_for_the_client() {
    let (ct, st) = MemoryTransport::pair();
    let mut client = Connection::client(ct, ConnectionOptions::default()).unwrap();
    let mut peer = RawPeer::new(st);

    let stream = client.request(Payload::from_data(b"x".to_vec()));
    peer.send(
        &Frame::new(0, Body::Error { code: ErrorCode::RejectedSetup })
            .with_data(Some(b"not welcome".to_vec())),
    );

    let mut saw_error = false;
    let mut saw_close = false;
    client.poll_with(|_, ev| match ev {
        ConnectionEvent::Error(_) => saw_error = true,
        ConnectionEvent::Close => saw_close = true,
        _ => {}
    });
    assert!(saw_error && saw_close);
    assert!(client.is_closed());
    match stream.poll() {
        Some(StreamOutcome::Error(e)) => assert_eq!(e.kind, StreamErrorKind::Setup),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn unsupported_interactions_are_rejected_per_stream() {
    let (ct, st) = MemoryTransport::pair();
    let mut server = Connection::server(st, ConnectionOptions::default());
    let mut peer = RawPeer::new(ct);

    // hand-craft a REQUEST_STREAM by patching the type field of a request
    let mut bytes =
        Frame::new(2, Body::RequestResponse).with_data(Some(b"s".to_vec())).encode().unwrap();
    bytes[4..6].copy_from_slice(&(FrameType::RequestStream as u16).to_be_bytes());
    peer.send(&Frame::new(
        0,
        Body::Setup {
            version: 0,
            keepalive_ms: 1000,
            max_lifetime_ms: 10_000,
            metadata_encoding: "utf-8".to_owned(),
            data_encoding: "utf-8".to_owned(),
        },
    ));
    server.poll();
    peer.send_raw(&bytes);
    server.poll();

    let replies = peer.read_frames();
    assert!(
        replies.iter().any(|f| f.stream_id == 2
            && matches!(f.body, Body::Error { code: ErrorCode::Invalid })),
        "expected INVALID on stream 2, got {replies:?}"
    );
    // the connection survives
    assert!(!server.is_closed());
}

#[test]
fn late_frames_for_dead_streams_are_discarded() {
    let (ct, st) = MemoryTransport::pair();
    let mut client = Connection::client(ct, ConnectionOptions::default()).unwrap();
    let mut peer = RawPeer::new(st);

    let stream = client.request(Payload::from_data(b"x".to_vec()));
    stream.cancel();
    client.poll();
    assert!(stream.is_terminated());

    // a response that raced the cancel must not resurrect the stream
    peer.send(&Frame::new(2, Body::Response).with_data(Some(b"late".to_vec())));
    client.poll();
    match stream.poll() {
        Some(StreamOutcome::Error(e)) => assert_eq!(e.kind, StreamErrorKind::Canceled),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(client.active_streams(), 0);
    assert!(!client.is_closed());
}
