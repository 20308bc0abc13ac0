//! Timer behavior on a mocked clock. Everything lives in one test because
//! the mock is process-wide and tests in a binary run concurrently.

mod common;

use common::RawPeer;
use rsock::{
    Connection, ConnectionOptions, Payload, RSocket, StreamOutcome,
    timing::{Duration, init_global_with_mock},
    transport::MemoryTransport,
    wire::{Body, Frame, FrameType},
};

#[test]
fn timers_on_virtual_time() {
    let clock = init_global_with_mock();

    // --- request timeout sends CANCEL and settles the stream ---
    let (ct, st) = MemoryTransport::pair();
    let opts = ConnectionOptions {
        request_timeout: Duration::from_millis(100),
        keepalive: Duration::from_secs(3600),
        ..ConnectionOptions::default()
    };
    let mut client = Connection::client(ct, opts).unwrap();
    let mut peer = RawPeer::new(st);

    let stream = client.request(Payload::from_data(b"never answered".to_vec()));
    let inbound = peer.read_frames();
    assert_eq!(inbound.last().unwrap().frame_type(), FrameType::RequestResponse);

    clock.increment(Duration::from_millis(50));
    client.poll();
    assert!(!stream.is_terminated(), "halfway to the deadline");

    clock.increment(Duration::from_millis(60));
    client.poll();
    assert_eq!(stream.poll(), Some(StreamOutcome::Timeout));
    assert_eq!(client.active_streams(), 0);

    let after = peer.read_frames();
    assert!(
        after.iter().any(|f| f.frame_type() == FrameType::Cancel && f.stream_id == stream.id()),
        "expected CANCEL on the wire, got {after:?}"
    );

    // a late response must be discarded, not resurrect the stream
    peer.send(&Frame::new(stream.id(), Body::Response).with_data(Some(b"too late".to_vec())));
    client.poll();
    assert_eq!(stream.poll(), Some(StreamOutcome::Timeout));
    assert!(!client.is_closed());

    // --- keepalive ticks on its interval ---
    let (ct, st) = MemoryTransport::pair();
    let opts = ConnectionOptions {
        keepalive: Duration::from_secs(1),
        ..ConnectionOptions::default()
    };
    let mut client = Connection::client(ct, opts).unwrap();
    let mut peer = RawPeer::new(st);

    let count_keepalives = |frames: &[Frame]| {
        frames.iter().filter(|f| f.frame_type() == FrameType::Keepalive).count()
    };
    client.poll();
    peer.read_frames(); // swallow SETUP and any initial tick

    clock.increment(Duration::from_secs(1));
    client.poll();
    assert_eq!(count_keepalives(&peer.read_frames()), 1);

    clock.increment(Duration::from_millis(500));
    client.poll();
    assert_eq!(count_keepalives(&peer.read_frames()), 0, "interval not elapsed yet");

    clock.increment(Duration::from_millis(600));
    client.poll();
    assert_eq!(count_keepalives(&peer.read_frames()), 1);

    // --- lease budget expires with its ttl ---
    let (ct, st) = MemoryTransport::pair();
    let opts = ConnectionOptions { lease: true, ..ConnectionOptions::default() };
    let mut client = Connection::client(ct, opts).unwrap();
    let mut server = Connection::server(st, ConnectionOptions::default());

    server.poll();
    server.send_lease(1 << 30, Duration::from_millis(100)).unwrap();
    client.poll();
    assert_eq!(client.availability(), 1.0);

    clock.increment(Duration::from_millis(150));
    assert_eq!(client.availability(), 0.0, "lease ttl elapsed");

    // a fresh lease restores availability
    server.send_lease(1 << 30, Duration::from_millis(100)).unwrap();
    client.poll();
    assert_eq!(client.availability(), 1.0);
}
