#![allow(dead_code)] // shared between test binaries with different needs

use rsock::{
    transport::{MemoryTransport, Transport},
    wire::{Frame, Framer},
};

/// Drives one end of a memory duplex at the frame level, without a
/// `Connection`. Lets tests observe and inject raw protocol traffic.
pub struct RawPeer {
    transport: MemoryTransport,
    framer: Framer,
}

impl RawPeer {
    pub fn new(transport: MemoryTransport) -> Self {
        Self { transport, framer: Framer::new() }
    }

    /// Drain and decode everything the peer has sent so far.
    pub fn read_frames(&mut self) -> Vec<Frame> {
        let mut raw: Vec<Vec<u8>> = Vec::new();
        let framer = &mut self.framer;
        self.transport
            .recv(&mut |chunk| {
                framer.push(chunk, &mut |f| raw.push(f.to_vec())).expect("well-formed traffic");
            })
            .expect("memory transport never errors");
        raw.iter().map(|bytes| Frame::decode(bytes).expect("decodable frame")).collect()
    }

    pub fn send(&mut self, frame: &Frame) {
        self.transport.write(&frame.encode().expect("encodable frame")).expect("peer alive");
    }

    /// Inject pre-encoded bytes, malformed ones included.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.transport.write(bytes).expect("peer alive");
    }

    pub fn close(&mut self) {
        self.transport.end();
    }
}
