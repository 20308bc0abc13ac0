use std::{
    cell::RefCell,
    collections::VecDeque,
    io,
    rc::Rc,
};

use super::{Transport, TransportStatus};

#[derive(Debug, Default)]
struct Pipe {
    chunks: VecDeque<Vec<u8>>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    a_to_b: Pipe,
    b_to_a: Pipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

/// In-process duplex byte channel for tests and fixtures.
///
/// Write boundaries are preserved as chunk boundaries, which exercises the
/// framer's reassembly paths without a real socket. Single-threaded by
/// design, like the rest of the runtime.
#[derive(Debug)]
pub struct MemoryTransport {
    shared: Rc<RefCell<Shared>>,
    side: Side,
    framed: bool,
}

impl MemoryTransport {
    /// Connected pair of unframed byte channels.
    pub fn pair() -> (Self, Self) {
        let shared = Rc::new(RefCell::new(Shared::default()));
        (
            Self { shared: shared.clone(), side: Side::A, framed: false },
            Self { shared, side: Side::B, framed: false },
        )
    }

    /// Connected pair of message channels: every chunk is delivered as a
    /// whole frame, the way a WebSocket adapter would.
    pub fn framed_pair() -> (Self, Self) {
        let (mut a, mut b) = Self::pair();
        a.framed = true;
        b.framed = true;
        (a, b)
    }

    fn with_pipes<R>(&self, f: impl FnOnce(&mut Pipe, &mut Pipe) -> R) -> R {
        let mut shared = self.shared.borrow_mut();
        let Shared { a_to_b, b_to_a } = &mut *shared;
        match self.side {
            Side::A => f(a_to_b, b_to_a),
            Side::B => f(b_to_a, a_to_b),
        }
    }
}

impl Transport for MemoryTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.with_pipes(|outgoing, _| {
            if outgoing.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"));
            }
            outgoing.chunks.push_back(bytes.to_vec());
            Ok(())
        })
    }

    fn recv(&mut self, on_data: &mut dyn FnMut(&[u8])) -> io::Result<TransportStatus> {
        // drain first so the borrow is released before the callback runs;
        // handlers may write back through the same shared state
        let (chunks, closed) = self.with_pipes(|_, incoming| {
            (std::mem::take(&mut incoming.chunks), incoming.closed)
        });
        for chunk in &chunks {
            on_data(chunk);
        }
        if closed {
            Ok(TransportStatus::Closed)
        } else {
            Ok(TransportStatus::Open)
        }
    }

    fn end(&mut self) {
        self.with_pipes(|outgoing, incoming| {
            outgoing.closed = true;
            incoming.closed = true;
        });
    }

    fn framed(&self) -> bool {
        self.framed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_flow_both_ways() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.write(b"ping").unwrap();
        b.write(b"pong").unwrap();

        let mut got = Vec::new();
        assert_eq!(b.recv(&mut |c| got.extend_from_slice(c)).unwrap(), TransportStatus::Open);
        assert_eq!(got, b"ping");

        got.clear();
        assert_eq!(a.recv(&mut |c| got.extend_from_slice(c)).unwrap(), TransportStatus::Open);
        assert_eq!(got, b"pong");
    }

    #[test]
    fn end_closes_both_directions() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.end();
        assert_eq!(b.recv(&mut |_| {}).unwrap(), TransportStatus::Closed);
        assert!(b.write(b"x").is_err());
    }

    #[test]
    fn pending_chunks_still_delivered_after_close() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.write(b"last words").unwrap();
        a.end();
        let mut got = Vec::new();
        // the final recv both drains and reports the close
        assert_eq!(b.recv(&mut |c| got.extend_from_slice(c)).unwrap(), TransportStatus::Closed);
        assert_eq!(got, b"last words");
    }

    #[test]
    fn framed_pair_reports_framed() {
        let (a, b) = MemoryTransport::framed_pair();
        assert!(a.framed() && b.framed());
    }
}
