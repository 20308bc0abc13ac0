use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::SocketAddr,
};

use tracing::{debug, warn};

use super::{Transport, TransportStatus};

const RX_BUF_SIZE: usize = 32 * 1024;

/// Non-blocking TCP byte channel.
///
/// Connect is non-blocking: the socket is usable immediately, writes are
/// queued until the handshake completes (completion is observed via
/// `take_error`/`peer_addr` on the next drive). Unwritten bytes land in a
/// backlog that is flushed on every `recv`.
pub struct TcpTransport {
    stream: mio::net::TcpStream,
    peer_addr: SocketAddr,
    connected: bool,
    rx_buf: Vec<u8>,
    send_backlog: VecDeque<Vec<u8>>,
    closed: bool,
}

impl TcpTransport {
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        Self::connect_with(addr, None)
    }

    pub fn connect_with(addr: SocketAddr, socket_buf_size: Option<usize>) -> io::Result<Self> {
        let stream = mio::net::TcpStream::connect(addr)?;
        if let Some(size) = socket_buf_size {
            set_socket_buf_size(&stream, size);
        }
        Self::new(stream, addr, false)
    }

    /// Wrap an accepted stream (server side).
    pub fn from_accepted(stream: mio::net::TcpStream, peer_addr: SocketAddr) -> io::Result<Self> {
        Self::new(stream, peer_addr, true)
    }

    fn new(stream: mio::net::TcpStream, peer_addr: SocketAddr, connected: bool) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            peer_addr,
            connected,
            rx_buf: vec![0; RX_BUF_SIZE],
            send_backlog: VecDeque::with_capacity(16),
            closed: false,
        })
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Poll the pending non-blocking connect. Ok(true) once established.
    fn ensure_connected(&mut self) -> io::Result<bool> {
        if self.connected {
            return Ok(true);
        }
        if let Some(err) = self.stream.take_error()? {
            warn!(addr = ?self.peer_addr, %err, "tcp: connect failed");
            return Err(err);
        }
        match self.stream.peer_addr() {
            Ok(_) => {
                debug!(addr = ?self.peer_addr, "tcp: connected");
                self.connected = true;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Flush queued bytes until the kernel blocks or the queue drains.
    fn flush_backlog(&mut self) -> io::Result<()> {
        if !self.ensure_connected()? {
            return Ok(());
        }
        while let Some(front) = self.send_backlog.front_mut() {
            match self.stream.write(front) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "kernel accepted no bytes"));
                }
                Ok(n) => {
                    if n == front.len() {
                        self.send_backlog.pop_front();
                    } else {
                        front.drain(..n);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(?err, "tcp: backlog flush failed");
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport ended"));
        }
        self.send_backlog.push_back(bytes.to_vec());
        self.flush_backlog()
    }

    fn recv(&mut self, on_data: &mut dyn FnMut(&[u8])) -> io::Result<TransportStatus> {
        if self.closed {
            return Ok(TransportStatus::Closed);
        }
        self.flush_backlog()?;
        if !self.connected {
            return Ok(TransportStatus::Open);
        }
        loop {
            match self.stream.read(&mut self.rx_buf) {
                Ok(0) => return Ok(TransportStatus::Closed),
                Ok(n) => on_data(&self.rx_buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(?err, "tcp: read failed");
                    return Err(err);
                }
            }
        }
        Ok(TransportStatus::Open)
    }

    fn end(&mut self) {
        if !self.closed {
            debug!(addr = ?self.peer_addr, "tcp: terminating");
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
            self.closed = true;
        }
    }
}

/// Non-blocking acceptor that yields [`TcpTransport`]s.
pub struct TcpAcceptor {
    listener: mio::net::TcpListener,
}

impl TcpAcceptor {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self { listener: mio::net::TcpListener::bind(addr)? })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one pending connection, if any.
    pub fn accept(&mut self) -> io::Result<Option<TcpTransport>> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                debug!(?addr, "tcp: accepted");
                Ok(Some(TcpTransport::from_accepted(stream, addr)?))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Set kernel SO_SNDBUF and SO_RCVBUF on a mio TcpStream.
pub(crate) fn set_socket_buf_size(stream: &mio::net::TcpStream, size: usize) {
    use std::os::fd::AsRawFd;
    let fd = stream.as_raw_fd();
    let size = size as libc::c_int;
    for opt in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                std::ptr::from_ref(&size).cast::<libc::c_void>(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }
}
