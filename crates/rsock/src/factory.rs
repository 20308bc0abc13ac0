use std::net::SocketAddr;

use crate::{
    ConnectionError,
    connection::Connection,
    options::ConnectionOptions,
    transport::TcpTransport,
};

/// Named producer of connections against a single endpoint.
///
/// `build` may hand back a connection whose handshake is still in flight;
/// the balancer counts it as pending until it reports ready.
pub trait ConnectionFactory {
    fn build(&mut self) -> Result<Connection, ConnectionError>;

    /// Readiness of the endpoint in `[0, 1]`.
    fn availability(&self) -> f64;

    fn name(&self) -> &str;
}

/// Factory dialing one TCP endpoint with shared connection options.
pub struct TcpConnectionFactory {
    addr: SocketAddr,
    name: String,
    options: ConnectionOptions,
    socket_buf_size: Option<usize>,
}

impl TcpConnectionFactory {
    pub fn new(addr: SocketAddr, options: ConnectionOptions) -> Self {
        Self { addr, name: addr.to_string(), options, socket_buf_size: None }
    }

    /// Kernel SO_SNDBUF / SO_RCVBUF for every dialed socket.
    pub fn with_socket_buf_size(mut self, size: usize) -> Self {
        self.socket_buf_size = Some(size);
        self
    }

    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    fn build(&mut self) -> Result<Connection, ConnectionError> {
        let transport = TcpTransport::connect_with(self.addr, self.socket_buf_size)?;
        Connection::client(transport, self.options.clone())
    }

    fn availability(&self) -> f64 {
        1.0
    }

    fn name(&self) -> &str {
        &self.name
    }
}
