use crate::{
    connection::{Connection, ConnectionEvent},
    options::ConnectionOptions,
    socket::RSocket,
    transport::Transport,
};

/// Server loop that answers every request with its own payload.
///
/// The only server-side routing this runtime does; anything smarter lives
/// above the connection contract.
pub struct EchoResponder {
    conn: Connection,
}

impl EchoResponder {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Serve a freshly accepted transport with default options.
    pub fn serve(transport: impl Transport + 'static) -> Self {
        Self::new(Connection::server(transport, ConnectionOptions::default()))
    }

    /// Drive the connection, echoing every complete request.
    pub fn poll(&mut self) {
        self.conn.poll_with(|conn, ev| {
            if let ConnectionEvent::Request { stream_id, payload } = ev {
                let _ = conn.respond(stream_id, payload);
            }
        });
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
