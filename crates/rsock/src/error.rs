use rsock_wire::{ErrorCode, FrameError};

/// Connection-scoped failures. Any of these closes the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("transport closed")]
    TransportClosed,
    #[error("transport io ({kind:?}): {message}")]
    Io { kind: std::io::ErrorKind, message: String },
    #[error("{0}")]
    Frame(#[from] FrameError),
    #[error("setup failed ({code:?}): {message}")]
    Setup { code: ErrorCode, message: String },
    #[error("peer reported a connection error: {0}")]
    Peer(String),
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    #[error("outgoing stream ids exhausted")]
    StreamIdsExhausted,
    #[error("connection closed")]
    Closed,
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io { kind: err.kind(), message: err.to_string() }
    }
}

/// Classification of a stream's terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamErrorKind {
    Setup,
    Connection,
    Application,
    Rejected,
    Canceled,
    Invalid,
    Reserved,
    /// The load balancer had no usable socket at request time.
    EmptyBalancer,
}

/// Terminal error delivered on a single stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub message: String,
}

impl StreamError {
    pub fn new(kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Build from a wire ERROR frame.
    pub fn from_wire(code: ErrorCode, data: Option<&[u8]>) -> Self {
        let kind = match code {
            ErrorCode::InvalidSetup | ErrorCode::UnsupportedSetup | ErrorCode::RejectedSetup => {
                StreamErrorKind::Setup
            }
            ErrorCode::ConnectionError => StreamErrorKind::Connection,
            ErrorCode::ApplicationError => StreamErrorKind::Application,
            ErrorCode::Rejected => StreamErrorKind::Rejected,
            ErrorCode::Canceled => StreamErrorKind::Canceled,
            ErrorCode::Invalid => StreamErrorKind::Invalid,
            ErrorCode::Reserved => StreamErrorKind::Reserved,
        };
        let message = data
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .unwrap_or_else(|| format!("{code:?}"));
        Self { kind, message }
    }

    /// Kinds the reenqueue filter may retry: the request never ran to
    /// completion on the server, so re-issuing it is safe for idempotent
    /// traffic.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            StreamErrorKind::Rejected | StreamErrorKind::Canceled | StreamErrorKind::Connection
        )
    }
}

impl From<&ConnectionError> for StreamError {
    fn from(err: &ConnectionError) -> Self {
        match err {
            ConnectionError::Setup { code, message } => Self::new(
                StreamErrorKind::Setup,
                format!("{code:?}: {message}"),
            ),
            other => Self::new(StreamErrorKind::Connection, other.to_string()),
        }
    }
}
