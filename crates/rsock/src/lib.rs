pub mod connection;
pub mod echo;
pub mod error;
pub mod factory;
pub mod options;
pub mod payload;
pub mod socket;
pub mod stream;
pub mod transport;

pub use connection::{Connection, ConnectionEvent, Role};
pub use echo::EchoResponder;
pub use error::{ConnectionError, StreamError, StreamErrorKind};
pub use factory::{ConnectionFactory, TcpConnectionFactory};
pub use options::ConnectionOptions;
pub use payload::Payload;
pub use rsock_stats as stats;
pub use rsock_timing as timing;
pub use rsock_wire as wire;
pub use socket::RSocket;
pub use stream::{Stream, StreamOutcome};
pub use tracing;
