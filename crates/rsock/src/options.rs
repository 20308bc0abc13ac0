use rsock_timing::Duration;
use serde::Deserialize;

use crate::payload::Payload;

pub const DEFAULT_METADATA_ENCODING: &str = "utf-8";
pub const DEFAULT_DATA_ENCODING: &str = "utf-8";

/// Per-connection knobs. Defaults follow the protocol's recommendations;
/// durations accept humantime strings ("30s", "100ms") when deserialized.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Keepalive send interval (client side).
    pub keepalive: Duration,
    /// Advertised maximum connection lifetime, carried in SETUP.
    pub max_lifetime: Duration,
    /// Deadline for each outbound request.
    pub request_timeout: Duration,
    pub metadata_encoding: String,
    pub data_encoding: String,
    /// Request lease-based flow control from the server.
    pub lease: bool,
    pub strict: bool,
    /// Payload carried by the SETUP frame.
    #[serde(skip)]
    pub setup_payload: Payload,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_millis(1000),
            max_lifetime: Duration::from_millis(10_000),
            request_timeout: Duration::from_millis(30_000),
            metadata_encoding: DEFAULT_METADATA_ENCODING.to_owned(),
            data_encoding: DEFAULT_DATA_ENCODING.to_owned(),
            lease: false,
            strict: false,
            setup_payload: Payload::default(),
        }
    }
}
