use std::{
    fmt,
    io,
    net::{SocketAddr, ToSocketAddrs},
};

use rsock::ConnectionOptions;
use rsock_timing::Duration;
use serde::Deserialize;

/// Aperture balancer knobs. Defaults follow the reference behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadBalancerOptions {
    pub initial_aperture: i32,
    pub min_aperture: i32,
    pub max_aperture: i32,
    /// Idle span after which a socket's latency prediction decays.
    pub inactivity_period: Duration,
    /// Cadence of the slowest-socket recycle pass.
    pub refresh_period: Duration,
    /// Minimum spacing between aperture adjustments.
    pub aperture_refresh_period: Duration,
    /// How long an evicted or closed socket may drain.
    pub drain_timeout: Duration,
}

impl Default for LoadBalancerOptions {
    fn default() -> Self {
        Self {
            initial_aperture: 5,
            min_aperture: 4,
            max_aperture: 100,
            inactivity_period: Duration::from_millis(1000),
            refresh_period: Duration::from_mins(5),
            aperture_refresh_period: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Retry filter knobs.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ReEnqueueOptions {
    /// Hard cap on retries per request.
    pub max_reenqueue: u32,
    /// Ceiling on the observed retry rate; above it retries stop.
    pub max_reenqueue_rate: f64,
}

impl Default for ReEnqueueOptions {
    fn default() -> Self {
        Self { max_reenqueue: 3, max_reenqueue_rate: 0.05 }
    }
}

/// How [`TcpLoadBalancer::get_connection`] picks among live connections.
///
/// [`TcpLoadBalancer::get_connection`]: crate::TcpLoadBalancer::get_connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Two random candidates, highest availability wins.
    #[default]
    PowerOfTwo,
    /// Uniform random.
    Random,
}

/// Fixed-pool balancer knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpLoadBalancerOptions {
    /// Target number of live connections.
    pub size: usize,
    pub strategy: SelectionStrategy,
    pub connection: ConnectionOptions,
}

impl Default for TcpLoadBalancerOptions {
    fn default() -> Self {
        Self {
            size: 5,
            strategy: SelectionStrategy::default(),
            connection: ConnectionOptions::default(),
        }
    }
}

/// Endpoint identity for the fixed pool; formats as `"host:port"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn resolve(&self) -> io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no address"))
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for HostPort {
    fn from(addr: SocketAddr) -> Self {
        Self { host: addr.ip().to_string(), port: addr.port() }
    }
}
