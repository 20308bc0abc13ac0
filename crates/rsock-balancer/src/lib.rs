mod balancer;
mod draining;
mod failure;
mod options;
mod pool;
mod reenqueue;
mod weighted;

#[cfg(test)]
pub(crate) mod testutil;

pub use balancer::LoadBalancer;
pub use draining::DrainingSocket;
pub use failure::FailureAccrualSocket;
pub use options::{HostPort, LoadBalancerOptions, ReEnqueueOptions, SelectionStrategy, TcpLoadBalancerOptions};
pub use pool::{PoolEvent, TcpLoadBalancer};
pub use reenqueue::ReEnqueueFilter;
pub use weighted::WeightedSocket;
