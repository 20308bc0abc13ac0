use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use rand::Rng;
use rsock::{Connection, RSocket, transport::TcpTransport};
use tracing::{debug, warn};

use crate::options::{HostPort, SelectionStrategy, TcpLoadBalancerOptions};

/// Pool lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// First connection established.
    Ready,
    /// A connection to this endpoint became usable.
    Connect(HostPort),
    /// The pool reached its full target size for the first time.
    Connected,
    /// The pool was closed and all entries torn down.
    Closed,
}

/// Fixed-size connection pool over a discovered host list.
///
/// Every host lives in exactly one of three sets: `free` (not dialed),
/// `connecting`, or `connected`. Dial candidates are drawn uniformly at
/// random from `free`; closed connections return their host to `free` when
/// it is still in the host list, and the pool redials up to its size.
pub struct TcpLoadBalancer {
    options: TcpLoadBalancerOptions,
    hosts: Vec<HostPort>,
    free: IndexSet<HostPort>,
    connecting: IndexMap<HostPort, Connection>,
    connected: IndexMap<HostPort, Connection>,
    events: VecDeque<PoolEvent>,
    ready: bool,
    full_emitted: bool,
    closed: bool,
}

impl TcpLoadBalancer {
    pub fn new(hosts: Vec<HostPort>, options: TcpLoadBalancerOptions) -> Self {
        let mut pool = Self {
            options,
            free: hosts.iter().cloned().collect(),
            hosts,
            connecting: IndexMap::new(),
            connected: IndexMap::new(),
            events: VecDeque::new(),
            ready: false,
            full_emitted: false,
            closed: false,
        };
        pool.fill();
        pool
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready && !self.closed
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    #[inline]
    pub fn connecting_count(&self) -> usize {
        self.connecting.len()
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn hosts(&self) -> &[HostPort] {
        &self.hosts
    }

    pub fn connected_hosts(&self) -> Vec<HostPort> {
        self.connected.keys().cloned().collect()
    }

    /// How many sets currently track `host`. The invariant is exactly one
    /// for hosts in the list, zero otherwise.
    pub fn memberships(&self, host: &HostPort) -> usize {
        usize::from(self.free.contains(host))
            + usize::from(self.connecting.contains_key(host))
            + usize::from(self.connected.contains_key(host))
    }

    /// Drive dialing and all pooled connections, then drain events.
    pub fn poll_with<F>(&mut self, mut handler: F)
    where
        F: FnMut(PoolEvent),
    {
        if !self.closed {
            self.drive_connecting();
            self.drive_connected();
            self.fill();
        }
        while let Some(ev) = self.events.pop_front() {
            handler(ev);
        }
    }

    /// Pick a live connection per the configured strategy.
    pub fn get_connection(&mut self) -> Option<&mut Connection> {
        let n = self.connected.len();
        if n == 0 {
            return None;
        }
        let index = match self.options.strategy {
            SelectionStrategy::Random => rand::rng().random_range(0..n),
            SelectionStrategy::PowerOfTwo => {
                if n == 1 {
                    0
                } else {
                    let mut rng = rand::rng();
                    let a = rng.random_range(0..n);
                    let mut b = rng.random_range(0..n);
                    while b == a {
                        b = rng.random_range(0..n);
                    }
                    let avail = |i: usize| {
                        self.connected.get_index(i).map_or(0.0, |(_, c)| c.availability())
                    };
                    if avail(b) > avail(a) { b } else { a }
                }
            }
        };
        self.connected.get_index_mut(index).map(|(_, conn)| conn)
    }

    /// Apply a new host list: new hosts become dial candidates, removed
    /// hosts are closed wherever they are, and the pool redials up to its
    /// size.
    pub fn update_hosts(&mut self, new_hosts: Vec<HostPort>) {
        if self.closed {
            return;
        }
        for host in &new_hosts {
            if !self.hosts.contains(host) && self.memberships(host) == 0 {
                debug!(%host, "host added");
                self.free.insert(host.clone());
            }
        }
        let removed: Vec<HostPort> =
            self.hosts.iter().filter(|h| !new_hosts.contains(h)).cloned().collect();
        for host in removed {
            debug!(%host, "host removed");
            self.free.swap_remove(&host);
            if let Some(mut conn) = self.connecting.swap_remove(&host) {
                conn.close();
            }
            if let Some(mut conn) = self.connected.swap_remove(&host) {
                conn.close();
            }
        }
        self.hosts = new_hosts;
        self.fill();
    }

    /// Tear down every entry. Emits [`PoolEvent::Closed`] once both active
    /// sets are empty, which happens synchronously here.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for (_, mut conn) in self.connecting.drain(..) {
            conn.close();
        }
        for (_, mut conn) in self.connected.drain(..) {
            conn.close();
        }
        self.free.clear();
        self.events.push_back(PoolEvent::Closed);
    }

    fn active(&self) -> usize {
        self.connecting.len() + self.connected.len()
    }

    fn full_size(&self) -> usize {
        self.options.size.min(self.hosts.len())
    }

    fn drive_connecting(&mut self) {
        let mut i = 0;
        while i < self.connecting.len() {
            let ready = {
                let (_, conn) = self.connecting.get_index_mut(i).expect("index in range");
                conn.poll();
                if conn.is_closed() {
                    None
                } else {
                    Some(conn.is_ready())
                }
            };
            match ready {
                None => {
                    let (host, _) = self.connecting.swap_remove_index(i).expect("index in range");
                    warn!(%host, "dial failed");
                    if self.hosts.contains(&host) {
                        self.free.insert(host);
                    }
                }
                Some(true) => {
                    let (host, conn) = self.connecting.swap_remove_index(i).expect("index in range");
                    debug!(%host, "connection established");
                    self.connected.insert(host.clone(), conn);
                    self.events.push_back(PoolEvent::Connect(host));
                    if !self.ready {
                        self.ready = true;
                        self.events.push_back(PoolEvent::Ready);
                    }
                    if !self.full_emitted && self.connected.len() >= self.full_size() {
                        self.full_emitted = true;
                        self.events.push_back(PoolEvent::Connected);
                    }
                }
                Some(false) => i += 1,
            }
        }
    }

    fn drive_connected(&mut self) {
        let mut i = 0;
        while i < self.connected.len() {
            let closed = {
                let (_, conn) = self.connected.get_index_mut(i).expect("index in range");
                conn.poll();
                conn.is_closed()
            };
            if closed {
                let (host, _) = self.connected.swap_remove_index(i).expect("index in range");
                debug!(%host, "pooled connection closed");
                if self.hosts.contains(&host) {
                    self.free.insert(host);
                }
            } else {
                i += 1;
            }
        }
    }

    /// Dial random free candidates until the pool is at size.
    fn fill(&mut self) {
        while !self.closed && self.active() < self.options.size && !self.free.is_empty() {
            let index = rand::rng().random_range(0..self.free.len());
            let Some(host) = self.free.swap_remove_index(index) else { break };
            match self.dial(&host) {
                Ok(conn) => {
                    debug!(%host, "dialing");
                    self.connecting.insert(host, conn);
                }
                Err(err) => {
                    warn!(%host, %err, "dial attempt failed");
                    // retry on a later poll
                    self.free.insert(host);
                    break;
                }
            }
        }
    }

    fn dial(&self, host: &HostPort) -> Result<Connection, rsock::ConnectionError> {
        let addr = host.resolve()?;
        let transport = TcpTransport::connect(addr)?;
        Connection::client(transport, self.options.connection.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_without_hosts_is_inert() {
        let mut pool = TcpLoadBalancer::new(Vec::new(), TcpLoadBalancerOptions::default());
        assert_eq!(pool.connected_count(), 0);
        assert!(pool.get_connection().is_none());
        pool.poll_with(|ev| panic!("unexpected event {ev:?}"));
    }

    #[test]
    fn close_emits_closed_once() {
        let mut pool = TcpLoadBalancer::new(Vec::new(), TcpLoadBalancerOptions::default());
        pool.close();
        pool.close();
        let mut events = Vec::new();
        pool.poll_with(|ev| events.push(ev));
        assert_eq!(events, vec![PoolEvent::Closed]);
        assert!(pool.is_closed());
    }

    #[test]
    fn update_hosts_tracks_set_membership() {
        // unroutable hosts: dials stay in connecting, which is fine for
        // set bookkeeping
        let a = HostPort::new("127.0.0.1", 1);
        let b = HostPort::new("127.0.0.1", 2);
        let mut pool = TcpLoadBalancer::new(
            vec![a.clone()],
            TcpLoadBalancerOptions { size: 1, ..TcpLoadBalancerOptions::default() },
        );
        assert_eq!(pool.memberships(&a), 1);

        pool.update_hosts(vec![b.clone()]);
        assert_eq!(pool.memberships(&a), 0, "removed host fully dropped");
        assert_eq!(pool.memberships(&b), 1);
    }
}
