use std::rc::Rc;

use rand::Rng;
use rsock::{
    Connection, ConnectionFactory, Payload, RSocket, Stream, StreamError, StreamErrorKind,
};
use rsock_stats::{NullRecorder, Recorder};
use rsock_timing::Repeater;
use tracing::{debug, info, warn};

use crate::{
    draining::DrainingSocket,
    failure::FailureAccrualSocket,
    options::LoadBalancerOptions,
    weighted::WeightedSocket,
};

/// Decorator chain the balancer builds around every connection.
type Member = FailureAccrualSocket<WeightedSocket<DrainingSocket<Connection>>>;

struct MemberEntry {
    socket: Member,
    factory: Box<dyn ConnectionFactory>,
}

struct PendingEntry {
    conn: Connection,
    factory: Box<dyn ConnectionFactory>,
}

/// Aperture-controlled, latency-weighted balancer over a set of
/// connection factories.
///
/// The balancer keeps an aperture-sized subset of factories connected,
/// picks a socket per request by power-of-three-choices over
/// `availability / (1 + predicted_latency · (outstanding + 1))`, grows or
/// shrinks the aperture from the average outstanding load, and periodically
/// recycles the slowest socket to keep exploring the factory set.
pub struct LoadBalancer {
    factories: Vec<Box<dyn ConnectionFactory>>,
    sockets: Vec<MemberEntry>,
    pending: Vec<PendingEntry>,
    /// Evicted sockets still draining; polled until they finish.
    retired: Vec<Member>,
    inflight: Vec<Stream>,
    target_aperture: i32,
    options: LoadBalancerOptions,
    aperture_gate: Repeater,
    recycler: Repeater,
    closed: bool,
    ever_ready: bool,
    recorder: Rc<dyn Recorder>,
}

impl LoadBalancer {
    pub fn new(factories: Vec<Box<dyn ConnectionFactory>>, options: LoadBalancerOptions) -> Self {
        let aperture_gate = Repeater::every(options.aperture_refresh_period);
        let recycler = Repeater::every_from_now(options.refresh_period);
        Self {
            factories,
            sockets: Vec::new(),
            pending: Vec::new(),
            retired: Vec::new(),
            inflight: Vec::new(),
            target_aperture: options.initial_aperture,
            options,
            aperture_gate,
            recycler,
            closed: false,
            ever_ready: false,
            recorder: Rc::new(NullRecorder),
        }
    }

    pub fn with_recorder(mut self, recorder: Rc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    #[inline]
    pub fn target_aperture(&self) -> i32 {
        self.target_aperture
    }

    #[inline]
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn factory_count(&self) -> usize {
        self.factories.len()
    }

    #[inline]
    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }

    /// At least one socket has come up since construction.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ever_ready && !self.closed
    }

    /// After [`close`](RSocket::close): whether every socket finished
    /// draining.
    pub fn is_shutdown_complete(&self) -> bool {
        self.closed && self.sockets.is_empty() && self.pending.is_empty() && self.retired.is_empty()
    }

    pub fn add_factory(&mut self, factory: Box<dyn ConnectionFactory>) {
        debug!(name = factory.name(), "factory added");
        self.factories.push(factory);
        self.refresh_sockets();
    }

    /// Drop a factory and every socket it spawned.
    pub fn remove_factory(&mut self, name: &str) {
        self.factories.retain(|f| f.name() != name);
        let mut i = 0;
        while i < self.sockets.len() {
            if self.sockets[i].factory.name() == name {
                let MemberEntry { mut socket, .. } = self.sockets.swap_remove(i);
                socket.close();
                if !socket.is_closed() {
                    self.retired.push(socket);
                }
            } else {
                i += 1;
            }
        }
        self.pending.retain_mut(|entry| {
            if entry.factory.name() == name {
                entry.conn.close();
                false
            } else {
                true
            }
        });
    }

    /// Mean availability of the member sockets; zero when closed or empty.
    pub fn availability(&self) -> f64 {
        if self.closed || self.sockets.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.sockets.iter().map(|e| e.socket.availability()).sum();
        sum / self.sockets.len() as f64
    }

    /// Select a socket and issue the request on it.
    ///
    /// With no usable socket the returned stream terminates with an
    /// empty-balancer error.
    pub fn request(&mut self, req: Payload) -> Stream {
        if self.closed {
            return Stream::failed(StreamError::new(
                StreamErrorKind::EmptyBalancer,
                "balancer closed",
            ));
        }
        self.refresh_sockets();
        let Some(index) = self.select_socket() else {
            self.recorder.incr("lb_empty", 1);
            return Stream::failed(StreamError::new(
                StreamErrorKind::EmptyBalancer,
                "no usable socket",
            ));
        };
        self.recorder.incr("lb_selects", 1);
        let stream = self.sockets[index].socket.request(req);
        self.inflight.push(stream.clone());
        stream
    }

    /// Drive pending connects, member sockets, draining evictees, the
    /// aperture, and the recycle timer.
    pub fn poll(&mut self) {
        if self.closed {
            self.drive_shutdown();
            return;
        }

        self.drive_pending();

        let mut i = 0;
        while i < self.sockets.len() {
            self.sockets[i].socket.poll();
            if self.sockets[i].socket.is_closed() {
                let MemberEntry { socket, factory } = self.sockets.swap_remove(i);
                debug!(name = factory.name(), "socket closed, returning factory");
                drop(socket);
                self.factories.push(factory);
            } else {
                i += 1;
            }
        }

        self.drive_retired();
        self.inflight.retain(|s| !s.is_terminated());
        self.refresh_sockets();

        if self.recycler.fired() && !self.sockets.is_empty() && !self.factories.is_empty() {
            debug!("recycle tick, evicting the slowest socket");
            self.recorder.incr("lb_recycles", 1);
            self.evict_slowest();
        }
    }

    fn drive_pending(&mut self) {
        let mut i = 0;
        while i < self.pending.len() {
            self.pending[i].conn.poll();
            if self.pending[i].conn.is_closed() {
                let PendingEntry { factory, .. } = self.pending.swap_remove(i);
                warn!(name = factory.name(), "pending socket died before ready");
                self.factories.push(factory);
            } else if self.pending[i].conn.is_ready() {
                let PendingEntry { conn, factory } = self.pending.swap_remove(i);
                debug!(name = factory.name(), "socket ready");
                let draining =
                    DrainingSocket::new(conn).with_drain_timeout(self.options.drain_timeout);
                let weighted = WeightedSocket::new(draining, self.options.inactivity_period);
                let member = FailureAccrualSocket::new(weighted);
                self.sockets.push(MemberEntry { socket: member, factory });
                if !self.ever_ready {
                    self.ever_ready = true;
                    info!("balancer ready");
                }
            } else {
                i += 1;
            }
        }
    }

    fn drive_retired(&mut self) {
        for socket in &mut self.retired {
            socket.poll();
        }
        self.retired.retain(|s| !s.is_closed());
    }

    fn drive_shutdown(&mut self) {
        self.drive_retired();
        self.inflight.retain(|s| !s.is_terminated());
    }

    fn refresh_sockets(&mut self) {
        if self.closed {
            return;
        }
        self.update_aperture();
        let connected = self.sockets.len() + self.pending.len();
        let target = self.target_aperture.max(0) as usize;
        if connected < target {
            self.build_one();
        } else if connected > target && !self.sockets.is_empty() {
            debug!(connected, target, "over aperture, evicting the slowest socket");
            self.evict_slowest();
        }
    }

    fn update_aperture(&mut self) {
        self.target_aperture =
            self.target_aperture.clamp(self.options.min_aperture, self.options.max_aperture);
        if !self.aperture_gate.fired() || self.sockets.is_empty() {
            return;
        }
        let avg = self.inflight.len() as f64 / self.sockets.len() as f64;
        if avg < 1.5 && self.target_aperture > self.options.min_aperture {
            self.target_aperture -= 1;
        } else if avg > 2.5 && self.target_aperture < self.options.max_aperture {
            self.target_aperture += 1;
        }
        self.recorder.observe("lb_aperture", f64::from(self.target_aperture));
    }

    /// Open one socket from the best available factory. The winning factory
    /// leaves the list and travels with its socket until removal.
    fn build_one(&mut self) {
        let Some(index) = self.select_factory() else {
            return;
        };
        let mut factory = self.factories.swap_remove(index);
        match factory.build() {
            Ok(conn) => {
                debug!(name = factory.name(), "building socket");
                self.recorder.incr("lb_builds", 1);
                self.pending.push(PendingEntry { conn, factory });
            }
            Err(err) => {
                warn!(name = factory.name(), %err, "factory build failed");
                self.recorder.incr("lb_build_failures", 1);
                self.factories.push(factory);
            }
        }
    }

    /// Power-of-three-choices over factory availability.
    fn select_factory(&mut self) -> Option<usize> {
        let n = self.factories.len();
        if n == 0 {
            return None;
        }
        let candidates = pick_candidates(n);
        let mut best: Option<(usize, f64)> = None;
        for &i in &candidates {
            let availability = self.factories[i].availability();
            if best.is_none_or(|(_, b)| availability > b) {
                best = Some((i, availability));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Power-of-three-choices over the load function; ties keep the socket
    /// sampled first.
    fn select_socket(&mut self) -> Option<usize> {
        let n = self.sockets.len();
        if n == 0 {
            return None;
        }
        let candidates = if n <= 3 {
            (0..n).collect::<Vec<_>>()
        } else {
            let mut rng = rand::rng();
            let mut picked = sample_three(&mut rng, n);
            for _round in 0..4 {
                if picked.iter().all(|&i| self.sockets[i].socket.availability() > 0.0) {
                    break;
                }
                picked = sample_three(&mut rng, n);
            }
            picked.to_vec()
        };
        let mut best: Option<(usize, f64)> = None;
        for &i in &candidates {
            let load = self.load_of(i);
            if best.is_none_or(|(_, b)| load > b) {
                best = Some((i, load));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Higher is better: `availability / (1 + pred_latency · (outstanding + 1))`.
    fn load_of(&mut self, index: usize) -> f64 {
        let entry = &mut self.sockets[index];
        let availability = entry.socket.availability();
        let outstanding = entry.socket.inner().outstanding() as f64;
        let predicted = entry.socket.inner_mut().predicted_latency();
        availability / (1.0 + predicted * (outstanding + 1.0))
    }

    fn predicted_of(&mut self, index: usize) -> f64 {
        self.sockets[index].socket.inner_mut().predicted_latency()
    }

    /// Evict the socket with the worst predicted latency (P³C sampled).
    fn evict_slowest(&mut self) {
        let n = self.sockets.len();
        if n == 0 {
            return;
        }
        let candidates = pick_candidates(n);
        let mut worst: Option<(usize, f64)> = None;
        for &i in &candidates {
            let predicted = self.predicted_of(i);
            if worst.is_none_or(|(_, w)| predicted > w) {
                worst = Some((i, predicted));
            }
        }
        if let Some((index, predicted)) = worst {
            debug!(predicted_us = predicted, "evicting socket");
            self.recorder.incr("lb_evictions", 1);
            self.remove_socket(index);
        }
    }

    /// Close (draining) and detach a socket, returning its factory to the
    /// pool.
    fn remove_socket(&mut self, index: usize) {
        let MemberEntry { mut socket, factory } = self.sockets.swap_remove(index);
        socket.close();
        if !socket.is_closed() {
            self.retired.push(socket);
        }
        self.factories.push(factory);
    }
}

impl RSocket for LoadBalancer {
    fn request(&mut self, req: Payload) -> Stream {
        LoadBalancer::request(self, req)
    }

    fn availability(&self) -> f64 {
        LoadBalancer::availability(self)
    }

    fn poll(&mut self) {
        LoadBalancer::poll(self);
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        info!("closing balancer");
        self.closed = true;
        for entry in self.pending.drain(..) {
            let PendingEntry { mut conn, .. } = entry;
            conn.close();
        }
        for entry in self.sockets.drain(..) {
            let MemberEntry { mut socket, .. } = entry;
            socket.close();
            if !socket.is_closed() {
                self.retired.push(socket);
            }
        }
        self.factories.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// All indices when the set is small, otherwise three random distinct ones.
fn pick_candidates(n: usize) -> Vec<usize> {
    if n <= 3 { (0..n).collect() } else { sample_three(&mut rand::rng(), n).to_vec() }
}

/// Three distinct indices in `[0, n)`; requires `n > 3`.
fn sample_three(rng: &mut impl Rng, n: usize) -> [usize; 3] {
    let a = rng.random_range(0..n);
    let mut b = rng.random_range(0..n);
    while b == a {
        b = rng.random_range(0..n);
    }
    let mut c = rng.random_range(0..n);
    while c == a || c == b {
        c = rng.random_range(0..n);
    }
    [a, b, c]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsock::StreamOutcome;

    #[test]
    fn empty_balancer_fails_requests_asynchronously() {
        let mut lb = LoadBalancer::new(Vec::new(), LoadBalancerOptions::default());
        let stream = lb.request(Payload::from_data(b"nobody home".to_vec()));
        match stream.poll() {
            Some(StreamOutcome::Error(e)) => assert_eq!(e.kind, StreamErrorKind::EmptyBalancer),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(lb.availability(), 0.0);
    }

    #[test]
    fn closed_balancer_reports_zero_availability() {
        let mut lb = LoadBalancer::new(Vec::new(), LoadBalancerOptions::default());
        RSocket::close(&mut lb);
        assert!(lb.is_closed());
        assert!(lb.is_shutdown_complete());
        let stream = lb.request(Payload::default());
        assert!(stream.is_terminated());
    }

    #[test]
    fn sample_three_is_distinct() {
        let mut rng = rand::rng();
        for n in 4..20 {
            let [a, b, c] = sample_three(&mut rng, n);
            assert!(a != b && b != c && a != c);
            assert!(a < n && b < n && c < n);
        }
    }
}
