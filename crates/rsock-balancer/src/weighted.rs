use rsock::{Payload, RSocket, Stream, StreamOutcome};
use rsock_stats::SlidingMedian;
use rsock_timing::{Duration, Instant};

/// Synthetic latency (µs) attributed to a socket that has in-flight
/// requests but no completed sample yet. Keeps cold sockets from looking
/// infinitely fast while they warm up.
pub const STARTUP_PENALTY: f64 = 1_000_000.0;

/// Fraction an idle socket's prediction decays by per inactivity period.
const DECAY: f64 = 0.8;

/// Tracks load and predicts latency for one socket.
///
/// Round trips feed a sliding median; outstanding counts and a running
/// (outstanding × elapsed) integral provide an instantaneous load estimate
/// that dominates the prediction when the socket is slower than its history
/// suggests. Idle sockets decay toward zero so stale predictions do not pin
/// the balancer's choices.
pub struct WeightedSocket<S> {
    inner: S,
    inflight: Vec<(Stream, Instant)>,
    outstanding: i64,
    /// Last send or decay mark.
    stamp: Instant,
    /// Last accounting activity.
    stamp0: Instant,
    /// Accumulated (outstanding × elapsed) in µs.
    duration_us: i64,
    median: SlidingMedian,
    inactivity_period: Duration,
}

#[inline]
fn elapsed_us(from: Instant, to: Instant) -> i64 {
    to.saturating_sub(from).as_micros_u64() as i64
}

impl<S: RSocket> WeightedSocket<S> {
    pub fn new(inner: S, inactivity_period: Duration) -> Self {
        let now = Instant::now();
        Self {
            inner,
            inflight: Vec::new(),
            outstanding: 0,
            stamp: now,
            stamp0: now,
            duration_us: 0,
            median: SlidingMedian::default(),
            inactivity_period,
        }
    }

    #[inline]
    pub fn outstanding(&self) -> i64 {
        self.outstanding
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Expected latency (µs) of the next request on this socket.
    pub fn predicted_latency(&mut self) -> f64 {
        let now = Instant::now();
        let estimate = self.median.estimate() as f64 / 1_000.0;
        if estimate == 0.0 {
            if self.outstanding == 0 {
                // never used: look maximally attractive
                return 0.0;
            }
            return STARTUP_PENALTY + self.outstanding as f64;
        }
        if self.outstanding == 0 && now.saturating_sub(self.stamp) > self.inactivity_period {
            let decayed = (self.median.estimate() as f64 * DECAY) as u64;
            self.median.insert(decayed);
            self.stamp = now;
            self.stamp0 = now;
            return self.median.estimate() as f64 / 1_000.0;
        }
        let predicted = estimate * self.outstanding as f64;
        let instantaneous = self.instantaneous_us(now);
        if self.outstanding > 0 && predicted < instantaneous as f64 {
            instantaneous as f64 / self.outstanding as f64
        } else {
            estimate
        }
    }

    #[inline]
    fn instantaneous_us(&self, now: Instant) -> i64 {
        self.duration_us + elapsed_us(self.stamp0, now) * self.outstanding
    }

    fn on_terminate(&mut self, stream: &Stream, start: Instant) {
        let now = Instant::now();
        if matches!(stream.poll(), Some(StreamOutcome::Response(_))) {
            self.median.insert(now.saturating_sub(start).as_nanos());
        }
        self.duration_us +=
            elapsed_us(self.stamp0, now) * self.outstanding - elapsed_us(start, now);
        self.outstanding -= 1;
        self.stamp0 = now;
    }
}

impl<S: RSocket> RSocket for WeightedSocket<S> {
    fn request(&mut self, req: Payload) -> Stream {
        let start = Instant::now();
        self.duration_us += elapsed_us(self.stamp0, start) * self.outstanding;
        self.outstanding += 1;
        self.stamp = start;
        self.stamp0 = start;
        let stream = self.inner.request(req);
        self.inflight.push((stream.clone(), start));
        stream
    }

    fn availability(&self) -> f64 {
        self.inner.availability()
    }

    fn poll(&mut self) {
        self.inner.poll();
        let mut i = 0;
        while i < self.inflight.len() {
            if self.inflight[i].0.is_terminated() {
                let (stream, start) = self.inflight.swap_remove(i);
                self.on_terminate(&stream, start);
            } else {
                i += 1;
            }
        }
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
