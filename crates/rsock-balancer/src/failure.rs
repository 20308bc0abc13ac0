use rsock::{Payload, RSocket, Stream, StreamOutcome};
use rsock_stats::Ewma;
use rsock_timing::{Duration, Instant};
use tracing::debug;

const DEFAULT_HALF_LIFE: Duration = Duration::from_secs(30);
/// Floor so an unhealthy socket keeps a sliver of availability and can be
/// probed back to health.
const EPSILON: f64 = 1e-6;

#[inline]
fn clamp_epsilon(v: f64) -> f64 {
    v.clamp(EPSILON, 1.0)
}

/// Scores socket health as an EWMA of request outcomes.
///
/// Responses insert 1.0, terminations without a response insert 0.0, one
/// sample per stream. Once a full effective window (`half_life / ln 2`)
/// passes without a sample, the score snaps up by 0.5 (capped at 1.0) so a
/// previously failing socket gets probed again. External availability is
/// the clamped score times the inner availability.
pub struct FailureAccrualSocket<S> {
    inner: S,
    ewma: Ewma,
    window: Duration,
    last_sample: Instant,
    inflight: Vec<Stream>,
}

impl<S: RSocket> FailureAccrualSocket<S> {
    pub fn new(inner: S) -> Self {
        Self::with_half_life(inner, DEFAULT_HALF_LIFE)
    }

    pub fn with_half_life(inner: S, half_life: Duration) -> Self {
        let window = Duration((half_life.as_nanos() as f64 / std::f64::consts::LN_2) as u64);
        Self {
            inner,
            ewma: Ewma::new(half_life, 1.0),
            window,
            last_sample: Instant::now(),
            inflight: Vec::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Current health score in `[0, 1]`.
    pub fn score(&self) -> f64 {
        clamp_epsilon(self.ewma.peek())
    }

    fn record(&mut self, now: Instant, sample: f64) {
        self.ewma.insert_at(now, sample);
        self.last_sample = now;
    }

    fn maybe_reopen_window(&mut self, now: Instant) {
        if now.saturating_sub(self.last_sample) > self.window {
            let probed = (self.ewma.peek() + 0.5).min(1.0);
            debug!(score = probed, "failure accrual window expired, probing");
            self.ewma.reset_to(now, probed);
            self.last_sample = now;
        }
    }
}

impl<S: RSocket> RSocket for FailureAccrualSocket<S> {
    fn request(&mut self, req: Payload) -> Stream {
        let stream = self.inner.request(req);
        self.inflight.push(stream.clone());
        stream
    }

    fn availability(&self) -> f64 {
        clamp_epsilon(self.ewma.peek()) * self.inner.availability()
    }

    fn poll(&mut self) {
        self.inner.poll();
        let now = Instant::now();
        self.maybe_reopen_window(now);
        let mut i = 0;
        while i < self.inflight.len() {
            if self.inflight[i].is_terminated() {
                let stream = self.inflight.swap_remove(i);
                let sample = match stream.poll() {
                    Some(StreamOutcome::Response(_)) => 1.0,
                    _ => 0.0,
                };
                self.record(now, sample);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeSocket;
    use rsock::{StreamError, StreamErrorKind};

    fn error_outcome() -> StreamOutcome {
        StreamOutcome::Error(StreamError::new(StreamErrorKind::Application, "boom"))
    }

    #[test]
    fn healthy_socket_stays_fully_available() {
        let mut socket = FailureAccrualSocket::new(FakeSocket::new());
        for _ in 0..10 {
            let _s = socket.request(Payload::default());
            socket.inner_mut().push_outcome(StreamOutcome::Response(Payload::default()));
            socket.poll();
        }
        assert!(socket.availability() > 0.99, "availability {}", socket.availability());
    }

    #[test]
    fn failures_drag_availability_down() {
        // nanosecond half-life: every failure lands on a fully decayed score
        let mut socket =
            FailureAccrualSocket::with_half_life(FakeSocket::new(), Duration::from_nanos(100));
        for _ in 0..20 {
            let _s = socket.request(Payload::default());
            socket.inner_mut().push_outcome(error_outcome());
            socket.poll();
        }
        assert!(socket.availability() < 0.05, "availability {}", socket.availability());
        assert!(socket.availability() >= EPSILON, "the floor keeps the socket probeable");
    }

    #[test]
    fn availability_composes_with_the_inner_socket() {
        let mut socket = FailureAccrualSocket::new(FakeSocket::new());
        socket.inner_mut().availability = 0.5;
        let availability = socket.availability();
        assert!((availability - 0.5).abs() < 1e-6, "availability {availability}");
    }

    #[test]
    fn expired_window_probes_back_up() {
        // a microscopic half-life so the window elapses inside the test
        let mut socket =
            FailureAccrualSocket::with_half_life(FakeSocket::new(), Duration::from_nanos(100));
        for _ in 0..50 {
            let _s = socket.request(Payload::default());
            socket.inner_mut().push_outcome(error_outcome());
            socket.poll();
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
        socket.poll();
        assert!(socket.score() >= 0.5, "score {}", socket.score());
    }
}
