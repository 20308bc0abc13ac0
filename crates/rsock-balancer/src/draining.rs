use rsock::{Payload, RSocket, Stream, StreamError, StreamErrorKind};
use rsock_timing::{Duration, Instant};
use tracing::debug;

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Defers the inner close until every outstanding request terminates or a
/// drain timeout elapses. While draining, availability is zero and new
/// requests are refused; the inner close runs exactly once.
pub struct DrainingSocket<S> {
    inner: S,
    inflight: Vec<Stream>,
    pending_close: bool,
    drain_deadline: Instant,
    drain_timeout: Duration,
    inner_closed: bool,
}

impl<S: RSocket> DrainingSocket<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            inflight: Vec::new(),
            pending_close: false,
            drain_deadline: Instant::MAX,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            inner_closed: false,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    #[inline]
    pub fn is_draining(&self) -> bool {
        self.pending_close && !self.inner_closed
    }

    /// Requests issued through this socket that have not terminated.
    pub fn outstanding(&self) -> usize {
        self.inflight.iter().filter(|s| !s.is_terminated()).count()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    fn close_inner_once(&mut self) {
        if !self.inner_closed {
            self.inner.close();
            self.inner_closed = true;
        }
    }
}

impl<S: RSocket> RSocket for DrainingSocket<S> {
    fn request(&mut self, req: Payload) -> Stream {
        if self.pending_close || self.inner_closed {
            return Stream::failed(StreamError::new(
                StreamErrorKind::Connection,
                "socket is draining",
            ));
        }
        let stream = self.inner.request(req);
        self.inflight.push(stream.clone());
        stream
    }

    fn availability(&self) -> f64 {
        if self.pending_close || self.inner_closed { 0.0 } else { self.inner.availability() }
    }

    fn poll(&mut self) {
        self.inner.poll();
        self.inflight.retain(|s| !s.is_terminated());
        if self.pending_close
            && !self.inner_closed
            && (self.inflight.is_empty() || Instant::now() >= self.drain_deadline)
        {
            debug!(drained = self.inflight.is_empty(), "drain finished, closing inner socket");
            self.close_inner_once();
        }
    }

    fn close(&mut self) {
        if self.pending_close || self.inner_closed {
            return;
        }
        self.inflight.retain(|s| !s.is_terminated());
        if self.inflight.is_empty() {
            self.close_inner_once();
        } else {
            debug!(outstanding = self.inflight.len(), "deferring close until drained");
            self.pending_close = true;
            self.drain_deadline = Instant::now() + self.drain_timeout;
        }
    }

    fn is_closed(&self) -> bool {
        self.inner_closed || self.inner.is_closed()
    }
}
