use rsock::{Payload, RSocket, Stream, StreamOutcome};
use rsock_stats::SampleEwma;
use tracing::debug;

use crate::options::ReEnqueueOptions;

/// Half-life, in samples, of the observed reenqueue rate.
const RATE_HALF_LIFE_SAMPLES: f64 = 50.0;

/// Retries idempotent failures on the decorated socket.
///
/// Callers get a proxy stream; the filter re-issues the request on the same
/// inner socket when the inner exchange dies with a retryable kind
/// (rejected, canceled, connection). Retries are capped per request and by
/// an adaptive rate limit: the higher the recent reenqueue rate, the fewer
/// attempts are allowed.
pub struct ReEnqueueFilter<S> {
    inner: S,
    options: ReEnqueueOptions,
    rate: SampleEwma,
    entries: Vec<Entry>,
}

struct Entry {
    proxy: Stream,
    attempt: Stream,
    request: Payload,
    attempts: u32,
}

impl<S: RSocket> ReEnqueueFilter<S> {
    pub fn new(inner: S) -> Self {
        Self::with_options(inner, ReEnqueueOptions::default())
    }

    pub fn with_options(inner: S, options: ReEnqueueOptions) -> Self {
        Self { inner, options, rate: SampleEwma::new(RATE_HALF_LIFE_SAMPLES, 0.0), entries: Vec::new() }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Observed reenqueue rate in `[0, 1]`.
    pub fn reenqueue_rate(&self) -> f64 {
        self.rate.value()
    }

    /// Retries still permitted at the current rate. Integer truncation is
    /// load-bearing: once `max_rate / rate` drops below one, retries stop
    /// entirely until the rate decays.
    fn effective_max(&self) -> u32 {
        let rate = self.rate.value();
        let cap = if rate > 0.0 {
            (self.options.max_reenqueue_rate / rate) as u32
        } else {
            u32::MAX
        };
        self.options.max_reenqueue.min(cap)
    }

    fn settle_entries(&mut self) {
        let mut i = 0;
        while i < self.entries.len() {
            // forward a caller cancel to the live attempt
            if self.entries[i].proxy.cancel_requested() && !self.entries[i].attempt.is_terminated()
            {
                self.entries[i].attempt.cancel();
            }
            let Some(outcome) = self.entries[i].attempt.poll() else {
                i += 1;
                continue;
            };
            match outcome {
                StreamOutcome::Error(err)
                    if err.is_retryable()
                        && !self.entries[i].proxy.cancel_requested()
                        && self.entries[i].attempts < self.effective_max() =>
                {
                    let entry = &mut self.entries[i];
                    entry.attempts += 1;
                    debug!(attempts = entry.attempts, kind = ?err.kind, "reenqueueing request");
                    self.rate.insert(1.0);
                    entry.attempt = self.inner.request(entry.request.clone());
                    // the new attempt settles on a later poll
                    i += 1;
                }
                outcome => {
                    if matches!(outcome, StreamOutcome::Response(_)) {
                        self.rate.insert(0.0);
                    }
                    let entry = self.entries.swap_remove(i);
                    entry.proxy.settle(outcome);
                }
            }
        }
    }
}

impl<S: RSocket> RSocket for ReEnqueueFilter<S> {
    fn request(&mut self, req: Payload) -> Stream {
        let attempt = self.inner.request(req.clone());
        let proxy = Stream::detached();
        self.entries.push(Entry { proxy: proxy.clone(), attempt, request: req, attempts: 0 });
        proxy
    }

    fn availability(&self) -> f64 {
        self.inner.availability()
    }

    fn poll(&mut self) {
        self.inner.poll();
        self.settle_entries();
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

    fn rejected() -> StreamOutcome {
        StreamOutcome::Error(StreamError::new(StreamErrorKind::Rejected, "busy"))
    }

    fn app_error() -> StreamOutcome {
        StreamOutcome::Error(StreamError::new(StreamErrorKind::Application, "boom"))
    }

    fn drive<S: RSocket>(filter: &mut ReEnqueueFilter<S>, proxy: &Stream) {
        for _ in 0..16 {
            filter.poll();
            if proxy.is_terminated() {
                return;
            }
        }
        panic!("proxy never terminated");
    }

    #[test]
    fn retryable_error_is_reissued_then_capped() {
        let mut filter = ReEnqueueFilter::with_options(
            FakeSocket::new(),
            ReEnqueueOptions { max_reenqueue: 2, max_reenqueue_rate: 1.0 },
        );
        for _ in 0..8 {
            filter.inner_mut().push_outcome(rejected());
        }
        let proxy = filter.request(Payload::from_data(b"idempotent".to_vec()));
        drive(&mut filter, &proxy);
        // one original attempt plus two retries
        assert_eq!(filter.inner().requests, 3);
        match proxy.poll() {
            Some(StreamOutcome::Error(e)) => assert_eq!(e.kind, StreamErrorKind::Rejected),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn success_after_one_retry() {
        let mut filter = ReEnqueueFilter::new(FakeSocket::new());
        filter.inner_mut().push_outcome(rejected());
        filter.inner_mut().push_outcome(StreamOutcome::Response(Payload::from_data(
            b"second time lucky".to_vec(),
        )));
        let proxy = filter.request(Payload::default());
        drive(&mut filter, &proxy);
        assert_eq!(filter.inner().requests, 2);
        assert!(matches!(proxy.poll(), Some(StreamOutcome::Response(_))));
    }

    #[test]
    fn application_errors_are_not_retried() {
        let mut filter = ReEnqueueFilter::new(FakeSocket::new());
        filter.inner_mut().push_outcome(app_error());
        let proxy = filter.request(Payload::default());
        drive(&mut filter, &proxy);
        assert_eq!(filter.inner().requests, 1);
        match proxy.poll() {
            Some(StreamOutcome::Error(e)) => assert_eq!(e.kind, StreamErrorKind::Application),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn cancelled_proxies_are_not_retried() {
        let mut filter = ReEnqueueFilter::new(FakeSocket::new());
        filter.inner_mut().push_outcome(StreamOutcome::Error(StreamError::new(
            StreamErrorKind::Canceled,
            "cancelled",
        )));
        let proxy = filter.request(Payload::default());
        proxy.cancel();
        drive(&mut filter, &proxy);
        assert_eq!(filter.inner().requests, 1, "a user cancel must not respawn the request");
    }

    #[test]
    fn rate_cap_strangles_retries_under_constant_rejection() {
        let mut filter = ReEnqueueFilter::with_options(
            FakeSocket::new(),
            ReEnqueueOptions { max_reenqueue: 2, max_reenqueue_rate: 0.05 },
        );
        let total = 100;
        for _ in 0..total {
            for _ in 0..8 {
                filter.inner_mut().push_outcome(rejected());
            }
            let proxy = filter.request(Payload::default());
            drive(&mut filter, &proxy);
            assert!(proxy.is_terminated());
        }
        let reenqueues = filter.inner().requests - total;
        assert!(reenqueues < 25, "reenqueues {reenqueues} exceeded the adaptive cap");
    }
}
