use std::{cell::RefCell, collections::HashMap};

use rsock_timing::Duration;

/// Sink for runtime instrumentation.
///
/// Injected where needed; the crates never install process-wide state.
/// Implementations must tolerate being called from hot paths.
pub trait Recorder {
    /// Bump a counter.
    fn incr(&self, name: &'static str, delta: u64);
    /// Record an elapsed interval under a timer.
    fn timing(&self, name: &'static str, elapsed: Duration);
    /// Record a raw observation under a histogram.
    fn observe(&self, name: &'static str, value: f64);
}

/// Discards everything. The default when no sink is injected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn incr(&self, _name: &'static str, _delta: u64) {}
    fn timing(&self, _name: &'static str, _elapsed: Duration) {}
    fn observe(&self, _name: &'static str, _value: f64) {}
}

/// Aggregated intervals for one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerStat {
    pub count: u64,
    pub sum: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl TimerStat {
    fn new() -> Self {
        Self { count: 0, sum: Duration::ZERO, min: Duration::MAX, max: Duration::ZERO }
    }

    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.sum = self.sum.saturating_add(elapsed);
        if elapsed < self.min {
            self.min = elapsed;
        }
        if elapsed > self.max {
            self.max = elapsed;
        }
    }

    #[inline]
    pub fn avg(&self) -> Duration {
        if self.count == 0 { Duration::ZERO } else { self.sum / self.count }
    }

    /// `min` is saturated while empty.
    #[inline]
    pub fn min(&self) -> Duration {
        if self.count == 0 { Duration::ZERO } else { self.min }
    }
}

/// Aggregated observations for one histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramStat {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramStat {
    fn new() -> Self {
        Self { count: 0, sum: 0.0, min: f64::MAX, max: f64::MIN }
    }

    fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    #[inline]
    pub fn avg(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }
}

/// Materialized view of everything an [`Aggregator`] has seen.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub counters: HashMap<&'static str, u64>,
    pub timers: HashMap<&'static str, TimerStat>,
    pub histograms: HashMap<&'static str, HistogramStat>,
}

impl MetricsSnapshot {
    #[inline]
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

#[derive(Default)]
struct Windows {
    counters: HashMap<&'static str, u64>,
    timers: HashMap<&'static str, TimerStat>,
    histograms: HashMap<&'static str, HistogramStat>,
}

/// In-process [`Recorder`] that aggregates into count/sum/min/max windows
/// and materializes them on demand.
#[derive(Default)]
pub struct Aggregator {
    inner: RefCell<Windows>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current windows.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.borrow();
        MetricsSnapshot {
            counters: inner.counters.clone(),
            timers: inner.timers.clone(),
            histograms: inner.histograms.clone(),
        }
    }

    /// Materialize the current windows and reset them.
    pub fn take_snapshot(&self) -> MetricsSnapshot {
        let mut inner = self.inner.borrow_mut();
        MetricsSnapshot {
            counters: std::mem::take(&mut inner.counters),
            timers: std::mem::take(&mut inner.timers),
            histograms: std::mem::take(&mut inner.histograms),
        }
    }
}

impl Recorder for Aggregator {
    fn incr(&self, name: &'static str, delta: u64) {
        *self.inner.borrow_mut().counters.entry(name).or_insert(0) += delta;
    }

    fn timing(&self, name: &'static str, elapsed: Duration) {
        self.inner.borrow_mut().timers.entry(name).or_insert_with(TimerStat::new).record(elapsed);
    }

    fn observe(&self, name: &'static str, value: f64) {
        self.inner
            .borrow_mut()
            .histograms
            .entry(name)
            .or_insert_with(HistogramStat::new)
            .record(value);
    }
}
