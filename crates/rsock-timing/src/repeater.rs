use crate::{Duration, Instant};

/// Interval gate for poll-driven timers.
///
/// The first check after construction fires immediately
/// (`last_acted` starts at zero); use [`Repeater::reset`] to arm it
/// relative to now instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Repeater {
    interval: Duration,
    last_acted: Instant,
}

impl Repeater {
    #[inline]
    pub fn every(interval: Duration) -> Self {
        Self { interval, last_acted: Instant::ZERO }
    }

    /// Like [`Repeater::every`] but the first firing waits a full interval.
    #[inline]
    pub fn every_from_now(interval: Duration) -> Self {
        Self { interval, last_acted: Instant::now() }
    }

    #[inline]
    pub fn fired(&mut self) -> bool {
        if self.last_acted.elapsed() >= self.interval {
            self.last_acted = Instant::now();
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn maybe<F>(&mut self, mut f: F)
    where
        F: FnMut(Duration),
    {
        let el = self.last_acted.elapsed();
        if el >= self.interval {
            f(el);
            self.last_acted = Instant::now();
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[inline]
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn reset(&mut self) {
        self.last_acted = Instant::now();
    }

    pub fn force_fire(&mut self) {
        self.last_acted = Instant::ZERO;
    }
}
