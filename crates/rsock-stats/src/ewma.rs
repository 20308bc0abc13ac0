use rsock_timing::{Duration, Instant};

const LN_2: f64 = std::f64::consts::LN_2;

/// Exponentially weighted moving average with a half-life decay schedule.
///
/// `insert` folds a sample in after decaying the current value by the time
/// elapsed since the last touch; `value` applies the same lazy decay without
/// a sample. All arithmetic runs on the monotonic clock.
#[derive(Debug, Clone)]
pub struct Ewma {
    value: f64,
    half_life: Duration,
    last: Instant,
}

impl Ewma {
    pub fn new(half_life: Duration, init: f64) -> Self {
        Self::with_start(half_life, init, Instant::now())
    }

    pub fn with_start(half_life: Duration, init: f64, now: Instant) -> Self {
        Self { value: init, half_life, last: now }
    }

    #[inline]
    pub fn insert(&mut self, x: f64) {
        self.insert_at(Instant::now(), x);
    }

    pub fn insert_at(&mut self, now: Instant, x: f64) {
        let alpha = self.alpha(now);
        self.value = alpha * self.value + (1.0 - alpha) * x;
        self.last = now;
    }

    /// Decays the value to `now` and returns it.
    #[inline]
    pub fn value(&mut self) -> f64 {
        self.value_at(Instant::now())
    }

    pub fn value_at(&mut self, now: Instant) -> f64 {
        self.value *= self.alpha(now);
        self.last = now;
        self.value
    }

    /// Last materialized value, without advancing the decay.
    #[inline]
    pub fn peek(&self) -> f64 {
        self.value
    }

    #[inline]
    pub fn last_update(&self) -> Instant {
        self.last
    }

    #[inline]
    pub fn half_life(&self) -> Duration {
        self.half_life
    }

    pub fn reset_to(&mut self, now: Instant, value: f64) {
        self.value = value;
        self.last = now;
    }

    fn alpha(&self, now: Instant) -> f64 {
        if self.half_life == Duration::ZERO {
            return 0.0;
        }
        let dt = now.saturating_sub(self.last).as_nanos() as f64;
        (-dt * LN_2 / self.half_life.as_nanos() as f64).exp()
    }
}

/// EWMA whose half-life is measured in samples instead of elapsed time.
///
/// Each insert decays by one fixed step, so rates converge regardless of
/// how bursty the sample arrival is.
#[derive(Debug, Clone, Copy)]
pub struct SampleEwma {
    value: f64,
    alpha: f64,
}

impl SampleEwma {
    pub fn new(half_life_samples: f64, init: f64) -> Self {
        assert!(half_life_samples > 0.0);
        Self { value: init, alpha: (-LN_2 / half_life_samples).exp() }
    }

    #[inline]
    pub fn insert(&mut self, x: f64) {
        self.value = self.alpha * self.value + (1.0 - self.alpha) * x;
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }
}
