use std::sync::Arc;

use once_cell::sync::OnceCell;
use quanta::Mock;

pub type Clock = quanta::Clock;

// might be mocked
static GLOBAL_CLOCK: OnceCell<Clock> = OnceCell::new();
static GLOBAL_MOCK: OnceCell<Arc<Mock>> = OnceCell::new();

/// Install a mock as the process-wide clock and return its controller.
///
/// Must run before anything reads the clock; the first reader freezes the
/// choice. Repeated calls return the same controller.
///
/// # Panics
/// Panics if the real clock was already installed by an earlier read.
pub fn init_global_with_mock() -> Arc<Mock> {
    let controller = GLOBAL_MOCK.get_or_init(|| {
        let (clock, controller) = Clock::mock();
        assert!(
            GLOBAL_CLOCK.set(clock).is_ok(),
            "global clock already initialised, install the mock before any Instant::now()"
        );
        // start at a nonzero reading so Instant::ZERO means "never"
        controller.increment(1);
        controller
    });
    controller.clone()
}

#[inline]
pub fn global_clock() -> &'static Clock {
    GLOBAL_CLOCK.get_or_init(Clock::new)
}
