mod clock;
mod duration;
mod instant;
mod repeater;

pub use clock::{Clock, global_clock, init_global_with_mock};
pub use duration::Duration;
pub use instant::Instant;
pub use repeater::Repeater;
