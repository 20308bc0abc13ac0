mod ewma;
mod median;
mod metrics;

pub use ewma::{Ewma, SampleEwma};
pub use median::SlidingMedian;
pub use metrics::{
    Aggregator, HistogramStat, MetricsSnapshot, NullRecorder, Recorder, TimerStat,
};
