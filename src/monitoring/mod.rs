mod sink;
mod telemetry;

pub use sink::{LogSink, MemorySink, NoopSink, TracingSink};
pub use telemetry::{init_tracing, PerformanceTracker};

/// Convenience macro for performance tracking
#[macro_export]
macro_rules! track_performance {
    ($name:expr) => {
        let _tracker = $crate::monitoring::PerformanceTracker::new($name);
    };
}
