//! Tracing subscriber setup shared by binaries and integration tests.

use chrono::Utc;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, fmt::time::FormatTime, layer::SubscriberExt, util::SubscriberInitExt,
};

struct Time;

impl FormatTime for Time {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        w.write_fmt(format_args!("{:?}", Utc::now().timestamp_micros()))
    }
}

/// Initialise the global tracing subscriber.
///
/// The level comes from the `LOG_LEVEL` environment variable (`warn`,
/// `info`, `trace`), defaulting to `TRACE` in debug builds and `INFO`
/// otherwise. Safe to call once per process; later calls are ignored.
pub fn init() {
    let level = if let Ok(level) = std::env::var("LOG_LEVEL") {
        match level.to_ascii_lowercase().as_str() {
            "warn" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "trace" => LevelFilter::TRACE,
            _ => LevelFilter::ERROR,
        }
    } else if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let _ = tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(Time)
                .with_filter(level),
        )
        .try_init();
}
