use std::sync::Arc;

use crate::log::{log_level::LogLevel, log_sink::LogSink};

/// Discards everything. For tests and for embedding without a log file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogSink;

impl NoopLogSink {
    #[must_use]
    pub fn shared() -> Arc<dyn LogSink> {
        Arc::new(NoopLogSink)
    }
}

impl LogSink for NoopLogSink {
    #[inline]
    fn log(&self, _level: LogLevel, _msg: &str, _target: &'static str) {}

    fn enabled(&self, _level: LogLevel) -> bool {
        false
    }
}
