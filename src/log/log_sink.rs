use crate::log::log_level::LogLevel;

/// Destination for engine log lines. Every media worker holds one as
/// `Arc<dyn LogSink>`; implementations must never block the caller.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, msg: &str, target: &'static str);

    /// Whether a line at `level` would be kept. Lets callers skip formatting.
    fn enabled(&self, _level: LogLevel) -> bool {
        true
    }
}
