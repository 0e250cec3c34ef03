use std::fmt;

use crate::log::log_level::LogLevel;

/// One queued log line.
#[derive(Debug, Clone)]
pub struct LogMsg {
    pub level: LogLevel,
    /// Milliseconds since the Unix epoch.
    pub ts_ms: u128,
    pub text: String,
    /// Usually `module_path!()` of the caller.
    pub target: &'static str,
}

impl LogMsg {
    pub fn new(
        level: LogLevel,
        text: impl Into<String>,
        target: &'static str,
        ts_ms: u128,
    ) -> Self {
        Self {
            level,
            ts_ms,
            text: text.into(),
            target,
        }
    }

    /// Short form for the status channel: level and text only.
    #[must_use]
    pub fn status_line(&self) -> String {
        format!("[{}] {}", self.level, self.text)
    }
}

/// File form: `[LEVEL] ts_ms | target | text`.
impl fmt::Display for LogMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} | {} | {}",
            self.level, self.ts_ms, self.target, self.text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_and_status_forms() {
        let m = LogMsg::new(LogLevel::Warn, "[PortAllocator] range exhausted", "callmedia::net", 42);
        assert_eq!(
            m.to_string(),
            "[WARN] 42 | callmedia::net | [PortAllocator] range exhausted"
        );
        assert_eq!(m.status_line(), "[WARN] [PortAllocator] range exhausted");
    }
}
