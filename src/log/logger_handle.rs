use std::sync::mpsc;

use crate::{
    log::{log_level::LogLevel, log_msg::LogMsg, log_sink::LogSink},
    media::utils::now_millis,
};

/// Cloneable producer side of the [`Logger`](super::logger::Logger) queue.
///
/// Media workers each hold a clone. Lines below `min_level` are dropped
/// before they are formatted; the rest are queued without blocking, and a
/// full queue loses the line.
#[derive(Clone)]
pub struct LoggerHandle {
    pub(super) tx: mpsc::SyncSender<LogMsg>,
    pub(super) min_level: LogLevel,
}

impl LogSink for LoggerHandle {
    #[inline]
    fn log(&self, level: LogLevel, msg: &str, target: &'static str) {
        let _ = self.try_log(level, msg, target);
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }
}

impl LoggerHandle {
    #[must_use]
    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Queues one line stamped with the current time. A line below
    /// `min_level` is accepted and discarded.
    ///
    /// # Errors
    /// `TrySendError::Full` when the queue is at capacity,
    /// `TrySendError::Disconnected` once the logger thread is gone.
    pub fn try_log<S: Into<String>>(
        &self,
        level: LogLevel,
        text: S,
        target: &'static str,
    ) -> Result<(), mpsc::TrySendError<LogMsg>> {
        if !self.enabled(level) {
            return Ok(());
        }
        self.tx
            .try_send(LogMsg::new(level, text, target, now_millis()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::sync::mpsc::{TrySendError, sync_channel};

    #[test]
    fn try_log_ok_when_capacity_available() {
        let (tx, rx) = sync_channel::<LogMsg>(2);
        let h = LoggerHandle {
            tx,
            min_level: LogLevel::Trace,
        };

        let res = h.try_log(LogLevel::Info, "hello", "test::target");
        assert!(res.is_ok(), "expected Ok from try_log");

        let msg = rx.recv().expect("a message should arrive");
        assert_eq!(msg.level, LogLevel::Info);
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.target, "test::target");
        assert!(msg.ts_ms > 0, "timestamp should be non-zero");
    }

    #[test]
    fn try_log_err_full_when_queue_full() {
        let (tx, _rx) = sync_channel::<LogMsg>(1);
        let h = LoggerHandle {
            tx,
            min_level: LogLevel::Trace,
        };

        h.try_log(LogLevel::Info, "first", "test::target")
            .expect("first send should succeed");

        match h.try_log(LogLevel::Info, "second", "test::target") {
            Err(TrySendError::Full(_)) => {}
            other => panic!("expected Full, got: {:?}", other),
        }
    }

    #[test]
    fn try_log_err_disconnected_when_receiver_closed() {
        let (tx, rx) = sync_channel::<LogMsg>(1);
        drop(rx);
        let h = LoggerHandle {
            tx,
            min_level: LogLevel::Trace,
        };

        match h.try_log(LogLevel::Error, "won't send", "test::target") {
            Err(TrySendError::Disconnected(_)) => {}
            other => panic!("expected Disconnected, got: {:?}", other),
        }
    }

    #[test]
    fn lines_below_min_level_never_reach_the_queue() {
        let (tx, rx) = sync_channel::<LogMsg>(4);
        let h = LoggerHandle {
            tx,
            min_level: LogLevel::Warn,
        };
        assert!(h.try_log(LogLevel::Debug, "chatty", "test::target").is_ok());
        assert!(h.try_log(LogLevel::Error, "bad", "test::target").is_ok());
        assert!(!h.enabled(LogLevel::Info));

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.text, "bad");
        assert!(rx.try_recv().is_err());
    }
}
