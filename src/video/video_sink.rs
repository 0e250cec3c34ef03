use std::sync::{Arc, Mutex, PoisonError};

/// A decoded frame as handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedVideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGB, `width * height * 3` bytes.
    pub rgb: Arc<Vec<u8>>,
    pub timestamp_ms: u128,
}

/// Consumer of decoded frames. Called from a receiver thread; must not block long.
pub trait VideoSink: Send + Sync {
    fn present(&self, frame: DecodedVideoFrame);
}

impl<F> VideoSink for F
where
    F: Fn(DecodedVideoFrame) + Send + Sync,
{
    fn present(&self, frame: DecodedVideoFrame) {
        self(frame);
    }
}

/// Keeps only the most recent frame, for a UI that polls at its own rate.
#[derive(Debug, Default)]
pub struct LatestFrameSink {
    slot: Mutex<Option<DecodedVideoFrame>>,
    presented: Mutex<u64>,
}

impl LatestFrameSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Takes the latest frame, leaving the slot empty.
    pub fn take(&self) -> Option<DecodedVideoFrame> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Number of frames presented so far.
    #[must_use]
    pub fn presented(&self) -> u64 {
        *self.presented.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VideoSink for LatestFrameSink {
    fn present(&self, frame: DecodedVideoFrame) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
        *self.presented.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }
}

/// Forwards to a sink that can be replaced while a receiver is running.
pub struct SwappableSink {
    inner: Mutex<Arc<dyn VideoSink>>,
}

impl SwappableSink {
    #[must_use]
    pub fn new(sink: Arc<dyn VideoSink>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(sink),
        })
    }

    pub fn replace(&self, sink: Arc<dyn VideoSink>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }
}

impl VideoSink for SwappableSink {
    fn present(&self, frame: DecodedVideoFrame) {
        let target = Arc::clone(&self.inner.lock().unwrap_or_else(PoisonError::into_inner));
        target.present(frame);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    fn frame(ts: u128) -> DecodedVideoFrame {
        DecodedVideoFrame {
            width: 1,
            height: 1,
            rgb: Arc::new(vec![1, 2, 3]),
            timestamp_ms: ts,
        }
    }

    #[test]
    fn latest_frame_sink_keeps_newest() {
        let sink = LatestFrameSink::new();
        sink.present(frame(1));
        sink.present(frame(2));
        assert_eq!(sink.presented(), 2);
        assert_eq!(sink.take().unwrap().timestamp_ms, 2);
        assert!(sink.take().is_none());
    }

    #[test]
    fn swapped_sink_receives_later_frames() {
        let first = LatestFrameSink::new();
        let second = LatestFrameSink::new();
        let slot = SwappableSink::new(first.clone());
        slot.present(frame(1));
        slot.replace(second.clone());
        slot.present(frame(2));
        assert_eq!(first.presented(), 1);
        assert_eq!(second.take().unwrap().timestamp_ms, 2);
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_c = Arc::clone(&seen);
        let sink: Arc<dyn VideoSink> = Arc::new(move |f: DecodedVideoFrame| {
            seen_c.lock().unwrap().push(f.timestamp_ms);
        });
        sink.present(frame(7));
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }
}
