use super::{audio_error::AudioError, audio_frame::AudioFrame};

/// Anything that accepts decoded or captured audio frames.
///
/// Called from the producing worker thread; implementations must not block
/// for long. An error is logged by the caller and never stops the producer.
pub trait AudioFrameSink: Send + Sync {
    fn on_audio_frame(&self, frame: AudioFrame) -> Result<(), AudioError>;
}

impl<F> AudioFrameSink for F
where
    F: Fn(AudioFrame) -> Result<(), AudioError> + Send + Sync,
{
    fn on_audio_frame(&self, frame: AudioFrame) -> Result<(), AudioError> {
        self(frame)
    }
}
