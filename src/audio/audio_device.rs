use std::time::Duration;

use crate::codec::pcm::PcmFormat;

use super::audio_error::AudioError;

/// An opened capture device delivering 20 ms frames in its native format.
pub trait AudioInput: Send {
    fn format(&self) -> PcmFormat;

    /// Waits up to `timeout` for one frame of `format().frame_bytes()` bytes.
    /// `Ok(None)` means nothing arrived in time.
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, AudioError>;
}

/// An opened playback device accepting 8 kHz mono voice frames.
pub trait AudioOutput: Send {
    fn write_frame(&mut self, voice: &[i16]) -> Result<(), AudioError>;
}
