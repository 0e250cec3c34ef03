use std::sync::Arc;

use crate::{
    audio::{
        audio_device::{AudioInput, AudioOutput},
        audio_error::AudioError,
        cpal_device::{CpalInput, CpalOutput},
    },
    codec::pcm::PcmFormat,
    config::MediaSettings,
    log::log_sink::LogSink,
    video::{
        frame_grabber::{CaptureGrabber, FrameGrabber, VideoSource},
        video_error::VideoError,
    },
};

/// Opens capture and playback devices. Implementations must be shareable
/// across the threads that start streams.
pub trait MediaDevices: Send + Sync {
    /// Opens the capture device with the first of `candidates` it accepts.
    ///
    /// # Errors
    /// Device-unavailable when none is accepted.
    fn open_audio_input(&self, candidates: &[PcmFormat]) -> Result<Box<dyn AudioInput>, AudioError>;

    /// # Errors
    /// Device-unavailable when there is no playback device.
    fn open_audio_output(&self) -> Result<Box<dyn AudioOutput>, AudioError>;

    /// # Errors
    /// `OpenFailed` when the source cannot be opened.
    fn open_video_source(
        &self,
        source: VideoSource,
        settings: &MediaSettings,
    ) -> Result<Box<dyn FrameGrabber>, VideoError>;
}

/// The machine's default devices: `cpal` for audio, `OpenCV` for video.
pub struct SystemDevices {
    logger: Arc<dyn LogSink>,
}

impl SystemDevices {
    #[must_use]
    pub fn new(logger: Arc<dyn LogSink>) -> Self {
        Self { logger }
    }
}

impl MediaDevices for SystemDevices {
    fn open_audio_input(&self, candidates: &[PcmFormat]) -> Result<Box<dyn AudioInput>, AudioError> {
        Ok(Box::new(CpalInput::open(candidates, Arc::clone(&self.logger))?))
    }

    fn open_audio_output(&self) -> Result<Box<dyn AudioOutput>, AudioError> {
        Ok(Box::new(CpalOutput::open(Arc::clone(&self.logger))?))
    }

    fn open_video_source(
        &self,
        source: VideoSource,
        settings: &MediaSettings,
    ) -> Result<Box<dyn FrameGrabber>, VideoError> {
        let grabber = match source {
            VideoSource::Camera => CaptureGrabber::camera(settings.camera_id)?,
            VideoSource::Screen => CaptureGrabber::screen(&settings.screen_pipeline)?,
        };
        Ok(Box::new(grabber))
    }
}
