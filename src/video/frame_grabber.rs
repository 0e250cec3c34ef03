//! Frame sources backed by `OpenCV`'s `VideoCapture`.
//!
//! The camera is opened by device index; the screen is captured through a
//! GStreamer pipeline ending in an `appsink`.

use std::fmt;

use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};

use super::video_error::VideoError;

/// What the video sender captures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSource {
    Camera,
    Screen,
}

impl fmt::Display for VideoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoSource::Camera => write!(f, "camera"),
            VideoSource::Screen => write!(f, "screen"),
        }
    }
}

/// An opened frame source. Frames are BGR `Mat`s of any size.
pub trait FrameGrabber: Send {
    fn source(&self) -> VideoSource;

    /// Reads the next frame.
    ///
    /// # Errors
    /// `NotFrame` when the device produced nothing this time; other
    /// variants when the device failed.
    fn grab(&mut self) -> Result<Mat, VideoError>;
}

/// [`FrameGrabber`] over an `OpenCV` capture handle.
pub struct CaptureGrabber {
    cam: Option<VideoCapture>,
    source: VideoSource,
}

impl CaptureGrabber {
    /// Opens the camera with the given device index.
    ///
    /// # Errors
    /// Returns `VideoError::OpenFailed` if the device cannot be opened.
    pub fn camera(device_id: i32) -> Result<Self, VideoError> {
        let cam = VideoCapture::new(device_id, videoio::CAP_ANY)
            .map_err(|e| VideoError::OpenFailed(VideoSource::Camera, e.to_string()))?;
        Self::checked(cam, VideoSource::Camera, || format!("device {device_id}"))
    }

    /// Opens a screen capture through a GStreamer `pipeline`.
    ///
    /// # Errors
    /// Returns `VideoError::OpenFailed` if the pipeline cannot be started.
    pub fn screen(pipeline: &str) -> Result<Self, VideoError> {
        let cam = VideoCapture::from_file(pipeline, videoio::CAP_GSTREAMER)
            .map_err(|e| VideoError::OpenFailed(VideoSource::Screen, e.to_string()))?;
        Self::checked(cam, VideoSource::Screen, || format!("pipeline '{pipeline}'"))
    }

    fn checked(
        cam: VideoCapture,
        source: VideoSource,
        what: impl FnOnce() -> String,
    ) -> Result<Self, VideoError> {
        if !cam.is_opened().unwrap_or(false) {
            return Err(VideoError::OpenFailed(source, format!("{} not opened", what())));
        }
        Ok(Self {
            cam: Some(cam),
            source,
        })
    }
}

impl FrameGrabber for CaptureGrabber {
    fn source(&self) -> VideoSource {
        self.source
    }

    fn grab(&mut self) -> Result<Mat, VideoError> {
        let Some(cam) = &mut self.cam else {
            return Err(VideoError::CaptureFailed("capture released".into()));
        };
        let mut frame = Mat::default();
        if cam.read(&mut frame).unwrap_or(false) && !frame.empty() {
            Ok(frame)
        } else {
            Err(VideoError::NotFrame)
        }
    }
}

impl Drop for CaptureGrabber {
    fn drop(&mut self) {
        if let Some(mut cam) = self.cam.take() {
            let _ = cam.release();
        }
    }
}
