use opencv::Error as CvError;
use std::{fmt, io};

use super::frame_grabber::VideoSource;

#[derive(Debug)]
pub enum VideoError {
    /// The capture device for this source could not be opened.
    OpenFailed(VideoSource, String),
    CaptureFailed(String),
    NotFrame,
    OpenCvError(CvError),
    EncodeFailed(String),
    DecodeFailed(String),
    Io(io::Error),
}

impl fmt::Display for VideoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use VideoError::{
            CaptureFailed, DecodeFailed, EncodeFailed, Io, NotFrame, OpenCvError, OpenFailed,
        };
        match self {
            OpenFailed(src, msg) => write!(f, "Failed to open {src} source: {msg}"),
            CaptureFailed(msg) => write!(f, "Failed to capture frame: {msg}"),
            NotFrame => write!(f, "No valid frame available"),
            OpenCvError(e) => write!(f, "OpenCV error: {e}"),
            EncodeFailed(msg) => write!(f, "JPEG encode failed: {msg}"),
            DecodeFailed(msg) => write!(f, "JPEG decode failed: {msg}"),
            Io(e) => write!(f, "video socket error: {e}"),
        }
    }
}

impl std::error::Error for VideoError {}

impl From<CvError> for VideoError {
    fn from(err: CvError) -> Self {
        VideoError::OpenCvError(err)
    }
}

impl From<io::Error> for VideoError {
    fn from(err: io::Error) -> Self {
        VideoError::Io(err)
    }
}
