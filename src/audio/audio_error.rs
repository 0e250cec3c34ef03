use std::{fmt, io};

use crate::rtp::rtp_error::RtpError;

#[derive(Debug)]
pub enum AudioError {
    /// No default device of this direction ("input" / "output").
    NoDevice(&'static str),
    /// The device accepted none of the requested formats.
    NoSupportedFormat(String),
    StreamBuild(String),
    StreamPlay(String),
    /// The device worker went away.
    Closed,
    Io(io::Error),
    Rtp(RtpError),
    /// A frame consumer rejected a frame.
    Listener(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use AudioError::*;
        match self {
            NoDevice(dir) => write!(f, "no default audio {dir} device"),
            NoSupportedFormat(dev) => write!(f, "audio device '{dev}' accepted no candidate format"),
            StreamBuild(e) => write!(f, "failed to build audio stream: {e}"),
            StreamPlay(e) => write!(f, "failed to start audio stream: {e}"),
            Closed => write!(f, "audio device closed"),
            Io(e) => write!(f, "audio socket error: {e}"),
            Rtp(e) => write!(f, "malformed audio packet: {e}"),
            Listener(e) => write!(f, "audio listener failed: {e}"),
        }
    }
}

impl std::error::Error for AudioError {}

impl From<io::Error> for AudioError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<RtpError> for AudioError {
    fn from(e: RtpError) -> Self {
        Self::Rtp(e)
    }
}
