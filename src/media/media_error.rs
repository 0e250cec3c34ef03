use std::{fmt, io, time::Duration};

use crate::{
    audio::audio_error::AudioError, net::port_error::PortError, sdp::sdp_error::SdpError,
    video::video_error::VideoError,
};

/// Top-level error returned by the call and conference managers.
#[derive(Debug)]
pub enum MediaError {
    Audio(AudioError),
    Video(VideoError),
    Ports(PortError),
    Sdp(SdpError),
    Io(io::Error),
    /// A start job did not finish within its deadline.
    StartTimeout { label: String, after: Duration },
    /// A start job died without reporting a result.
    StartAborted(String),
    /// The conference has not been started.
    NotActive,
    /// The stream is already running; stop it first.
    AlreadyActive(&'static str),
    /// Another start for the same participant is still opening its devices.
    Busy(String),
    /// Stopped or removed while it was starting; nothing was kept.
    Cancelled(String),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MediaError::*;
        match self {
            Audio(e) => write!(f, "audio: {e}"),
            Video(e) => write!(f, "video: {e}"),
            Ports(e) => write!(f, "ports: {e}"),
            Sdp(e) => write!(f, "descriptor: {e}"),
            Io(e) => write!(f, "io: {e}"),
            StartTimeout { label, after } => {
                write!(f, "{label} did not start within {} ms", after.as_millis())
            }
            StartAborted(label) => write!(f, "{label} start aborted"),
            NotActive => write!(f, "conference is not active"),
            AlreadyActive(what) => write!(f, "{what} stream already active"),
            Busy(who) => write!(f, "{who} is still being set up"),
            Cancelled(what) => write!(f, "{what} was cancelled while starting"),
        }
    }
}

impl std::error::Error for MediaError {}

impl From<AudioError> for MediaError {
    fn from(e: AudioError) -> Self {
        Self::Audio(e)
    }
}

impl From<VideoError> for MediaError {
    fn from(e: VideoError) -> Self {
        Self::Video(e)
    }
}

impl From<PortError> for MediaError {
    fn from(e: PortError) -> Self {
        Self::Ports(e)
    }
}

impl From<SdpError> for MediaError {
    fn from(e: SdpError) -> Self {
        Self::Sdp(e)
    }
}

impl From<io::Error> for MediaError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
