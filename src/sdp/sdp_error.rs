use std::{fmt, num::ParseIntError};

/// Why a session descriptor could not be read strictly.
///
/// Call setup never sees these: [`RemoteEndpoint`](super::remote_endpoint::RemoteEndpoint)
/// falls back to defaults instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    /// A required line (`c=`, or the port of an `m=` line) is absent.
    MissingLine(&'static str),
    BadPort(ParseIntError),
    /// The `c=` address is not a dotted IPv4 address.
    BadAddress(String),
}

impl From<ParseIntError> for SdpError {
    fn from(e: ParseIntError) -> Self {
        Self::BadPort(e)
    }
}

impl fmt::Display for SdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpError::MissingLine(what) => write!(f, "descriptor has no {what}"),
            SdpError::BadPort(e) => write!(f, "bad media port: {e}"),
            SdpError::BadAddress(a) => write!(f, "bad connection address '{a}'"),
        }
    }
}

impl std::error::Error for SdpError {}
