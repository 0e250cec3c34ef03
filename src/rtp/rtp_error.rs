use std::fmt;

/// Reasons a datagram is not a usable RTP packet for this engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpError {
    /// Fewer bytes than the fixed 12-byte header.
    TooShort(usize),
    BadVersion(u8),
    /// The CSRC list runs past the end of the datagram.
    CsrcCountMismatch { expected: usize, buf_left: usize },
    HeaderExtensionTooShort,
    PaddingTooShort,
    /// Valid RTP, but not the payload type this stream carries.
    UnexpectedPayloadType { expected: u8, got: u8 },
}

impl fmt::Display for RtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtpError::TooShort(len) => write!(f, "{len} bytes is too short for an RTP header"),
            RtpError::BadVersion(v) => write!(f, "RTP version {v}, expected 2"),
            RtpError::CsrcCountMismatch { expected, buf_left } => write!(
                f,
                "{expected} CSRCs announced but only {buf_left} bytes left"
            ),
            RtpError::HeaderExtensionTooShort => f.write_str("truncated header extension"),
            RtpError::PaddingTooShort => f.write_str("padding longer than the payload"),
            RtpError::UnexpectedPayloadType { expected, got } => {
                write!(f, "payload type {got}, expected {expected}")
            }
        }
    }
}

impl std::error::Error for RtpError {}
