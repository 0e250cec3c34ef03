use std::fmt;
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::rtp::{PT_JPEG, PT_PCMU};
use crate::sdp::sdp_error::SdpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        })
    }
}

/// One `m=` line plus its payload-type map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLine {
    pub kind: MediaKind,
    pub port: u16,
    pub payload_type: u8,
}

impl MediaLine {
    #[must_use]
    pub fn audio(port: u16) -> Self {
        Self {
            kind: MediaKind::Audio,
            port,
            payload_type: PT_PCMU,
        }
    }

    #[must_use]
    pub fn video(port: u16) -> Self {
        Self {
            kind: MediaKind::Video,
            port,
            payload_type: PT_JPEG,
        }
    }

    fn rtpmap(&self) -> &'static str {
        match self.kind {
            MediaKind::Audio => "PCMU/8000",
            MediaKind::Video => "JPEG/90000",
        }
    }
}

/// Text session description exchanged with the signaling layer.
///
/// ```text
/// v=0
/// o=- <id> <id> IN IP4 <ip>
/// s=<name>
/// c=IN IP4 <ip>
/// t=0 0
/// m=audio <port> RTP/AVP 0
/// a=rtpmap:0 PCMU/8000
/// a=sendrecv
/// m=video <port> RTP/AVP 26
/// a=rtpmap:26 JPEG/90000
/// a=sendrecv
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub session_id: u64,
    pub session_name: String,
    pub connection_ip: Ipv4Addr,
    pub media: Vec<MediaLine>,
}

impl SessionDescriptor {
    /// Builds a local offer with one audio line and an optional video line.
    #[must_use]
    pub fn offer(
        session_name: impl Into<String>,
        local_ip: Ipv4Addr,
        audio_port: u16,
        video_port: Option<u16>,
    ) -> Self {
        let session_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let mut media = vec![MediaLine::audio(audio_port)];
        if let Some(p) = video_port {
            media.push(MediaLine::video(p));
        }
        Self {
            session_id,
            session_name: session_name.into(),
            connection_ip: local_ip,
            media,
        }
    }

    /// Parses the fields this engine cares about.
    ///
    /// Lines may end in CRLF or LF; unknown lines are ignored.
    ///
    /// # Errors
    /// Returns [`SdpError`] if `c=` is missing or not an IPv4 address, or
    /// an `m=` line for audio/video has no valid port.
    pub fn parse(text: &str) -> Result<Self, SdpError> {
        let mut connection_ip = None;
        let mut session_name = String::new();
        let mut session_id = 0;
        let mut media = Vec::new();

        for line in text.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix("c=IN IP4 ") {
                // first c= wins (session level precedes media level)
                if connection_ip.is_none() {
                    let addr = rest.split('/').next().unwrap_or(rest).trim();
                    connection_ip = Some(
                        addr.parse::<Ipv4Addr>()
                            .map_err(|_| SdpError::BadAddress(addr.to_string()))?,
                    );
                }
            } else if let Some(rest) = line.strip_prefix("s=") {
                session_name = rest.to_string();
            } else if let Some(rest) = line.strip_prefix("o=") {
                session_id = rest
                    .split_whitespace()
                    .nth(1)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default();
            } else if let Some(rest) = line.strip_prefix("m=") {
                let mut parts = rest.split_whitespace();
                let kind = match parts.next() {
                    Some("audio") => MediaKind::Audio,
                    Some("video") => MediaKind::Video,
                    _ => continue,
                };
                let port: u16 = parts.next().ok_or(SdpError::MissingLine("m= port"))?.parse()?;
                let _proto = parts.next();
                let payload_type = parts
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(match kind {
                        MediaKind::Audio => PT_PCMU,
                        MediaKind::Video => PT_JPEG,
                    });
                media.push(MediaLine {
                    kind,
                    port,
                    payload_type,
                });
            }
        }

        Ok(Self {
            session_id,
            session_name,
            connection_ip: connection_ip.ok_or(SdpError::MissingLine("c=IN IP4"))?,
            media,
        })
    }

    #[must_use]
    pub fn media_port(&self, kind: MediaKind) -> Option<u16> {
        self.media.iter().find(|m| m.kind == kind).map(|m| m.port)
    }
}

impl fmt::Display for SessionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v=0\r\n")?;
        write!(
            f,
            "o=- {} {} IN IP4 {}\r\n",
            self.session_id, self.session_id, self.connection_ip
        )?;
        write!(f, "s={}\r\n", self.session_name)?;
        write!(f, "c=IN IP4 {}\r\n", self.connection_ip)?;
        write!(f, "t=0 0\r\n")?;
        for m in &self.media {
            write!(f, "m={} {} RTP/AVP {}\r\n", m.kind, m.port, m.payload_type)?;
            write!(f, "a=rtpmap:{} {}\r\n", m.payload_type, m.rtpmap())?;
            write!(f, "a=sendrecv\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn offer_lists_audio_and_video_lines() {
        let sdp = SessionDescriptor::offer("Call", Ipv4Addr::new(10, 0, 0, 5), 12000, Some(13000))
            .to_string();
        assert!(sdp.contains("c=IN IP4 10.0.0.5\r\n"));
        assert!(sdp.contains("m=audio 12000 RTP/AVP 0\r\n"));
        assert!(sdp.contains("a=rtpmap:0 PCMU/8000\r\n"));
        assert!(sdp.contains("m=video 13000 RTP/AVP 26\r\n"));
        assert!(sdp.contains("a=rtpmap:26 JPEG/90000\r\n"));
        assert_eq!(sdp.matches("a=sendrecv").count(), 2);
    }

    #[test]
    fn audio_only_offer_has_no_video_line() {
        let sdp = SessionDescriptor::offer("Call", Ipv4Addr::LOCALHOST, 12000, None).to_string();
        assert!(!sdp.contains("m=video"));
    }

    #[test]
    fn parses_its_own_offer() {
        let offer = SessionDescriptor::offer("Conf", Ipv4Addr::new(192, 168, 1, 9), 10002, Some(11002));
        let back = SessionDescriptor::parse(&offer.to_string()).unwrap();
        assert_eq!(back, offer);
    }

    #[test]
    fn parses_lf_only_input() {
        let d = SessionDescriptor::parse("v=0\nc=IN IP4 1.2.3.4\nm=audio 4000 RTP/AVP 0 8 101\n")
            .unwrap();
        assert_eq!(d.connection_ip, Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(d.media_port(MediaKind::Audio), Some(4000));
        assert_eq!(d.media_port(MediaKind::Video), None);
    }

    #[test]
    fn rejects_missing_connection_and_bad_ports() {
        assert!(matches!(
            SessionDescriptor::parse("m=audio 4000 RTP/AVP 0"),
            Err(SdpError::MissingLine(_))
        ));
        assert!(matches!(
            SessionDescriptor::parse("c=IN IP4 1.2.3.4\r\nm=audio abc RTP/AVP 0"),
            Err(SdpError::BadPort(_))
        ));
        assert!(matches!(
            SessionDescriptor::parse("c=IN IP4 not-an-ip"),
            Err(SdpError::BadAddress(_))
        ));
    }
}
