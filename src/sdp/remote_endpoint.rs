use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::sdp::session_descriptor::{MediaKind, SessionDescriptor};

pub const DEFAULT_REMOTE_IP: Ipv4Addr = Ipv4Addr::LOCALHOST;
pub const DEFAULT_AUDIO_PORT: u16 = 5004;
pub const DEFAULT_VIDEO_PORT: u16 = 5006;

/// Where a remote peer wants its media sent.
///
/// Built leniently from a descriptor: a missing or malformed value falls back
/// to the defaults above instead of failing the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub ip: Ipv4Addr,
    pub audio_port: u16,
    pub video_port: u16,
    /// Whether the descriptor carried an `m=video` line at all.
    pub offers_video: bool,
}

impl Default for RemoteEndpoint {
    fn default() -> Self {
        Self {
            ip: DEFAULT_REMOTE_IP,
            audio_port: DEFAULT_AUDIO_PORT,
            video_port: DEFAULT_VIDEO_PORT,
            offers_video: false,
        }
    }
}

impl RemoteEndpoint {
    /// Extracts the peer address and ports, line by line, using defaults for
    /// anything absent or unparsable.
    #[must_use]
    pub fn from_descriptor(text: &str) -> Self {
        if let Ok(d) = SessionDescriptor::parse(text) {
            return Self::from(&d);
        }

        let mut ep = Self::default();
        for line in text.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix("c=IN IP4 ") {
                if let Ok(ip) = rest.trim().parse() {
                    ep.ip = ip;
                }
            } else if let Some(rest) = line.strip_prefix("m=audio ") {
                if let Some(p) = first_port(rest) {
                    ep.audio_port = p;
                }
            } else if let Some(rest) = line.strip_prefix("m=video ") {
                ep.offers_video = true;
                if let Some(p) = first_port(rest) {
                    ep.video_port = p;
                }
            }
        }
        ep
    }

    #[must_use]
    pub fn audio_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.audio_port))
    }

    #[must_use]
    pub fn video_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.video_port))
    }
}

impl From<&SessionDescriptor> for RemoteEndpoint {
    fn from(d: &SessionDescriptor) -> Self {
        Self {
            ip: d.connection_ip,
            audio_port: d
                .media_port(MediaKind::Audio)
                .filter(|p| *p != 0)
                .unwrap_or(DEFAULT_AUDIO_PORT),
            video_port: d
                .media_port(MediaKind::Video)
                .filter(|p| *p != 0)
                .unwrap_or(DEFAULT_VIDEO_PORT),
            offers_video: d.media_port(MediaKind::Video).is_some(),
        }
    }
}

fn first_port(rest: &str) -> Option<u16> {
    rest.split_whitespace()
        .next()
        .and_then(|p| p.parse().ok())
        .filter(|p| *p != 0)
}
