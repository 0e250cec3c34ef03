//! RTP packet model, per-stream sender state and JPEG payload framing.
pub mod jpeg_depacketizer;
pub mod jpeg_packetizer;
pub mod rtp_error;
pub mod rtp_header;
pub mod rtp_packet;
pub mod rtp_payload_chunk;
pub mod rtp_sender;

pub const RTP_VERSION: u8 = 2;
/// Fixed header length without CSRCs or extension.
pub const RTP_HEADER_LEN: usize = 12;

/// Static payload type for G.711 μ-law.
pub const PT_PCMU: u8 = 0;
/// Static payload type for JPEG video.
pub const PT_JPEG: u8 = 26;
