use rand::{RngCore, rngs::OsRng};

use super::{PT_JPEG, PT_PCMU, rtp_header::RtpHeader, rtp_packet::RtpPacket};

/// RTP settings for one outgoing stream (audio or video).
///
/// - `clock_rate_hz`: RTP clock (8 kHz for PCMU, 90 kHz for video).
/// - `payload_type`: static payload type.
/// - `ssrc`: stream identifier, fixed for the sender's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct RtpProfile {
    pub clock_rate_hz: u32,
    pub payload_type: u8,
    pub ssrc: u32,
}

impl RtpProfile {
    /// G.711 μ-law: 8 kHz clock, PT 0.
    #[must_use]
    pub fn pcmu(ssrc: u32) -> Self {
        Self {
            clock_rate_hz: 8_000,
            payload_type: PT_PCMU,
            ssrc,
        }
    }

    /// JPEG video: 90 kHz clock, PT 26.
    #[must_use]
    pub fn jpeg(ssrc: u32) -> Self {
        Self {
            clock_rate_hz: 90_000,
            payload_type: PT_JPEG,
            ssrc,
        }
    }

    /// Timestamp increment for one frame at `fps`.
    #[must_use]
    pub fn ticks_per_frame(&self, fps: u32) -> u32 {
        self.clock_rate_hz / fps.max(1)
    }
}

/// Per-stream send state: sequence number and timestamp counters.
///
/// Both counters wrap. Each call to [`RtpSender::next_packet`] stamps the
/// current values and bumps the sequence number; the timestamp only moves on
/// [`RtpSender::advance_timestamp`].
pub struct RtpSender {
    profile: RtpProfile,
    sequence_number: u16,
    timestamp: u32,
}

impl RtpSender {
    #[must_use]
    pub fn new(profile: RtpProfile, initial_sequence: u16, initial_timestamp: u32) -> Self {
        Self {
            profile,
            sequence_number: initial_sequence,
            timestamp: initial_timestamp,
        }
    }

    /// PCMU sender with random SSRC, sequence number and timestamp.
    #[must_use]
    pub fn audio_pcmu() -> Self {
        Self::randomized(RtpProfile::pcmu(OsRng.next_u32()))
    }

    /// JPEG sender with random SSRC, sequence number and timestamp.
    #[must_use]
    pub fn video_jpeg() -> Self {
        Self::randomized(RtpProfile::jpeg(OsRng.next_u32()))
    }

    fn randomized(profile: RtpProfile) -> Self {
        let mut rng = OsRng;
        Self::new(profile, rng.next_u32() as u16, rng.next_u32())
    }

    #[must_use]
    pub fn profile(&self) -> RtpProfile {
        self.profile
    }

    #[must_use]
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Wraps `payload` in a packet carrying the current counters.
    pub fn next_packet(&mut self, payload: impl Into<bytes::Bytes>, marker: bool) -> RtpPacket {
        let header = RtpHeader::new(
            self.profile.payload_type,
            self.sequence_number,
            self.timestamp,
            self.profile.ssrc,
        )
        .with_marker(marker);
        self.sequence_number = self.sequence_number.wrapping_add(1);
        RtpPacket::new(header, payload)
    }

    pub fn advance_timestamp(&mut self, ticks: u32) {
        self.timestamp = self.timestamp.wrapping_add(ticks);
    }

    /// One-packet frame: stamp, then advance the timestamp by `ticks`.
    pub fn build_packet(
        &mut self,
        payload: impl Into<bytes::Bytes>,
        marker: bool,
        ticks: u32,
    ) -> RtpPacket {
        let pkt = self.next_packet(payload, marker);
        self.advance_timestamp(ticks);
        pkt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_counters_advance_per_packet() {
        let mut s = RtpSender::new(RtpProfile::pcmu(7), 65_534, 1000);
        let a = s.build_packet(vec![0u8; 160], false, 160);
        let b = s.build_packet(vec![0u8; 160], false, 160);
        let c = s.build_packet(vec![0u8; 160], false, 160);
        assert_eq!(a.header.sequence_number, 65_534);
        assert_eq!(b.header.sequence_number, 65_535);
        assert_eq!(c.header.sequence_number, 0);
        assert_eq!(a.header.timestamp, 1000);
        assert_eq!(c.header.timestamp, 1320);
        assert!([&a, &b, &c].iter().all(|p| p.header.ssrc == 7));
    }

    #[test]
    fn fragments_share_timestamp() {
        let mut s = RtpSender::new(RtpProfile::jpeg(1), 10, 0);
        let a = s.next_packet(vec![1], false);
        let b = s.next_packet(vec![2], true);
        s.advance_timestamp(s.profile().ticks_per_frame(15));
        let c = s.next_packet(vec![3], true);
        assert_eq!(a.header.timestamp, b.header.timestamp);
        assert_eq!(c.header.timestamp, 6000);
        assert_eq!(c.header.sequence_number, 12);
    }

    #[test]
    fn random_senders_use_static_payload_types() {
        assert_eq!(RtpSender::audio_pcmu().profile().payload_type, PT_PCMU);
        assert_eq!(RtpSender::video_jpeg().profile().payload_type, PT_JPEG);
    }
}
