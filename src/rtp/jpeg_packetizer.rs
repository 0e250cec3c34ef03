//! JPEG -> RTP payload fragmentation.
//!
//! A frame that fits in `max_payload = mtu - overhead` goes out as one chunk.
//! Larger frames are split into `max_payload`-sized chunks in order. The
//! `marker` flag is true on the *last* chunk only; every chunk of a frame is
//! sent with the same RTP timestamp.

use super::{RTP_HEADER_LEN, rtp_payload_chunk::RtpPayloadChunk};

#[derive(Debug, Clone)]
pub struct JpegPacketizer {
    mtu: usize,
    /// Bytes of each datagram that are not payload (the RTP header).
    rtp_overhead: usize,
}

impl JpegPacketizer {
    /// Packetizer for a link MTU with the default 12-byte RTP overhead.
    #[must_use]
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            rtp_overhead: RTP_HEADER_LEN,
        }
    }

    #[inline]
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.mtu.saturating_sub(self.rtp_overhead).max(1)
    }

    /// Splits one encoded frame into RTP payload chunks.
    #[must_use]
    pub fn packetize(&self, frame: &[u8]) -> Vec<RtpPayloadChunk> {
        let max = self.max_payload();
        let count = frame.len().div_ceil(max);
        frame
            .chunks(max)
            .enumerate()
            .map(|(i, c)| RtpPayloadChunk {
                bytes: c.to_vec(),
                marker: i + 1 == count,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_frame_is_one_marked_chunk() {
        let p = JpegPacketizer::new(1400);
        let chunks = p.packetize(&[0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].marker);
    }

    #[test]
    fn frame_of_exactly_max_payload_is_not_split() {
        let p = JpegPacketizer::new(1400);
        let chunks = p.packetize(&vec![1u8; 1388]);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn large_frame_splits_with_marker_on_last_only() {
        let p = JpegPacketizer::new(1400);
        let frame: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let chunks = p.packetize(&frame);
        assert_eq!(chunks.len(), 5000usize.div_ceil(1388));
        assert!(chunks[..chunks.len() - 1].iter().all(|c| !c.marker));
        assert!(chunks.last().is_some_and(|c| c.marker));
        assert!(chunks.iter().all(|c| c.bytes.len() <= 1388));
        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.bytes).collect();
        assert_eq!(joined, frame);
    }

    #[test]
    fn empty_frame_yields_nothing() {
        assert!(JpegPacketizer::new(1400).packetize(&[]).is_empty());
    }
}
