//! RTP -> JPEG frame reassembly.
//!
//! Input : RTP payloads of one stream, ending each frame with M=1.
//! Output: the concatenated frame bytes, or None while more packets are needed.
//!
//! Payloads are appended in arrival order. A frame is dropped at its marker
//! when a sequence gap or reordering was seen, or when it grew past
//! `max_frame_bytes`. A new timestamp discards any partial frame and
//! resynchronizes on the sequence number of the packet that carried it.

use bytes::{Bytes, BytesMut};

/// Upper bound for one reassembled frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct JpegDepacketizer {
    cur_ts: Option<u32>,
    expected_seq: Option<u16>,
    buf: BytesMut,
    frame_corrupted: bool,
    max_frame_bytes: usize,
    dropped_frames: u64,
}

impl Default for JpegDepacketizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl JpegDepacketizer {
    #[must_use]
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            cur_ts: None,
            expected_seq: None,
            buf: BytesMut::new(),
            frame_corrupted: false,
            max_frame_bytes,
            dropped_frames: 0,
        }
    }

    /// Push one RTP payload. Returns `Some(frame)` when a clean frame completes (M=1).
    pub fn push_rtp(
        &mut self,
        payload: &[u8],
        marker: bool,
        timestamp: u32,
        seq: u16,
    ) -> Option<Bytes> {
        match self.cur_ts {
            Some(ts) if ts != timestamp => {
                if !self.buf.is_empty() {
                    self.dropped_frames += 1;
                }
                self.reset();
                self.expected_seq = None;
                self.cur_ts = Some(timestamp);
            }
            None => self.cur_ts = Some(timestamp),
            _ => {}
        }

        if let Some(expect) = self.expected_seq {
            if seq != expect {
                self.frame_corrupted = true;
            }
        }
        self.expected_seq = Some(seq.wrapping_add(1));

        if self.buf.len() + payload.len() > self.max_frame_bytes {
            self.frame_corrupted = true;
            self.buf.clear();
        } else if !self.frame_corrupted {
            self.buf.extend_from_slice(payload);
        }

        if !marker {
            return None;
        }

        let frame = self.buf.split().freeze();
        let corrupted = self.frame_corrupted;
        self.reset();
        if corrupted || frame.is_empty() {
            self.dropped_frames += 1;
            return None;
        }
        Some(frame)
    }

    /// Frames discarded so far because of loss, reordering or size.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Bytes buffered for the frame in progress.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.cur_ts = None;
        self.frame_corrupted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::jpeg_packetizer::JpegPacketizer;

    fn frame(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn in_order_fragments_reassemble_exactly() {
        let original = frame(4000);
        let chunks = JpegPacketizer::new(1400).packetize(&original);
        let mut d = JpegDepacketizer::default();
        let mut out = None;
        for (i, c) in chunks.iter().enumerate() {
            out = d.push_rtp(&c.bytes, c.marker, 9000, 100 + i as u16);
        }
        assert_eq!(out.as_deref(), Some(&original[..]));
        assert_eq!(d.pending_len(), 0);
    }

    #[test]
    fn sequence_gap_drops_the_frame_and_recovers() {
        let chunks = JpegPacketizer::new(1400).packetize(&frame(4000));
        let mut d = JpegDepacketizer::default();
        // skip the second fragment
        assert!(d.push_rtp(&chunks[0].bytes, false, 1, 10).is_none());
        assert!(d.push_rtp(&chunks[2].bytes, true, 1, 12).is_none());
        assert_eq!(d.dropped_frames(), 1);

        let next = frame(100);
        assert_eq!(d.push_rtp(&next, true, 2, 13).as_deref(), Some(&next[..]));
    }

    #[test]
    fn new_timestamp_discards_partial_frame() {
        let mut d = JpegDepacketizer::default();
        assert!(d.push_rtp(&[1, 2, 3], false, 1, 1).is_none());
        let out = d.push_rtp(&[9, 9], true, 2, 2);
        assert_eq!(out.as_deref(), Some(&[9u8, 9][..]));
        assert_eq!(d.dropped_frames(), 1);
    }

    #[test]
    fn sequence_wraps_without_false_gap() {
        let mut d = JpegDepacketizer::default();
        assert!(d.push_rtp(&[1], false, 5, u16::MAX).is_none());
        assert_eq!(d.push_rtp(&[2], true, 5, 0).as_deref(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let mut d = JpegDepacketizer::new(10);
        assert!(d.push_rtp(&[0; 8], false, 1, 1).is_none());
        assert!(d.push_rtp(&[0; 8], true, 1, 2).is_none());
        assert_eq!(d.dropped_frames(), 1);
    }
}
