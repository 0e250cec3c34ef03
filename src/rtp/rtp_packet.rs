//! Minimal RTP packet model + encode/decode per RFC 3550.
//! No session logic here; just immutable packet structs and safe serialization.

use bytes::{BufMut, Bytes, BytesMut};

use super::{RTP_HEADER_LEN, rtp_error::RtpError, rtp_header::RtpHeader};

/// Complete RTP packet (header + payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    /// Payload without CSRCs, extension or trailing padding.
    pub payload: Bytes,
}

impl RtpPacket {
    #[must_use]
    pub fn new(header: RtpHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Convenience constructor.
    #[must_use]
    pub fn simple(
        payload_type: u8,
        marker: bool,
        seq: u16,
        ts: u32,
        ssrc: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        let header = RtpHeader::new(payload_type, seq, ts, ssrc).with_marker(marker);
        Self::new(header, payload)
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RTP_HEADER_LEN + self.payload.len()
    }

    /// Serializes to a datagram: 12-byte header followed by the payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        self.header.encode_into(&mut out);
        out.put_slice(&self.payload);
        out.freeze()
    }

    /// Parses a received datagram.
    ///
    /// # Errors
    /// Returns [`RtpError`] for truncated headers, a wrong version, or
    /// inconsistent CSRC/extension/padding lengths.
    pub fn decode(buf: &[u8]) -> Result<Self, RtpError> {
        let (header, bounds) = RtpHeader::decode(buf)?;
        let end = buf.len() - bounds.padding;
        let payload = Bytes::copy_from_slice(&buf[bounds.offset..end]);
        Ok(Self { header, payload })
    }

    #[must_use]
    pub fn marker(&self) -> bool {
        self.header.marker
    }

    #[must_use]
    pub fn payload_type(&self) -> u8 {
        self.header.payload_type
    }
}
