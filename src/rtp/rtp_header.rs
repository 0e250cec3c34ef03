use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use super::{RTP_HEADER_LEN, RTP_VERSION, rtp_error::RtpError};

/// RTP fixed header.
///
/// Outgoing headers never carry CSRCs, an extension or padding. Incoming
/// ones may; [`RtpHeader::decode`] skips those and reports where the payload
/// begins and how many trailing padding bytes to strip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,      // must be 2
    pub padding: bool,    // P bit
    pub extension: bool,  // X bit
    pub csrc_count: u8,   // CC
    pub marker: bool,     // M bit
    pub payload_type: u8, // 7 bits
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// Where the payload sits inside a decoded datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadBounds {
    pub offset: usize,
    pub padding: usize,
}

impl RtpHeader {
    #[must_use]
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
        }
    }

    #[must_use]
    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    /// Writes the 12-byte fixed header.
    pub fn encode_into(&self, out: &mut BytesMut) {
        let b0 = (self.version & 0b11) << 6
            | u8::from(self.padding) << 5
            | u8::from(self.extension) << 4
            | (self.csrc_count & 0x0F);
        let b1 = u8::from(self.marker) << 7 | (self.payload_type & 0x7F);
        out.put_u8(b0);
        out.put_u8(b1);
        out.put_u16(self.sequence_number);
        out.put_u32(self.timestamp);
        out.put_u32(self.ssrc);
    }

    /// Parses a header from the start of `buf`.
    ///
    /// # Errors
    /// Returns [`RtpError`] if the buffer is shorter than the header it
    /// announces or the version is not 2.
    pub fn decode(buf: &[u8]) -> Result<(Self, PayloadBounds), RtpError> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(RtpError::TooShort(buf.len()));
        }
        let b0 = buf[0];
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(RtpError::BadVersion(version));
        }
        let padding = (b0 >> 5) & 1 != 0;
        let extension = (b0 >> 4) & 1 != 0;
        let csrc_count = b0 & 0x0F;
        let b1 = buf[1];

        let header = Self {
            version,
            padding,
            extension,
            csrc_count,
            marker: b1 & 0x80 != 0,
            payload_type: b1 & 0x7F,
            sequence_number: BigEndian::read_u16(&buf[2..4]),
            timestamp: BigEndian::read_u32(&buf[4..8]),
            ssrc: BigEndian::read_u32(&buf[8..12]),
        };

        let mut offset = RTP_HEADER_LEN;
        let csrc_bytes = usize::from(csrc_count) * 4;
        if buf.len() < offset + csrc_bytes {
            return Err(RtpError::CsrcCountMismatch {
                expected: usize::from(csrc_count),
                buf_left: buf.len() - offset,
            });
        }
        offset += csrc_bytes;

        if extension {
            if buf.len() < offset + 4 {
                return Err(RtpError::HeaderExtensionTooShort);
            }
            let words = usize::from(BigEndian::read_u16(&buf[offset + 2..offset + 4]));
            offset += 4;
            if buf.len() < offset + words * 4 {
                return Err(RtpError::HeaderExtensionTooShort);
            }
            offset += words * 4;
        }

        let mut pad = 0;
        if padding {
            pad = usize::from(buf[buf.len() - 1]);
            if pad == 0 || buf.len() < offset + pad {
                return Err(RtpError::PaddingTooShort);
            }
        }

        Ok((header, PayloadBounds {
            offset,
            padding: pad,
        }))
    }
}
