//! G.711 μ-law companding.
//!
//! Pure functions to convert between 16-bit linear PCM samples and 8-bit
//! μ-law bytes, plus the saturating mix primitive used by the audio mixer.
//! Every `i16` encodes and every byte decodes.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Converts a 16-bit linear PCM sample to 8-bit μ-law.
#[must_use]
pub fn encode(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let mut s = i32::from(sample).abs();
    if s > CLIP {
        s = CLIP;
    }
    s += BIAS;

    let mut mask = 0x4000;
    let mut exp: u8 = 7;
    while (s & mask) == 0 && exp > 0 {
        mask >>= 1;
        exp -= 1;
    }

    let mantissa = ((s >> (exp + 3)) & 0x0F) as u8;
    !(sign | (exp << 4) | mantissa)
}

/// Converts an 8-bit μ-law byte to 16-bit linear PCM.
#[must_use]
pub fn decode(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = i32::from(byte & 0x0F);

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    let sample = if sign != 0 { -magnitude } else { magnitude };
    sample as i16
}

/// Encodes a whole frame of samples.
#[must_use]
pub fn encode_frame(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode(s)).collect()
}

/// Decodes a whole μ-law payload.
#[must_use]
pub fn decode_frame(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| decode(b)).collect()
}

/// Adds `src` into `dest` sample by sample, clamping to the `i16` range.
///
/// Only the overlapping prefix of both slices is mixed.
pub fn mix_saturating(dest: &mut [i16], src: &[i16]) {
    for (d, s) in dest.iter_mut().zip(src) {
        *d = d.saturating_add(*s);
    }
}
