use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Sample rate of every voice frame exchanged on the wire and between workers.
pub const VOICE_SAMPLE_RATE: u32 = 8_000;
/// Duration of one audio frame.
pub const FRAME_MS: u32 = 20;
/// Mono samples in one 20 ms voice frame (160 at 8 kHz).
pub const VOICE_FRAME_SAMPLES: usize = (VOICE_SAMPLE_RATE * FRAME_MS / 1000) as usize;

const CANDIDATE_RATES: [u32; 3] = [8_000, 16_000, 44_100];
const CANDIDATE_BITS: [u16; 2] = [16, 8];
const CANDIDATE_CHANNELS: [u16; 2] = [1, 2];

/// Native signed-PCM layout of a capture or playback device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    /// 8 or 16.
    pub bits: u16,
    pub channels: u16,
    pub big_endian: bool,
}

impl PcmFormat {
    /// 8 kHz, 16-bit, mono, little endian.
    #[must_use]
    pub const fn voice() -> Self {
        Self {
            sample_rate: VOICE_SAMPLE_RATE,
            bits: 16,
            channels: 1,
            big_endian: false,
        }
    }

    #[must_use]
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits / 8).max(1)
    }

    /// Interleaved samples (all channels) in one 20 ms frame.
    #[must_use]
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate * FRAME_MS / 1000) as usize * usize::from(self.channels)
    }

    #[must_use]
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * self.bytes_per_sample()
    }

    /// Prioritized list of formats a capture device is asked for.
    ///
    /// Rate varies slowest, then bit depth, channel count and byte order.
    #[must_use]
    pub fn candidates() -> Vec<PcmFormat> {
        let mut out = Vec::with_capacity(24);
        for &sample_rate in &CANDIDATE_RATES {
            for &bits in &CANDIDATE_BITS {
                for &channels in &CANDIDATE_CHANNELS {
                    for big_endian in [false, true] {
                        out.push(PcmFormat {
                            sample_rate,
                            bits,
                            channels,
                            big_endian,
                        });
                    }
                }
            }
        }
        out
    }
}

impl std::fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit, {} ch, {}",
            self.sample_rate,
            self.bits,
            self.channels,
            if self.big_endian { "BE" } else { "LE" }
        )
    }
}

/// Reads interleaved native bytes into interleaved `i16` samples.
///
/// 8-bit samples are scaled to the 16-bit range. A trailing partial sample is ignored.
#[must_use]
pub fn read_samples(bytes: &[u8], fmt: &PcmFormat) -> Vec<i16> {
    if fmt.bits == 8 {
        return bytes.iter().map(|&b| i16::from(b as i8) << 8).collect();
    }
    bytes
        .chunks_exact(2)
        .map(|c| {
            if fmt.big_endian {
                BigEndian::read_i16(c)
            } else {
                LittleEndian::read_i16(c)
            }
        })
        .collect()
}

/// Appends interleaved `i16` samples to `out` in the byte layout of `fmt`.
pub fn write_samples(samples: &[i16], fmt: &PcmFormat, out: &mut Vec<u8>) {
    if fmt.bits == 8 {
        out.extend(samples.iter().map(|&s| (s >> 8) as i8 as u8));
        return;
    }
    let mut buf = [0u8; 2];
    for &s in samples {
        if fmt.big_endian {
            BigEndian::write_i16(&mut buf, s);
        } else {
            LittleEndian::write_i16(&mut buf, s);
        }
        out.extend_from_slice(&buf);
    }
}

/// Averages interleaved channels into one.
#[must_use]
pub fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    let ch = usize::from(channels.max(1));
    if ch == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(ch)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / ch as i32) as i16
        })
        .collect()
}

/// Nearest-sample rate conversion of a mono signal.
#[must_use]
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    (0..out_len)
        .map(|i| {
            let src = (i as u64 * u64::from(from_rate) / u64::from(to_rate)) as usize;
            samples[src.min(samples.len() - 1)]
        })
        .collect()
}

/// Truncates or zero-pads to exactly `len` samples.
#[must_use]
pub fn fit_frame(mut samples: Vec<i16>, len: usize) -> Vec<i16> {
    samples.resize(len, 0);
    samples
}

/// Converts one native device frame into one 8 kHz mono voice frame.
#[must_use]
pub fn to_voice_frame(bytes: &[u8], fmt: &PcmFormat) -> Vec<i16> {
    let interleaved = read_samples(bytes, fmt);
    let mono = downmix(&interleaved, fmt.channels);
    let voice = resample(&mono, fmt.sample_rate, VOICE_SAMPLE_RATE);
    fit_frame(voice, VOICE_FRAME_SAMPLES)
}

/// Expands a voice frame to a device's rate and channel layout (interleaved).
#[must_use]
pub fn from_voice_frame(voice: &[i16], sample_rate: u32, channels: u16) -> Vec<i16> {
    let mono = resample(voice, VOICE_SAMPLE_RATE, sample_rate);
    let ch = usize::from(channels.max(1));
    let mut out = Vec::with_capacity(mono.len() * ch);
    for s in mono {
        out.extend(std::iter::repeat_n(s, ch));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_list_covers_every_combination_in_priority_order() {
        let c = PcmFormat::candidates();
        assert_eq!(c.len(), 24);
        assert_eq!(c[0], PcmFormat::voice());
        assert!(c[1].big_endian);
        assert_eq!(c.last().map(|f| f.sample_rate), Some(44_100));
    }

    #[test]
    fn frame_sizes() {
        assert_eq!(PcmFormat::voice().frame_bytes(), 320);
        let stereo = PcmFormat {
            sample_rate: 16_000,
            bits: 16,
            channels: 2,
            big_endian: true,
        };
        assert_eq!(stereo.frame_samples(), 640);
        assert_eq!(stereo.frame_bytes(), 1280);
    }

    #[test]
    fn big_endian_bytes_are_read_correctly() {
        let fmt = PcmFormat {
            big_endian: true,
            ..PcmFormat::voice()
        };
        let mut bytes = Vec::new();
        write_samples(&[1, -2, 300], &fmt, &mut bytes);
        assert_eq!(&bytes[..2], &[0x00, 0x01]);
        assert_eq!(read_samples(&bytes, &fmt), vec![1, -2, 300]);
    }

    #[test]
    fn eight_bit_samples_scale_to_sixteen_bits() {
        let fmt = PcmFormat {
            bits: 8,
            ..PcmFormat::voice()
        };
        assert_eq!(read_samples(&[0x7F, 0x80, 0x00], &fmt), vec![32512, -32768, 0]);
    }

    #[test]
    fn stereo_16k_frame_becomes_160_voice_samples() {
        let fmt = PcmFormat {
            sample_rate: 16_000,
            bits: 16,
            channels: 2,
            big_endian: false,
        };
        let samples: Vec<i16> = (0..fmt.frame_samples()).map(|_| 1000).collect();
        let mut bytes = Vec::new();
        write_samples(&samples, &fmt, &mut bytes);
        let voice = to_voice_frame(&bytes, &fmt);
        assert_eq!(voice.len(), VOICE_FRAME_SAMPLES);
        assert!(voice.iter().all(|&s| s == 1000));
    }

    #[test]
    fn short_input_is_padded_with_silence() {
        let voice = to_voice_frame(&[0x10, 0x00], &PcmFormat::voice());
        assert_eq!(voice.len(), VOICE_FRAME_SAMPLES);
        assert_eq!(voice[0], 16);
        assert!(voice[1..].iter().all(|&s| s == 0));
    }

    #[test]
    fn voice_frame_expands_for_output_device() {
        let voice = vec![7i16; VOICE_FRAME_SAMPLES];
        let out = from_voice_frame(&voice, 48_000, 2);
        assert_eq!(out.len(), 960 * 2);
        assert!(out.iter().all(|&s| s == 7));
    }
}
