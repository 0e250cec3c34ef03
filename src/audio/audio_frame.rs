use std::sync::Arc;

use crate::{codec::pcm::VOICE_FRAME_SAMPLES, media::utils::now_millis};

/// 20 ms of 8 kHz mono PCM.
///
/// Samples sit behind an `Arc` so fan-out to several consumers is a refcount bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Arc<Vec<i16>>,
    pub timestamp_ms: u128,
}

impl AudioFrame {
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: Arc::new(samples),
            timestamp_ms: now_millis(),
        }
    }

    #[must_use]
    pub fn silence() -> Self {
        Self::new(vec![0; VOICE_FRAME_SAMPLES])
    }

    /// True when the frame holds exactly one voice frame.
    #[must_use]
    pub fn is_full_frame(&self) -> bool {
        self.samples.len() == VOICE_FRAME_SAMPLES
    }
}
