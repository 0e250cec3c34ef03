use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    codec::{mulaw::mix_saturating, pcm::VOICE_FRAME_SAMPLES},
    log::log_sink::LogSink,
    media::utils::pace,
    sink_debug, sink_info, sink_warn,
};

use super::{
    audio_device::AudioOutput, audio_error::AudioError, audio_frame::AudioFrame,
    audio_frame_sink::AudioFrameSink, audio_sender::FRAME_PERIOD, frame_queue::DropOldestQueue,
};

/// Sleep after a tick in which no source had data.
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Opaque handle to one mixer source. Never reused within a mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

/// Producer side of a mixer slot, handed to an audio receiver.
///
/// Once the slot is removed its queue is closed and further frames are ignored.
pub struct MixerInput {
    slot: SlotId,
    queue: Arc<DropOldestQueue<AudioFrame>>,
}

impl MixerInput {
    #[must_use]
    pub fn slot(&self) -> SlotId {
        self.slot
    }
}

impl AudioFrameSink for MixerInput {
    fn on_audio_frame(&self, frame: AudioFrame) -> Result<(), AudioError> {
        self.queue.push(frame);
        Ok(())
    }
}

/// Sums any number of per-participant streams into one playback stream.
///
/// Each source owns a bounded drop-oldest queue. One tick polls every queue
/// once without blocking and mixes whatever full frames it found with
/// saturating addition. Source-list changes and the sweep share one lock.
pub struct AudioMixer {
    sources: Arc<Mutex<Vec<(SlotId, Arc<DropOldestQueue<AudioFrame>>)>>>,
    next_slot: AtomicU64,
    queue_capacity: usize,
    running: Arc<AtomicBool>,
    logger: Arc<dyn LogSink>,
}

impl AudioMixer {
    #[must_use]
    pub fn new(queue_capacity: usize, logger: Arc<dyn LogSink>) -> Self {
        Self {
            sources: Arc::new(Mutex::new(Vec::new())),
            next_slot: AtomicU64::new(1),
            queue_capacity,
            running: Arc::new(AtomicBool::new(false)),
            logger,
        }
    }

    /// Appends a new source queue.
    pub fn add_source(&self) -> MixerInput {
        let slot = SlotId(self.next_slot.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(DropOldestQueue::new(self.queue_capacity));
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((slot, Arc::clone(&queue)));
        sink_debug!(self.logger, "[AudioMixer] added source {:?}", slot);
        MixerInput { slot, queue }
    }

    /// Removes exactly `slot`; other slots are unaffected. Returns false for unknown slots.
    pub fn remove_source(&self, slot: SlotId) -> bool {
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pos) = sources.iter().position(|(s, _)| *s == slot) else {
            return false;
        };
        let (_, queue) = sources.remove(pos);
        queue.close();
        drop(sources);
        sink_debug!(self.logger, "[AudioMixer] removed source {:?}", slot);
        true
    }

    /// Queues a frame on `slot`. Returns false for unknown slots.
    pub fn push_frame(&self, slot: SlotId, frame: AudioFrame) -> bool {
        let sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        match sources.iter().find(|(s, _)| *s == slot) {
            Some((_, q)) => {
                q.push(frame);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// One sweep over all sources. `None` when no source had a full frame.
    #[must_use]
    pub fn mix_tick(&self) -> Option<Vec<i16>> {
        mix_once(&self.sources)
    }

    /// Starts the mixing loop writing to `output`. A second call while running is ignored.
    ///
    /// # Errors
    /// Thread spawn failure.
    pub fn start(&self, mut output: Box<dyn AudioOutput>) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let sources = Arc::clone(&self.sources);
        let running = Arc::clone(&self.running);
        let logger = Arc::clone(&self.logger);
        sink_info!(logger, "[AudioMixer] started");

        let spawned = thread::Builder::new()
            .name("callmedia-audio-mixer".into())
            .spawn(move || {
                let mut next_deadline = Instant::now() + FRAME_PERIOD;
                while running.load(Ordering::Relaxed) {
                    match mix_once(&sources) {
                        Some(frame) => {
                            if let Err(e) = output.write_frame(&frame) {
                                sink_warn!(logger, "[AudioMixer] playback failed: {}", e);
                            }
                            pace(&mut next_deadline, FRAME_PERIOD);
                        }
                        None => {
                            thread::sleep(IDLE_SLEEP);
                            next_deadline = Instant::now() + FRAME_PERIOD;
                        }
                    }
                }
                sink_debug!(logger, "[AudioMixer] stopped");
            });
        if let Err(e) = spawned {
            self.running.store(false, Ordering::SeqCst);
            return Err(AudioError::Io(e));
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn mix_once(sources: &Mutex<Vec<(SlotId, Arc<DropOldestQueue<AudioFrame>>)>>) -> Option<Vec<i16>> {
    let sources = sources.lock().unwrap_or_else(PoisonError::into_inner);
    let mut out = vec![0i16; VOICE_FRAME_SAMPLES];
    let mut has_data = false;
    for (_, queue) in sources.iter() {
        if let Some(frame) = queue.try_pop() {
            if frame.is_full_frame() {
                mix_saturating(&mut out, &frame.samples);
                has_data = true;
            }
        }
    }
    has_data.then_some(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::log::NoopLogSink;

    fn mixer() -> AudioMixer {
        AudioMixer::new(100, Arc::new(NoopLogSink))
    }

    fn frame(v: i16) -> AudioFrame {
        AudioFrame::new(vec![v; VOICE_FRAME_SAMPLES])
    }

    #[test]
    fn empty_mixer_has_nothing_to_play() {
        assert!(mixer().mix_tick().is_none());
    }

    #[test]
    fn sums_sources_with_saturation() {
        let m = mixer();
        let a = m.add_source();
        let b = m.add_source();
        a.on_audio_frame(frame(i16::MAX)).unwrap();
        b.on_audio_frame(frame(i16::MAX)).unwrap();
        let out = m.mix_tick().unwrap();
        assert!(out.iter().all(|&s| s == i16::MAX));

        a.on_audio_frame(frame(1000)).unwrap();
        b.on_audio_frame(frame(-250)).unwrap();
        assert!(m.mix_tick().unwrap().iter().all(|&s| s == 750));
    }

    #[test]
    fn silent_source_does_not_stall_others() {
        let m = mixer();
        let _quiet = m.add_source();
        let loud = m.add_source();
        loud.on_audio_frame(frame(42)).unwrap();
        assert_eq!(m.mix_tick().unwrap()[0], 42);
    }

    #[test]
    fn wrong_sized_frames_are_skipped() {
        let m = mixer();
        let a = m.add_source();
        a.on_audio_frame(AudioFrame::new(vec![5; 80])).unwrap();
        assert!(m.mix_tick().is_none());
    }

    #[test]
    fn overfed_slot_mixes_only_the_newest_hundred() {
        let m = mixer();
        let a = m.add_source();
        let _b = m.add_source();
        for i in 1..=150 {
            a.on_audio_frame(frame(i)).unwrap();
        }
        let mixed: Vec<i16> = std::iter::from_fn(|| m.mix_tick()).map(|f| f[0]).collect();
        assert_eq!(mixed, (51..=150).collect::<Vec<i16>>());
    }

    #[test]
    fn removing_a_slot_keeps_other_handles_valid() {
        let m = mixer();
        let a = m.add_source();
        let b = m.add_source();
        let c = m.add_source();
        assert!(m.remove_source(a.slot()));
        assert!(!m.remove_source(a.slot()));
        assert_eq!(m.source_count(), 2);

        assert!(m.push_frame(c.slot(), frame(3)));
        assert!(!m.push_frame(a.slot(), frame(9)));
        assert_eq!(m.mix_tick().unwrap()[0], 3);

        b.on_audio_frame(frame(7)).unwrap();
        assert_eq!(m.mix_tick().unwrap()[0], 7);

        // removed slot input is inert
        a.on_audio_frame(frame(100)).unwrap();
        assert!(m.mix_tick().is_none());
    }
}
