use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use crate::{
    codec::pcm::{self, PcmFormat},
    log::log_sink::LogSink,
    media::media_devices::MediaDevices,
    sink_debug, sink_error, sink_info, sink_warn,
};

use super::{
    audio_device::AudioInput, audio_error::AudioError, audio_frame::AudioFrame,
    audio_frame_sink::AudioFrameSink,
};

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const ERROR_BACKOFF: Duration = Duration::from_millis(20);

type ListenerList = Arc<Vec<(u64, Arc<dyn AudioFrameSink>)>>;

struct CaptureState {
    /// Replaced wholesale on every change; the capture loop reads a snapshot.
    listeners: ListenerList,
    /// Running flag of the current capture loop, if any.
    run_flag: Option<Arc<AtomicBool>>,
}

/// One physical microphone shared by any number of listeners.
///
/// The first [`acquire`](Self::acquire) opens the device and starts the
/// capture loop; dropping the last [`CaptureHandle`] stops it. Both decisions
/// are taken under the same lock that mutates the listener set.
pub struct SharedCapture {
    devices: Arc<dyn MediaDevices>,
    logger: Arc<dyn LogSink>,
    state: Arc<Mutex<CaptureState>>,
    next_id: AtomicU64,
}

/// Registration with a [`SharedCapture`]. Dropping it unregisters the listener.
pub struct CaptureHandle {
    capture: Arc<SharedCapture>,
    id: u64,
}

impl CaptureHandle {
    /// Same as dropping the handle.
    pub fn release(self) {}
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.capture.release(self.id);
    }
}

impl SharedCapture {
    #[must_use]
    pub fn new(devices: Arc<dyn MediaDevices>, logger: Arc<dyn LogSink>) -> Arc<Self> {
        Arc::new(Self {
            devices,
            logger,
            state: Arc::new(Mutex::new(CaptureState {
                listeners: Arc::new(Vec::new()),
                run_flag: None,
            })),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers `listener`, starting the capture loop if it is the first one.
    ///
    /// # Errors
    /// Device-open errors from the first acquisition; the listener is not
    /// registered in that case.
    pub fn acquire(
        self: &Arc<Self>,
        listener: Arc<dyn AudioFrameSink>,
    ) -> Result<CaptureHandle, AudioError> {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if st.run_flag.is_none() {
            let input = self.devices.open_audio_input(&PcmFormat::candidates())?;
            let flag = Arc::new(AtomicBool::new(true));
            self.spawn_loop(input, Arc::clone(&flag))?;
            st.run_flag = Some(flag);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut next: Vec<_> = st.listeners.iter().cloned().collect();
        next.push((id, listener));
        st.listeners = Arc::new(next);
        sink_debug!(
            self.logger,
            "[SharedCapture] listener {} added ({} total)",
            id,
            st.listeners.len()
        );

        Ok(CaptureHandle {
            capture: Arc::clone(self),
            id,
        })
    }

    fn release(&self, id: u64) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next: Vec<_> = st
            .listeners
            .iter()
            .filter(|(lid, _)| *lid != id)
            .cloned()
            .collect();
        st.listeners = Arc::new(next);

        if st.listeners.is_empty() {
            if let Some(flag) = st.run_flag.take() {
                flag.store(false, Ordering::Relaxed);
                sink_info!(self.logger, "[SharedCapture] last listener gone, stopping capture");
            }
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }

    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .run_flag
            .is_some()
    }

    fn spawn_loop(
        &self,
        mut input: Box<dyn AudioInput>,
        running: Arc<AtomicBool>,
    ) -> Result<(), AudioError> {
        let state = Arc::clone(&self.state);
        let logger = Arc::clone(&self.logger);
        let fmt = input.format();
        sink_info!(logger, "[SharedCapture] capturing at {}", fmt);

        thread::Builder::new()
            .name("callmedia-shared-capture".into())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    let bytes = match input.read_frame(READ_TIMEOUT) {
                        Ok(Some(b)) => b,
                        Ok(None) => continue,
                        Err(AudioError::Closed) => {
                            sink_error!(logger, "[SharedCapture] input device closed");
                            break;
                        }
                        Err(e) => {
                            sink_warn!(logger, "[SharedCapture] read failed: {}", e);
                            thread::sleep(ERROR_BACKOFF);
                            continue;
                        }
                    };

                    let frame = AudioFrame::new(pcm::to_voice_frame(&bytes, &fmt));
                    let snapshot = Arc::clone(
                        &state
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .listeners,
                    );
                    for (id, listener) in snapshot.iter() {
                        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                            listener.on_audio_frame(frame.clone())
                        }));
                        match delivered {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                sink_warn!(logger, "[SharedCapture] listener {} failed: {}", id, e);
                            }
                            Err(_) => {
                                sink_error!(logger, "[SharedCapture] listener {} panicked", id);
                            }
                        }
                    }
                }
                // a loop that died on its own must not block the next acquire
                let mut st = state.lock().unwrap_or_else(PoisonError::into_inner);
                if st
                    .run_flag
                    .as_ref()
                    .is_some_and(|f| Arc::ptr_eq(f, &running))
                {
                    st.run_flag = None;
                }
                drop(st);
                sink_debug!(logger, "[SharedCapture] capture loop exited");
            })
            .map(|_| ())
            .map_err(AudioError::Io)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::{
        audio::audio_device::AudioOutput,
        codec::pcm::{VOICE_FRAME_SAMPLES, write_samples},
        config::MediaSettings,
        log::NoopLogSink,
        video::{
            frame_grabber::{FrameGrabber, VideoSource},
            video_error::VideoError,
        },
    };
    use std::{sync::atomic::AtomicUsize, time::Instant};

    struct PacedInput {
        next: Instant,
    }

    impl AudioInput for PacedInput {
        fn format(&self) -> PcmFormat {
            PcmFormat::voice()
        }

        fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, AudioError> {
            let wait = self.next.saturating_duration_since(Instant::now());
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
            self.next += Duration::from_millis(20);
            let mut out = Vec::new();
            write_samples(&[7; VOICE_FRAME_SAMPLES], &PcmFormat::voice(), &mut out);
            Ok(Some(out))
        }
    }

    #[derive(Default)]
    struct CountingMic {
        opens: AtomicUsize,
        broken: AtomicBool,
    }

    impl MediaDevices for CountingMic {
        fn open_audio_input(&self, _: &[PcmFormat]) -> Result<Box<dyn AudioInput>, AudioError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(AudioError::NoDevice("input"));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(PacedInput { next: Instant::now() }))
        }

        fn open_audio_output(&self) -> Result<Box<dyn AudioOutput>, AudioError> {
            Err(AudioError::NoDevice("output"))
        }

        fn open_video_source(
            &self,
            source: VideoSource,
            _: &MediaSettings,
        ) -> Result<Box<dyn FrameGrabber>, VideoError> {
            Err(VideoError::OpenFailed(source, "no video here".into()))
        }
    }

    fn setup() -> (Arc<CountingMic>, Arc<SharedCapture>) {
        let mic = Arc::new(CountingMic::default());
        let capture = SharedCapture::new(Arc::clone(&mic) as _, NoopLogSink::shared());
        (mic, capture)
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn AudioFrameSink>) {
        let n = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&n);
        let sink = Arc::new(move |_: AudioFrame| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok::<(), AudioError>(())
        });
        (n, sink)
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn device_opens_once_and_closes_with_the_last_handle() {
        let (mic, capture) = setup();
        let (_, a) = counter();
        let (_, b) = counter();

        let ha = capture.acquire(a).unwrap();
        let hb = capture.acquire(b).unwrap();
        assert_eq!(mic.opens.load(Ordering::SeqCst), 1);
        assert_eq!(capture.listener_count(), 2);

        drop(ha);
        assert!(capture.is_capturing());
        hb.release();
        assert!(!capture.is_capturing());
        assert_eq!(capture.listener_count(), 0);

        let (_, c) = counter();
        let _hc = capture.acquire(c).unwrap();
        assert_eq!(mic.opens.load(Ordering::SeqCst), 2);
        assert!(capture.is_capturing());
    }

    #[test]
    fn failing_listener_does_not_starve_the_others() {
        let (_, capture) = setup();
        let failing: Arc<dyn AudioFrameSink> =
            Arc::new(|_: AudioFrame| -> Result<(), AudioError> {
                Err(AudioError::Listener("full".into()))
            });
        let (count, healthy) = counter();

        let _hf = capture.acquire(failing).unwrap();
        let _hh = capture.acquire(healthy).unwrap();
        assert!(wait_for(|| count.load(Ordering::SeqCst) >= 5));
    }

    #[test]
    fn panicking_listener_does_not_stop_capture() {
        let (_, capture) = setup();
        let panicking: Arc<dyn AudioFrameSink> =
            Arc::new(|_: AudioFrame| -> Result<(), AudioError> { panic!("listener bug") });
        let (count, healthy) = counter();

        let _hp = capture.acquire(panicking).unwrap();
        let _hh = capture.acquire(healthy).unwrap();
        assert!(wait_for(|| count.load(Ordering::SeqCst) >= 5));
        assert!(capture.is_capturing());
    }

    #[test]
    fn failed_first_acquire_registers_nobody() {
        let (mic, capture) = setup();
        mic.broken.store(true, Ordering::SeqCst);
        let (_, a) = counter();

        assert!(matches!(capture.acquire(a), Err(AudioError::NoDevice(_))));
        assert_eq!(capture.listener_count(), 0);
        assert!(!capture.is_capturing());

        mic.broken.store(false, Ordering::SeqCst);
        let (_, b) = counter();
        let _hb = capture.acquire(b).unwrap();
        assert_eq!(capture.listener_count(), 1);
    }
}
