#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]
//! Fake devices and helpers shared by the integration tests.

use std::{
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use callmedia::{
    audio::{
        audio_device::{AudioInput, AudioOutput},
        audio_error::AudioError,
    },
    codec::pcm::{PcmFormat, VOICE_FRAME_SAMPLES, write_samples},
    config::MediaSettings,
    log::{NoopLogSink, log_sink::LogSink},
    media::{media_context::MediaContext, media_devices::MediaDevices},
    video::{
        frame_grabber::{FrameGrabber, VideoSource},
        video_error::VideoError,
    },
};
use opencv::{
    core::{CV_8UC3, Mat, Scalar},
    prelude::*,
};

pub fn logger() -> Arc<dyn LogSink> {
    NoopLogSink::shared()
}

/// Microphone producing one constant-valued 20 ms frame per period.
pub struct FakeInput {
    value: i16,
    next: Instant,
}

impl AudioInput for FakeInput {
    fn format(&self) -> PcmFormat {
        PcmFormat::voice()
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, AudioError> {
        let now = Instant::now();
        if self.next > now {
            let wait = self.next - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }
        self.next += Duration::from_millis(20);
        let mut out = Vec::new();
        write_samples(&[self.value; VOICE_FRAME_SAMPLES], &PcmFormat::voice(), &mut out);
        Ok(Some(out))
    }
}

/// Speaker that keeps every frame written to it.
pub struct RecordingOutput {
    frames: Arc<Mutex<Vec<Vec<i16>>>>,
}

impl AudioOutput for RecordingOutput {
    fn write_frame(&mut self, voice: &[i16]) -> Result<(), AudioError> {
        self.frames.lock().unwrap().push(voice.to_vec());
        Ok(())
    }
}

/// Camera/screen producing solid-colour frames.
pub struct FakeGrabber {
    source: VideoSource,
}

impl FrameGrabber for FakeGrabber {
    fn source(&self) -> VideoSource {
        self.source
    }

    fn grab(&mut self) -> Result<Mat, VideoError> {
        let colour = match self.source {
            VideoSource::Camera => Scalar::new(255.0, 0.0, 0.0, 0.0),
            VideoSource::Screen => Scalar::new(0.0, 255.0, 0.0, 0.0),
        };
        Ok(Mat::new_rows_cols_with_default(240, 320, CV_8UC3, colour)?)
    }
}

/// Device provider with switchable availability and open counters.
pub struct FakeDevices {
    pub has_input: bool,
    pub has_output: bool,
    pub has_camera: bool,
    pub has_screen: bool,
    pub mic_value: i16,
    pub played: Arc<Mutex<Vec<Vec<i16>>>>,
    pub input_opens: AtomicUsize,
    /// How long opening a camera or screen takes, in milliseconds.
    pub video_open_delay_ms: AtomicU64,
}

impl FakeDevices {
    pub fn all() -> Self {
        Self {
            has_input: true,
            has_output: true,
            has_camera: true,
            has_screen: true,
            mic_value: 1000,
            played: Arc::new(Mutex::new(Vec::new())),
            input_opens: AtomicUsize::new(0),
            video_open_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn none() -> Self {
        Self {
            has_input: false,
            has_output: false,
            has_camera: false,
            has_screen: false,
            ..Self::all()
        }
    }

    pub fn input_opens(&self) -> usize {
        self.input_opens.load(Ordering::SeqCst)
    }

    /// Makes every later video open block for `delay`, like a stuck driver.
    pub fn set_video_open_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap();
        self.video_open_delay_ms.store(ms, Ordering::SeqCst);
    }
}

impl MediaDevices for FakeDevices {
    fn open_audio_input(&self, candidates: &[PcmFormat]) -> Result<Box<dyn AudioInput>, AudioError> {
        if !self.has_input || candidates.is_empty() {
            return Err(AudioError::NoDevice("input"));
        }
        self.input_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInput {
            value: self.mic_value,
            next: Instant::now(),
        }))
    }

    fn open_audio_output(&self) -> Result<Box<dyn AudioOutput>, AudioError> {
        if !self.has_output {
            return Err(AudioError::NoDevice("output"));
        }
        Ok(Box::new(RecordingOutput {
            frames: Arc::clone(&self.played),
        }))
    }

    fn open_video_source(
        &self,
        source: VideoSource,
        _settings: &MediaSettings,
    ) -> Result<Box<dyn FrameGrabber>, VideoError> {
        let delay = self.video_open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        let available = match source {
            VideoSource::Camera => self.has_camera,
            VideoSource::Screen => self.has_screen,
        };
        if !available {
            return Err(VideoError::OpenFailed(source, "fake device off".into()));
        }
        Ok(Box::new(FakeGrabber { source }))
    }
}

/// Settings with a private port range so test binaries do not collide.
pub fn settings(port_start: u16) -> MediaSettings {
    MediaSettings {
        local_ip: Some(Ipv4Addr::LOCALHOST),
        rtp_port_start: port_start,
        rtp_port_end: port_start.saturating_add(2_000),
        ..MediaSettings::default()
    }
}

pub fn context(port_start: u16, devices: Arc<FakeDevices>) -> Arc<MediaContext> {
    MediaContext::new(settings(port_start), devices, logger()).unwrap()
}

/// Like [`context`], for ranges too close to the top of the port space.
pub fn context_range(start: u16, end: u16, devices: Arc<FakeDevices>) -> Arc<MediaContext> {
    let s = MediaSettings {
        rtp_port_end: end,
        ..settings(start)
    };
    MediaContext::new(s, devices, logger()).unwrap()
}

/// A loopback socket standing in for a remote peer.
pub fn peer_socket() -> (UdpSocket, SocketAddr) {
    let s = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    s.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    let addr = s.local_addr().unwrap();
    (s, addr)
}

/// Descriptor pointing media at `audio` (and `video`, when given) on loopback.
pub fn descriptor(audio: u16, video: Option<u16>) -> String {
    let mut d = format!(
        "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=peer\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio {audio} RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\na=sendrecv\r\n"
    );
    if let Some(v) = video {
        d.push_str(&format!("m=video {v} RTP/AVP 26\r\na=rtpmap:26 JPEG/90000\r\na=sendrecv\r\n"));
    }
    d
}

/// Receives up to `n` datagrams, giving up after `within`.
pub fn collect(sock: &UdpSocket, n: usize, within: Duration) -> Vec<Vec<u8>> {
    let deadline = Instant::now() + within;
    let mut out = Vec::new();
    let mut buf = vec![0u8; 65_535];
    while out.len() < n && Instant::now() < deadline {
        if let Ok((len, _)) = sock.recv_from(&mut buf) {
            out.push(buf[..len].to_vec());
        }
    }
    out
}

/// Polls `cond` until it holds or `within` passes.
pub fn wait_until(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}
