//! `cpal` backed capture and playback devices.
//!
//! cpal streams must stay on the thread that built them, so each device owns
//! a small worker thread holding the stream. Samples cross over through a
//! shared buffer, the same way the callback and the worker exchange data in a
//! plain cpal player. Construction waits for the worker to report whether the
//! device opened, so a missing device surfaces synchronously.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use cpal::{
    FromSample, Sample, SampleFormat, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};

use crate::{
    codec::pcm::{self, PcmFormat},
    log::log_sink::LogSink,
    sink_debug, sink_info, sink_warn,
};

use super::{
    audio_device::{AudioInput, AudioOutput},
    audio_error::AudioError,
};

/// How long construction waits for the device worker.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
/// Captured bytes kept before the oldest are discarded (about one second at 44.1 kHz stereo).
const MAX_CAPTURE_BYTES: usize = 44_100 * 2 * 2;
/// Playback buffer cap in samples; older audio is dropped to bound latency.
const MAX_PLAYBACK_SAMPLES: usize = 24_000;

type SharedBytes = Arc<(Mutex<VecDeque<u8>>, Condvar)>;

pub struct CpalInput {
    format: PcmFormat,
    buffer: SharedBytes,
    running: Arc<AtomicBool>,
    _thread: Option<JoinHandle<()>>,
}

impl CpalInput {
    /// Opens the default input device with the first candidate it supports.
    ///
    /// # Errors
    /// [`AudioError::NoDevice`], [`AudioError::NoSupportedFormat`] or a
    /// stream build/play error if the device cannot be opened.
    pub fn open(candidates: &[PcmFormat], logger: Arc<dyn LogSink>) -> Result<Self, AudioError> {
        let buffer: SharedBytes = Arc::new((Mutex::new(VecDeque::new()), Condvar::new()));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<PcmFormat, AudioError>>();

        let buffer_w = Arc::clone(&buffer);
        let running_w = Arc::clone(&running);
        let candidates = candidates.to_vec();
        let handle = thread::Builder::new()
            .name("callmedia-audio-input".into())
            .spawn(move || {
                let stream = match build_capture_stream(&candidates, &buffer_w, &logger) {
                    Ok((stream, fmt)) => {
                        let _ = ready_tx.send(Ok(fmt));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while running_w.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                sink_debug!(logger, "[CpalInput] capture stream closed");
            })
            .map_err(AudioError::Io)?;

        let format = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(fmt)) => fmt,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                running.store(false, Ordering::Relaxed);
                return Err(AudioError::Closed);
            }
        };

        Ok(Self {
            format,
            buffer,
            running,
            _thread: Some(handle),
        })
    }
}

impl AudioInput for CpalInput {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, AudioError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::Closed);
        }
        let need = self.format.frame_bytes();
        let (lock, cvar) = &*self.buffer;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut buf, _) = cvar
            .wait_timeout_while(guard, timeout, |b| b.len() < need)
            .unwrap_or_else(PoisonError::into_inner);
        if buf.len() < need {
            return Ok(None);
        }
        Ok(Some(buf.drain(..need).collect()))
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn build_capture_stream(
    candidates: &[PcmFormat],
    buffer: &SharedBytes,
    logger: &Arc<dyn LogSink>,
) -> Result<(cpal::Stream, PcmFormat), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoDevice("input"))?;
    let name = device.name().unwrap_or_default();

    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| AudioError::StreamBuild(e.to_string()))?
        .collect();

    for fmt in candidates {
        let accepted = ranges.iter().find(|r| {
            r.channels() == fmt.channels
                && r.min_sample_rate().0 <= fmt.sample_rate
                && fmt.sample_rate <= r.max_sample_rate().0
                && sample_format_fits(r.sample_format(), fmt.bits)
        });
        let Some(range) = accepted else { continue };

        let config = cpal::StreamConfig {
            channels: fmt.channels,
            sample_rate: cpal::SampleRate(fmt.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let built = match range.sample_format() {
            SampleFormat::I16 => input_stream::<i16>(&device, &config, *fmt, buffer, logger),
            SampleFormat::U8 => input_stream::<u8>(&device, &config, *fmt, buffer, logger),
            SampleFormat::I8 => input_stream::<i8>(&device, &config, *fmt, buffer, logger),
            SampleFormat::F32 => input_stream::<f32>(&device, &config, *fmt, buffer, logger),
            other => Err(AudioError::StreamBuild(format!("sample format {other:?}"))),
        };
        match built {
            Ok(stream) => {
                stream
                    .play()
                    .map_err(|e| AudioError::StreamPlay(e.to_string()))?;
                sink_info!(logger, "[CpalInput] '{}' opened as {}", name, fmt);
                return Ok((stream, *fmt));
            }
            Err(e) => {
                sink_debug!(logger, "[CpalInput] '{}' rejected {}: {}", name, fmt, e);
            }
        }
    }

    Err(AudioError::NoSupportedFormat(name))
}

fn sample_format_fits(sf: SampleFormat, bits: u16) -> bool {
    match bits {
        8 => matches!(sf, SampleFormat::U8 | SampleFormat::I8),
        _ => matches!(sf, SampleFormat::I16 | SampleFormat::F32),
    }
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    fmt: PcmFormat,
    buffer: &SharedBytes,
    logger: &Arc<dyn LogSink>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let buffer_cb = Arc::clone(buffer);
    let logger_cb = Arc::clone(logger);
    let mut scratch: Vec<i16> = Vec::new();
    let mut bytes: Vec<u8> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| i16::from_sample(s)));
                bytes.clear();
                pcm::write_samples(&scratch, &fmt, &mut bytes);

                let (lock, cvar) = &*buffer_cb;
                let mut buf = lock.lock().unwrap_or_else(PoisonError::into_inner);
                buf.extend(bytes.iter().copied());
                if buf.len() > MAX_CAPTURE_BYTES {
                    let excess = buf.len() - MAX_CAPTURE_BYTES;
                    buf.drain(..excess);
                }
                cvar.notify_one();
            },
            move |err| {
                sink_warn!(logger_cb, "[CpalInput] Stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuild(e.to_string()))
}

pub struct CpalOutput {
    sample_rate: u32,
    channels: u16,
    buffer: Arc<Mutex<VecDeque<i16>>>,
    running: Arc<AtomicBool>,
    _thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Opens the default output device in its default configuration.
    ///
    /// # Errors
    /// [`AudioError::NoDevice`] or a stream build/play error.
    pub fn open(logger: Arc<dyn LogSink>) -> Result<Self, AudioError> {
        let buffer = Arc::new(Mutex::new(VecDeque::with_capacity(MAX_PLAYBACK_SAMPLES)));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(u32, u16), AudioError>>();

        let buffer_w = Arc::clone(&buffer);
        let running_w = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("callmedia-audio-output".into())
            .spawn(move || {
                let stream = match build_playback_stream(&buffer_w, &logger) {
                    Ok((stream, rate, channels)) => {
                        let _ = ready_tx.send(Ok((rate, channels)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while running_w.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                sink_debug!(logger, "[CpalOutput] playback stream closed");
            })
            .map_err(AudioError::Io)?;

        let (sample_rate, channels) = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                running.store(false, Ordering::Relaxed);
                return Err(AudioError::Closed);
            }
        };

        Ok(Self {
            sample_rate,
            channels,
            buffer,
            running,
            _thread: Some(handle),
        })
    }
}

impl AudioOutput for CpalOutput {
    fn write_frame(&mut self, voice: &[i16]) -> Result<(), AudioError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::Closed);
        }
        let samples = pcm::from_voice_frame(voice, self.sample_rate, self.channels);
        let mut buf = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let total = buf.len() + samples.len();
        if total > MAX_PLAYBACK_SAMPLES {
            let to_drop = (total - MAX_PLAYBACK_SAMPLES).min(buf.len());
            buf.drain(..to_drop);
        }
        buf.extend(samples);
        Ok(())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn build_playback_stream(
    buffer: &Arc<Mutex<VecDeque<i16>>>,
    logger: &Arc<dyn LogSink>,
) -> Result<(cpal::Stream, u32, u16), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoDevice("output"))?;
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::StreamBuild(e.to_string()))?;
    let config: cpal::StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::I16 => output_stream::<i16>(&device, &config, buffer, logger)?,
        SampleFormat::U16 => output_stream::<u16>(&device, &config, buffer, logger)?,
        SampleFormat::F32 => output_stream::<f32>(&device, &config, buffer, logger)?,
        other => {
            return Err(AudioError::StreamBuild(format!("sample format {other:?}")));
        }
    };
    stream
        .play()
        .map_err(|e| AudioError::StreamPlay(e.to_string()))?;

    sink_info!(
        logger,
        "[CpalOutput] '{}' playing at {} Hz, {} ch",
        device.name().unwrap_or_default(),
        config.sample_rate.0,
        config.channels
    );
    Ok((stream, config.sample_rate.0, config.channels))
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: &Arc<Mutex<VecDeque<i16>>>,
    logger: &Arc<dyn LogSink>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    let buffer_cb = Arc::clone(buffer);
    let logger_cb = Arc::clone(logger);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut buf = buffer_cb.lock().unwrap_or_else(PoisonError::into_inner);
                for sample in data.iter_mut() {
                    // underrun plays silence
                    *sample = T::from_sample(buf.pop_front().unwrap_or(0));
                }
            },
            move |err| {
                sink_warn!(logger_cb, "[CpalOutput] Stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuild(e.to_string()))
}
