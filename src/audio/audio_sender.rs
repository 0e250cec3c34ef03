use std::{
    net::{SocketAddr, UdpSocket},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    codec::{
        mulaw,
        pcm::{self, PcmFormat, VOICE_FRAME_SAMPLES},
    },
    log::log_sink::LogSink,
    media::{media_devices::MediaDevices, stream_stats::StreamStats, utils::pace},
    net::udp::bind_udp,
    rtp::rtp_sender::RtpSender,
    sink_debug, sink_error, sink_info, sink_warn,
};

use super::{audio_device::AudioInput, audio_error::AudioError};

pub const FRAME_PERIOD: Duration = Duration::from_millis(20);
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Captures from its own input device and streams PCMU to one peer.
pub struct AudioSender {
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    local_port: u16,
    remote: SocketAddr,
    ssrc: u32,
}

impl AudioSender {
    /// Binds `local_port`, opens the capture device and starts the send loop.
    ///
    /// # Errors
    /// Socket bind errors, or device-unavailable when no candidate format
    /// is accepted.
    pub fn start(
        local_port: u16,
        remote: SocketAddr,
        devices: &dyn MediaDevices,
        logger: Arc<dyn LogSink>,
    ) -> Result<Self, AudioError> {
        let socket = bind_udp(local_port, None)?;
        let input = devices.open_audio_input(&PcmFormat::candidates())?;
        let rtp = RtpSender::audio_pcmu();
        let ssrc = rtp.profile().ssrc;

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(StreamStats::default());
        sink_info!(
            logger,
            "[AudioSender] {} -> {} as {} (ssrc={:#010x})",
            local_port,
            remote,
            input.format(),
            ssrc
        );

        let worker = SendLoop {
            socket,
            remote,
            rtp,
            running: Arc::clone(&running),
            stats: Arc::clone(&stats),
            logger,
        };
        thread::Builder::new()
            .name(format!("callmedia-audio-sender-{local_port}"))
            .spawn(move || worker.run(input))?;

        Ok(Self {
            running,
            stats,
            local_port,
            remote,
            ssrc,
        })
    }

    /// Signals the loop to end; the device and socket close when it exits.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    #[must_use]
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    #[must_use]
    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for AudioSender {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The socket half shared by the sender and the forwarder: encode one voice
/// frame, wrap it and send it.
pub(crate) struct SendLoop {
    pub(crate) socket: UdpSocket,
    pub(crate) remote: SocketAddr,
    pub(crate) rtp: RtpSender,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) stats: Arc<StreamStats>,
    pub(crate) logger: Arc<dyn LogSink>,
}

impl SendLoop {
    pub(crate) fn send_voice(&mut self, voice: &[i16]) {
        let payload = mulaw::encode_frame(voice);
        let pkt = self
            .rtp
            .build_packet(payload, false, VOICE_FRAME_SAMPLES as u32);
        match self.socket.send_to(&pkt.encode(), self.remote) {
            Ok(n) => self.stats.record_packet(n),
            Err(e) => {
                self.stats.record_drop();
                sink_warn!(self.logger, "[AudioSender] send to {} failed: {}", self.remote, e);
            }
        }
    }

    fn run(mut self, mut input: Box<dyn AudioInput>) {
        let fmt = input.format();
        let mut next_deadline = Instant::now() + FRAME_PERIOD;

        while self.running.load(Ordering::Relaxed) {
            match input.read_frame(READ_TIMEOUT) {
                Ok(Some(bytes)) => {
                    let voice = pcm::to_voice_frame(&bytes, &fmt);
                    self.send_voice(&voice);
                    pace(&mut next_deadline, FRAME_PERIOD);
                }
                Ok(None) => {}
                Err(AudioError::Closed) => {
                    sink_error!(self.logger, "[AudioSender] input device closed");
                    break;
                }
                Err(e) => {
                    sink_warn!(self.logger, "[AudioSender] read failed: {}", e);
                    thread::sleep(FRAME_PERIOD);
                }
            }
        }
        self.running.store(false, Ordering::Relaxed);
        sink_debug!(self.logger, "[AudioSender] stopped after {} packets", self.stats.packets());
    }
}
