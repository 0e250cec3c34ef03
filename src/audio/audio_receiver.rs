use std::{
    net::UdpSocket,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crate::{
    codec::mulaw,
    log::log_sink::LogSink,
    media::{media_devices::MediaDevices, stream_stats::StreamStats},
    net::udp::{MAX_DATAGRAM, RECV_POLL, bind_udp, is_timeout},
    rtp::{PT_PCMU, rtp_error::RtpError, rtp_packet::RtpPacket},
    sink_debug, sink_info, sink_trace, sink_warn,
};

use super::{
    audio_device::AudioOutput, audio_error::AudioError, audio_frame::AudioFrame,
    audio_frame_sink::AudioFrameSink,
};

/// Where decoded audio goes. Chosen once, at construction.
pub enum ReceiverMode {
    /// Straight to a local playback device, opened at construction.
    Playback,
    /// To a frame consumer such as a mixer slot; no device needed.
    Sink(Arc<dyn AudioFrameSink>),
}

enum Delivery {
    Playback(Box<dyn AudioOutput>),
    Sink(Arc<dyn AudioFrameSink>),
}

/// Receives PCMU over RTP on one local port and plays or forwards it.
pub struct AudioReceiver {
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    local_port: u16,
}

impl AudioReceiver {
    /// # Errors
    /// Socket bind errors, or device-unavailable in [`ReceiverMode::Playback`]
    /// when there is no output device.
    pub fn start(
        local_port: u16,
        mode: ReceiverMode,
        devices: &dyn MediaDevices,
        logger: Arc<dyn LogSink>,
    ) -> Result<Self, AudioError> {
        let delivery = match mode {
            ReceiverMode::Playback => Delivery::Playback(devices.open_audio_output()?),
            ReceiverMode::Sink(sink) => Delivery::Sink(sink),
        };
        let socket = bind_udp(local_port, Some(RECV_POLL))?;

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(StreamStats::default());
        sink_info!(
            logger,
            "[AudioReceiver] listening on {} ({})",
            local_port,
            match delivery {
                Delivery::Playback(_) => "playback",
                Delivery::Sink(_) => "sink",
            }
        );

        let running_w = Arc::clone(&running);
        let stats_w = Arc::clone(&stats);
        thread::Builder::new()
            .name(format!("callmedia-audio-receiver-{local_port}"))
            .spawn(move || receive_loop(socket, delivery, running_w, stats_w, logger))?;

        Ok(Self {
            running,
            stats,
            local_port,
        })
    }

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
    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for AudioReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: UdpSocket,
    mut delivery: Delivery,
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    logger: Arc<dyn LogSink>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::Relaxed) {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                sink_warn!(logger, "[AudioReceiver] recv failed: {}", e);
                continue;
            }
        };

        let pkt = match RtpPacket::decode(&buf[..n]) {
            Ok(p) if p.payload_type() == PT_PCMU => p,
            Ok(p) => {
                stats.record_drop();
                let e = RtpError::UnexpectedPayloadType {
                    expected: PT_PCMU,
                    got: p.payload_type(),
                };
                sink_warn!(logger, "[AudioReceiver] dropping packet from {}: {}", from, e);
                continue;
            }
            Err(e) => {
                stats.record_drop();
                sink_warn!(logger, "[AudioReceiver] dropping packet from {}: {}", from, e);
                continue;
            }
        };
        stats.record_packet(n);
        sink_trace!(
            logger,
            "[AudioReceiver] seq={} ts={} {} bytes",
            pkt.header.sequence_number,
            pkt.header.timestamp,
            pkt.payload.len()
        );

        let samples = mulaw::decode_frame(&pkt.payload);
        let result = match &mut delivery {
            Delivery::Playback(out) => out.write_frame(&samples),
            Delivery::Sink(sink) => sink.on_audio_frame(AudioFrame::new(samples)),
        };
        if let Err(e) = result {
            sink_warn!(logger, "[AudioReceiver] delivery failed: {}", e);
        }
    }
    sink_debug!(logger, "[AudioReceiver] stopped");
}
