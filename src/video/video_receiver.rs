use std::{
    net::UdpSocket,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crate::{
    log::log_sink::LogSink,
    media::stream_stats::StreamStats,
    net::udp::{MAX_DATAGRAM, RECV_POLL, bind_udp, is_timeout},
    rtp::{PT_JPEG, jpeg_depacketizer::JpegDepacketizer, rtp_packet::RtpPacket},
    sink_debug, sink_info, sink_warn,
};

use super::{jpeg::decode_jpeg, video_error::VideoError, video_sink::VideoSink};

/// Reassembles JPEG frames from RTP and hands decoded frames to a sink.
pub struct VideoReceiver {
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    local_port: u16,
}

impl VideoReceiver {
    /// # Errors
    /// Socket bind errors.
    pub fn start(
        local_port: u16,
        sink: Arc<dyn VideoSink>,
        logger: Arc<dyn LogSink>,
    ) -> Result<Self, VideoError> {
        let socket = bind_udp(local_port, Some(RECV_POLL))?;
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(StreamStats::default());
        sink_info!(logger, "[VideoReceiver] listening on {}", local_port);

        let running_w = Arc::clone(&running);
        let stats_w = Arc::clone(&stats);
        thread::Builder::new()
            .name(format!("callmedia-video-receiver-{local_port}"))
            .spawn(move || receive_loop(socket, sink, running_w, stats_w, logger))?;

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

    /// Packets accepted; drops count packets and frames that were discarded.
    #[must_use]
    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for VideoReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: UdpSocket,
    sink: Arc<dyn VideoSink>,
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    logger: Arc<dyn LogSink>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut depack = JpegDepacketizer::default();
    let mut frames: u64 = 0;

    while running.load(Ordering::Relaxed) {
        let n = match socket.recv_from(&mut buf) {
            Ok((n, _)) => n,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                sink_warn!(logger, "[VideoReceiver] recv failed: {}", e);
                continue;
            }
        };

        let pkt = match RtpPacket::decode(&buf[..n]) {
            Ok(p) if p.payload_type() == PT_JPEG => p,
            Ok(p) => {
                stats.record_drop();
                sink_warn!(logger, "[VideoReceiver] unexpected payload type {}", p.payload_type());
                continue;
            }
            Err(e) => {
                stats.record_drop();
                sink_warn!(logger, "[VideoReceiver] dropping packet: {}", e);
                continue;
            }
        };
        stats.record_packet(n);

        let dropped_before = depack.dropped_frames();
        let Some(jpeg) = depack.push_rtp(
            &pkt.payload,
            pkt.marker(),
            pkt.header.timestamp,
            pkt.header.sequence_number,
        ) else {
            if depack.dropped_frames() > dropped_before {
                stats.record_drop();
                sink_debug!(logger, "[VideoReceiver] incomplete frame discarded");
            }
            continue;
        };

        match decode_jpeg(&jpeg) {
            Ok(frame) => {
                frames += 1;
                sink.present(frame);
            }
            Err(e) => {
                stats.record_drop();
                sink_warn!(logger, "[VideoReceiver] {}", e);
            }
        }
    }
    sink_debug!(logger, "[VideoReceiver] stopped after {} frames", frames);
}
