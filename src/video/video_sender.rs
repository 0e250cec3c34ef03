use std::{
    net::{SocketAddr, UdpSocket},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Instant,
};

use crate::{
    config::MediaSettings,
    log::log_sink::LogSink,
    media::{media_devices::MediaDevices, stream_stats::StreamStats, utils::pace},
    net::udp::bind_udp,
    rtp::{jpeg_packetizer::JpegPacketizer, rtp_sender::RtpSender},
    sink_debug, sink_info, sink_trace, sink_warn,
};

use super::{
    frame_grabber::{FrameGrabber, VideoSource},
    jpeg::encode_jpeg,
    video_error::VideoError,
};

/// Opens `source`; a camera that cannot be opened falls back to the screen.
fn open_with_fallback(
    devices: &dyn MediaDevices,
    source: VideoSource,
    settings: &MediaSettings,
    logger: &Arc<dyn LogSink>,
) -> Result<Box<dyn FrameGrabber>, VideoError> {
    match devices.open_video_source(source, settings) {
        Ok(g) => Ok(g),
        Err(e) if source == VideoSource::Camera => {
            sink_warn!(logger, "[VideoSender] camera unavailable ({}), using screen", e);
            devices.open_video_source(VideoSource::Screen, settings)
        }
        Err(e) => Err(e),
    }
}

/// Captures, JPEG-encodes and streams frames to one peer at a fixed rate.
pub struct VideoSender {
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    /// Source requested by [`VideoSender::set_source`], applied on the next tick.
    pending_source: Arc<Mutex<Option<VideoSource>>>,
    active_source: Arc<Mutex<VideoSource>>,
    local_port: u16,
    remote: SocketAddr,
    ssrc: u32,
    logger: Arc<dyn LogSink>,
}

impl VideoSender {
    /// # Errors
    /// Socket bind errors, or `OpenFailed` when neither the requested source
    /// nor the screen fallback can be opened.
    pub fn start(
        local_port: u16,
        remote: SocketAddr,
        source: VideoSource,
        devices: Arc<dyn MediaDevices>,
        settings: &MediaSettings,
        logger: Arc<dyn LogSink>,
    ) -> Result<Self, VideoError> {
        let socket = bind_udp(local_port, None)?;
        let grabber = open_with_fallback(devices.as_ref(), source, settings, &logger)?;
        let rtp = RtpSender::video_jpeg();
        let ssrc = rtp.profile().ssrc;

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(StreamStats::default());
        let pending_source = Arc::new(Mutex::new(None));
        let active_source = Arc::new(Mutex::new(grabber.source()));
        sink_info!(
            logger,
            "[VideoSender] {} -> {} from {} at {} fps",
            local_port,
            remote,
            grabber.source(),
            settings.fps
        );

        let worker = VideoLoop {
            socket,
            remote,
            rtp,
            packetizer: JpegPacketizer::new(settings.mtu),
            grabber,
            devices,
            settings: settings.clone(),
            pending_source: Arc::clone(&pending_source),
            active_source: Arc::clone(&active_source),
            running: Arc::clone(&running),
            stats: Arc::clone(&stats),
            logger: Arc::clone(&logger),
        };
        thread::Builder::new()
            .name(format!("callmedia-video-sender-{local_port}"))
            .spawn(move || worker.run())?;

        Ok(Self {
            running,
            stats,
            pending_source,
            active_source,
            local_port,
            remote,
            ssrc,
            logger,
        })
    }

    /// Switches the capture source. Takes effect on the next frame; if the new
    /// source cannot be opened the current one keeps running.
    pub fn set_source(&self, source: VideoSource) {
        *self
            .pending_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(source);
        sink_debug!(self.logger, "[VideoSender] switch to {} requested", source);
    }

    /// Source currently feeding the stream.
    #[must_use]
    pub fn source(&self) -> VideoSource {
        *self
            .active_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
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

impl Drop for VideoSender {
    fn drop(&mut self) {
        self.stop();
    }
}

struct VideoLoop {
    socket: UdpSocket,
    remote: SocketAddr,
    rtp: RtpSender,
    packetizer: JpegPacketizer,
    grabber: Box<dyn FrameGrabber>,
    devices: Arc<dyn MediaDevices>,
    settings: MediaSettings,
    pending_source: Arc<Mutex<Option<VideoSource>>>,
    active_source: Arc<Mutex<VideoSource>>,
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    logger: Arc<dyn LogSink>,
}

impl VideoLoop {
    fn run(mut self) {
        let period = self.settings.frame_interval();
        let ticks = self.rtp.profile().ticks_per_frame(self.settings.fps);
        let mut next_deadline = Instant::now() + period;

        while self.running.load(Ordering::Relaxed) {
            self.apply_pending_source();

            match self.grabber.grab() {
                Ok(frame) => match encode_jpeg(
                    &frame,
                    self.settings.width,
                    self.settings.height,
                    self.settings.jpeg_quality,
                ) {
                    Ok(jpeg) => self.send_frame(&jpeg, ticks),
                    Err(e) => sink_warn!(self.logger, "[VideoSender] {}", e),
                },
                Err(VideoError::NotFrame) => {
                    sink_trace!(self.logger, "[VideoSender] no frame this tick");
                }
                Err(e) => sink_warn!(self.logger, "[VideoSender] capture failed: {}", e),
            }

            pace(&mut next_deadline, period);
        }
        sink_debug!(
            self.logger,
            "[VideoSender] stopped after {} packets",
            self.stats.packets()
        );
    }

    fn apply_pending_source(&mut self) {
        let Some(wanted) = self
            .pending_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        if wanted == self.grabber.source() {
            return;
        }
        match self.devices.open_video_source(wanted, &self.settings) {
            Ok(g) => {
                self.grabber = g;
                *self
                    .active_source
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = wanted;
                sink_info!(self.logger, "[VideoSender] now sending {}", wanted);
            }
            Err(e) => {
                sink_warn!(self.logger, "[VideoSender] cannot switch to {}: {}", wanted, e);
            }
        }
    }

    /// One JPEG -> one or more packets sharing a timestamp, marker on the last.
    fn send_frame(&mut self, jpeg: &[u8], ticks: u32) {
        for chunk in self.packetizer.packetize(jpeg) {
            let pkt = self.rtp.next_packet(chunk.bytes, chunk.marker);
            match self.socket.send_to(&pkt.encode(), self.remote) {
                Ok(n) => self.stats.record_packet(n),
                Err(e) => {
                    self.stats.record_drop();
                    sink_warn!(self.logger, "[VideoSender] send to {} failed: {}", self.remote, e);
                }
            }
        }
        self.rtp.advance_timestamp(ticks);
    }
}
