use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    log::log_sink::LogSink,
    media::{stream_stats::StreamStats, utils::pace},
    net::udp::bind_udp,
    rtp::rtp_sender::RtpSender,
    sink_debug, sink_info,
};

use super::{
    audio_error::AudioError,
    audio_frame::AudioFrame,
    audio_frame_sink::AudioFrameSink,
    audio_sender::{FRAME_PERIOD, SendLoop},
    frame_queue::DropOldestQueue,
    shared_capture::{CaptureHandle, SharedCapture},
};

const QUEUE_WAIT: Duration = Duration::from_millis(100);

/// Shared-capture listener that only enqueues.
struct QueueSink(Arc<DropOldestQueue<AudioFrame>>);

impl AudioFrameSink for QueueSink {
    fn on_audio_frame(&self, frame: AudioFrame) -> Result<(), AudioError> {
        self.0.push(frame);
        Ok(())
    }
}

/// Sends frames from the shared microphone to one remote peer.
///
/// Captured frames land in a private drop-oldest queue; a dedicated loop
/// drains it, encodes and sends, so a slow socket never stalls capture or
/// the other peers.
pub struct AudioForwarder {
    queue: Arc<DropOldestQueue<AudioFrame>>,
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    registration: Mutex<Option<CaptureHandle>>,
    local_port: u16,
    remote: SocketAddr,
    logger: Arc<dyn LogSink>,
}

impl AudioForwarder {
    /// Binds `local_port`, starts the send loop and registers with `capture`.
    ///
    /// # Errors
    /// Socket bind errors, or device errors from the first capture acquisition.
    pub fn start(
        local_port: u16,
        remote: SocketAddr,
        queue_capacity: usize,
        capture: &Arc<SharedCapture>,
        logger: Arc<dyn LogSink>,
    ) -> Result<Self, AudioError> {
        let socket = bind_udp(local_port, None)?;
        let queue = Arc::new(DropOldestQueue::new(queue_capacity));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(StreamStats::default());

        let worker = SendLoop {
            socket,
            remote,
            rtp: RtpSender::audio_pcmu(),
            running: Arc::clone(&running),
            stats: Arc::clone(&stats),
            logger: Arc::clone(&logger),
        };
        let queue_w = Arc::clone(&queue);
        thread::Builder::new()
            .name(format!("callmedia-audio-forwarder-{local_port}"))
            .spawn(move || forward_loop(worker, queue_w))?;

        let registration = match capture.acquire(Arc::new(QueueSink(Arc::clone(&queue)))) {
            Ok(h) => h,
            Err(e) => {
                running.store(false, Ordering::Relaxed);
                queue.close();
                return Err(e);
            }
        };
        sink_info!(logger, "[AudioForwarder] {} -> {}", local_port, remote);

        Ok(Self {
            queue,
            running,
            stats,
            registration: Mutex::new(Some(registration)),
            local_port,
            remote,
            logger,
        })
    }

    /// Unregisters from the shared capture and ends the send loop. Idempotent.
    pub fn stop(&self) {
        let handle = self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(h) = handle {
            h.release();
            sink_debug!(self.logger, "[AudioForwarder] {} unregistered", self.local_port);
        }
        self.running.store(false, Ordering::Relaxed);
        self.queue.close();
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
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for AudioForwarder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward_loop(mut worker: SendLoop, queue: Arc<DropOldestQueue<AudioFrame>>) {
    let mut next_deadline = Instant::now() + FRAME_PERIOD;
    while worker.running.load(Ordering::Relaxed) {
        let Some(frame) = queue.pop_timeout(QUEUE_WAIT) else {
            next_deadline = Instant::now() + FRAME_PERIOD;
            continue;
        };
        worker.send_voice(&frame.samples);
        pace(&mut next_deadline, FRAME_PERIOD);
    }
    sink_debug!(
        worker.logger,
        "[AudioForwarder] stopped after {} packets, {} frames evicted",
        worker.stats.packets(),
        queue.dropped()
    );
}
