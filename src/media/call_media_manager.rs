use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    audio::{
        audio_receiver::{AudioReceiver, ReceiverMode},
        audio_sender::AudioSender,
    },
    log::log_sink::LogSink,
    net::port_allocator::PortPair,
    sdp::{remote_endpoint::RemoteEndpoint, session_descriptor::SessionDescriptor},
    sink_debug, sink_info,
    video::{
        frame_grabber::VideoSource,
        video_receiver::VideoReceiver,
        video_sender::VideoSender,
        video_sink::{SwappableSink, VideoSink},
    },
};

use super::{
    media_context::MediaContext,
    media_error::{MediaError, Result},
    stream_starter::StartTicket,
};

const SESSION_NAME: &str = "Call";

#[derive(Default)]
struct CallStreams {
    audio_receiver: Option<AudioReceiver>,
    audio_sender: Option<AudioSender>,
    video_receiver: Option<VideoReceiver>,
    video_sink: Option<Arc<SwappableSink>>,
    video_sender: Option<VideoSender>,
    /// A start is opening devices outside the lock.
    audio_starting: bool,
    video_starting: bool,
    /// Bumped by every stop; a start that sees a different value was cancelled.
    audio_epoch: u64,
    video_epoch: u64,
}

/// Video streams opened by a start that has not been committed yet.
struct OpenedVideo {
    receiver: Option<VideoReceiver>,
    sink: Option<Arc<SwappableSink>>,
    sender: VideoSender,
}

impl OpenedVideo {
    fn stop(self) {
        self.sender.stop();
        if let Some(r) = self.receiver {
            r.stop();
        }
    }
}

/// Media for a 1:1 call: one audio pair and one video pair of streams.
///
/// The audio and video port pairs are leased for the lifetime of the
/// manager; the primary port of each pair receives, the secondary sends.
pub struct CallMediaManager {
    ctx: Arc<MediaContext>,
    logger: Arc<dyn LogSink>,
    audio_ports: PortPair,
    video_ports: PortPair,
    streams: Mutex<CallStreams>,
    remote_video_sink: Mutex<Option<Arc<dyn VideoSink>>>,
    video_source: Mutex<VideoSource>,
}

impl CallMediaManager {
    /// Leases the audio pair at a random base and the video pair right above it.
    ///
    /// # Errors
    /// Port exhaustion.
    pub fn new(ctx: Arc<MediaContext>) -> Result<Self> {
        let ports = ctx.ports();
        let audio_ports = ports.allocate_pair(ports.random_base())?;
        let video_ports = match ports.allocate_pair(audio_ports.primary.saturating_add(2)) {
            Ok(p) => p,
            Err(e) => {
                ports.release_pair(audio_ports);
                return Err(e.into());
            }
        };
        let logger = ctx.logger();
        sink_info!(
            logger,
            "[CallMedia] audio ports {:?}, video ports {:?}",
            audio_ports,
            video_ports
        );
        Ok(Self {
            ctx,
            logger,
            audio_ports,
            video_ports,
            streams: Mutex::new(CallStreams::default()),
            remote_video_sink: Mutex::new(None),
            video_source: Mutex::new(VideoSource::Camera),
        })
    }

    fn lock_streams(&self) -> MutexGuard<'_, CallStreams> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Local descriptor advertising the receive ports.
    #[must_use]
    pub fn create_sdp_offer(&self, include_video: bool) -> String {
        SessionDescriptor::offer(
            SESSION_NAME,
            self.ctx.local_ip(),
            self.audio_ports.primary,
            include_video.then_some(self.video_ports.primary),
        )
        .to_string()
    }

    /// Plays the peer's audio and sends the microphone to it.
    ///
    /// Devices are opened without holding the stream lock, so a stop issued
    /// meanwhile returns at once and cancels this start.
    ///
    /// # Errors
    /// [`MediaError::AlreadyActive`], device-unavailable, socket errors, or
    /// [`MediaError::Cancelled`]. Nothing is left running on failure.
    pub fn start_audio_stream(&self, remote_descriptor: &str) -> Result<()> {
        self.start_audio(remote_descriptor, None)
    }

    pub(crate) fn start_audio(&self, remote_descriptor: &str, ticket: Option<&StartTicket>) -> Result<()> {
        let epoch = {
            let mut streams = self.lock_streams();
            if streams.audio_starting
                || streams.audio_sender.is_some()
                || streams.audio_receiver.is_some()
            {
                return Err(MediaError::AlreadyActive("audio"));
            }
            streams.audio_starting = true;
            streams.audio_epoch
        };
        let remote = RemoteEndpoint::from_descriptor(remote_descriptor);
        let opened = self.open_audio(&remote);

        let mut streams = self.lock_streams();
        let current = streams.audio_epoch == epoch;
        if current {
            streams.audio_starting = false;
        }
        match opened {
            Ok((receiver, sender)) if current && ticket.is_none_or(StartTicket::claim) => {
                streams.audio_receiver = Some(receiver);
                streams.audio_sender = Some(sender);
                sink_info!(self.logger, "[CallMedia] audio with {}", remote.audio_addr());
                Ok(())
            }
            Ok((receiver, sender)) => {
                drop(streams);
                sender.stop();
                receiver.stop();
                sink_debug!(self.logger, "[CallMedia] audio start cancelled");
                Err(MediaError::Cancelled("audio".into()))
            }
            Err(e) => Err(e),
        }
    }

    fn open_audio(&self, remote: &RemoteEndpoint) -> Result<(AudioReceiver, AudioSender)> {
        let devices = self.ctx.devices();
        let receiver = AudioReceiver::start(
            self.audio_ports.primary,
            ReceiverMode::Playback,
            devices.as_ref(),
            Arc::clone(&self.logger),
        )?;
        match AudioSender::start(
            self.audio_ports.secondary,
            remote.audio_addr(),
            devices.as_ref(),
            Arc::clone(&self.logger),
        ) {
            Ok(sender) => Ok((receiver, sender)),
            Err(e) => {
                receiver.stop();
                Err(e.into())
            }
        }
    }

    /// Sends local video to the peer and, when a remote sink is registered,
    /// shows the peer's video. Like audio, the capture device is opened
    /// without holding the stream lock.
    ///
    /// # Errors
    /// [`MediaError::AlreadyActive`], no usable video source, socket errors,
    /// or [`MediaError::Cancelled`].
    pub fn start_video_stream(&self, remote_descriptor: &str) -> Result<()> {
        self.start_video(remote_descriptor, None)
    }

    pub(crate) fn start_video(&self, remote_descriptor: &str, ticket: Option<&StartTicket>) -> Result<()> {
        let epoch = {
            let mut streams = self.lock_streams();
            if streams.video_starting
                || streams.video_sender.is_some()
                || streams.video_receiver.is_some()
            {
                return Err(MediaError::AlreadyActive("video"));
            }
            streams.video_starting = true;
            streams.video_epoch
        };
        let remote = RemoteEndpoint::from_descriptor(remote_descriptor);
        let source = self.current_video_source();
        let opened = self.open_video(&remote, source);

        let mut streams = self.lock_streams();
        let current = streams.video_epoch == epoch;
        if current {
            streams.video_starting = false;
        }
        match opened {
            Ok(video) if current && ticket.is_none_or(StartTicket::claim) => {
                // settings changed while the devices were opening
                let latest = self.current_video_source();
                if latest != source {
                    video.sender.set_source(latest);
                }
                if let (Some(slot), Some(sink)) = (&video.sink, self.remote_sink()) {
                    slot.replace(sink);
                }
                streams.video_receiver = video.receiver;
                streams.video_sink = video.sink;
                streams.video_sender = Some(video.sender);
                sink_info!(self.logger, "[CallMedia] video with {}", remote.video_addr());
                Ok(())
            }
            Ok(video) => {
                drop(streams);
                video.stop();
                sink_debug!(self.logger, "[CallMedia] video start cancelled");
                Err(MediaError::Cancelled("video".into()))
            }
            Err(e) => Err(e),
        }
    }

    fn open_video(&self, remote: &RemoteEndpoint, source: VideoSource) -> Result<OpenedVideo> {
        let mut receiver = None;
        let mut sink = None;
        if let Some(target) = self.remote_sink() {
            let slot = SwappableSink::new(target);
            receiver = Some(VideoReceiver::start(
                self.video_ports.primary,
                Arc::clone(&slot) as Arc<dyn VideoSink>,
                Arc::clone(&self.logger),
            )?);
            sink = Some(slot);
        }
        match VideoSender::start(
            self.video_ports.secondary,
            remote.video_addr(),
            source,
            self.ctx.devices(),
            self.ctx.settings(),
            Arc::clone(&self.logger),
        ) {
            Ok(sender) => Ok(OpenedVideo {
                receiver,
                sink,
                sender,
            }),
            Err(e) => {
                if let Some(r) = receiver {
                    r.stop();
                }
                Err(e.into())
            }
        }
    }

    fn remote_sink(&self) -> Option<Arc<dyn VideoSink>> {
        self.remote_video_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current_video_source(&self) -> VideoSource {
        *self
            .video_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops every running stream and cancels starts in progress. Safe to
    /// call repeatedly.
    pub fn stop_streams(&self) {
        self.stop_audio_stream();
        self.stop_video_stream();
    }

    pub fn stop_audio_stream(&self) {
        let mut streams = self.lock_streams();
        streams.audio_epoch = streams.audio_epoch.wrapping_add(1);
        streams.audio_starting = false;
        let sender = streams.audio_sender.take();
        let receiver = streams.audio_receiver.take();
        drop(streams);
        if let Some(s) = sender {
            s.stop();
            sink_debug!(self.logger, "[CallMedia] audio stopped");
        }
        if let Some(r) = receiver {
            r.stop();
        }
    }

    pub fn stop_video_stream(&self) {
        let mut streams = self.lock_streams();
        streams.video_epoch = streams.video_epoch.wrapping_add(1);
        streams.video_starting = false;
        let sender = streams.video_sender.take();
        let receiver = streams.video_receiver.take();
        streams.video_sink = None;
        drop(streams);
        if let Some(s) = sender {
            s.stop();
            sink_debug!(self.logger, "[CallMedia] video stopped");
        }
        if let Some(r) = receiver {
            r.stop();
        }
    }

    /// Where the peer's video is shown. Takes effect immediately on a live stream.
    pub fn set_remote_video_sink(&self, sink: Arc<dyn VideoSink>) {
        *self
            .remote_video_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&sink));
        if let Some(slot) = &self.lock_streams().video_sink {
            slot.replace(sink);
        }
    }

    /// Switches the outgoing video between camera and screen.
    pub fn set_video_source(&self, source: VideoSource) {
        *self
            .video_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = source;
        if let Some(s) = &self.lock_streams().video_sender {
            s.set_source(source);
        }
    }

    #[must_use]
    pub fn is_audio_active(&self) -> bool {
        self.lock_streams().audio_sender.is_some()
    }

    #[must_use]
    pub fn is_video_active(&self) -> bool {
        self.lock_streams().video_sender.is_some()
    }

    #[must_use]
    pub fn audio_ports(&self) -> PortPair {
        self.audio_ports
    }

    #[must_use]
    pub fn video_ports(&self) -> PortPair {
        self.video_ports
    }

    #[must_use]
    pub fn local_ip(&self) -> Ipv4Addr {
        self.ctx.local_ip()
    }
}

impl Drop for CallMediaManager {
    fn drop(&mut self) {
        self.stop_streams();
        let ports = self.ctx.ports();
        ports.release_pair(self.audio_ports);
        ports.release_pair(self.video_ports);
    }
}
