use std::sync::Arc;

use crate::{
    audio::{
        audio_forwarder::AudioForwarder,
        audio_mixer::{AudioMixer, SlotId},
        audio_receiver::AudioReceiver,
    },
    log::log_sink::LogSink,
    net::port_allocator::{PortAllocator, PortPair},
    sdp::remote_endpoint::RemoteEndpoint,
    sink_debug, sink_info, sink_warn,
    video::{video_receiver::VideoReceiver, video_sender::VideoSender, video_sink::SwappableSink},
};

/// Media resources wired for one conference participant.
///
/// Every field is optional so a half-built participant can be torn down
/// with the same code as a complete one.
pub(crate) struct Participant {
    pub(crate) username: String,
    pub(crate) remote: RemoteEndpoint,
    pub(crate) audio_ports: Option<PortPair>,
    pub(crate) video_ports: Option<PortPair>,
    pub(crate) mixer_slot: Option<SlotId>,
    pub(crate) audio_receiver: Option<AudioReceiver>,
    pub(crate) audio_forwarder: Option<AudioForwarder>,
    pub(crate) video_receiver: Option<VideoReceiver>,
    /// Target of `video_receiver`, replaceable while it runs.
    pub(crate) video_sink: Option<Arc<SwappableSink>>,
    pub(crate) video_sender: Option<VideoSender>,
}

impl Participant {
    pub(crate) fn new(username: &str, remote: RemoteEndpoint) -> Self {
        Self {
            username: username.to_string(),
            remote,
            audio_ports: None,
            video_ports: None,
            mixer_slot: None,
            audio_receiver: None,
            audio_forwarder: None,
            video_receiver: None,
            video_sink: None,
            video_sender: None,
        }
    }

    pub(crate) fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            username: self.username.clone(),
            remote: self.remote,
            audio_ports: self.audio_ports,
            video_ports: self.video_ports,
            sending_video: self.video_sender.is_some(),
            receiving_video: self.video_receiver.is_some(),
        }
    }

    /// Stops and releases each resource on its own; a missing piece is logged
    /// and the rest still goes away.
    pub(crate) fn teardown(
        &mut self,
        mixer: &AudioMixer,
        ports: &PortAllocator,
        logger: &Arc<dyn LogSink>,
    ) {
        let who = self.username.as_str();

        if let Some(f) = self.audio_forwarder.take() {
            f.stop();
            sink_debug!(logger, "[Participant] {} forwarder stopped", who);
        }
        if let Some(r) = self.audio_receiver.take() {
            r.stop();
            sink_debug!(logger, "[Participant] {} audio receiver stopped", who);
        }
        if let Some(s) = self.video_sender.take() {
            s.stop();
            sink_debug!(logger, "[Participant] {} video sender stopped", who);
        }
        self.video_sink = None;
        if let Some(r) = self.video_receiver.take() {
            r.stop();
            sink_debug!(logger, "[Participant] {} video receiver stopped", who);
        }
        if let Some(slot) = self.mixer_slot.take() {
            if !mixer.remove_source(slot) {
                sink_warn!(logger, "[Participant] {} mixer slot {:?} already gone", who, slot);
            }
        }
        if let Some(pair) = self.audio_ports.take() {
            ports.release_pair(pair);
        }
        if let Some(pair) = self.video_ports.take() {
            ports.release_pair(pair);
        }
        sink_info!(logger, "[Participant] {} released", who);
    }
}

/// Read-only view of a participant's wiring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantSummary {
    pub username: String,
    pub remote: RemoteEndpoint,
    pub audio_ports: Option<PortPair>,
    pub video_ports: Option<PortPair>,
    pub sending_video: bool,
    pub receiving_video: bool,
}
