//! N-way conference media.
//!
//! Every remote participant gets its own receive port pair, a mixer slot fed
//! by an [`AudioReceiver`], an [`AudioForwarder`] fed by the shared
//! microphone and, when both sides want video, a [`VideoSender`] plus an
//! optional [`VideoReceiver`]. Participants are independent: adding one can
//! fail and roll back without touching the others.

use std::{
    collections::{HashMap, HashSet},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    audio::{
        audio_forwarder::AudioForwarder,
        audio_mixer::{AudioMixer, MixerInput},
        audio_receiver::{AudioReceiver, ReceiverMode},
    },
    log::log_sink::LogSink,
    net::port_allocator::PortPair,
    sdp::{remote_endpoint::RemoteEndpoint, session_descriptor::SessionDescriptor},
    sink_debug, sink_info, sink_warn,
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
    participant::{Participant, ParticipantSummary},
    stream_starter::StartTicket,
};

/// Distance between the audio and the video port blocks.
pub const VIDEO_PORT_OFFSET: u16 = 1000;
/// Ports kept free above the random base for the participant blocks.
const PARTICIPANT_PORT_SPAN: u16 = 16;

const SESSION_NAME: &str = "Conference Call";

struct LocalPreview {
    sender: VideoSender,
    receiver: VideoReceiver,
    sink: Arc<SwappableSink>,
}

impl LocalPreview {
    fn stop(&self) {
        self.sender.stop();
        self.receiver.stop();
    }
}

/// Ports leased by `create_sdp_offer` for a participant not yet added.
#[derive(Debug, Clone, Copy)]
struct OfferedPorts {
    audio: PortPair,
    video: Option<PortPair>,
}

struct ActiveConference {
    /// Distinguishes this activation from earlier and later ones.
    session: u64,
    mixer: Arc<AudioMixer>,
    self_audio: PortPair,
    self_video: PortPair,
    /// In join order; a participant's position picks its default ports.
    participants: Vec<Participant>,
    /// Usernames whose streams are being opened outside the state lock.
    pending: HashSet<String>,
    offered: HashMap<usize, OfferedPorts>,
    preview: Option<LocalPreview>,
    video_source: VideoSource,
}

enum ConferenceState {
    Idle,
    /// Devices are being opened for the session with this id.
    Starting(u64),
    Active(Box<ActiveConference>),
}

/// What an add reserved under the lock, carried to the commit step.
struct JoinPlan {
    session: u64,
    mixer: Arc<AudioMixer>,
    audio: PortPair,
    video: Option<PortPair>,
    source: VideoSource,
}

/// Conference orchestrator: `idle -> active` on [`start_conference`],
/// back to idle on [`stop_conference`].
///
/// Devices and sockets are opened without holding the state lock, so a slow
/// or hung device delays only the call that opens it.
///
/// [`start_conference`]: ConferenceMediaManager::start_conference
/// [`stop_conference`]: ConferenceMediaManager::stop_conference
pub struct ConferenceMediaManager {
    ctx: Arc<MediaContext>,
    logger: Arc<dyn LogSink>,
    state: Mutex<ConferenceState>,
    sessions: AtomicU64,
    video_sinks: Mutex<HashMap<String, Arc<dyn VideoSink>>>,
    preview_sink: Mutex<Option<Arc<dyn VideoSink>>>,
}

impl ConferenceMediaManager {
    #[must_use]
    pub fn new(ctx: Arc<MediaContext>) -> Self {
        let logger = ctx.logger();
        Self {
            ctx,
            logger,
            state: Mutex::new(ConferenceState::Idle),
            sessions: AtomicU64::new(0),
            video_sinks: Mutex::new(HashMap::new()),
            preview_sink: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConferenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the playback device, starts the mixer and leases the local port
    /// blocks. Calling it on an active conference does nothing.
    ///
    /// # Errors
    /// Device-unavailable for the playback device, port exhaustion,
    /// [`MediaError::Busy`] while another start is running, or
    /// [`MediaError::Cancelled`] when stopped before it finished.
    pub fn start_conference(&self) -> Result<()> {
        let session = {
            let mut st = self.lock_state();
            match *st {
                ConferenceState::Active(_) => {
                    sink_debug!(self.logger, "[Conference] already active");
                    return Ok(());
                }
                ConferenceState::Starting(_) => return Err(MediaError::Busy("conference".into())),
                ConferenceState::Idle => {}
            }
            let session = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
            *st = ConferenceState::Starting(session);
            session
        };

        let opened = self.open_conference(session);
        let mut st = self.lock_state();
        let still_starting = matches!(*st, ConferenceState::Starting(s) if s == session);
        let conf = match opened {
            Ok(conf) if still_starting => conf,
            Ok(conf) => {
                drop(st);
                self.close_conference(conf);
                sink_info!(self.logger, "[Conference] stopped while starting");
                return Err(MediaError::Cancelled("conference".into()));
            }
            Err(e) => {
                if still_starting {
                    *st = ConferenceState::Idle;
                }
                return Err(e);
            }
        };
        sink_info!(
            self.logger,
            "[Conference] started on {} (audio base {}, video base {})",
            self.ctx.local_ip(),
            conf.self_audio.primary,
            conf.self_video.primary
        );
        *st = ConferenceState::Active(Box::new(conf));
        drop(st);

        let preview_sink = self
            .preview_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sink) = preview_sink {
            if let Err(e) = self.ensure_preview(sink) {
                sink_warn!(self.logger, "[Conference] local preview failed: {}", e);
            }
        }
        Ok(())
    }

    fn open_conference(&self, session: u64) -> Result<ActiveConference> {
        let settings = self.ctx.settings();
        let output = self.ctx.devices().open_audio_output()?;
        let mixer = Arc::new(AudioMixer::new(settings.queue_capacity, Arc::clone(&self.logger)));
        mixer.start(output)?;

        let ports = self.ctx.ports();
        let base = ports.random_base_with_headroom(VIDEO_PORT_OFFSET + PARTICIPANT_PORT_SPAN);
        let leased = ports.allocate_pair(base).and_then(|audio| {
            match ports.allocate_pair(audio.primary.saturating_add(VIDEO_PORT_OFFSET)) {
                Ok(video) => Ok((audio, video)),
                Err(e) => {
                    ports.release_pair(audio);
                    Err(e)
                }
            }
        });
        let (self_audio, self_video) = match leased {
            Ok(pairs) => pairs,
            Err(e) => {
                mixer.stop();
                return Err(e.into());
            }
        };

        Ok(ActiveConference {
            session,
            mixer,
            self_audio,
            self_video,
            participants: Vec::new(),
            pending: HashSet::new(),
            offered: HashMap::new(),
            preview: None,
            video_source: VideoSource::Camera,
        })
    }

    /// Removes every participant, stops the mixer and the preview and
    /// releases the local ports. Cancels a start in progress. Idempotent.
    pub fn stop_conference(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), ConferenceState::Idle);
        let ConferenceState::Active(conf) = previous else {
            return;
        };
        self.close_conference(*conf);
        self.video_sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        sink_info!(self.logger, "[Conference] stopped");
    }

    fn close_conference(&self, mut conf: ActiveConference) {
        let ports = self.ctx.ports();
        for mut p in conf.participants.drain(..) {
            p.teardown(&conf.mixer, ports, &self.logger);
        }
        for (_, offer) in conf.offered.drain() {
            ports.release_pair(offer.audio);
            if let Some(v) = offer.video {
                ports.release_pair(v);
            }
        }
        conf.mixer.stop();
        if let Some(p) = conf.preview.take() {
            p.stop();
        }
        ports.release_pair(conf.self_audio);
        ports.release_pair(conf.self_video);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(*self.lock_state(), ConferenceState::Active(_))
    }

    /// Local descriptor for the participant that will join at `participant_index`.
    ///
    /// The advertised ports are leased right away and used by the matching
    /// [`add_participant`](Self::add_participant), so the offer stays valid.
    ///
    /// # Errors
    /// [`MediaError::NotActive`] before `start_conference`, or port exhaustion.
    pub fn create_sdp_offer(&self, include_video: bool, participant_index: usize) -> Result<String> {
        let mut st = self.lock_state();
        let ConferenceState::Active(conf) = &mut *st else {
            return Err(MediaError::NotActive);
        };
        let offer = self.offered_ports(conf, participant_index, include_video)?;
        let desc = SessionDescriptor::offer(
            SESSION_NAME,
            self.ctx.local_ip(),
            offer.audio.primary,
            offer.video.filter(|_| include_video).map(|v| v.primary),
        );
        Ok(desc.to_string())
    }

    fn offered_ports(
        &self,
        conf: &mut ActiveConference,
        index: usize,
        with_video: bool,
    ) -> Result<OfferedPorts> {
        let ports = self.ctx.ports();
        let mut offer = match conf.offered.get(&index) {
            Some(o) => *o,
            None => OfferedPorts {
                audio: ports.allocate_pair(participant_hint(conf.self_audio, index))?,
                video: None,
            },
        };
        if with_video && offer.video.is_none() {
            match ports.allocate_pair(participant_hint(conf.self_video, index)) {
                Ok(v) => offer.video = Some(v),
                Err(e) => {
                    if !conf.offered.contains_key(&index) {
                        ports.release_pair(offer.audio);
                    }
                    return Err(e.into());
                }
            }
        }
        conf.offered.insert(index, offer);
        Ok(offer)
    }

    /// Wires audio (and video, when requested and offered by the peer) for
    /// `username`. Re-adding an existing user does nothing.
    ///
    /// Other control calls keep working while this one opens devices; a
    /// removal or stop in the meantime cancels it.
    ///
    /// # Errors
    /// [`MediaError::NotActive`], [`MediaError::Busy`] while another add for
    /// the same user runs, port exhaustion, device/socket errors, or
    /// [`MediaError::Cancelled`]. Whatever was created for this participant
    /// is released first.
    pub fn add_participant(&self, username: &str, descriptor: &str, include_video: bool) -> Result<()> {
        self.join(username, descriptor, include_video, None)
    }

    /// [`add_participant`](Self::add_participant) that only keeps its work
    /// if `ticket` can still be claimed when the streams are up.
    pub(crate) fn join(
        &self,
        username: &str,
        descriptor: &str,
        include_video: bool,
        ticket: Option<&StartTicket>,
    ) -> Result<()> {
        let remote = RemoteEndpoint::from_descriptor(descriptor);
        let with_video = include_video && remote.offers_video;
        let mut participant = Participant::new(username, remote);

        let Some((plan, input)) = self.reserve(&mut participant, with_video)? else {
            return Ok(());
        };
        let opened = self.open_streams(&mut participant, input, &plan);
        self.commit(participant, &plan, opened, ticket)
    }

    /// Leases ports and a mixer slot and marks the user pending.
    /// `None` when the user is already in the conference.
    fn reserve(&self, p: &mut Participant, with_video: bool) -> Result<Option<(JoinPlan, MixerInput)>> {
        let mut st = self.lock_state();
        let ConferenceState::Active(conf) = &mut *st else {
            return Err(MediaError::NotActive);
        };
        if conf.participants.iter().any(|q| q.username == p.username) {
            sink_debug!(self.logger, "[Conference] {} already present, skipping", p.username);
            return Ok(None);
        }
        if conf.pending.contains(&p.username) {
            return Err(MediaError::Busy(p.username.clone()));
        }

        let (audio, video) = match self.lease_ports(conf, p, with_video) {
            Ok(pairs) => pairs,
            Err(e) => {
                p.teardown(&conf.mixer, self.ctx.ports(), &self.logger);
                return Err(e);
            }
        };
        let input = conf.mixer.add_source();
        p.mixer_slot = Some(input.slot());
        conf.pending.insert(p.username.clone());

        let plan = JoinPlan {
            session: conf.session,
            mixer: Arc::clone(&conf.mixer),
            audio,
            video,
            source: conf.video_source,
        };
        Ok(Some((plan, input)))
    }

    fn lease_ports(
        &self,
        conf: &mut ActiveConference,
        p: &mut Participant,
        with_video: bool,
    ) -> Result<(PortPair, Option<PortPair>)> {
        let index = conf.participants.len() + conf.pending.len();
        let ports = self.ctx.ports();

        // ports handed out in an earlier offer for this position win
        let offer = conf.offered.remove(&index);
        p.audio_ports = offer.map(|o| o.audio);
        p.video_ports = offer.and_then(|o| o.video);
        if !with_video {
            if let Some(v) = p.video_ports.take() {
                ports.release_pair(v);
            }
        }

        let audio = match p.audio_ports {
            Some(a) => a,
            None => {
                let a = ports.allocate_pair(participant_hint(conf.self_audio, index))?;
                p.audio_ports = Some(a);
                a
            }
        };
        if with_video && p.video_ports.is_none() {
            p.video_ports = Some(ports.allocate_pair(participant_hint(conf.self_video, index))?);
        }
        Ok((audio, p.video_ports))
    }

    /// Opens sockets and devices for a reserved participant. Runs unlocked.
    fn open_streams(&self, p: &mut Participant, input: MixerInput, plan: &JoinPlan) -> Result<()> {
        let devices = self.ctx.devices();
        p.audio_receiver = Some(AudioReceiver::start(
            plan.audio.primary,
            ReceiverMode::Sink(Arc::new(input)),
            devices.as_ref(),
            Arc::clone(&self.logger),
        )?);
        p.audio_forwarder = Some(AudioForwarder::start(
            plan.audio.secondary,
            p.remote.audio_addr(),
            self.ctx.settings().queue_capacity,
            self.ctx.capture(),
            Arc::clone(&self.logger),
        )?);

        let Some(video) = plan.video else {
            return Ok(());
        };
        if let Some(sink) = self.registered_sink(&p.username) {
            self.attach_receiver(p, sink)?;
        }
        p.video_sender = Some(VideoSender::start(
            video.secondary,
            p.remote.video_addr(),
            plan.source,
            devices,
            self.ctx.settings(),
            Arc::clone(&self.logger),
        )?);
        Ok(())
    }

    /// Adds the participant if its session is still live and nobody
    /// cancelled it; otherwise tears it down.
    fn commit(
        &self,
        mut p: Participant,
        plan: &JoinPlan,
        opened: Result<()>,
        ticket: Option<&StartTicket>,
    ) -> Result<()> {
        let mut st = self.lock_state();
        let err = match &mut *st {
            ConferenceState::Active(conf) if conf.session == plan.session => {
                let wanted = conf.pending.remove(&p.username);
                match opened {
                    Err(e) => e,
                    Ok(()) if !wanted || !ticket.is_none_or(StartTicket::claim) => {
                        MediaError::Cancelled(p.username.clone())
                    }
                    Ok(()) => {
                        self.catch_up(conf, &mut p, plan.source);
                        sink_info!(
                            self.logger,
                            "[Conference] {} joined: audio {} -> {}{}",
                            p.username,
                            plan.audio.primary,
                            p.remote.audio_addr(),
                            if plan.video.is_some() { " (+video)" } else { "" }
                        );
                        conf.participants.push(p);
                        return Ok(());
                    }
                }
            }
            _ => opened.err().unwrap_or(MediaError::NotActive),
        };
        drop(st);
        p.teardown(&plan.mixer, self.ctx.ports(), &self.logger);
        sink_warn!(self.logger, "[Conference] adding {} failed: {}", p.username, err);
        Err(err)
    }

    /// Applies sink and source changes made while `p` was being opened.
    fn catch_up(&self, conf: &ActiveConference, p: &mut Participant, opened_with: VideoSource) {
        let Some(sender) = &p.video_sender else {
            return;
        };
        if conf.video_source != opened_with {
            sender.set_source(conf.video_source);
        }
        let Some(sink) = self.registered_sink(&p.username) else {
            return;
        };
        if let Some(slot) = &p.video_sink {
            slot.replace(sink);
        } else if let Err(e) = self.attach_receiver(p, sink) {
            sink_warn!(self.logger, "[Conference] {} video receiver failed: {}", p.username, e);
        }
    }

    fn registered_sink(&self, username: &str) -> Option<Arc<dyn VideoSink>> {
        self.video_sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
            .cloned()
    }

    fn attach_receiver(&self, p: &mut Participant, sink: Arc<dyn VideoSink>) -> Result<()> {
        let Some(video) = p.video_ports else {
            return Ok(());
        };
        let slot = SwappableSink::new(sink);
        p.video_receiver = Some(VideoReceiver::start(
            video.primary,
            Arc::clone(&slot) as Arc<dyn VideoSink>,
            Arc::clone(&self.logger),
        )?);
        p.video_sink = Some(slot);
        Ok(())
    }

    /// Tears down everything owned by `username`, or cancels its add if it is
    /// still opening devices. Unknown users are ignored.
    /// Returns whether a participant was removed or cancelled.
    pub fn remove_participant(&self, username: &str) -> bool {
        let mut st = self.lock_state();
        let ConferenceState::Active(conf) = &mut *st else {
            return false;
        };
        if conf.pending.remove(username) {
            sink_info!(self.logger, "[Conference] {} cancelled while joining", username);
            return true;
        }
        let Some(pos) = conf.participants.iter().position(|p| p.username == username) else {
            sink_debug!(self.logger, "[Conference] remove: {} not present", username);
            return false;
        };
        let mut p = conf.participants.remove(pos);
        let mixer = Arc::clone(&conf.mixer);
        drop(st);
        p.teardown(&mixer, self.ctx.ports(), &self.logger);
        true
    }

    /// Registers where `username`'s video goes. Applies immediately when the
    /// participant is already receiving or sending video.
    ///
    /// # Errors
    /// Socket errors when a receiver has to be started for a live participant.
    pub fn set_video_sink(&self, username: &str, sink: Arc<dyn VideoSink>) -> Result<()> {
        let mut st = self.lock_state();
        self.video_sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(username.to_string(), Arc::clone(&sink));

        let ConferenceState::Active(conf) = &mut *st else {
            return Ok(());
        };
        let Some(p) = conf.participants.iter_mut().find(|p| p.username == username) else {
            return Ok(());
        };
        if let Some(slot) = &p.video_sink {
            slot.replace(sink);
        } else if p.video_sender.is_some() {
            self.attach_receiver(p, sink)?;
        }
        Ok(())
    }

    /// Shows the local camera through a loopback sender/receiver pair on the
    /// local video ports.
    ///
    /// # Errors
    /// Device or socket errors when the preview has to be started now.
    pub fn set_local_preview_sink(&self, sink: Arc<dyn VideoSink>) -> Result<()> {
        *self
            .preview_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&sink));
        self.ensure_preview(sink)
    }

    /// Points a running preview at `sink`, or opens one without holding the
    /// state lock.
    fn ensure_preview(&self, sink: Arc<dyn VideoSink>) -> Result<()> {
        let (session, pair, source) = {
            let st = self.lock_state();
            let ConferenceState::Active(conf) = &*st else {
                return Ok(());
            };
            if let Some(p) = &conf.preview {
                p.sink.replace(sink);
                return Ok(());
            }
            (conf.session, conf.self_video, conf.video_source)
        };

        let preview = self.start_preview(pair, source, Arc::clone(&sink))?;
        let leftover = match &mut *self.lock_state() {
            ConferenceState::Active(conf) if conf.session == session && conf.preview.is_none() => {
                if conf.video_source != source {
                    preview.sender.set_source(conf.video_source);
                }
                conf.preview = Some(preview);
                None
            }
            ConferenceState::Active(conf) if conf.session == session => {
                if let Some(p) = &conf.preview {
                    p.sink.replace(sink);
                }
                Some(preview)
            }
            _ => Some(preview),
        };
        if let Some(p) = leftover {
            p.stop();
        }
        Ok(())
    }

    fn start_preview(
        &self,
        pair: PortPair,
        source: VideoSource,
        sink: Arc<dyn VideoSink>,
    ) -> Result<LocalPreview> {
        let slot = SwappableSink::new(sink);
        let receiver = VideoReceiver::start(
            pair.secondary,
            Arc::clone(&slot) as Arc<dyn VideoSink>,
            Arc::clone(&self.logger),
        )?;
        let loopback = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, pair.secondary));
        let sender = match VideoSender::start(
            pair.primary,
            loopback,
            source,
            self.ctx.devices(),
            self.ctx.settings(),
            Arc::clone(&self.logger),
        ) {
            Ok(s) => s,
            Err(e) => {
                receiver.stop();
                return Err(e.into());
            }
        };
        sink_info!(self.logger, "[Conference] local preview on {}", pair.secondary);
        Ok(LocalPreview {
            sender,
            receiver,
            sink: slot,
        })
    }

    /// Switches the capture source of every outgoing video stream.
    pub fn set_video_source(&self, source: VideoSource) {
        let mut st = self.lock_state();
        let ConferenceState::Active(conf) = &mut *st else {
            return;
        };
        conf.video_source = source;
        for s in conf.participants.iter().filter_map(|p| p.video_sender.as_ref()) {
            s.set_source(source);
        }
        if let Some(p) = &conf.preview {
            p.sender.set_source(source);
        }
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        match &*self.lock_state() {
            ConferenceState::Active(conf) => conf.participants.len(),
            _ => 0,
        }
    }

    /// Usernames in join order.
    #[must_use]
    pub fn participant_usernames(&self) -> Vec<String> {
        match &*self.lock_state() {
            ConferenceState::Active(conf) => {
                conf.participants.iter().map(|p| p.username.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn participant(&self, username: &str) -> Option<ParticipantSummary> {
        match &*self.lock_state() {
            ConferenceState::Active(conf) => conf
                .participants
                .iter()
                .find(|p| p.username == username)
                .map(Participant::summary),
            _ => None,
        }
    }

    /// Local audio and video port pairs while active.
    #[must_use]
    pub fn self_ports(&self) -> Option<(PortPair, PortPair)> {
        match &*self.lock_state() {
            ConferenceState::Active(conf) => Some((conf.self_audio, conf.self_video)),
            _ => None,
        }
    }

    #[must_use]
    pub fn local_ip(&self) -> Ipv4Addr {
        self.ctx.local_ip()
    }
}

impl Drop for ConferenceMediaManager {
    fn drop(&mut self) {
        self.stop_conference();
    }
}

fn participant_hint(base: PortPair, index: usize) -> u16 {
    let step = u16::try_from(index + 1).unwrap_or(u16::MAX / 2).saturating_mul(2);
    base.primary.saturating_add(step)
}
