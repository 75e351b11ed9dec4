//! Offer/answer state machine.
//!
//! A [`CallMachine`] owns the single transport session of one participant
//! together with its candidate buffer and local media. Commands, signaling
//! messages and transport callbacks all arrive as [`CallEvent`]s and are
//! handled strictly one at a time, so no two negotiation steps overlap.
//!
//! Offers that arrive while a session is open are dropped. There is no glare
//! resolution and no renegotiation.

use crate::error::{CallError, Result};
use crate::media::{MediaKind, MediaSource, RenderSink, TrackSet};
use crate::peer::ice::{analyze_candidates, CandidateBuffer};
use crate::peer::state::{CallState, CallStatus};
use crate::peer::transport::{
    PeerTransport, SessionId, TransportEvent, TransportEventSink, TransportFactory,
};
use crate::peer::types::{
    CallRole, Connectivity, NegotiationState, NetworkCandidate, SessionDescription,
};
use crate::session::Session;
use crate::signaling::{ChannelEvent, SignalMessage, SignalingChannel};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// User-initiated actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCommand {
    AcquireMedia(Vec<MediaKind>),
    Start,
    Call,
    Hangup,
}

/// Everything the state machine reacts to.
pub enum CallEvent {
    Command(CallCommand),
    AttachChannel {
        channel: Arc<dyn SignalingChannel>,
        incoming: mpsc::UnboundedReceiver<ChannelEvent>,
    },
    Channel(ChannelEvent),
    Transport {
        session: SessionId,
        event: TransportEvent,
    },
    Shutdown,
}

pub type CallEvents = mpsc::UnboundedReceiver<CallEvent>;
pub type StatusReceiver = mpsc::UnboundedReceiver<CallStatus>;

/// Collaborators a machine is built from.
pub struct CallParts {
    pub transports: Arc<dyn TransportFactory>,
    pub media: Arc<dyn MediaSource>,
    pub sink: Arc<dyn RenderSink>,
}

/// Cloneable handle for posting events to a running machine.
#[derive(Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl CallHandle {
    fn post(&self, event: CallEvent) -> bool {
        if self.tx.send(event).is_err() {
            warn!("Call machine has stopped, event dropped");
            return false;
        }
        true
    }

    pub fn acquire_media(&self, kinds: Vec<MediaKind>) -> bool {
        self.post(CallEvent::Command(CallCommand::AcquireMedia(kinds)))
    }

    pub fn start(&self) -> bool {
        self.post(CallEvent::Command(CallCommand::Start))
    }

    pub fn call(&self) -> bool {
        self.post(CallEvent::Command(CallCommand::Call))
    }

    pub fn hangup(&self) -> bool {
        self.post(CallEvent::Command(CallCommand::Hangup))
    }

    pub fn attach_channel(
        &self,
        channel: Arc<dyn SignalingChannel>,
        incoming: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> bool {
        self.post(CallEvent::AttachChannel { channel, incoming })
    }

    pub fn shutdown(&self) -> bool {
        self.post(CallEvent::Shutdown)
    }
}

pub struct CallMachine {
    pub(super) state: CallState,
    pub(super) role: CallRole,
    pub(super) session: Option<Session>,
    pub(super) media: Option<TrackSet>,
    pub(super) candidates: CandidateBuffer,
    pub(super) channel: Option<Arc<dyn SignalingChannel>>,
    pub(super) sink: Arc<dyn RenderSink>,
    pub(super) reconnecting: bool,
    incoming: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    next_session: SessionId,
    transports: Arc<dyn TransportFactory>,
    media_source: Arc<dyn MediaSource>,
    status: mpsc::UnboundedSender<CallStatus>,
    events: mpsc::UnboundedSender<CallEvent>,
}

impl CallMachine {
    /// Builds an idle machine with no signaling channel attached.
    pub fn new(parts: CallParts) -> (Self, CallEvents, StatusReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let machine = Self {
            state: CallState::Idle,
            role: CallRole::None,
            session: None,
            media: None,
            candidates: CandidateBuffer::new(),
            channel: None,
            sink: parts.sink,
            reconnecting: false,
            incoming: None,
            next_session: 0,
            transports: parts.transports,
            media_source: parts.media,
            status: status_tx,
            events: events_tx,
        };
        (machine, events_rx, status_rx)
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            tx: self.events.clone(),
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn holds_media(&self) -> bool {
        self.media.as_ref().is_some_and(|m| !m.is_empty())
    }

    pub fn pending_candidates(&self) -> usize {
        self.candidates.pending_len()
    }

    pub fn local_candidates(&self) -> &[NetworkCandidate] {
        self.candidates.local_candidates()
    }

    pub fn channel_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Replaces the signaling channel and re-enables call initiation.
    pub fn attach_channel(
        &mut self,
        channel: Arc<dyn SignalingChannel>,
        incoming: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        info!("Signaling channel attached");
        self.channel = Some(channel);
        self.incoming = Some(incoming);
        self.emit(CallStatus::ChannelConnected);
    }

    /// Event loop. Returns after `Shutdown`, tearing down whatever is left.
    pub async fn run(mut self, mut events: CallEvents) {
        debug!("Call machine running");
        loop {
            let event = match self.incoming.as_mut() {
                Some(incoming) => tokio::select! {
                    event = events.recv() => event,
                    msg = incoming.recv() => {
                        Some(CallEvent::Channel(msg.unwrap_or(ChannelEvent::Closed)))
                    }
                },
                None => events.recv().await,
            };
            let Some(event) = event else { break };
            if !self.dispatch(event).await {
                break;
            }
        }
        self.teardown(false).await;
        debug!("Call machine stopped");
    }

    pub fn spawn(self, events: CallEvents) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    /// Handles every event that is already queued, from both the event queue
    /// and the signaling channel, without waiting for more. Returns how many
    /// were handled.
    pub async fn settle(&mut self, events: &mut CallEvents) -> usize {
        let mut handled = 0;
        loop {
            if let Ok(event) = events.try_recv() {
                self.dispatch(event).await;
                handled += 1;
                continue;
            }
            let next = match self.incoming.as_mut().map(|rx| rx.try_recv()) {
                Some(Ok(event)) => event,
                Some(Err(TryRecvError::Disconnected)) => ChannelEvent::Closed,
                Some(Err(TryRecvError::Empty)) | None => break,
            };
            self.dispatch(CallEvent::Channel(next)).await;
            handled += 1;
        }
        handled
    }

    /// Runs one transition. Returns false once the machine should stop.
    pub async fn dispatch(&mut self, event: CallEvent) -> bool {
        match event {
            CallEvent::Command(command) => self.run_command(command).await,
            CallEvent::AttachChannel { channel, incoming } => {
                self.attach_channel(channel, incoming)
            }
            CallEvent::Channel(ChannelEvent::Message(msg)) => self.on_signal(msg).await,
            CallEvent::Channel(ChannelEvent::PeerLeft(peer)) => {
                self.on_remote_hangup(&format!("peer {peer} left")).await
            }
            CallEvent::Channel(ChannelEvent::Closed) => self.on_channel_closed().await,
            CallEvent::Transport { session, event } => self.on_transport(session, event).await,
            CallEvent::Shutdown => return false,
        }
        true
    }

    async fn run_command(&mut self, command: CallCommand) {
        debug!("Command: {command:?}");
        let result = match command {
            CallCommand::AcquireMedia(kinds) => self.acquire_media(&kinds).await,
            CallCommand::Start => self.start(),
            CallCommand::Call => self.call().await,
            CallCommand::Hangup => {
                self.hangup().await;
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!("Command not carried out: {e}");
        }
    }

    pub async fn acquire_media(&mut self, kinds: &[MediaKind]) -> Result<()> {
        if self.holds_media() {
            debug!("Local media already held");
            return Ok(());
        }
        match self.media_source.acquire(kinds).await {
            Ok(set) if set.is_empty() => {
                warn!("Media source returned no tracks");
                self.emit(CallStatus::MicNotReady);
                Err(CallError::MediaNotReady)
            }
            Ok(set) => {
                info!("Local media acquired: {set:?}");
                self.media = Some(set);
                Ok(())
            }
            Err(e) => {
                error!("Media acquisition failed: {e}");
                let detail = match &e {
                    CallError::Acquisition(detail) => detail.clone(),
                    other => other.to_string(),
                };
                self.emit(CallStatus::AcquisitionFailed(detail));
                Err(e)
            }
        }
    }

    /// `Idle -> MediaReady`. Requires local tracks.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            CallState::MediaReady => return Ok(()),
            CallState::Idle => {}
            _ => return Err(CallError::NegotiationRejected("call in progress")),
        }
        if !self.holds_media() {
            warn!("start() without local media");
            self.emit(CallStatus::MicNotReady);
            return Err(CallError::MediaNotReady);
        }
        self.set_state(CallState::MediaReady);
        Ok(())
    }

    /// `MediaReady -> Offering`: opens a caller session and sends the offer.
    pub async fn call(&mut self) -> Result<()> {
        if self.channel.is_none() {
            warn!("call() while signaling is down");
            self.emit(CallStatus::ChannelDisconnected);
            return Err(CallError::ChannelDisconnected);
        }
        match self.state {
            CallState::MediaReady => {}
            CallState::Idle => {
                self.emit(CallStatus::StartMicFirst);
                return Err(CallError::MediaNotReady);
            }
            _ => return Err(CallError::NegotiationRejected("call already in progress")),
        }

        self.set_state(CallState::Offering);
        if let Err(e) = self.offer().await {
            self.fail(&e).await;
            return Err(e);
        }
        Ok(())
    }

    async fn offer(&mut self) -> Result<()> {
        // nothing from the peer can legitimately precede our own offer
        self.candidates.clear();
        self.open_session(CallRole::Caller).await?;

        let transport = active_transport(&self.session)?;
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        self.send(&SignalMessage::from(&offer)).await?;
        info!("Offer sent");
        Ok(())
    }

    /// Creates the transport session. Every path that opens a session goes
    /// through here, so at most one exists at a time.
    async fn open_session(&mut self, role: CallRole) -> Result<()> {
        if self.session.is_some() {
            return Err(CallError::NegotiationRejected("a session is already open"));
        }
        let tracks = self
            .media
            .as_ref()
            .map(|m| m.tracks().to_vec())
            .unwrap_or_default();
        if tracks.is_empty() {
            return Err(CallError::MediaNotReady);
        }

        self.next_session += 1;
        let id = self.next_session;
        let transport = self
            .transports
            .create(TransportEventSink::new(id, self.events.clone()))
            .await?;

        let session = Session::new(id, role, transport, tracks.clone());
        info!("Opened {:?} session {} (call {})", role, id, session.call_id);
        self.role = role;
        self.session = Some(session);

        let transport = active_transport(&self.session)?;
        for track in tracks {
            transport.add_track(track).await?;
        }
        Ok(())
    }

    async fn on_signal(&mut self, msg: SignalMessage) {
        debug!("Received {} from peer", msg.kind());
        match msg {
            SignalMessage::Offer { sdp } => self.on_offer(sdp).await,
            SignalMessage::Answer { sdp } => self.on_answer(sdp).await,
            SignalMessage::Candidate {
                label,
                id,
                candidate,
            } => {
                let candidate = NetworkCandidate {
                    candidate,
                    sdp_mid: id,
                    sdp_mline_index: label,
                };
                let transport = self.session.as_ref().map(Session::transport);
                self.candidates.enqueue_or_apply(transport, candidate).await;
            }
            SignalMessage::Bye => self.on_remote_hangup("bye").await,
        }
    }

    /// `MediaReady -> Answering -> Connecting`.
    async fn on_offer(&mut self, sdp: String) {
        if self.session.is_some() {
            reject("offer while a session is open");
            return;
        }
        match self.state {
            CallState::MediaReady => {}
            CallState::Idle if !self.holds_media() => {
                info!("Offer received before local media, ignoring");
                // candidates queued for this offer would leak into the next one
                self.candidates.clear();
                self.emit(CallStatus::StartMicFirst);
                return;
            }
            _ => {
                reject("offer before start()");
                self.candidates.clear();
                return;
            }
        }

        self.set_state(CallState::Answering);
        if let Err(e) = self.answer(sdp).await {
            self.fail(&e).await;
            return;
        }
        self.set_state(CallState::Connecting);
    }

    async fn answer(&mut self, sdp: String) -> Result<()> {
        self.open_session(CallRole::Callee).await?;

        let transport = active_transport(&self.session)?;
        transport
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.candidates.drain(transport).await;

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        self.send(&SignalMessage::from(&answer)).await?;
        info!("Answer sent");
        Ok(())
    }

    /// `Offering -> Connecting`. Anything but the first answer to our own
    /// outstanding offer is dropped.
    async fn on_answer(&mut self, sdp: String) {
        let Some(session) = self.session.as_ref() else {
            reject("answer without a session");
            return;
        };
        let transport = session.transport();
        if self.role != CallRole::Caller
            || self.state != CallState::Offering
            || transport.negotiation_state() != NegotiationState::HaveLocalOffer
            || transport.has_remote_description().await
        {
            reject("stale or duplicate answer");
            return;
        }

        let applied = transport
            .set_remote_description(SessionDescription::answer(sdp))
            .await;
        if let Err(e) = applied {
            self.fail(&e).await;
            return;
        }
        self.candidates.drain(transport).await;
        self.set_state(CallState::Connecting);
    }

    /// `bye` or the peer leaving the room. Never answered with a `bye`.
    async fn on_remote_hangup(&mut self, reason: &str) {
        if self.session.is_none() {
            debug!("{reason} with no open session, dropping queued candidates");
            self.candidates.clear();
            return;
        }
        info!("Peer ended the call: {reason}");
        self.emit(CallStatus::RemoteHangup);
        self.teardown(false).await;
    }

    async fn on_channel_closed(&mut self) {
        warn!("Signaling channel lost");
        self.channel = None;
        self.incoming = None;
        self.teardown(false).await;
        self.emit(CallStatus::ChannelDisconnected);
    }

    async fn on_transport(&mut self, session: SessionId, event: TransportEvent) {
        if self.session_id() != Some(session) {
            debug!("Dropping {event:?} from released session {session}");
            return;
        }
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let msg = SignalMessage::from(&candidate);
                self.candidates.record_local(candidate);
                if let Err(e) = self.send(&msg).await {
                    warn!("Failed to send local candidate: {e}");
                }
            }
            TransportEvent::GatheringComplete => {
                info!("ICE candidate gathering completed");
                analyze_candidates(self.candidates.local_candidates());
            }
            TransportEvent::Connectivity(state) => self.on_connectivity(state).await,
            TransportEvent::RemoteTrack(track) => {
                if let Some(session) = self.session.as_mut() {
                    info!("Remote {} track {} arrived", track.kind, track.id);
                    let stream = session.add_remote_track(track);
                    self.sink.attach(stream);
                }
            }
        }
    }

    async fn on_connectivity(&mut self, connectivity: Connectivity) {
        match connectivity {
            Connectivity::Connected | Connectivity::Completed => match self.state {
                CallState::Connecting => {
                    if let Some(session) = self.session.as_mut() {
                        session.mark_connected();
                    }
                    self.set_state(CallState::Connected);
                    if std::mem::take(&mut self.reconnecting) {
                        self.emit(CallStatus::Reconnected);
                    }
                }
                CallState::Connected if self.reconnecting => {
                    info!("Connectivity recovered");
                    self.reconnecting = false;
                    self.emit(CallStatus::Reconnected);
                }
                state => debug!("{connectivity:?} in {state:?}, nothing to do"),
            },
            Connectivity::Disconnected => {
                if matches!(self.state, CallState::Connecting | CallState::Connected) {
                    warn!("Connectivity lost, waiting for ICE to recover");
                    self.reconnecting = true;
                    self.emit(CallStatus::Reconnecting);
                }
            }
            Connectivity::Failed => {
                error!("ICE connectivity failed");
                self.emit(CallStatus::TransportFailed);
                self.set_state(CallState::Failed);
                self.teardown(false).await;
            }
            Connectivity::New | Connectivity::Checking | Connectivity::Closed => {
                debug!("Connectivity {connectivity:?}");
            }
        }
    }

    /// Failure path of any negotiation step.
    async fn fail(&mut self, err: &CallError) {
        error!("Call step failed: {err}");
        self.set_state(CallState::Failed);
        self.emit(CallStatus::CallFailed(err.to_string()));
        self.teardown(false).await;
    }

    pub(super) async fn send(&self, msg: &SignalMessage) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(CallError::ChannelDisconnected)?;
        channel.send(msg).await
    }

    pub(super) fn set_state(&mut self, next: CallState) {
        if self.state == next {
            return;
        }
        debug!("Call state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.emit(CallStatus::State(next));
    }

    pub(super) fn emit(&self, status: CallStatus) {
        info!("Status: {status}");
        if self.status.send(status).is_err() {
            trace!("No status listener");
        }
    }
}

fn active_transport(session: &Option<Session>) -> Result<&dyn PeerTransport> {
    session
        .as_ref()
        .map(Session::transport)
        .ok_or_else(|| CallError::Transport("session already released".into()))
}

fn reject(reason: &'static str) {
    debug!("{}", CallError::NegotiationRejected(reason));
}
