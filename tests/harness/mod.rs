//! Shared test doubles: a scripted transport that records what the state
//! machine does to it, a recording render sink, and a participant wrapper
//! wired to an in-memory relay.

#![allow(dead_code)]

use async_trait::async_trait;
use p2pcall::error::{CallError, Result};
use p2pcall::media::{
    LocalTrack, MediaKind, MediaSource, RemoteStream, RenderSink, SampleMediaSource, TrackSet,
};
use p2pcall::peer::{
    CallEvents, CallMachine, CallParts, CallStatus, NegotiationState, NetworkCandidate,
    PeerTransport, SdpKind, SessionDescription, StatusReceiver, TransportEvent,
    TransportEventSink, TransportFactory,
};
use p2pcall::signaling::memory::{MemoryChannel, MemoryRelay};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ROOM: &str = "chat_room";

/// Everything one scripted transport saw.
#[derive(Default)]
pub struct TransportLog {
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    pub remote_sets: AtomicUsize,
    pub applied: Mutex<Vec<NetworkCandidate>>,
    pub tracks: Mutex<Vec<Arc<dyn LocalTrack>>>,
    pub detached: AtomicBool,
    pub closed: AtomicBool,
}

impl TransportLog {
    pub fn applied_candidates(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    pub fn remote_sdp(&self) -> Option<String> {
        self.remote.lock().unwrap().as_ref().map(|d| d.sdp.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct ScriptedTransport {
    log: Arc<TransportLog>,
    events: TransportEventSink,
    fail_offer: bool,
}

impl ScriptedTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.log.is_closed() {
            return Err(CallError::Transport("transport closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<()> {
        self.ensure_open()?;
        self.log.tracks.lock().unwrap().push(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        if self.fail_offer {
            return Err(CallError::Transport("scripted offer failure".into()));
        }
        Ok(SessionDescription::offer(format!(
            "v=0 offer s{}",
            self.events.session()
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        match self.log.remote.lock().unwrap().as_ref() {
            Some(desc) if desc.kind == SdpKind::Offer => Ok(SessionDescription::answer(format!(
                "v=0 answer s{}",
                self.events.session()
            ))),
            _ => Err(CallError::Transport("no remote offer to answer".into())),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        *self.log.local.lock().unwrap() = Some(desc);
        // gathering starts once a local description is in place
        self.events
            .emit(TransportEvent::LocalCandidate(NetworkCandidate {
                candidate: format!(
                    "candidate:{} 1 udp 2122260223 192.0.2.1 50000 typ host",
                    self.events.session()
                ),
                sdp_mid: Some("0".into()),
                sdp_mline_index: 0,
            }));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        let mut remote = self.log.remote.lock().unwrap();
        if remote.is_some() {
            return Err(CallError::Transport("remote description already set".into()));
        }
        *remote = Some(desc);
        self.log.remote_sets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.log.remote.lock().unwrap().is_some()
    }

    fn negotiation_state(&self) -> NegotiationState {
        if self.log.is_closed() {
            return NegotiationState::Closed;
        }
        let local = self.log.local.lock().unwrap().as_ref().map(|d| d.kind);
        let remote = self.log.remote.lock().unwrap().as_ref().map(|d| d.kind);
        match (local, remote) {
            (Some(SdpKind::Offer), None) => NegotiationState::HaveLocalOffer,
            (None, Some(SdpKind::Offer)) => NegotiationState::HaveRemoteOffer,
            _ => NegotiationState::Stable,
        }
    }

    async fn add_candidate(&self, candidate: NetworkCandidate) -> Result<()> {
        if self.log.is_closed() {
            return Err(CallError::CandidateApply("transport closed".into()));
        }
        if self.log.remote.lock().unwrap().is_none() {
            return Err(CallError::CandidateApply("no remote description".into()));
        }
        if candidate.candidate.is_empty() {
            return Err(CallError::CandidateApply("malformed candidate".into()));
        }
        self.log.applied.lock().unwrap().push(candidate);
        Ok(())
    }

    fn detach_handlers(&self) {
        self.log.detached.store(true, Ordering::SeqCst);
    }

    async fn close(&self) -> Result<()> {
        self.log.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    sessions: Mutex<Vec<(Arc<TransportLog>, TransportEventSink)>>,
    pub fail_offer: AtomicBool,
}

impl ScriptedFactory {
    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn log(&self, index: usize) -> Arc<TransportLog> {
        self.sessions.lock().unwrap()[index].0.clone()
    }

    pub fn sink(&self, index: usize) -> TransportEventSink {
        self.sessions.lock().unwrap()[index].1.clone()
    }

    pub fn last_log(&self) -> Arc<TransportLog> {
        self.log(self.count() - 1)
    }

    pub fn last_sink(&self) -> TransportEventSink {
        self.sink(self.count() - 1)
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn create(&self, events: TransportEventSink) -> Result<Box<dyn PeerTransport>> {
        let log = Arc::new(TransportLog::default());
        self.sessions
            .lock()
            .unwrap()
            .push((log.clone(), events.clone()));
        Ok(Box::new(ScriptedTransport {
            log,
            events,
            fail_offer: self.fail_offer.load(Ordering::SeqCst),
        }))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub attached: Mutex<Vec<String>>,
    pub detached: AtomicUsize,
}

impl RenderSink for RecordingSink {
    fn attach(&self, stream: &RemoteStream) {
        self.attached.lock().unwrap().push(stream.id.clone());
    }

    fn detach(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

/// Media source whose device is always denied.
pub struct DeniedMedia;

#[async_trait]
impl MediaSource for DeniedMedia {
    async fn acquire(&self, _kinds: &[MediaKind]) -> Result<TrackSet> {
        Err(CallError::Acquisition("permission denied".into()))
    }
}

/// One participant driven by hand through `settle`.
pub struct Peer {
    pub machine: CallMachine,
    pub events: CallEvents,
    pub status: StatusReceiver,
    pub factory: Arc<ScriptedFactory>,
    pub sink: Arc<RecordingSink>,
    pub channel: Option<Arc<MemoryChannel>>,
    pub statuses: Vec<CallStatus>,
}

impl Peer {
    pub fn with_media(media: Arc<dyn MediaSource>) -> Self {
        let factory = Arc::new(ScriptedFactory::default());
        let sink = Arc::new(RecordingSink::default());
        let (machine, events, status) = CallMachine::new(CallParts {
            transports: factory.clone(),
            media,
            sink: sink.clone(),
        });
        Self {
            machine,
            events,
            status,
            factory,
            sink,
            channel: None,
            statuses: Vec::new(),
        }
    }

    /// Participant with sample media, joined to `relay`.
    pub fn join(relay: &MemoryRelay) -> Self {
        let mut peer = Self::with_media(Arc::new(SampleMediaSource));
        let (channel, incoming) = relay.join(ROOM);
        let channel = Arc::new(channel);
        peer.machine.attach_channel(channel.clone(), incoming);
        peer.channel = Some(channel);
        peer.collect();
        peer.statuses.clear();
        peer
    }

    /// Acquires audio and moves to `MediaReady`.
    pub async fn ready(&mut self) {
        self.machine
            .acquire_media(&[MediaKind::Audio])
            .await
            .expect("acquire media");
        self.machine.start().expect("start");
        self.collect();
    }

    pub async fn settle(&mut self) -> usize {
        let handled = self.machine.settle(&mut self.events).await;
        self.collect();
        handled
    }

    pub fn collect(&mut self) {
        while let Ok(status) = self.status.try_recv() {
            self.statuses.push(status);
        }
    }

    pub fn saw(&self, status: &CallStatus) -> bool {
        self.statuses.contains(status)
    }

    pub fn count(&self, status: &CallStatus) -> usize {
        self.statuses.iter().filter(|s| *s == status).count()
    }
}

/// Settles both participants until neither has anything queued.
pub async fn settle_pair(a: &mut Peer, b: &mut Peer) {
    loop {
        let handled = a.settle().await + b.settle().await;
        if handled == 0 {
            break;
        }
    }
}

pub fn connectivity(peer: &Peer, state: p2pcall::peer::Connectivity) {
    peer.factory
        .last_sink()
        .emit(TransportEvent::Connectivity(state));
}

/// Waits until `want` shows up on a running machine's status stream.
pub async fn wait_for(status: &mut StatusReceiver, want: CallStatus) {
    let seen = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while let Some(next) = status.recv().await {
            if next == want {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(seen, "never saw status '{want}'");
}
