use crate::error::Result;
use crate::media::{LocalTrack, RemoteTrack};
use crate::peer::negotiation::CallEvent;
use crate::peer::types::{Connectivity, NegotiationState, NetworkCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Generation number of a transport session. Bumped for every session a
/// machine opens, so callbacks from a released session can be told apart.
pub type SessionId = u64;

/// Asynchronous callback from the transport.
#[derive(Debug)]
pub enum TransportEvent {
    LocalCandidate(NetworkCandidate),
    GatheringComplete,
    Connectivity(Connectivity),
    RemoteTrack(RemoteTrack),
}

/// Where a transport posts its callbacks. Each event is stamped with the
/// session it belongs to before it reaches the state machine queue.
#[derive(Clone)]
pub struct TransportEventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl TransportEventSink {
    pub(crate) fn new(session: SessionId, tx: mpsc::UnboundedSender<CallEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn emit(&self, event: TransportEvent) {
        let event = CallEvent::Transport {
            session: self.session,
            event,
        };
        if self.tx.send(event).is_err() {
            trace!("Call machine gone, dropping transport event");
        }
    }
}

/// The native negotiation object behind one call attempt.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<()>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn has_remote_description(&self) -> bool;
    fn negotiation_state(&self) -> NegotiationState;
    async fn add_candidate(&self, candidate: NetworkCandidate) -> Result<()>;
    /// Replaces every callback with a no-op. Called before `close`.
    fn detach_handlers(&self);
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, events: TransportEventSink) -> Result<Box<dyn PeerTransport>>;
}
