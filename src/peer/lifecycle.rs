//! Teardown of a call: the one place that releases a session.

use crate::peer::negotiation::CallMachine;
use crate::peer::state::CallState;
use crate::peer::types::{CallRole, NegotiationState};
use crate::signaling::SignalMessage;
use tracing::{debug, info, warn};

impl CallMachine {
    /// User hangup. A no-op while idle with no session.
    pub async fn hangup(&mut self) {
        if self.state == CallState::Idle && self.session.is_none() {
            debug!("hangup() while idle, nothing to do");
            return;
        }
        self.teardown(true).await;
    }

    /// Releases the session, local media and remote stream and returns to
    /// `Idle`. Idempotent: a second call finds nothing left and returns.
    /// Every step runs regardless of how the previous one went.
    pub async fn teardown(&mut self, notify_peer: bool) {
        if self.is_released() {
            debug!("teardown: nothing to release");
            return;
        }
        if self.state != CallState::Idle {
            self.set_state(CallState::Closing);
        }

        let session = self.session.take();

        if notify_peer {
            let open = session
                .as_ref()
                .is_some_and(|s| s.transport().negotiation_state() != NegotiationState::Closed);
            if open {
                match self.send(&SignalMessage::Bye).await {
                    Ok(()) => info!("Sent bye"),
                    Err(e) => warn!("Could not send bye: {e}"),
                }
            }
        }

        if let Some(session) = session {
            let transport = session.transport();
            // late callbacks must not reach released state
            transport.detach_handlers();
            for track in &session.tracks {
                track.stop();
            }
            if let Err(e) = transport.close().await {
                warn!("Closing transport of session {} failed: {e}", session.id);
            }
            info!("Session {} released: {}", session.id, session.summary());
        }

        if let Some(media) = self.media.take() {
            media.stop_all();
        }

        self.sink.detach();

        self.candidates.clear();
        self.reconnecting = false;
        self.role = CallRole::None;
        self.set_state(CallState::Idle);
    }

    fn is_released(&self) -> bool {
        self.state == CallState::Idle
            && self.session.is_none()
            && self.media.is_none()
            && self.candidates.pending_len() == 0
    }
}
