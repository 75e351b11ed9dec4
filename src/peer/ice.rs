use crate::peer::transport::PeerTransport;
use crate::peer::types::NetworkCandidate;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// What happened to a candidate handed to [`CandidateBuffer::enqueue_or_apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Applied,
    Queued,
    /// Apply failed. Benign: the call goes on.
    Failed,
}

/// Remote candidates waiting for a remote description, plus the local
/// candidates gathered for the current session.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<NetworkCandidate>,
    local: Vec<NetworkCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `candidate` now if `transport` already has a remote
    /// description, otherwise queues it in arrival order.
    pub async fn enqueue_or_apply(
        &mut self,
        transport: Option<&dyn PeerTransport>,
        candidate: NetworkCandidate,
    ) -> CandidateOutcome {
        match transport {
            Some(transport) if transport.has_remote_description().await => {
                apply(transport, candidate).await
            }
            _ => {
                debug!("Remote description not set yet, queuing candidate");
                self.pending.push_back(candidate);
                CandidateOutcome::Queued
            }
        }
    }

    /// Applies every queued candidate in arrival order and empties the queue.
    /// Returns how many applied cleanly.
    pub async fn drain(&mut self, transport: &dyn PeerTransport) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let total = pending.len();
        let mut applied = 0;
        for candidate in pending {
            debug!("Applying pending candidate: {:?}", candidate);
            if apply(transport, candidate).await == CandidateOutcome::Applied {
                applied += 1;
            }
        }
        if total > 0 {
            info!("Drained {applied}/{total} pending remote candidates");
        }
        applied
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn record_local(&mut self, candidate: NetworkCandidate) {
        self.local.push(candidate);
        debug!("Added local ICE candidate, total count: {}", self.local.len());
    }

    pub fn local_candidates(&self) -> &[NetworkCandidate] {
        &self.local
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.local.clear();
    }
}

async fn apply(transport: &dyn PeerTransport, candidate: NetworkCandidate) -> CandidateOutcome {
    match transport.add_candidate(candidate).await {
        Ok(()) => CandidateOutcome::Applied,
        Err(e) => {
            warn!("Failed to add ICE candidate: {e}");
            CandidateOutcome::Failed
        }
    }
}

/// Counts of gathered candidates by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateMix {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[NetworkCandidate]) -> CandidateMix {
    let mut mix = CandidateMix::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            mix.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            mix.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            mix.relay += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        mix.host, mix.srflx, mix.relay
    );
    if mix.srflx == 0 && mix.relay == 0 {
        debug!("Only host candidates gathered, peers behind NAT may not connect");
    }
    mix
}
