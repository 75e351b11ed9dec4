use crate::media::{LocalTrack, RemoteStream, RemoteTrack};
use crate::peer::transport::{PeerTransport, SessionId};
use crate::peer::types::CallRole;
use crate::utils::random_id;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One live call attempt: the transport plus everything attached to it.
pub struct Session {
    pub id: SessionId,
    pub call_id: String,
    pub role: CallRole,
    pub tracks: Vec<Arc<dyn LocalTrack>>,
    pub remote: Option<RemoteStream>,
    pub opened_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    transport: Box<dyn PeerTransport>,
}

impl Session {
    pub fn new(
        id: SessionId,
        role: CallRole,
        transport: Box<dyn PeerTransport>,
        tracks: Vec<Arc<dyn LocalTrack>>,
    ) -> Self {
        Self {
            id,
            call_id: random_id(),
            role,
            tracks,
            remote: None,
            opened_at: Utc::now(),
            connected_at: None,
            transport,
        }
    }

    pub fn transport(&self) -> &dyn PeerTransport {
        self.transport.as_ref()
    }

    /// Records the first time connectivity came up.
    pub fn mark_connected(&mut self) {
        if self.connected_at.is_none() {
            self.connected_at = Some(Utc::now());
        }
    }

    /// Adds a remote track to the session's remote stream, creating the
    /// stream on the first track.
    pub fn add_remote_track(&mut self, track: RemoteTrack) -> &RemoteStream {
        let stream = self.remote.get_or_insert_with(|| RemoteStream {
            id: track.stream_id.clone(),
            tracks: Vec::new(),
        });
        if !stream.tracks.iter().any(|t| t.id == track.id) {
            stream.tracks.push(track);
        }
        stream
    }

    pub fn summary(&self) -> String {
        match self.connected_at {
            Some(at) => format!(
                "call {} ({:?}) lasted {}s",
                self.call_id,
                self.role,
                (Utc::now() - at).num_seconds()
            ),
            None => format!(
                "call {} ({:?}) ended before connecting, {}ms after opening",
                self.call_id,
                self.role,
                (Utc::now() - self.opened_at).num_milliseconds()
            ),
        }
    }
}
