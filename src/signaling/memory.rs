//! In-process relay with the same room semantics as the WebSocket relay.
//! Every message is pushed through its JSON wire form on the way.

use super::{ChannelEvent, SignalMessage, SignalingChannel};
use crate::error::{CallError, Result};
use crate::utils::random_id;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

struct Member {
    sid: String,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Clone, Default)]
pub struct MemoryRelay {
    rooms: Arc<Mutex<HashMap<String, Vec<Member>>>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins `room` and returns the outbound channel with its inbound events.
    pub fn join(&self, room: &str) -> (MemoryChannel, mpsc::UnboundedReceiver<ChannelEvent>) {
        let sid = random_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .entry(room.to_owned())
            .or_default()
            .push(Member { sid: sid.clone(), tx });
        info!("Client {sid} joined room '{room}'");
        let channel = MemoryChannel {
            sid,
            room: room.to_owned(),
            relay: self.clone(),
        };
        (channel, rx)
    }

    pub fn members(&self, room: &str) -> usize {
        self.lock().get(room).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Member>>> {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn broadcast(&self, room: &str, from: &str, event: ChannelEvent) -> usize {
        let rooms = self.lock();
        let Some(members) = rooms.get(room) else {
            return 0;
        };
        members
            .iter()
            .filter(|m| m.sid != from)
            .filter(|m| m.tx.send(event.clone()).is_ok())
            .count()
    }

    /// Removes `sid` from its room. `notify_self` also closes its own inbound
    /// stream, as when the relay drops the connection.
    fn remove(&self, room: &str, sid: &str, notify_self: bool) {
        let removed = {
            let mut rooms = self.lock();
            let Some(members) = rooms.get_mut(room) else {
                return;
            };
            let position = members.iter().position(|m| m.sid == sid);
            position.map(|i| members.remove(i))
        };
        let Some(member) = removed else {
            return;
        };
        if notify_self {
            let _ = member.tx.send(ChannelEvent::Closed);
        }
        info!("Client {sid} left room '{room}'");
        self.broadcast(room, sid, ChannelEvent::PeerLeft(sid.to_owned()));
    }
}

/// One participant's connection to a [`MemoryRelay`] room.
pub struct MemoryChannel {
    sid: String,
    room: String,
    relay: MemoryRelay,
}

impl MemoryChannel {
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Simulates the relay dropping this participant.
    pub fn disconnect(&self) {
        self.relay.remove(&self.room, &self.sid, true);
    }

    fn is_member(&self) -> bool {
        self.relay
            .lock()
            .get(&self.room)
            .is_some_and(|members| members.iter().any(|m| m.sid == self.sid))
    }
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    async fn send(&self, message: &SignalMessage) -> Result<()> {
        if !self.is_member() {
            return Err(CallError::ChannelDisconnected);
        }
        let wire = serde_json::to_string(message)?;
        let decoded: SignalMessage = serde_json::from_str(&wire)?;
        let delivered = self
            .relay
            .broadcast(&self.room, &self.sid, ChannelEvent::Message(decoded));
        debug!(
            "Relayed {} from {} to {} members",
            message.kind(),
            self.sid,
            delivered
        );
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.relay.remove(&self.room, &self.sid, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_to_others_only() {
        let relay = MemoryRelay::new();
        let (a, mut a_rx) = relay.join("chat_room");
        let (_b, mut b_rx) = relay.join("chat_room");

        a.send(&SignalMessage::Bye).await.unwrap();

        assert_eq!(b_rx.try_recv().unwrap(), ChannelEvent::Message(SignalMessage::Bye));
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leaving_notifies_the_room() {
        let relay = MemoryRelay::new();
        let (a, _a_rx) = relay.join("chat_room");
        let (_b, mut b_rx) = relay.join("chat_room");
        let sid = a.sid().to_owned();

        drop(a);

        assert_eq!(b_rx.try_recv().unwrap(), ChannelEvent::PeerLeft(sid));
        assert_eq!(relay.members("chat_room"), 1);
    }

    #[tokio::test]
    async fn disconnected_member_cannot_send() {
        let relay = MemoryRelay::new();
        let (a, mut a_rx) = relay.join("chat_room");
        let (_b, mut b_rx) = relay.join("chat_room");

        a.disconnect();

        assert_eq!(a_rx.try_recv().unwrap(), ChannelEvent::Closed);
        assert!(matches!(b_rx.try_recv().unwrap(), ChannelEvent::PeerLeft(_)));
        assert!(matches!(
            a.send(&SignalMessage::Bye).await,
            Err(CallError::ChannelDisconnected)
        ));
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let relay = MemoryRelay::new();
        let (a, _a_rx) = relay.join("one");
        let (_b, mut b_rx) = relay.join("two");

        a.send(&SignalMessage::Bye).await.unwrap();

        assert!(b_rx.try_recv().is_err());
    }
}
