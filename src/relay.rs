//! WebSocket signaling relay.
//!
//! Every connection joins a single room. `signal` frames are forwarded to
//! every other member untouched; when a member goes away the rest receive
//! `user-left` with its id.

use crate::error::Result;
use crate::utils::random_id;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub const ROOM: &str = "chat_room";

/// Frame carried over the relay WebSocket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RelayFrame {
    Signal(Value),
    UserLeft { sid: String },
}

impl RelayFrame {
    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

#[derive(Clone, Default)]
pub struct Relay {
    members: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("Relay listening on {}", listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            let relay = self.clone();
            tokio::spawn(async move {
                if let Err(e) = relay.handle_connection(stream, addr).await {
                    warn!("Connection from {addr} ended with error: {e}");
                }
            });
        }
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let ws = accept_async(stream).await?;
        let sid = random_id();
        info!("Client connected: {sid} ({addr})");

        let (mut sink, mut source) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.members.write().await.insert(sid.clone(), tx);
        info!("Client {sid} joined room '{ROOM}'");

        let writer_sid = sid.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    debug!("Write to {writer_sid} failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => self.on_text(&sid, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Read from {sid} failed: {e}");
                    break;
                }
            }
        }

        self.members.write().await.remove(&sid);
        info!("Client disconnected: {sid}");
        match (RelayFrame::UserLeft { sid: sid.clone() }).to_message() {
            Ok(msg) => self.broadcast(&sid, msg).await,
            Err(e) => error!("Failed to encode user-left for {sid}: {e}"),
        }
        writer.abort();
        Ok(())
    }

    async fn on_text(&self, sid: &str, text: &str) {
        match serde_json::from_str::<RelayFrame>(text) {
            Ok(RelayFrame::Signal(data)) => {
                let kind = signal_type(&data);
                debug!("Received signal from {sid}: type {kind}");
                self.broadcast(sid, Message::Text(text.to_owned())).await;
            }
            Ok(other) => warn!("Ignoring client-sent frame from {sid}: {other:?}"),
            Err(e) => warn!("Malformed frame from {sid}: {e}"),
        }
    }

    async fn broadcast(&self, from: &str, msg: Message) {
        let members = self.members.read().await;
        for (sid, tx) in members.iter().filter(|(sid, _)| sid.as_str() != from) {
            if tx.send(msg.clone()).is_err() {
                debug!("Member {sid} is gone, skipping");
            }
        }
    }
}

/// The `type` of a relayed signal payload, `?` when absent.
fn signal_type(data: &Value) -> &str {
    data.get("type").and_then(Value::as_str).unwrap_or("?")
}
