//! WebSocket client for the relay in [`crate::relay`].

use super::{ChannelEvent, SignalMessage, SignalingChannel};
use crate::error::{CallError, Result};
use crate::relay::RelayFrame;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub struct WsSignaling {
    out: mpsc::UnboundedSender<Message>,
}

impl WsSignaling {
    /// Connects to the relay and spawns the socket reader and writer.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let (stream, _) = connect_async(url).await?;
        info!("Connected to signaling relay at {url}");
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!("Signaling write failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = decode_frame(&text) {
                            if in_tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling read failed: {e}");
                        break;
                    }
                }
            }
            info!("Signaling relay connection closed");
            let _ = in_tx.send(ChannelEvent::Closed);
        });

        Ok((Self { out: out_tx }, in_rx))
    }
}

/// Turns one relay frame into a channel event. Malformed or unknown payloads
/// are logged and dropped.
pub fn decode_frame(text: &str) -> Option<ChannelEvent> {
    match serde_json::from_str::<RelayFrame>(text) {
        Ok(RelayFrame::Signal(data)) => match serde_json::from_value::<SignalMessage>(data) {
            Ok(msg) => Some(ChannelEvent::Message(msg)),
            Err(e) => {
                warn!("Dropping unrecognised signal: {e}");
                None
            }
        },
        Ok(RelayFrame::UserLeft { sid }) => Some(ChannelEvent::PeerLeft(sid)),
        Err(e) => {
            warn!("Dropping malformed relay frame: {e}");
            None
        }
    }
}

#[async_trait]
impl SignalingChannel for WsSignaling {
    async fn send(&self, message: &SignalMessage) -> Result<()> {
        let frame = RelayFrame::Signal(serde_json::to_value(message)?);
        debug!("Sending {} to relay", message.kind());
        self.out
            .send(frame.to_message()?)
            .map_err(|_| CallError::ChannelDisconnected)
    }
}
