use thiserror::Error;

/// Errors produced while negotiating or tearing down a call.
///
/// Only `MediaNotReady`, `Acquisition`, `Transport` and `ChannelDisconnected`
/// ever reach the user as a status. `NegotiationRejected` and
/// `CandidateApply` are logged and swallowed by the state machine.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("local media not ready")]
    MediaNotReady,

    #[error("media acquisition failed: {0}")]
    Acquisition(String),

    #[error("negotiation rejected: {0}")]
    NegotiationRejected(&'static str),

    #[error("candidate apply failed: {0}")]
    CandidateApply(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("signaling channel disconnected")]
    ChannelDisconnected,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Webrtc(#[from] webrtc::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type Result<T, E = CallError> = std::result::Result<T, E>;
