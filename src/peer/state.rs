use std::fmt;

/// Negotiation state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    MediaReady,
    Offering,
    Answering,
    Connecting,
    Connected,
    Closing,
    Failed,
}

/// Advisory status pushed to the UI surface. Not part of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    State(CallState),
    MicNotReady,
    StartMicFirst,
    AcquisitionFailed(String),
    Reconnecting,
    Reconnected,
    RemoteHangup,
    TransportFailed,
    CallFailed(String),
    ChannelConnected,
    ChannelDisconnected,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::State(state) => f.write_str(match state {
                CallState::Idle => "idle",
                CallState::MediaReady => "mic ready",
                CallState::Offering => "calling...",
                CallState::Answering => "answering...",
                CallState::Connecting => "connecting...",
                CallState::Connected => "connected",
                CallState::Closing => "hanging up",
                CallState::Failed => "call failed",
            }),
            CallStatus::MicNotReady => f.write_str("mic not ready"),
            CallStatus::StartMicFirst => f.write_str("start mic first"),
            CallStatus::AcquisitionFailed(detail) => write!(f, "could not access media: {detail}"),
            CallStatus::Reconnecting => f.write_str("reconnecting..."),
            CallStatus::Reconnected => f.write_str("reconnected"),
            CallStatus::RemoteHangup => f.write_str("peer hung up"),
            CallStatus::TransportFailed => f.write_str("connection failed"),
            CallStatus::CallFailed(reason) => write!(f, "call failed: {reason}"),
            CallStatus::ChannelConnected => f.write_str("signaling connected"),
            CallStatus::ChannelDisconnected => f.write_str("disconnected"),
        }
    }
}
