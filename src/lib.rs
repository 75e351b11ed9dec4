//! Two-party WebRTC calls negotiated over a signaling relay.
//!
//! [`peer::CallMachine`] drives offer/answer, trickle ICE and teardown for
//! one participant. The relay in [`relay`] forwards signaling between the
//! two participants of a room.

pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::{CallConfig, RelayConfig};
pub use error::{CallError, Result};
pub use peer::{CallHandle, CallMachine, CallParts, CallState, CallStatus};
pub use signaling::{ChannelEvent, SignalMessage, SignalingChannel};
