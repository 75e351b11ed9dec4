pub mod connection;
pub mod ice;
pub mod lifecycle;
pub mod negotiation;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::{RtcTransport, RtcTransportFactory};
pub use ice::{analyze_candidates, CandidateBuffer, CandidateMix, CandidateOutcome};
pub use negotiation::{
    CallCommand, CallEvent, CallEvents, CallHandle, CallMachine, CallParts, StatusReceiver,
};
pub use state::{CallState, CallStatus};
pub use transport::{PeerTransport, SessionId, TransportEvent, TransportEventSink, TransportFactory};
pub use types::{
    CallRole, Connectivity, NegotiationState, NetworkCandidate, SdpKind, ServerConfig, ServerKind,
    SessionDescription,
};
