use crate::error::{CallError, Result};
use crate::logger::dump_candidate;
use crate::media::{LocalTrack, RemoteTrack};
use crate::peer::transport::{PeerTransport, TransportEvent, TransportEventSink, TransportFactory};
use crate::peer::types::{
    Connectivity, NegotiationState, NetworkCandidate, SdpKind, ServerConfig, SessionDescription,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Builds `RTCPeerConnection`-backed transports.
#[derive(Debug, Clone)]
pub struct RtcTransportFactory {
    ice_servers: Vec<ServerConfig>,
}

impl RtcTransportFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(&self, events: TransportEventSink) -> Result<Box<dyn PeerTransport>> {
        let pc = new_peer(&self.ice_servers, events).await?;
        Ok(Box::new(RtcTransport { pc }))
    }
}

/// Creates a peer connection with default codecs and interceptors and wires
/// its callbacks into `events`.
pub async fn new_peer(
    servers: &[ServerConfig],
    events: TransportEventSink,
) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(servers)).await?);
    debug!("Created peer connection for session {}", events.session());
    attach_handlers(&pc, events);
    Ok(pc)
}

fn attach_handlers(pc: &RTCPeerConnection, events: TransportEventSink) {
    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => {
                dump_candidate("LOCAL", &c);
                match c.to_json() {
                    Ok(init) => sink.emit(TransportEvent::LocalCandidate(NetworkCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index.unwrap_or(0),
                    })),
                    Err(e) => warn!("Failed to serialise local candidate: {e}"),
                }
            }
            // a null candidate ends gathering
            None => sink.emit(TransportEvent::GatheringComplete),
        }
        Box::pin(async {})
    }));

    let sink = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        debug!("ICE connection state changed to: {state:?}");
        sink.emit(TransportEvent::Connectivity(connectivity(state)));
        Box::pin(async {})
    }));

    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            events.emit(TransportEvent::RemoteTrack(RemoteTrack::from_rtc(track)));
            Box::pin(async {})
        },
    ));
}

fn connectivity(state: RTCIceConnectionState) -> Connectivity {
    match state {
        RTCIceConnectionState::Checking => Connectivity::Checking,
        RTCIceConnectionState::Connected => Connectivity::Connected,
        RTCIceConnectionState::Completed => Connectivity::Completed,
        RTCIceConnectionState::Disconnected => Connectivity::Disconnected,
        RTCIceConnectionState::Failed => Connectivity::Failed,
        RTCIceConnectionState::Closed => Connectivity::Closed,
        _ => Connectivity::New,
    }
}

fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
    })
}

/// [`PeerTransport`] over a webrtc-rs peer connection.
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<()> {
        let Some(rtc) = track.rtc_track() else {
            debug!("Track {} has no RTP side, not attaching", track.id());
            return Ok(());
        };
        let sender = self.pc.add_track(rtc).await?;
        // RTCP has to be read for interceptors to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        info!("Attached local {} track {}", track.kind(), track.id());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    fn negotiation_state(&self) -> NegotiationState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveRemotePranswer => {
                NegotiationState::HaveLocalOffer
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveLocalPranswer => {
                NegotiationState::HaveRemoteOffer
            }
            RTCSignalingState::Closed => NegotiationState::Closed,
            _ => NegotiationState::Stable,
        }
    }

    async fn add_candidate(&self, candidate: NetworkCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: Some(candidate.sdp_mline_index),
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| CallError::CandidateApply(e.to_string()))
    }

    fn detach_handlers(&self) {
        self.pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
        self.pc
            .on_ice_connection_state_change(Box::new(|_| Box::pin(async {})));
        self.pc.on_track(Box::new(|_, _, _| Box::pin(async {})));
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
