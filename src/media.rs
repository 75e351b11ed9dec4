//! Local media handles and the remote rendering sink.
//!
//! Capture devices and output rendering live outside this crate. The state
//! machine only needs to attach local tracks to a transport session, stop
//! them on teardown, and hand remote tracks to whatever renders them.

use crate::error::{CallError, Result};
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl FromStr for MediaKind {
    type Err = CallError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            other => Err(CallError::Config(format!("unknown media kind: {other}"))),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        })
    }
}

/// A local track held by the media handle. `stop` must be idempotent.
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn stop(&self);
    fn is_stopped(&self) -> bool;

    /// The WebRTC track to attach to a peer connection, if this track has one.
    fn rtc_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        None
    }
}

/// Tracks handed out by one acquisition.
#[derive(Clone, Default)]
pub struct TrackSet {
    tracks: Vec<Arc<dyn LocalTrack>>,
}

impl TrackSet {
    pub fn new(tracks: Vec<Arc<dyn LocalTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn LocalTrack>] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl fmt::Debug for TrackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tracks.iter().map(|t| (t.kind(), t.id().to_owned())))
            .finish()
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Fails with `CallError::Acquisition` when a device is missing or denied.
    async fn acquire(&self, kinds: &[MediaKind]) -> Result<TrackSet>;
}

/// Local track fed by writing encoded samples.
pub struct SampleTrack {
    id: String,
    kind: MediaKind,
    stopped: AtomicBool,
    inner: Arc<TrackLocalStaticSample>,
}

impl SampleTrack {
    pub fn new(kind: MediaKind, stream_id: &str) -> Self {
        let mime_type = match kind {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };
        let id = format!("{kind}-{}", random_id());
        let inner = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.clone(),
            stream_id.to_owned(),
        ));
        Self {
            id,
            kind,
            stopped: AtomicBool::new(false),
            inner,
        }
    }

    /// Writes one encoded frame. Frames written after `stop` are dropped.
    pub async fn write(&self, data: Bytes, duration: Duration) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        self.inner
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

impl LocalTrack for SampleTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stopped local {} track {}", self.kind, self.id);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn rtc_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        Some(self.inner.clone())
    }
}

/// Media source producing sample tracks (Opus audio, VP8 video).
#[derive(Debug, Default, Clone)]
pub struct SampleMediaSource;

#[async_trait]
impl MediaSource for SampleMediaSource {
    async fn acquire(&self, kinds: &[MediaKind]) -> Result<TrackSet> {
        if kinds.is_empty() {
            return Err(CallError::Acquisition("no media kinds requested".into()));
        }
        let stream_id = format!("local-{}", random_id());
        let tracks = kinds
            .iter()
            .map(|kind| Arc::new(SampleTrack::new(*kind, &stream_id)) as Arc<dyn LocalTrack>)
            .collect::<Vec<_>>();
        info!("Acquired {} local tracks on stream {}", tracks.len(), stream_id);
        Ok(TrackSet::new(tracks))
    }
}

/// A track received from the peer.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    pub inner: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn from_rtc(track: Arc<TrackRemote>) -> Self {
        let kind = match track.kind() {
            RTPCodecType::Video => MediaKind::Video,
            _ => MediaKind::Audio,
        };
        Self {
            id: track.id(),
            stream_id: track.stream_id(),
            kind,
            inner: Some(track),
        }
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Remote media stream, grouped by stream id.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<RemoteTrack>,
}

/// Output for remote media. `detach` must be safe without a prior `attach`.
pub trait RenderSink: Send + Sync {
    fn attach(&self, stream: &RemoteStream);
    fn detach(&self);
}

/// Sink that renders nothing.
#[derive(Debug, Default, Clone)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn attach(&self, stream: &RemoteStream) {
        debug!("NullSink: ignoring remote stream {}", stream.id);
    }

    fn detach(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_parses_case_insensitively() {
        assert_eq!("Audio".parse::<MediaKind>().unwrap(), MediaKind::Audio);
        assert_eq!("video".parse::<MediaKind>().unwrap(), MediaKind::Video);
        assert!("screen".parse::<MediaKind>().is_err());
    }

    #[tokio::test]
    async fn sample_source_yields_one_track_per_kind() {
        let set = SampleMediaSource
            .acquire(&[MediaKind::Audio, MediaKind::Video])
            .await
            .unwrap();
        let kinds: Vec<_> = set.tracks().iter().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec![MediaKind::Audio, MediaKind::Video]);
        assert!(set.tracks().iter().all(|t| t.rtc_track().is_some()));
    }

    #[tokio::test]
    async fn empty_request_is_an_acquisition_error() {
        let err = SampleMediaSource.acquire(&[]).await.unwrap_err();
        assert!(matches!(err, CallError::Acquisition(_)));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_silences_writes() {
        let track = SampleTrack::new(MediaKind::Audio, "s");
        track.stop();
        track.stop();
        assert!(track.is_stopped());
        track
            .write(Bytes::from_static(&[0u8; 4]), Duration::from_millis(20))
            .await
            .unwrap();
    }
}
