//! Local and remote media tracks.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Stream id shared by every outbound local track.
pub const LOCAL_STREAM_ID: &str = "mesh-local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a local track comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    #[must_use]
    pub fn kind(self) -> MediaKind {
        match self {
            TrackSource::Microphone => MediaKind::Audio,
            TrackSource::Camera | TrackSource::Screen => MediaKind::Video,
        }
    }
}

/// A captured local track.
///
/// Disabling keeps the track attached to its senders but stops writing
/// samples. Stopping is permanent; a stopped track must be re-acquired.
pub struct LocalTrack {
    id: String,
    source: TrackSource,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
    rtc: Arc<TrackLocalStaticSample>,
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish_non_exhaustive()
    }
}

fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

impl LocalTrack {
    /// Create a new live track with a fresh id.
    #[must_use]
    pub fn new(source: TrackSource) -> Arc<Self> {
        let kind = source.kind();
        let id = format!("{}-{}", kind.as_str(), uuid::Uuid::new_v4());
        let rtc = Arc::new(TrackLocalStaticSample::new(
            codec_for(kind),
            id.clone(),
            LOCAL_STREAM_ID.to_owned(),
        ));
        let (ended, _) = watch::channel(false);
        Arc::new(Self {
            id,
            source,
            enabled: AtomicBool::new(true),
            ended,
            rtc,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.source.kind()
    }

    #[must_use]
    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// End the track. Idempotent.
    pub fn stop(&self) {
        self.ended.send_replace(true);
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        *self.ended.borrow()
    }

    /// Resolve once the track has ended.
    pub async fn ended(&self) {
        let mut rx = self.ended.subscribe();
        // The sender lives in `self`, so `wait_for` only errors if it is dropped.
        let _ = rx.wait_for(|ended| *ended).await;
    }

    #[must_use]
    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtc)
    }

    /// Write one encoded media sample. Silently skipped while the track is
    /// disabled or ended.
    ///
    /// # Errors
    ///
    /// Returns the media stack error if the write fails.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<(), webrtc::Error> {
        if !self.is_enabled() || self.is_ended() {
            return Ok(());
        }
        self.rtc
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
    }
}

/// One inbound track of a remote stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub kind: MediaKind,
}

/// Inbound media from one remote participant.
///
/// Connection records only hold a weak reference; the view layer owns it.
#[derive(Debug)]
pub struct RemoteStream {
    id: String,
    tracks: Mutex<Vec<RemoteTrackInfo>>,
}

impl RemoteStream {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            tracks: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record a track. Returns false if it was already known.
    pub fn add_track(&self, track: RemoteTrackInfo) -> bool {
        let mut tracks = match self.tracks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        tracks.push(track);
        true
    }

    #[must_use]
    pub fn tracks(&self) -> Vec<RemoteTrackInfo> {
        match self.tracks.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
