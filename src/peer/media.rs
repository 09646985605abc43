//! Local media handed to the connection handle.
//!
//! Capturing and transforming frames is someone else's job; this module only
//! carries the track handle and decides whether one is available at all.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::NegotiationError;

/// Shared, read-only reference to the local video track
#[derive(Clone)]
pub struct LocalMedia {
    track: Arc<dyn TrackLocal + Send + Sync>,
}

impl LocalMedia {
    pub fn new(track: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        Self { track }
    }

    /// VP8 track that nothing writes to yet; the frame pipeline attaches later
    pub fn vp8(track_id: &str, stream_id: &str) -> Self {
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            track_id.to_owned(),
            stream_id.to_owned(),
        );
        Self::new(Arc::new(track))
    }

    pub fn track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.track)
    }

    pub fn track_id(&self) -> &str {
        self.track.id()
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("track_id", &self.track.id())
            .field("stream_id", &self.track.stream_id())
            .field("kind", &self.track.kind())
            .finish()
    }
}

/// Where the session gets its local media from. Failure keeps the
/// session from ever connecting to the relay.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<LocalMedia, NegotiationError>;
}

/// Already-acquired media
#[async_trait]
impl MediaSource for LocalMedia {
    async fn acquire(&self) -> Result<LocalMedia, NegotiationError> {
        Ok(self.clone())
    }
}

/// Hands out a fresh placeholder VP8 track
pub struct PlaceholderVideo {
    pub stream_id: String,
}

#[async_trait]
impl MediaSource for PlaceholderVideo {
    async fn acquire(&self) -> Result<LocalMedia, NegotiationError> {
        let media = LocalMedia::vp8("video", &self.stream_id);
        info!(?media, "local video track ready");
        Ok(media)
    }
}
