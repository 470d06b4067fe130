//! Metadata and stream lookups against the remote audio-hosting service.

mod api;
mod extractor;

pub use api::RemoteApi;
pub use extractor::Extractor;

use async_trait::async_trait;

use crate::error::ResolutionError;
use crate::models::Track;

/// One remote track as described by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTrack {
    pub title: String,
    pub artist: String,
    pub duration: f64,
    pub url: String,
}

impl From<RemoteTrack> for Track {
    fn from(remote: RemoteTrack) -> Self {
        Track::remote(remote.title, remote.artist, remote.duration, remote.url)
    }
}

/// A remote set or playlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteCollection {
    pub title: Option<String>,
    pub tracks: Vec<RemoteTrack>,
}

#[async_trait]
pub trait RemoteLookup: Send + Sync {
    /// Metadata for a single track, without downloading any audio.
    async fn track(&self, locator: &str) -> Result<RemoteTrack, ResolutionError>;

    /// Every track of a collection, in the service's order.
    async fn collection(&self, locator: &str) -> Result<RemoteCollection, ResolutionError>;

    /// A fresh, time-limited URL the transcoder can read the audio from.
    async fn stream_url(&self, locator: &str) -> Result<String, ResolutionError>;
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
