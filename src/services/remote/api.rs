use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;

use super::{non_empty, RemoteCollection, RemoteLookup, RemoteTrack};
use crate::error::ResolutionError;

const USER_AGENT: &str = concat!("radiobot/", env!("CARGO_PKG_VERSION"));

/// Client for the audio-hosting service's public HTTP API.
///
/// Every lookup goes through `/resolve`, which turns a page URL into a track
/// or playlist resource. Stream URLs are signed and short-lived, so they are
/// never cached here.
#[derive(Debug, Clone)]
pub struct RemoteApi {
    client: Client,
    base_url: String,
    client_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Resource {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    user: Option<User>,
    /// Milliseconds.
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    permalink_url: Option<String>,
    #[serde(default)]
    media: Option<Media>,
    #[serde(default)]
    tracks: Option<Vec<Resource>>,
}

#[derive(Debug, Default, Deserialize)]
struct User {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Media {
    #[serde(default)]
    transcodings: Vec<Transcoding>,
}

#[derive(Debug, Deserialize)]
struct Transcoding {
    url: String,
    #[serde(default)]
    format: Option<Format>,
}

#[derive(Debug, Deserialize)]
struct Format {
    #[serde(default)]
    protocol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamLocation {
    #[serde(default)]
    url: Option<String>,
}

impl Resource {
    fn is_playlist(&self) -> bool {
        self.tracks.is_some() || matches!(self.kind.as_deref(), Some("playlist" | "system-playlist"))
    }

    fn into_track(self, fallback_url: Option<&str>) -> Option<RemoteTrack> {
        let url = non_empty(self.permalink_url).or_else(|| fallback_url.map(str::to_string))?;
        let title = non_empty(self.title)?;
        Some(RemoteTrack {
            title,
            artist: non_empty(self.user.and_then(|u| u.username)).unwrap_or_else(|| "Unknown".to_string()),
            duration: self
                .duration
                .filter(|ms| ms.is_finite() && *ms > 0.0)
                .map(|ms| ms / 1000.0)
                .unwrap_or(0.0),
            url,
        })
    }

    /// The progressive (plain HTTP) transcoding when there is one, else the first.
    fn best_transcoding(&self) -> Option<&Transcoding> {
        let transcodings = &self.media.as_ref()?.transcodings;
        transcodings
            .iter()
            .find(|t| {
                t.format
                    .as_ref()
                    .and_then(|f| f.protocol.as_deref())
                    == Some("progressive")
            })
            .or_else(|| transcodings.first())
    }
}

impl RemoteApi {
    pub fn new(base_url: impl Into<String>, client_id: impl Into<String>, timeout: Duration) -> Result<Self, ResolutionError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
        })
    }

    async fn resolve(&self, locator: &str) -> Result<Resource, ResolutionError> {
        debug!("Resolving {} via {}", locator, self.base_url);
        let resource = self
            .client
            .get(format!("{}/resolve", self.base_url))
            .query(&[("url", locator), ("client_id", self.client_id.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<Resource>()
            .await?;
        Ok(resource)
    }
}

fn collection_from_resource(resource: Resource, locator: &str) -> RemoteCollection {
    if !resource.is_playlist() {
        return RemoteCollection {
            title: None,
            tracks: resource.into_track(Some(locator)).into_iter().collect(),
        };
    }

    let title = non_empty(resource.title);
    let tracks = resource
        .tracks
        .unwrap_or_default()
        .into_iter()
        .filter_map(|t| t.into_track(None))
        .collect();

    RemoteCollection { title, tracks }
}

#[async_trait]
impl RemoteLookup for RemoteApi {
    async fn track(&self, locator: &str) -> Result<RemoteTrack, ResolutionError> {
        let resource = self.resolve(locator).await?;
        if resource.is_playlist() {
            return Err(ResolutionError::NoMetadata(locator.to_string()));
        }

        let mut track = resource
            .into_track(Some(locator))
            .ok_or_else(|| ResolutionError::NoMetadata(locator.to_string()))?;
        // Keep the locator the user gave us, like the extractor does.
        track.url = locator.to_string();
        Ok(track)
    }

    async fn collection(&self, locator: &str) -> Result<RemoteCollection, ResolutionError> {
        Ok(collection_from_resource(self.resolve(locator).await?, locator))
    }

    async fn stream_url(&self, locator: &str) -> Result<String, ResolutionError> {
        let resource = self.resolve(locator).await?;
        let transcoding = resource
            .best_transcoding()
            .ok_or_else(|| ResolutionError::NoStream(locator.to_string()))?;

        let location = self
            .client
            .get(&transcoding.url)
            .query(&[("client_id", self.client_id.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<StreamLocation>()
            .await?;

        non_empty(location.url).ok_or_else(|| ResolutionError::NoStream(locator.to_string()))
    }
}
