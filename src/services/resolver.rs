use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::fs;

use crate::error::ResolutionError;
use crate::models::{Origin, Track};
use crate::services::remote::RemoteLookup;
use crate::services::store::CatalogStore;

/// Something the sink can read audio from.
#[derive(Debug)]
pub enum PlayableSource {
    File(PathBuf),
    /// A streaming URL; only valid for a limited time.
    Url(String),
    /// Stored audio copied to disk for this one play.
    Scratch(ScratchFile),
}

impl PlayableSource {
    /// The transcoder input argument.
    pub fn input(&self) -> String {
        match self {
            PlayableSource::File(path) => path.to_string_lossy().into_owned(),
            PlayableSource::Url(url) => url.clone(),
            PlayableSource::Scratch(file) => file.path().to_string_lossy().into_owned(),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, PlayableSource::Url(_))
    }
}

/// A file that is removed when dropped. Whoever holds the `PlayableSource`
/// owns it: the sink while playing, or the player when it throws a result away.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub async fn create(dir: &Path, bytes: &[u8]) -> std::io::Result<Self> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.audio", uuid::Uuid::new_v4()));
        fs::write(&path, bytes).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove scratch file {}: {}", self.path.display(), e);
            }
        }
    }
}

#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Turns a track into a source the sink can play. Called once per play;
    /// nothing is cached between calls.
    async fn resolve(&self, track: &Track) -> Result<PlayableSource, ResolutionError>;
}

/// Resolves local files directly, remote tracks through the remote lookup and
/// stored tracks through the catalog store.
pub struct LibraryResolver {
    remote: Arc<dyn RemoteLookup>,
    store: Arc<dyn CatalogStore>,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl LibraryResolver {
    pub fn new(
        remote: Arc<dyn RemoteLookup>,
        store: Arc<dyn CatalogStore>,
        scratch_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            remote,
            store,
            scratch_dir: scratch_dir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl StreamResolver for LibraryResolver {
    async fn resolve(&self, track: &Track) -> Result<PlayableSource, ResolutionError> {
        match &track.origin {
            Origin::Local { path } => {
                if fs::metadata(path).await.is_err() {
                    return Err(ResolutionError::MissingFile(path.clone()));
                }
                Ok(PlayableSource::File(path.clone()))
            }
            Origin::Remote { url } => {
                let stream = tokio::time::timeout(self.timeout, self.remote.stream_url(url))
                    .await
                    .map_err(|_| ResolutionError::Timeout(self.timeout.as_secs()))??;
                debug!("Resolved stream for {}", track);
                Ok(PlayableSource::Url(stream))
            }
            Origin::Stored { id } => {
                let bytes = self
                    .store
                    .fetch_audio(id)
                    .await?
                    .ok_or_else(|| ResolutionError::MissingBlob(id.clone()))?;
                let file = ScratchFile::create(&self.scratch_dir, &bytes).await?;
                Ok(PlayableSource::Scratch(file))
            }
        }
    }
}
