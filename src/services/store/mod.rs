//! Persistence for the catalog and the saved playlists.

mod document;
mod json;

pub use document::DocumentStore;
pub use json::JsonStore;

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::models::{PlaylistBook, Track};

#[async_trait]
pub trait CatalogStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Persisted tracks. Malformed records are skipped with a warning.
    async fn load_tracks(&self) -> Result<Vec<Track>, PersistenceError>;

    /// Replaces the persisted tracks with `tracks`.
    async fn save_tracks(&self, tracks: &[Track]) -> Result<(), PersistenceError>;

    async fn load_playlists(&self) -> Result<PlaylistBook, PersistenceError>;

    async fn save_playlists(&self, book: &PlaylistBook) -> Result<(), PersistenceError>;

    /// Audio bytes of a `Stored` track, if this store keeps any.
    async fn fetch_audio(&self, _id: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(None)
    }

    /// Keeps `bytes` as the audio of `track`, whose origin must be `Stored`.
    /// Returns `false` when the store doesn't hold audio.
    async fn put_audio(&self, _track: &Track, _bytes: &[u8]) -> Result<bool, PersistenceError> {
        Ok(false)
    }
}

/// Store for the local-only backend: nothing is written anywhere.
#[derive(Debug, Default)]
pub struct NullStore;

#[async_trait]
impl CatalogStore for NullStore {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn load_tracks(&self) -> Result<Vec<Track>, PersistenceError> {
        Ok(Vec::new())
    }

    async fn save_tracks(&self, _tracks: &[Track]) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn load_playlists(&self) -> Result<PlaylistBook, PersistenceError> {
        Ok(PlaylistBook::default())
    }

    async fn save_playlists(&self, _book: &PlaylistBook) -> Result<(), PersistenceError> {
        Ok(())
    }
}
