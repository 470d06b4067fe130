use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::thread_rng;
use tokio::sync::Mutex;

use crate::error::{PersistenceError, RadioError, ResolutionError, Result};
use crate::models::{Origin, PlaylistBook, Track};
use crate::services::remote::RemoteLookup;
use crate::services::resolver::ScratchFile;
use crate::services::store::CatalogStore;
use crate::utils::mp3_scanner;

/// Every known track, plus the saved playlists.
///
/// Reads take a short lock and clone. Mutations are serialised by `writes`
/// and persisted in full after the in-memory change; a failed save is
/// reported but the in-memory change stays.
pub struct TrackCatalog {
    music_dir: PathBuf,
    scratch_dir: PathBuf,
    store: Arc<dyn CatalogStore>,
    remote: Arc<dyn RemoteLookup>,
    tracks: RwLock<Vec<Track>>,
    playlists: RwLock<PlaylistBook>,
    writes: Mutex<()>,
}

impl TrackCatalog {
    pub fn new(
        music_dir: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        store: Arc<dyn CatalogStore>,
        remote: Arc<dyn RemoteLookup>,
    ) -> Self {
        Self {
            music_dir: music_dir.into(),
            scratch_dir: scratch_dir.into(),
            store,
            remote,
            tracks: RwLock::new(Vec::new()),
            playlists: RwLock::new(PlaylistBook::default()),
            writes: Mutex::new(()),
        }
    }

    /// Scans the music folder and loads whatever the store holds. Broken
    /// files and records are skipped; an unreachable store leaves only the
    /// local tracks.
    pub async fn load_all(&self) -> Result<usize> {
        let _guard = self.writes.lock().await;

        let music_dir = self.music_dir.clone();
        let mut tracks = tokio::task::spawn_blocking(move || mp3_scanner::scan_directory(&music_dir))
            .await
            .map_err(|e| PersistenceError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        info!("Found {} local tracks in {}", tracks.len(), self.music_dir.display());

        match self.store.load_tracks().await {
            Ok(stored) => {
                for track in stored {
                    if !contains(&tracks, &track.origin) {
                        tracks.push(track);
                    }
                }
            }
            Err(e) => error!("Failed to load tracks from the {} store: {}", self.store.name(), e),
        }

        let playlists = match self.store.load_playlists().await {
            Ok(book) => book,
            Err(e) => {
                error!("Failed to load playlists from the {} store: {}", self.store.name(), e);
                PlaylistBook::default()
            }
        };

        let count = tracks.len();
        *self.tracks.write() = tracks;
        *self.playlists.write() = playlists;
        Ok(count)
    }

    /// Looks up one remote track and adds it. A locator that is already in
    /// the catalog returns the existing track.
    pub async fn add_remote(&self, locator: &str) -> Result<Track> {
        let locator = locator.trim();
        if let Some(existing) = self.find(&Origin::Remote { url: locator.to_string() }) {
            info!("{} is already in the catalog", existing);
            return Ok(existing);
        }

        let track: Track = self.remote.track(locator).await?.into();

        let _guard = self.writes.lock().await;
        if let Some(existing) = self.find(&track.origin) {
            return Ok(existing);
        }
        self.tracks.write().push(track.clone());
        info!("Added {}", track);

        self.save_tracks().await?;
        Ok(track)
    }

    /// Resolves a whole remote collection into a saved playlist and merges
    /// its tracks into the catalog. Returns the playlist name and its size.
    pub async fn add_playlist(&self, locator: &str, name: Option<&str>) -> Result<(String, usize)> {
        let locator = locator.trim();
        let collection = self.remote.collection(locator).await?;
        if collection.tracks.is_empty() {
            return Err(ResolutionError::NoTracks(locator.to_string()).into());
        }

        let tracks: Vec<Track> = collection.tracks.into_iter().map(Track::from).collect();

        let _guard = self.writes.lock().await;
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or(collection.title)
            .unwrap_or_else(|| format!("Playlist {}", self.playlists.read().len() + 1));

        {
            let mut catalog = self.tracks.write();
            for track in &tracks {
                if !contains(&catalog, &track.origin) {
                    catalog.push(track.clone());
                }
            }
        }
        {
            let mut playlists = self.playlists.write();
            if playlists.contains(&name) {
                warn!("Replacing playlist \"{}\"", name);
            }
            playlists.insert(name.clone(), &tracks);
        }
        info!("Saved playlist \"{}\" with {} tracks", name, tracks.len());

        self.save_tracks().await?;
        self.save_playlists().await?;
        Ok((name, tracks.len()))
    }

    /// Keeps uploaded MP3 audio in the store and adds it as a `Stored` track.
    /// Tags in the file fill in whatever the uploader left out.
    pub async fn add_upload(&self, bytes: Vec<u8>, title: Option<String>, artist: Option<String>) -> Result<Track> {
        if bytes.is_empty() {
            return Err(RadioError::InvalidUpload("empty body".to_string()));
        }

        let scratch = ScratchFile::create(&self.scratch_dir, &bytes)
            .await
            .map_err(PersistenceError::Io)?;
        let path = scratch.path().to_path_buf();
        let probe = tokio::task::spawn_blocking(move || mp3_scanner::probe(&path))
            .await
            .map_err(|e| PersistenceError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
            .map_err(|e| RadioError::InvalidUpload(e.to_string()))?;
        drop(scratch);

        let track = Track::stored(
            title.or(probe.title).unwrap_or_else(|| "Untitled upload".to_string()),
            artist.or(probe.artist).unwrap_or_else(|| "Unknown".to_string()),
            probe.duration,
            uuid::Uuid::new_v4().to_string(),
        );

        let _guard = self.writes.lock().await;
        if !self.store.put_audio(&track, &bytes).await? {
            return Err(RadioError::UploadsUnsupported);
        }
        self.tracks.write().push(track.clone());
        info!("Stored upload {} ({} bytes)", track, bytes.len());
        Ok(track)
    }

    /// A uniformly random permutation of every track.
    pub fn shuffled_snapshot(&self) -> Vec<Track> {
        let mut tracks = self.tracks.read().clone();
        tracks.shuffle(&mut thread_rng());
        tracks
    }

    pub fn playlist(&self, name: &str) -> Option<Vec<Track>> {
        self.playlists.read().tracks(name)
    }

    /// Saved playlists in name order, with their sizes.
    pub fn playlist_summaries(&self) -> Vec<(String, usize)> {
        self.playlists.read().summaries()
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.tracks.read().clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }

    fn find(&self, origin: &Origin) -> Option<Track> {
        self.tracks.read().iter().find(|t| &t.origin == origin).cloned()
    }

    // Local tracks are rediscovered by the scan, so only the rest is saved.
    async fn save_tracks(&self) -> std::result::Result<(), PersistenceError> {
        let persisted: Vec<Track> = self
            .tracks
            .read()
            .iter()
            .filter(|t| !t.is_local())
            .cloned()
            .collect();

        self.store.save_tracks(&persisted).await.map_err(|e| {
            error!("Failed to save tracks to the {} store: {}", self.store.name(), e);
            e
        })
    }

    async fn save_playlists(&self) -> std::result::Result<(), PersistenceError> {
        let book = self.playlists.read().clone();
        self.store.save_playlists(&book).await.map_err(|e| {
            error!("Failed to save playlists to the {} store: {}", self.store.name(), e);
            e
        })
    }
}

fn contains(tracks: &[Track], origin: &Origin) -> bool {
    tracks.iter().any(|t| &t.origin == origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::remote::{RemoteCollection, RemoteTrack};
    use crate::services::store::{JsonStore, NullStore};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeRemote {
        lookups: AtomicUsize,
        collection: RemoteCollection,
    }

    #[async_trait]
    impl RemoteLookup for FakeRemote {
        async fn track(&self, locator: &str) -> std::result::Result<RemoteTrack, ResolutionError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if locator.contains("broken") {
                return Err(ResolutionError::NoMetadata(locator.to_string()));
            }
            Ok(RemoteTrack {
                title: format!("Title of {}", locator),
                artist: "Remote Artist".to_string(),
                duration: 200.0,
                url: locator.to_string(),
            })
        }

        async fn collection(&self, _locator: &str) -> std::result::Result<RemoteCollection, ResolutionError> {
            Ok(self.collection.clone())
        }

        async fn stream_url(&self, locator: &str) -> std::result::Result<String, ResolutionError> {
            Ok(locator.to_string())
        }
    }

    fn remote_track(n: usize) -> RemoteTrack {
        RemoteTrack {
            title: format!("Track {}", n),
            artist: "Set Artist".to_string(),
            duration: 100.0,
            url: format!("https://s/track-{}", n),
        }
    }

    fn json_catalog(tmp: &TempDir, remote: FakeRemote) -> (TrackCatalog, JsonStore) {
        let store = JsonStore::new(tmp.path().join("tracks.json"), tmp.path().join("playlists.json"));
        let catalog = TrackCatalog::new(
            tmp.path().join("music"),
            tmp.path().join("scratch"),
            Arc::new(store.clone()),
            Arc::new(remote),
        );
        (catalog, store)
    }

    #[tokio::test]
    async fn test_add_remote_persists_and_dedupes() {
        let tmp = TempDir::new().unwrap();
        let (catalog, store) = json_catalog(&tmp, FakeRemote::default());
        catalog.load_all().await.unwrap();

        let track = catalog.add_remote("https://s/a").await.unwrap();
        assert_eq!(track.title, "Title of https://s/a");
        let again = catalog.add_remote(" https://s/a ").await.unwrap();
        assert_eq!(again, track);
        assert_eq!(catalog.len(), 1);

        let saved = store.load_tracks().await.unwrap();
        assert_eq!(saved, vec![track]);
    }

    #[tokio::test]
    async fn test_failed_lookup_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let (catalog, store) = json_catalog(&tmp, FakeRemote::default());

        let err = catalog.add_remote("https://s/broken").await.unwrap_err();
        assert!(matches!(err, RadioError::Resolution(ResolutionError::NoMetadata(_))));
        assert!(catalog.is_empty());
        assert!(!store.tracks_file().exists());
    }

    #[tokio::test]
    async fn test_add_playlist_saves_snapshot_and_merges() {
        let tmp = TempDir::new().unwrap();
        let remote = FakeRemote {
            collection: RemoteCollection {
                title: Some("Late Night".to_string()),
                tracks: vec![remote_track(1), remote_track(2)],
            },
            ..Default::default()
        };
        let (catalog, store) = json_catalog(&tmp, remote);
        catalog.add_remote("https://s/track-1").await.unwrap();

        let (name, count) = catalog.add_playlist("https://s/sets/late", None).await.unwrap();
        assert_eq!(name, "Late Night");
        assert_eq!(count, 2);
        // track-1 was already known, so only track-2 is new.
        assert_eq!(catalog.len(), 2);

        let (name, _) = catalog.add_playlist("https://s/sets/late", Some("mine")).await.unwrap();
        assert_eq!(name, "mine");
        assert_eq!(
            catalog.playlist_summaries(),
            vec![("Late Night".to_string(), 2), ("mine".to_string(), 2)]
        );

        let book = store.load_playlists().await.unwrap();
        assert_eq!(book.tracks("mine").unwrap()[1].title, "Track 2");
    }

    #[tokio::test]
    async fn test_untitled_playlist_gets_a_numbered_name() {
        let tmp = TempDir::new().unwrap();
        let remote = FakeRemote {
            collection: RemoteCollection {
                title: None,
                tracks: vec![remote_track(1)],
            },
            ..Default::default()
        };
        let (catalog, _) = json_catalog(&tmp, remote);

        let (name, _) = catalog.add_playlist("https://s/sets/x", Some("  ")).await.unwrap();
        assert_eq!(name, "Playlist 1");
    }

    #[tokio::test]
    async fn test_empty_playlist_is_a_failure_and_leaves_files_alone() {
        let tmp = TempDir::new().unwrap();
        let (catalog, store) = json_catalog(&tmp, FakeRemote::default());
        catalog.add_remote("https://s/a").await.unwrap();
        let before = std::fs::read(store.tracks_file()).unwrap();

        let err = catalog.add_playlist("https://s/sets/empty", Some("x")).await.unwrap_err();
        assert_eq!(err.to_string(), "no tracks found at https://s/sets/empty");

        assert_eq!(std::fs::read(store.tracks_file()).unwrap(), before);
        assert!(!store.playlists_file().exists());
        assert!(catalog.playlist("x").is_none());
    }

    #[tokio::test]
    async fn test_shuffle_is_a_permutation() {
        let tmp = TempDir::new().unwrap();
        let (catalog, _) = json_catalog(&tmp, FakeRemote::default());
        assert!(catalog.shuffled_snapshot().is_empty());

        for i in 0..20 {
            catalog.add_remote(&format!("https://s/{}", i)).await.unwrap();
        }

        let shuffled = catalog.shuffled_snapshot();
        assert_eq!(shuffled.len(), 20);
        let titles: HashSet<_> = shuffled.iter().map(|t| t.title.clone()).collect();
        assert_eq!(titles.len(), 20);
    }

    #[tokio::test]
    async fn test_reload_merges_store_with_scan() {
        let tmp = TempDir::new().unwrap();
        {
            let (catalog, _) = json_catalog(&tmp, FakeRemote::default());
            catalog.add_remote("https://s/a").await.unwrap();
        }

        let (catalog, _) = json_catalog(&tmp, FakeRemote::default());
        assert_eq!(catalog.load_all().await.unwrap(), 1);
        assert!(tmp.path().join("music").is_dir());
        assert_eq!(catalog.tracks()[0].artist, "Remote Artist");
    }

    #[tokio::test]
    async fn test_uploads_need_a_store_that_keeps_audio() {
        let tmp = TempDir::new().unwrap();
        let catalog = TrackCatalog::new(
            tmp.path().join("music"),
            tmp.path().join("scratch"),
            Arc::new(NullStore),
            Arc::new(FakeRemote::default()),
        );

        let err = catalog.add_upload(Vec::new(), None, None).await.unwrap_err();
        assert!(matches!(err, RadioError::InvalidUpload(_)));
    }
}
