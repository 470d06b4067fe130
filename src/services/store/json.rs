use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::fs;

use super::CatalogStore;
use crate::error::PersistenceError;
use crate::models::{PlaylistBook, Track, TrackRecord};

/// `tracks.json` holds an array of track records, `playlists.json` an object
/// mapping playlist names to arrays of track records. Both are rewritten in
/// full on every save.
#[derive(Debug, Clone)]
pub struct JsonStore {
    tracks_file: PathBuf,
    playlists_file: PathBuf,
}

impl JsonStore {
    pub fn new(tracks_file: impl Into<PathBuf>, playlists_file: impl Into<PathBuf>) -> Self {
        Self {
            tracks_file: tracks_file.into(),
            playlists_file: playlists_file.into(),
        }
    }

    pub fn tracks_file(&self) -> &Path {
        &self.tracks_file
    }

    pub fn playlists_file(&self) -> &Path {
        &self.playlists_file
    }
}

#[async_trait]
impl CatalogStore for JsonStore {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn load_tracks(&self) -> Result<Vec<Track>, PersistenceError> {
        let Some(values) = read_document::<Vec<Value>>(&self.tracks_file).await? else {
            return Ok(Vec::new());
        };

        let tracks: Vec<Track> = values
            .into_iter()
            .enumerate()
            .filter_map(|(i, value)| parse_record(value, &self.tracks_file, i))
            .collect();

        info!("Loaded {} tracks from {}", tracks.len(), self.tracks_file.display());
        Ok(tracks)
    }

    async fn save_tracks(&self, tracks: &[Track]) -> Result<(), PersistenceError> {
        let records: Vec<TrackRecord> = tracks.iter().map(TrackRecord::from).collect();
        write_atomic(&self.tracks_file, &serde_json::to_vec_pretty(&records)?).await
    }

    async fn load_playlists(&self) -> Result<PlaylistBook, PersistenceError> {
        let Some(raw) = read_document::<BTreeMap<String, Vec<Value>>>(&self.playlists_file).await?
        else {
            return Ok(PlaylistBook::default());
        };

        let mut book = PlaylistBook::default();
        for (name, values) in raw {
            let records = values
                .into_iter()
                .filter_map(|value| match serde_json::from_value::<TrackRecord>(value) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!("Skipping malformed entry in playlist \"{}\": {}", name, e);
                        None
                    }
                })
                .collect();
            book.insert_records(name, records);
        }

        info!("Loaded {} playlists from {}", book.len(), self.playlists_file.display());
        Ok(book)
    }

    async fn save_playlists(&self, book: &PlaylistBook) -> Result<(), PersistenceError> {
        write_atomic(&self.playlists_file, &serde_json::to_vec_pretty(book)?).await
    }
}

fn parse_record(value: Value, file: &Path, index: usize) -> Option<Track> {
    let record = match serde_json::from_value::<TrackRecord>(value) {
        Ok(record) => record,
        Err(e) => {
            warn!("Skipping malformed record #{} in {}: {}", index, file.display(), e);
            return None;
        }
    };

    match Track::try_from(record) {
        Ok(track) => Some(track),
        Err(e) => {
            warn!("Skipping record #{} in {}: {}", index, file.display(), e);
            None
        }
    }
}

/// Reads and parses `path`. A missing file is `None`; a file that is not
/// valid JSON of the expected shape is moved aside and also reads as `None`.
async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice(&data) {
        Ok(document) => Ok(Some(document)),
        Err(e) => {
            let aside = quarantine(path).await?;
            error!(
                "{} is corrupted ({}); moved to {} and starting empty",
                path.display(),
                e,
                aside.display()
            );
            Ok(None)
        }
    }
}

async fn quarantine(path: &Path) -> Result<PathBuf, PersistenceError> {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    let aside = sibling(path, &format!("corrupt-{}", stamp));
    fs::rename(path, &aside).await?;
    Ok(aside)
}

/// Writes next to the target first, then renames over it.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let tmp = sibling(path, "tmp");
    fs::write(&tmp, data).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
