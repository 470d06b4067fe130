use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Serialize};

use super::track::{Track, TrackRecord};

/// Saved playlists by name. Each playlist keeps its own copy of the track
/// fields taken when it was added, so later catalog changes don't touch it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistBook {
    playlists: BTreeMap<String, Vec<TrackRecord>>,
}

impl PlaylistBook {
    pub fn insert(&mut self, name: impl Into<String>, tracks: &[Track]) {
        let records = tracks.iter().map(TrackRecord::from).collect();
        self.playlists.insert(name.into(), records);
    }

    pub fn insert_records(&mut self, name: impl Into<String>, records: Vec<TrackRecord>) {
        self.playlists.insert(name.into(), records);
    }

    /// Tracks of a saved playlist, skipping snapshots that no longer parse.
    pub fn tracks(&self, name: &str) -> Option<Vec<Track>> {
        let records = self.playlists.get(name)?;
        let tracks = records
            .iter()
            .cloned()
            .filter_map(|record| match Track::try_from(record) {
                Ok(track) => Some(track),
                Err(e) => {
                    warn!("Skipping malformed entry in playlist \"{}\": {}", name, e);
                    None
                }
            })
            .collect();
        Some(tracks)
    }

    /// Playlist names in sorted order, with their sizes.
    pub fn summaries(&self) -> Vec<(String, usize)> {
        self.playlists
            .iter()
            .map(|(name, records)| (name.clone(), records.len()))
            .collect()
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &[TrackRecord])> {
        self.playlists
            .iter()
            .map(|(name, records)| (name.as_str(), records.as_slice()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.playlists.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.playlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlists.is_empty()
    }
}
