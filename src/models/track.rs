use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where a track's audio comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A file in the local music folder.
    Local { path: PathBuf },
    /// A page on the remote audio-hosting service. Its stream URL expires, so it
    /// is resolved again on every play.
    Remote { url: String },
    /// An audio blob kept in the document store.
    Stored { id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub title: String,
    pub artist: String,
    /// Seconds, 0 when unknown.
    pub duration: f64,
    pub origin: Origin,
}

impl Track {
    pub fn local(title: impl Into<String>, artist: impl Into<String>, duration: f64, path: impl Into<PathBuf>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            duration: duration.max(0.0),
            origin: Origin::Local { path: path.into() },
        }
    }

    pub fn remote(title: impl Into<String>, artist: impl Into<String>, duration: f64, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            duration: duration.max(0.0),
            origin: Origin::Remote { url: url.into() },
        }
    }

    pub fn stored(title: impl Into<String>, artist: impl Into<String>, duration: f64, id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            duration: duration.max(0.0),
            origin: Origin::Stored { id: id.into() },
        }
    }

    /// `"<title> - <artist>"`, the form used in replies and presence.
    pub fn label(&self) -> String {
        format!("{} - {}", self.title, self.artist)
    }

    pub fn is_local(&self) -> bool {
        matches!(self.origin, Origin::Local { .. })
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.title, self.artist)
    }
}

/// The persisted shape of a track, shared by `tracks.json`, `playlists.json`
/// and the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub title: String,
    #[serde(default = "unknown")]
    pub artist: String,
    #[serde(default)]
    pub duration: f64,
    pub source_type: String,
    pub source_path: String,
    #[serde(default)]
    pub url: Option<String>,
}

fn unknown() -> String {
    "Unknown".to_string()
}

const SOURCE_LOCAL: &str = "local";
const SOURCE_REMOTE: &str = "soundcloud";
const SOURCE_STORED: &str = "stored";

impl From<&Track> for TrackRecord {
    fn from(track: &Track) -> Self {
        let (source_type, source_path, url) = match &track.origin {
            Origin::Local { path } => (SOURCE_LOCAL, path.to_string_lossy().into_owned(), None),
            Origin::Remote { url } => (SOURCE_REMOTE, url.clone(), Some(url.clone())),
            Origin::Stored { id } => (SOURCE_STORED, id.clone(), None),
        };

        TrackRecord {
            title: track.title.clone(),
            artist: track.artist.clone(),
            duration: track.duration,
            source_type: source_type.to_string(),
            source_path,
            url,
        }
    }
}

impl TryFrom<TrackRecord> for Track {
    type Error = String;

    fn try_from(record: TrackRecord) -> Result<Self, Self::Error> {
        let origin = match record.source_type.as_str() {
            SOURCE_LOCAL => Origin::Local {
                path: PathBuf::from(record.source_path),
            },
            SOURCE_REMOTE => Origin::Remote {
                // Older files only filled in one of the two fields.
                url: record
                    .url
                    .filter(|u| !u.is_empty())
                    .unwrap_or(record.source_path),
            },
            SOURCE_STORED => Origin::Stored {
                id: record.source_path,
            },
            other => return Err(format!("unknown source_type \"{}\"", other)),
        };

        if !record.duration.is_finite() {
            return Err(format!("invalid duration for \"{}\"", record.title));
        }

        Ok(Track {
            title: record.title,
            artist: record.artist,
            duration: record.duration.max(0.0),
            origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_record_shape() {
        let track = Track::remote("Night Drive", "Kavinsky", 241.5, "https://soundcloud.com/k/night-drive");
        let json = serde_json::to_value(TrackRecord::from(&track)).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "title": "Night Drive",
                "artist": "Kavinsky",
                "duration": 241.5,
                "source_type": "soundcloud",
                "source_path": "https://soundcloud.com/k/night-drive",
                "url": "https://soundcloud.com/k/night-drive",
            })
        );
    }

    #[test]
    fn test_record_with_only_source_path_still_loads() {
        let record: TrackRecord = serde_json::from_value(serde_json::json!({
            "title": "Loop",
            "source_type": "soundcloud",
            "source_path": "https://soundcloud.com/a/loop",
            "url": null,
        }))
        .unwrap();

        let track = Track::try_from(record).unwrap();
        assert_eq!(track.artist, "Unknown");
        assert_eq!(track.duration, 0.0);
        assert_eq!(
            track.origin,
            Origin::Remote {
                url: "https://soundcloud.com/a/loop".into()
            }
        );
    }

    #[test]
    fn test_unknown_source_type_is_rejected() {
        let record = TrackRecord {
            title: "x".into(),
            artist: "y".into(),
            duration: 1.0,
            source_type: "youtube".into(),
            source_path: "abc".into(),
            url: None,
        };
        assert!(Track::try_from(record).is_err());
    }

    #[test]
    fn test_label() {
        let track = Track::local("Intro", "The xx", 128.0, "music/intro.mp3");
        assert_eq!(track.label(), "Intro - The xx");
        assert_eq!(track.to_string(), track.label());
        assert!(track.is_local());
    }
}
