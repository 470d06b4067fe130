use std::fs;
use std::path::{Path, PathBuf};

use id3::{Tag, TagLike};
use log::{debug, error, warn};

use crate::models::{Origin, Track};

/// Recursively collects the MP3 files under `dir`, sorted by path.
///
/// The folder is created when it does not exist yet. A file whose audio
/// can't be read is skipped with a warning; missing tags only fall back to
/// defaults.
pub fn scan_directory(dir: &Path) -> Vec<Track> {
    if !dir.exists() {
        fs::create_dir_all(dir).unwrap_or_else(|e| {
            error!("Failed to create music directory {}: {}", dir.display(), e);
        });
        return Vec::new();
    }

    let mut tracks = Vec::new();
    collect(dir, &mut tracks);
    tracks.sort_by_key(local_path);
    tracks
}

fn collect(dir: &Path, tracks: &mut Vec<Track>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Error reading directory {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();

        if path.is_dir() {
            collect(&path, tracks);
        } else if is_mp3(&path) {
            match read_track(&path) {
                Ok(track) => tracks.push(track),
                Err(e) => warn!("Error loading track {}: {}", path.display(), e),
            }
        }
    }
}

fn is_mp3(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("mp3"))
        .unwrap_or(false)
}

/// What the file itself says about a track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Probe {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration: f64,
}

/// Reads the duration and ID3 title/artist of one MP3 file. Only an
/// unreadable audio stream is an error; missing tags are `None`.
pub fn probe(path: &Path) -> Result<Probe, mp3_duration::MP3DurationError> {
    let duration = mp3_duration::from_path(path)?.as_secs_f64();

    let (title, artist) = match Tag::read_from_path(path) {
        Ok(tag) => (tag.title().map(str::to_string), tag.artist().map(str::to_string)),
        Err(e) => {
            debug!("Could not read ID3 tags from {}: {}", path.display(), e);
            (None, None)
        }
    };

    Ok(Probe {
        title: title.filter(|t| !t.trim().is_empty()),
        artist: artist.filter(|a| !a.trim().is_empty()),
        duration,
    })
}

fn read_track(path: &Path) -> Result<Track, mp3_duration::MP3DurationError> {
    let probe = probe(path)?;

    let title = probe.title.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown".to_string())
    });
    let artist = probe.artist.unwrap_or_else(|| "Unknown".to_string());

    Ok(Track::local(title, artist, probe.duration, path))
}

fn local_path(track: &Track) -> PathBuf {
    match &track.origin {
        Origin::Local { path } => path.clone(),
        _ => PathBuf::new(),
    }
}
