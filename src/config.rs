use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

// Stream configuration
pub const CHUNK_SIZE: usize = 1024 * 16; // 16 KB reads from the transcoder
pub const BROADCAST_CHANNEL_CAPACITY: usize = 512;

// Command replies
pub const QUEUE_PREVIEW_LEN: usize = 5;

// Uploaded audio (document store only)
pub const MAX_UPLOAD_MB: u64 = 50;

// Defaults
pub const DEFAULT_REMOTE_API_URL: &str = "https://api-v2.soundcloud.com";
pub const DEFAULT_WATCHDOG_SECS: u64 = 30 * 60;
pub const DEFAULT_PRESENCE_SECS: u64 = 5;
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 60;

/// Where tracks and playlists live, and how remote tracks are looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Local folder only, nothing persisted.
    Local,
    /// Local folder plus `tracks.json` / `playlists.json`, remote lookups via the extractor.
    PersistedJson,
    /// Same files as `PersistedJson`, remote lookups via the HTTP API.
    RemoteApi,
    /// Tracks, playlists and audio blobs in a database.
    DocumentStore,
}

impl FromStr for Backend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "json" => Ok(Backend::PersistedJson),
            "api" => Ok(Backend::RemoteApi),
            "docstore" => Ok(Backend::DocumentStore),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub backend: Backend,
    pub music_dir: PathBuf,
    pub tracks_file: PathBuf,
    pub playlists_file: PathBuf,
    pub storage_url: Option<String>,
    pub remote_api_url: String,
    pub remote_api_client_id: Option<String>,
    pub extractor_bin: String,
    pub ffmpeg_bin: String,
    pub scratch_dir: PathBuf,
    pub resolve_timeout: Duration,
    pub watchdog_interval: Duration,
    pub presence_min_interval: Duration,
    pub host: String,
    pub port: u16,
    pub bitrate_kbps: u32,
}

impl Config {
    /// Reads the process environment, after loading an optional `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token = get("RADIO_TOKEN").ok_or(ConfigError::Missing("RADIO_TOKEN"))?;

        let backend = match get("RADIO_BACKEND") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: "RADIO_BACKEND",
                value,
            })?,
            None => Backend::PersistedJson,
        };

        let storage_url = get("STORAGE_URL");
        if backend == Backend::DocumentStore && storage_url.is_none() {
            return Err(ConfigError::Missing("STORAGE_URL"));
        }

        let remote_api_client_id = get("REMOTE_API_CLIENT_ID");
        if backend == Backend::RemoteApi && remote_api_client_id.is_none() {
            return Err(ConfigError::Missing("REMOTE_API_CLIENT_ID"));
        }

        let seconds = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            parse_or(get(key), key, default).map(Duration::from_secs)
        };

        Ok(Config {
            token,
            backend,
            music_dir: get("MUSIC_DIR").unwrap_or_else(|| "music".into()).into(),
            tracks_file: get("TRACKS_FILE").unwrap_or_else(|| "tracks.json".into()).into(),
            playlists_file: get("PLAYLISTS_FILE")
                .unwrap_or_else(|| "playlists.json".into())
                .into(),
            storage_url,
            remote_api_url: get("REMOTE_API_URL")
                .unwrap_or_else(|| DEFAULT_REMOTE_API_URL.to_string()),
            remote_api_client_id,
            extractor_bin: get("EXTRACTOR_BIN").unwrap_or_else(|| "yt-dlp".into()),
            ffmpeg_bin: get("FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".into()),
            scratch_dir: get("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("radiobot")),
            resolve_timeout: seconds("RESOLVE_TIMEOUT_SECS", DEFAULT_RESOLVE_TIMEOUT_SECS)?,
            watchdog_interval: seconds("WATCHDOG_INTERVAL_SECS", DEFAULT_WATCHDOG_SECS)?,
            presence_min_interval: seconds("PRESENCE_MIN_INTERVAL_SECS", DEFAULT_PRESENCE_SECS)?,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(get("PORT"), "PORT", 8000)?,
            bitrate_kbps: parse_or(get("AUDIO_BITRATE_KBPS"), "AUDIO_BITRATE_KBPS", 128)?,
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
