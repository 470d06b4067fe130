use std::io::Cursor;
use std::path::PathBuf;

use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder, Response};
use rocket::Request;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RadioError>;

#[derive(Error, Debug)]
pub enum RadioError {
    #[error("You must be in a voice channel!")]
    NotInChannel,

    #[error("No playlist named \"{0}\"")]
    UnknownPlaylist(String),

    #[error("Player is not running")]
    PlayerGone,

    #[error("Not a playable upload: {0}")]
    InvalidUpload(String),

    #[error("This backend does not keep uploaded audio")]
    UploadsUnsupported,

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A track or collection could not be turned into metadata or a playable source.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("failed to run extractor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("extractor exited with status {code}: {stderr}")]
    Extractor { code: i32, stderr: String },

    #[error("resolution timed out after {0}s")]
    Timeout(u64),

    #[error("unreadable metadata: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no usable metadata for {0}")]
    NoMetadata(String),

    #[error("no playable stream for {0}")]
    NoStream(String),

    #[error("no tracks found at {0}")]
    NoTracks(String),

    #[error("track file is missing: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("stored audio {0} not found")]
    MissingBlob(String),

    #[error("storage error: {0}")]
    Storage(#[from] PersistenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Playback subsystem failures. The continuation treats every one of them as a completion.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to start transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("transcoder exited abnormally: {0}")]
    Exited(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("presence update rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

impl RadioError {
    pub fn status(&self) -> Status {
        match self {
            RadioError::NotInChannel => Status::Conflict,
            RadioError::UnknownPlaylist(_) => Status::NotFound,
            RadioError::PlayerGone => Status::ServiceUnavailable,
            RadioError::InvalidUpload(_) => Status::UnprocessableEntity,
            RadioError::UploadsUnsupported => Status::NotImplemented,
            RadioError::Resolution(_) => Status::BadGateway,
            RadioError::Persistence(_) => Status::InternalServerError,
            RadioError::Sink(_) => Status::ServiceUnavailable,
            RadioError::Config(_) => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for RadioError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let body = serde_json::json!({
            "ok": false,
            "message": self.to_string(),
        })
        .to_string();

        Response::build()
            .status(self.status())
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}
