use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use rocket::data::{Data, ToByteUnit};
use rocket::http::{ContentType, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::stream::ByteStream;
use rocket::serde::json::{json, Json, Value};
use rocket::serde::Deserialize;
use rocket::tokio::select;
use rocket::tokio::sync::broadcast::error::RecvError;
use rocket::{catch, get, post, Shutdown, State};

use crate::config::MAX_UPLOAD_MB;
use crate::error::{RadioError, Result};
use crate::models::{Track, TrackRecord};
use crate::services::catalog::TrackCatalog;
use crate::services::gateway::BroadcastGateway;
use crate::services::player::PlayerHandle;

/// The bearer token every `/api` command must carry.
pub struct ApiToken(pub String);

/// Request guard: present only when the request carries the right token.
pub struct Authorized;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Authorized {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(expected) = req.rocket().state::<ApiToken>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };

        let given = req
            .headers()
            .get_one("Authorization")
            .and_then(|value| value.strip_prefix("Bearer "));

        match given {
            Some(token) if token == expected.0 => Outcome::Success(Authorized),
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct AddTrack {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct AddPlaylist {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn reply(message: impl Into<String>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "message": message.into(),
    }))
}

fn track_json(track: &Track) -> Value {
    json!(TrackRecord::from(track))
}

#[post("/api/start?<user>")]
pub async fn start(_auth: Authorized, user: &str, player: &State<PlayerHandle>) -> Result<Json<Value>> {
    Ok(reply(player.start(user).await?))
}

#[post("/api/stop")]
pub async fn stop(_auth: Authorized, player: &State<PlayerHandle>) -> Result<Json<Value>> {
    Ok(reply(player.stop().await?))
}

#[post("/api/skip")]
pub async fn skip(_auth: Authorized, player: &State<PlayerHandle>) -> Result<Json<Value>> {
    Ok(reply(player.skip().await?))
}

#[get("/api/nowplaying")]
pub async fn now_playing(_auth: Authorized, player: &State<PlayerHandle>) -> Result<Json<Value>> {
    let response = match player.now_playing().await? {
        Some(track) => json!({
            "ok": true,
            "message": format!("Now Playing: {}", track.label()),
            "track": track_json(&track),
        }),
        None => json!({
            "ok": true,
            "message": "Nothing is playing right now.",
            "track": null,
        }),
    };
    Ok(Json(response))
}

#[get("/api/queue")]
pub async fn queue(_auth: Authorized, player: &State<PlayerHandle>) -> Result<Json<Value>> {
    let upcoming = player.queue().await?;
    if upcoming.is_empty() {
        return Ok(Json(json!({
            "ok": true,
            "message": "Queue is empty.",
            "tracks": [],
        })));
    }

    let mut message = String::from("Upcoming tracks:");
    for (i, track) in upcoming.iter().enumerate() {
        message.push_str(&format!("\n{}. {}", i + 1, track.label()));
    }

    Ok(Json(json!({
        "ok": true,
        "message": message,
        "tracks": upcoming.iter().map(track_json).collect::<Vec<_>>(),
    })))
}

#[get("/api/status")]
pub async fn status(
    _auth: Authorized,
    player: &State<PlayerHandle>,
    catalog: &State<Arc<TrackCatalog>>,
) -> Result<Json<Value>> {
    let status = player.status().await?;
    Ok(Json(json!({
        "ok": true,
        "state": status.state,
        "connected": status.connected,
        "current": status.current.as_ref().map(track_json),
        "queue_length": status.queue_len,
        "catalog_size": catalog.len(),
    })))
}

#[post("/api/tracks", data = "<body>")]
pub async fn add_track(
    _auth: Authorized,
    body: Json<AddTrack>,
    catalog: &State<Arc<TrackCatalog>>,
) -> Result<Json<Value>> {
    let track = catalog.add_remote(&body.url).await?;
    Ok(Json(json!({
        "ok": true,
        "message": format!("Added: {}", track.label()),
        "track": track_json(&track),
    })))
}

#[post("/api/playlists", data = "<body>")]
pub async fn add_playlist(
    _auth: Authorized,
    body: Json<AddPlaylist>,
    catalog: &State<Arc<TrackCatalog>>,
) -> Result<Json<Value>> {
    let (name, count) = catalog.add_playlist(&body.url, body.name.as_deref()).await?;
    Ok(Json(json!({
        "ok": true,
        "message": format!("Saved playlist \"{}\" with {} tracks.", name, count),
        "name": name,
        "tracks": count,
    })))
}

#[get("/api/playlists")]
pub fn list_playlists(_auth: Authorized, catalog: &State<Arc<TrackCatalog>>) -> Json<Value> {
    let summaries = catalog.playlist_summaries();
    if summaries.is_empty() {
        return Json(json!({
            "ok": true,
            "message": "No saved playlists.",
            "playlists": [],
        }));
    }

    let mut message = String::from("Saved playlists:");
    for (name, count) in &summaries {
        message.push_str(&format!("\n- {} ({} tracks)", name, count));
    }

    Json(json!({
        "ok": true,
        "message": message,
        "playlists": summaries
            .iter()
            .map(|(name, count)| json!({ "name": name, "tracks": count }))
            .collect::<Vec<_>>(),
    }))
}

#[post("/api/playlists/<name>/play?<user>")]
pub async fn play_playlist(
    _auth: Authorized,
    name: &str,
    user: Option<&str>,
    catalog: &State<Arc<TrackCatalog>>,
    player: &State<PlayerHandle>,
) -> Result<Json<Value>> {
    let tracks = catalog
        .playlist(name)
        .ok_or_else(|| RadioError::UnknownPlaylist(name.to_string()))?;
    Ok(reply(player.load_playlist(name, tracks, user).await?))
}

#[post("/api/uploads?<title>&<artist>", data = "<audio>")]
pub async fn upload(
    _auth: Authorized,
    title: Option<String>,
    artist: Option<String>,
    audio: Data<'_>,
    catalog: &State<Arc<TrackCatalog>>,
) -> Result<Json<Value>> {
    let bytes = audio
        .open(MAX_UPLOAD_MB.mebibytes())
        .into_bytes()
        .await
        .map_err(|e| RadioError::InvalidUpload(e.to_string()))?;
    if !bytes.is_complete() {
        return Err(RadioError::InvalidUpload(format!("larger than {} MiB", MAX_UPLOAD_MB)));
    }

    let track = catalog.add_upload(bytes.into_inner(), title, artist).await?;
    Ok(Json(json!({
        "ok": true,
        "message": format!("Added: {}", track.label()),
        "track": track_json(&track),
    })))
}

#[get("/api/presence")]
pub fn presence(_auth: Authorized, gateway: &State<Arc<BroadcastGateway>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "presence": gateway.presence(),
    }))
}

#[get("/api/health")]
pub fn health_check(catalog: &State<Arc<TrackCatalog>>, gateway: &State<Arc<BroadcastGateway>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "tracks": catalog.len(),
        "channels": gateway.channel_count(),
        "server_time": chrono::Local::now().to_rfc3339(),
    }))
}

/// Listening to a channel is what puts a user "in" it.
#[get("/stream/<channel>?<user>")]
pub fn stream(
    channel: &str,
    user: &str,
    gateway: &State<Arc<BroadcastGateway>>,
    mut shutdown: Shutdown,
) -> (ContentType, ByteStream![Bytes]) {
    let mut listener = gateway.inner().listen(channel, user);

    let audio = ByteStream! {
        loop {
            let chunk = select! {
                chunk = listener.recv() => chunk,
                _ = &mut shutdown => break,
            };

            match chunk {
                Ok(bytes) => yield bytes,
                Err(RecvError::Lagged(skipped)) => debug!("Listener fell behind by {} chunks", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    };

    (ContentType::new("audio", "mpeg"), audio)
}

fn failure(status: Status, message: &str) -> (Status, Json<Value>) {
    (
        status,
        Json(json!({
            "ok": false,
            "message": message,
        })),
    )
}

#[catch(401)]
pub fn unauthorized() -> (Status, Json<Value>) {
    failure(Status::Unauthorized, "Missing or invalid API token")
}

#[catch(404)]
pub fn not_found() -> (Status, Json<Value>) {
    failure(Status::NotFound, "Not found")
}

#[catch(422)]
pub fn unprocessable() -> (Status, Json<Value>) {
    failure(Status::UnprocessableEntity, "Malformed request body")
}

#[catch(500)]
pub fn server_error() -> (Status, Json<Value>) {
    failure(Status::InternalServerError, "Internal server error")
}
