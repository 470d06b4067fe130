// HTTP integration tests for radiobot
// These mount the full rocket application on a local client, backed by the
// in-memory store and a canned remote service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::{Client, LocalResponse};
use rocket::serde::json::Value;
use tempfile::TempDir;

use radiobot::error::ResolutionError;
use radiobot::services::gateway::BroadcastGateway;
use radiobot::services::remote::{RemoteCollection, RemoteLookup, RemoteTrack};
use radiobot::services::store::NullStore;
use radiobot::{Config, RadioStation};

const TOKEN: &str = "test-token";

struct CannedRemote;

#[async_trait]
impl RemoteLookup for CannedRemote {
    async fn track(&self, locator: &str) -> Result<RemoteTrack, ResolutionError> {
        if locator.contains("missing") {
            return Err(ResolutionError::NoMetadata(locator.to_string()));
        }
        Ok(RemoteTrack {
            title: "Night Drive".to_string(),
            artist: "Synth Unit".to_string(),
            duration: 240.0,
            url: locator.to_string(),
        })
    }

    async fn collection(&self, locator: &str) -> Result<RemoteCollection, ResolutionError> {
        if locator.contains("empty") {
            return Ok(RemoteCollection::default());
        }
        Ok(RemoteCollection {
            title: Some("Late Set".to_string()),
            tracks: vec![RemoteTrack {
                title: "Opener".to_string(),
                artist: "Synth Unit".to_string(),
                duration: 200.0,
                url: format!("{}/opener", locator),
            }],
        })
    }

    async fn stream_url(&self, locator: &str) -> Result<String, ResolutionError> {
        Ok(format!("{}/stream", locator))
    }
}

struct TestServer {
    client: Client,
    station_gateway: Arc<BroadcastGateway>,
    _tmp: TempDir,
}

async fn test_server() -> TestServer {
    let tmp = TempDir::new().unwrap();
    let vars: HashMap<&str, String> = [
        ("RADIO_TOKEN", TOKEN.to_string()),
        ("RADIO_BACKEND", "local".to_string()),
        ("MUSIC_DIR", tmp.path().join("music").to_string_lossy().into_owned()),
        ("SCRATCH_DIR", tmp.path().join("scratch").to_string_lossy().into_owned()),
    ]
    .into_iter()
    .collect();
    let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();

    let station = RadioStation::with_parts(&config, Arc::new(NullStore), Arc::new(CannedRemote))
        .await
        .unwrap();
    let station_gateway = station.gateway.clone();

    let figment = rocket::Config::figment().merge(("log_level", "off"));
    let client = Client::tracked(station.rocket(figment)).await.unwrap();

    TestServer {
        client,
        station_gateway,
        _tmp: tmp,
    }
}

fn auth() -> Header<'static> {
    Header::new("Authorization", format!("Bearer {}", TOKEN))
}

async fn message(response: LocalResponse<'_>) -> String {
    let body: Value = response.into_json().await.unwrap();
    body["message"].as_str().unwrap_or_default().to_string()
}

#[rocket::async_test]
async fn test_health_needs_no_token() {
    let server = test_server().await;
    let response = server.client.get("/api/health").dispatch().await;

    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tracks"], 0);
    assert_eq!(body["channels"], 0);
}

#[rocket::async_test]
async fn test_health_counts_only_occupied_channels() {
    let server = test_server().await;
    let listening = server.station_gateway.listen("lounge", "ana");
    drop(server.station_gateway.listen("passing-through", "bo"));

    let health: Value = server.client.get("/api/health").dispatch().await.into_json().await.unwrap();
    assert_eq!(health["channels"], 1);

    drop(listening);
    let health: Value = server.client.get("/api/health").dispatch().await.into_json().await.unwrap();
    assert_eq!(health["channels"], 0);
}

#[rocket::async_test]
async fn test_commands_require_the_token() {
    let server = test_server().await;

    let response = server.client.get("/api/queue").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);
    assert_eq!(message(response).await, "Missing or invalid API token");

    let response = server
        .client
        .post("/api/skip")
        .header(Header::new("Authorization", "Bearer wrong"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);
}

#[rocket::async_test]
async fn test_start_outside_a_channel_is_refused() {
    let server = test_server().await;
    let response = server.client.post("/api/start?user=ana").header(auth()).dispatch().await;

    assert_eq!(response.status(), Status::Conflict);
    assert_eq!(message(response).await, "You must be in a voice channel!");
}

#[rocket::async_test]
async fn test_start_with_an_empty_catalog_reports_nothing_to_play() {
    let server = test_server().await;
    let _listening = server.station_gateway.listen("lounge", "ana");

    let response = server.client.post("/api/start?user=ana").header(auth()).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(message(response).await, "Nothing to play: the catalog is empty.");

    let response = server.client.get("/api/nowplaying").header(auth()).dispatch().await;
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["message"], "Nothing is playing right now.");
    assert!(body["track"].is_null());

    let response = server.client.get("/api/queue").header(auth()).dispatch().await;
    assert_eq!(message(response).await, "Queue is empty.");

    let response = server.client.get("/api/status").header(auth()).dispatch().await;
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["state"], "idle");
    assert_eq!(body["connected"], true);
}

#[rocket::async_test]
async fn test_stop_and_skip_while_idle() {
    let server = test_server().await;

    let response = server.client.post("/api/stop").header(auth()).dispatch().await;
    assert_eq!(message(response).await, "Nothing is playing right now.");

    let response = server.client.post("/api/skip").header(auth()).dispatch().await;
    assert_eq!(message(response).await, "Nothing is playing right now.");
}

#[rocket::async_test]
async fn test_add_track_grows_the_catalog() {
    let server = test_server().await;
    let response = server
        .client
        .post("/api/tracks")
        .header(auth())
        .header(ContentType::JSON)
        .body(r#"{"url": "https://audio.example/night-drive"}"#)
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["message"], "Added: Night Drive - Synth Unit");
    assert_eq!(body["track"]["source_type"], "soundcloud");

    let health: Value = server.client.get("/api/health").dispatch().await.into_json().await.unwrap();
    assert_eq!(health["tracks"], 1);
}

#[rocket::async_test]
async fn test_failed_lookup_is_a_bad_gateway() {
    let server = test_server().await;
    let response = server
        .client
        .post("/api/tracks")
        .header(auth())
        .header(ContentType::JSON)
        .body(r#"{"url": "https://audio.example/missing"}"#)
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::BadGateway);
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["ok"], false);
}

#[rocket::async_test]
async fn test_playlists_are_saved_listed_and_loaded() {
    let server = test_server().await;

    let response = server.client.get("/api/playlists").header(auth()).dispatch().await;
    assert_eq!(message(response).await, "No saved playlists.");

    let response = server
        .client
        .post("/api/playlists")
        .header(auth())
        .header(ContentType::JSON)
        .body(r#"{"url": "https://audio.example/sets/late"}"#)
        .dispatch()
        .await;
    assert_eq!(message(response).await, "Saved playlist \"Late Set\" with 1 tracks.");

    let response = server.client.get("/api/playlists").header(auth()).dispatch().await;
    assert_eq!(message(response).await, "Saved playlists:\n- Late Set (1 tracks)");

    // Nobody is listening, so it is queued without starting.
    let response = server
        .client
        .post("/api/playlists/Late%20Set/play?user=ana")
        .header(auth())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let reply = message(response).await;
    assert!(reply.starts_with("Loaded playlist \"Late Set\" (1 tracks)."));
    assert!(reply.ends_with("Join a voice channel and use start to play it."));

    let response = server.client.get("/api/queue").header(auth()).dispatch().await;
    assert_eq!(message(response).await, "Upcoming tracks:\n1. Opener - Synth Unit");
}

#[rocket::async_test]
async fn test_empty_remote_playlist_is_rejected() {
    let server = test_server().await;
    let response = server
        .client
        .post("/api/playlists")
        .header(auth())
        .header(ContentType::JSON)
        .body(r#"{"url": "https://audio.example/sets/empty", "name": "void"}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadGateway);

    let response = server.client.get("/api/playlists").header(auth()).dispatch().await;
    assert_eq!(message(response).await, "No saved playlists.");
}

#[rocket::async_test]
async fn test_unknown_playlist_is_not_found() {
    let server = test_server().await;
    let response = server
        .client
        .post("/api/playlists/nope/play")
        .header(auth())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::NotFound);
    assert_eq!(message(response).await, "No playlist named \"nope\"");
}

#[rocket::async_test]
async fn test_malformed_body_gets_a_json_error() {
    let server = test_server().await;
    let response = server
        .client
        .post("/api/tracks")
        .header(auth())
        .header(ContentType::JSON)
        .body(r#"{"link": 3}"#)
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::UnprocessableEntity);
    assert_eq!(message(response).await, "Malformed request body");
}

#[rocket::async_test]
async fn test_upload_that_is_not_audio_is_rejected() {
    let server = test_server().await;

    let response = server.client.post("/api/uploads").header(auth()).dispatch().await;
    assert_eq!(response.status(), Status::UnprocessableEntity);
    assert_eq!(message(response).await, "Not a playable upload: empty body");

    let response = server
        .client
        .post("/api/uploads?title=Noise")
        .header(auth())
        .body("definitely not an mp3")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::UnprocessableEntity);
}

#[rocket::async_test]
async fn test_presence_starts_empty() {
    let server = test_server().await;
    let response = server.client.get("/api/presence").header(auth()).dispatch().await;

    let body: Value = response.into_json().await.unwrap();
    assert!(body["presence"].is_null());
}
