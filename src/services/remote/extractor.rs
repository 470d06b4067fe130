use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use tokio::process::Command;

use super::{non_empty, RemoteCollection, RemoteLookup, RemoteTrack};
use crate::error::ResolutionError;

/// Runs the external media extractor (`yt-dlp` compatible) as a subprocess.
#[derive(Debug, Clone)]
pub struct Extractor {
    program: String,
    timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractedInfo {
    #[serde(default, rename = "_type")]
    kind: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    entries: Option<Vec<ExtractedInfo>>,
}

impl ExtractedInfo {
    fn is_collection(&self) -> bool {
        self.entries.is_some() || self.kind.as_deref() == Some("playlist")
    }
}

impl Extractor {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, ResolutionError> {
        debug!("Running {} {}", self.program, args.join(" "));

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ResolutionError::Spawn)?;

        // On timeout the child is dropped, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ResolutionError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolutionError::Extractor {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.lines().last().unwrap_or_default().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn info(&self, locator: &str) -> Result<ExtractedInfo, ResolutionError> {
        let stdout = self
            .run(&["--dump-single-json", "--flat-playlist", "--no-warnings", "--", locator])
            .await?;
        Ok(serde_json::from_str(stdout.trim())?)
    }
}

fn track_from_info(info: ExtractedInfo, locator: &str) -> Result<RemoteTrack, ResolutionError> {
    if info.is_collection() {
        return Err(ResolutionError::NoMetadata(locator.to_string()));
    }

    let title = non_empty(info.title).ok_or_else(|| ResolutionError::NoMetadata(locator.to_string()))?;

    Ok(RemoteTrack {
        title,
        artist: non_empty(info.uploader).unwrap_or_else(|| "Unknown".to_string()),
        duration: info.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0),
        url: locator.to_string(),
    })
}

fn collection_from_info(info: ExtractedInfo, locator: &str) -> RemoteCollection {
    if !info.is_collection() {
        // A single track is a collection of one.
        return match track_from_info(info, locator) {
            Ok(track) => RemoteCollection {
                title: None,
                tracks: vec![track],
            },
            Err(_) => RemoteCollection::default(),
        };
    }

    let tracks = info
        .entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| {
            let url = non_empty(entry.webpage_url).or_else(|| non_empty(entry.url))?;
            Some(RemoteTrack {
                title: non_empty(entry.title).unwrap_or_else(|| "Unknown".to_string()),
                artist: non_empty(entry.uploader).unwrap_or_else(|| "Unknown".to_string()),
                duration: entry.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0),
                url,
            })
        })
        .collect();

    RemoteCollection {
        title: non_empty(info.title),
        tracks,
    }
}

#[async_trait]
impl RemoteLookup for Extractor {
    async fn track(&self, locator: &str) -> Result<RemoteTrack, ResolutionError> {
        track_from_info(self.info(locator).await?, locator)
    }

    async fn collection(&self, locator: &str) -> Result<RemoteCollection, ResolutionError> {
        Ok(collection_from_info(self.info(locator).await?, locator))
    }

    async fn stream_url(&self, locator: &str) -> Result<String, ResolutionError> {
        let stdout = self
            .run(&["-f", "bestaudio/best", "--get-url", "--no-playlist", "--no-warnings", "--", locator])
            .await?;

        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ResolutionError::NoStream(locator.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(json: serde_json::Value) -> ExtractedInfo {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_track_defaults() {
        let track = track_from_info(
            info(serde_json::json!({"title": "Sunrise", "duration": 184})),
            "https://soundcloud.com/a/sunrise",
        )
        .unwrap();

        assert_eq!(track.title, "Sunrise");
        assert_eq!(track.artist, "Unknown");
        assert_eq!(track.duration, 184.0);
        assert_eq!(track.url, "https://soundcloud.com/a/sunrise");
    }

    #[test]
    fn test_track_without_title_has_no_usable_metadata() {
        let err = track_from_info(info(serde_json::json!({"uploader": "x"})), "u").unwrap_err();
        assert!(matches!(err, ResolutionError::NoMetadata(_)));

        let err = track_from_info(
            info(serde_json::json!({"_type": "playlist", "title": "Set", "entries": []})),
            "u",
        )
        .unwrap_err();
        assert!(matches!(err, ResolutionError::NoMetadata(_)));
    }

    #[test]
    fn test_collection_entries() {
        let collection = collection_from_info(
            info(serde_json::json!({
                "_type": "playlist",
                "title": "Late Night",
                "entries": [
                    {"url": "https://s/one", "title": "One", "uploader": "A", "duration": 61.5},
                    {"title": "No url"},
                    {"url": "https://s/two"}
                ]
            })),
            "https://s/sets/late-night",
        );

        assert_eq!(collection.title.as_deref(), Some("Late Night"));
        assert_eq!(collection.tracks.len(), 2);
        assert_eq!(collection.tracks[0].artist, "A");
        assert_eq!(collection.tracks[1].title, "Unknown");
        assert_eq!(collection.tracks[1].duration, 0.0);
    }

    #[test]
    fn test_single_track_is_a_collection_of_one() {
        let collection = collection_from_info(info(serde_json::json!({"title": "Solo"})), "https://s/solo");
        assert_eq!(collection.tracks.len(), 1);
        assert_eq!(collection.tracks[0].url, "https://s/solo");
    }

    #[cfg(unix)]
    fn fake_extractor(dir: &tempfile::TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fake-extractor");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_url_is_first_output_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let program = fake_extractor(&dir, "echo\necho https://cdn.example/audio.opus?sig=1");
        let extractor = Extractor::new(program, Duration::from_secs(10));

        let url = extractor.stream_url("https://s/x").await.unwrap();
        assert_eq!(url, "https://cdn.example/audio.opus?sig=1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extractor_failure_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let program = fake_extractor(&dir, "echo 'ERROR: Unsupported URL' >&2\nexit 1");
        let extractor = Extractor::new(program, Duration::from_secs(10));

        match extractor.track("https://nowhere").await.unwrap_err() {
            ResolutionError::Extractor { code, stderr } => {
                assert_eq!(code, 1);
                assert_eq!(stderr, "ERROR: Unsupported URL");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_extractor_times_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let program = fake_extractor(&dir, "sleep 5");
        let extractor = Extractor::new(program, Duration::from_millis(200));

        let err = extractor.stream_url("https://s/x").await.unwrap_err();
        assert!(matches!(err, ResolutionError::Timeout(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_locator_is_never_read_as_an_option() {
        let dir = tempfile::TempDir::new().unwrap();
        let program = fake_extractor(
            &dir,
            r#"last=""; before=""
for arg in "$@"; do before=$last; last=$arg; done
[ "$before" = "--" ] || { echo "locator not separated from options" >&2; exit 2; }
case "$1" in
  --dump-single-json) printf '{"title": "%s"}\n' "$last" ;;
  *) printf '%s\n' "$last" ;;
esac"#,
        );
        let extractor = Extractor::new(program, Duration::from_secs(10));
        let hostile = "--config-location=/tmp/evil.conf";

        let track = extractor.track(hostile).await.unwrap();
        assert_eq!(track.title, hostile);
        assert_eq!(track.url, hostile);

        assert_eq!(extractor.stream_url(hostile).await.unwrap(), hostile);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let extractor = Extractor::new("/nonexistent/yt-dlp", Duration::from_secs(1));
        let err = extractor.track("https://s/x").await.unwrap_err();
        assert!(matches!(err, ResolutionError::Spawn(_)));
    }
}
