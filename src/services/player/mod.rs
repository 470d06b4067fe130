//! The playback loop: one task owns the session and the queue, and every
//! change to them arrives as a `PlayerEvent` on its channel.

mod continuation;

pub use continuation::{PlaybackState, PlayerStatus, TrackSource};

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};

use crate::error::{RadioError, ResolutionError, Result, SinkError};
use crate::models::Track;
use crate::services::catalog::TrackCatalog;
use crate::services::gateway::VoiceGateway;
use crate::services::presence::PresenceReporter;
use crate::services::resolver::{PlayableSource, StreamResolver};
use continuation::Continuation;

type Reply<T> = oneshot::Sender<T>;

pub enum Command {
    Start { user: String, reply: Reply<Result<String>> },
    Stop { reply: Reply<String> },
    Skip { reply: Reply<String> },
    /// Replaces the queue, then starts playback if idle.
    LoadPlaylist {
        name: String,
        tracks: Vec<Track>,
        user: Option<String>,
        reply: Reply<Result<String>>,
    },
    Status { reply: Reply<PlayerStatus> },
    Shutdown { reply: Reply<()> },
}

pub enum PlayerEvent {
    Command(Command),
    Resolved {
        generation: u64,
        track: Track,
        result: std::result::Result<PlayableSource, ResolutionError>,
    },
    SinkFinished {
        generation: u64,
        error: Option<SinkError>,
    },
    Watchdog,
}

/// Handed to the sink with each source; fires exactly once.
pub struct CompletionSignal {
    generation: u64,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl CompletionSignal {
    pub fn complete(self, result: std::result::Result<(), SinkError>) {
        let event = PlayerEvent::SinkFinished {
            generation: self.generation,
            error: result.err(),
        };
        if self.events.send(event).is_err() {
            debug!("Player is gone; dropping completion of generation {}", self.generation);
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(generation: u64) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { generation, events }, rx)
    }
}

impl TrackSource for TrackCatalog {
    fn shuffled_snapshot(&self) -> Vec<Track> {
        TrackCatalog::shuffled_snapshot(self)
    }
}

/// Cheap to clone; every clone talks to the same player task.
#[derive(Clone)]
pub struct PlayerHandle {
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl PlayerHandle {
    /// Starts the player task and its watchdog. The queue starts out as a
    /// shuffle of `source`.
    pub fn spawn(
        gateway: Arc<dyn VoiceGateway>,
        resolver: Arc<dyn StreamResolver>,
        source: Arc<dyn TrackSource>,
        presence: PresenceReporter,
        watchdog_interval: Duration,
    ) -> Self {
        let (events, rx) = mpsc::unbounded_channel();

        let continuation = Continuation::new(gateway, resolver, source, presence, events.clone());
        tokio::spawn(continuation.run(rx));
        spawn_watchdog(events.clone(), watchdog_interval);

        Self { events }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(PlayerEvent::Command(command(reply)))
            .map_err(|_| RadioError::PlayerGone)?;
        rx.await.map_err(|_| RadioError::PlayerGone)
    }

    pub async fn start(&self, user: &str) -> Result<String> {
        let user = user.to_string();
        self.request(|reply| Command::Start { user, reply }).await?
    }

    pub async fn stop(&self) -> Result<String> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn skip(&self) -> Result<String> {
        self.request(|reply| Command::Skip { reply }).await
    }

    pub async fn load_playlist(&self, name: &str, tracks: Vec<Track>, user: Option<&str>) -> Result<String> {
        let name = name.to_string();
        let user = user.map(str::to_string);
        self.request(|reply| Command::LoadPlaylist {
            name,
            tracks,
            user,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<PlayerStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// The attached track, only while actually playing.
    pub async fn now_playing(&self) -> Result<Option<Track>> {
        let status = self.status().await?;
        Ok(match status.state {
            PlaybackState::Playing => status.current,
            _ => None,
        })
    }

    /// Up to the next five tracks.
    pub async fn queue(&self) -> Result<Vec<Track>> {
        Ok(self.status().await?.upcoming)
    }

    /// Stops the sink and ends the player task.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

fn spawn_watchdog(events: mpsc::UnboundedSender<PlayerEvent>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if events.send(PlayerEvent::Watchdog).is_err() {
                info!("Player stopped; watchdog exiting");
                break;
            }
        }
    });
}
