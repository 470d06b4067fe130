use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use super::{Command, CompletionSignal, PlayerEvent};
use crate::config::QUEUE_PREVIEW_LEN;
use crate::error::{RadioError, ResolutionError, Result, SinkError};
use crate::models::Track;
use crate::services::gateway::{AudioSink, VoiceGateway};
use crate::services::presence::PresenceReporter;
use crate::services::resolver::{PlayableSource, StreamResolver};

/// Where the next queue comes from once the current one runs out.
pub trait TrackSource: Send + Sync {
    fn shuffled_snapshot(&self) -> Vec<Track>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Nothing attached and nothing in flight.
    Idle,
    /// Between one track and the next; a resolution may be in flight.
    Advancing,
    Playing,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Advancing => "advancing",
            PlaybackState::Playing => "playing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub current: Option<Track>,
    pub queue_len: usize,
    pub upcoming: Vec<Track>,
    pub connected: bool,
}

pub(super) struct Continuation {
    gateway: Arc<dyn VoiceGateway>,
    resolver: Arc<dyn StreamResolver>,
    source: Arc<dyn TrackSource>,
    presence: PresenceReporter,
    events: mpsc::UnboundedSender<PlayerEvent>,

    state: PlaybackState,
    current: Option<Track>,
    sink: Option<Arc<dyn AudioSink>>,
    queue: VecDeque<Track>,
    // Bumped whenever an advance begins and on stop. Resolutions and
    // completions carrying an older value are ignored.
    generation: u64,
    // Set on refill, cleared once a track reaches the sink. Still set at the
    // next refill means no track of the whole cycle could be attached.
    // How a track ends afterwards does not count against it.
    dry_cycle: bool,
}

impl Continuation {
    pub(super) fn new(
        gateway: Arc<dyn VoiceGateway>,
        resolver: Arc<dyn StreamResolver>,
        source: Arc<dyn TrackSource>,
        presence: PresenceReporter,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Self {
        let queue: VecDeque<Track> = source.shuffled_snapshot().into();
        info!("Shuffled {} tracks into the queue", queue.len());

        Self {
            gateway,
            resolver,
            source,
            presence,
            events,
            state: PlaybackState::Idle,
            current: None,
            sink: None,
            queue,
            generation: 0,
            dry_cycle: false,
        }
    }

    pub(super) async fn run(mut self, mut events: mpsc::UnboundedReceiver<PlayerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PlayerEvent::Command(command) => {
                    if !self.handle_command(command).await {
                        info!("Player shut down");
                        return;
                    }
                }
                PlayerEvent::Resolved {
                    generation,
                    track,
                    result,
                } => self.on_resolved(generation, track, result),
                PlayerEvent::SinkFinished { generation, error } => self.on_sink_finished(generation, error),
                PlayerEvent::Watchdog => self.on_watchdog(),
            }
        }
    }

    /// Returns `false` once the player should exit.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start { user, reply } => {
                let _ = reply.send(self.start(&user).await);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop());
            }
            Command::Skip { reply } => {
                let _ = reply.send(self.skip());
            }
            Command::LoadPlaylist {
                name,
                tracks,
                user,
                reply,
            } => {
                let _ = reply.send(self.load_playlist(&name, tracks, user.as_deref()).await);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown { reply } => {
                self.halt();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn start(&mut self, user: &str) -> Result<String> {
        let channel = self
            .gateway
            .voice_channel_of(user)
            .ok_or(RadioError::NotInChannel)?;

        if self.sink.is_none() {
            self.sink = Some(self.gateway.connect(&channel).await?);
            info!("Joined #{} for {}", channel, user);
        }

        if self.state != PlaybackState::Idle {
            return Ok("Already playing.".to_string());
        }

        self.dry_cycle = false;
        self.advance();
        Ok(match self.state {
            PlaybackState::Idle => "Nothing to play: the catalog is empty.".to_string(),
            _ => "Starting playback...".to_string(),
        })
    }

    fn stop(&mut self) -> String {
        if self.state == PlaybackState::Idle {
            return "Nothing is playing right now.".to_string();
        }

        self.halt();
        info!("Playback stopped; {} tracks left in the queue", self.queue.len());
        "Playback stopped.".to_string()
    }

    fn skip(&mut self) -> String {
        match self.state {
            PlaybackState::Idle => "Nothing is playing right now.".to_string(),
            PlaybackState::Playing => match &self.sink {
                Some(sink) => {
                    info!("Skipping {}", self.describe_current());
                    // The completion of the stopped track drives the advance.
                    sink.stop();
                    "Skipping to next track...".to_string()
                }
                None => {
                    self.advance();
                    "Skipping to next track...".to_string()
                }
            },
            PlaybackState::Advancing => {
                info!("Skipping {} before it started", self.describe_current());
                self.advance();
                "Skipping to next track...".to_string()
            }
        }
    }

    async fn load_playlist(&mut self, name: &str, tracks: Vec<Track>, user: Option<&str>) -> Result<String> {
        self.queue = tracks.into();
        let loaded = format!("Loaded playlist \"{}\" ({} tracks).", name, self.queue.len());
        info!("{}", loaded);

        if self.state != PlaybackState::Idle {
            return Ok(loaded);
        }

        let Some(user) = user else {
            return Ok(loaded);
        };
        match self.start(user).await {
            Ok(started) => Ok(format!("{} {}", loaded, started)),
            Err(RadioError::NotInChannel) => Ok(format!(
                "{} Join a voice channel and use start to play it.",
                loaded
            )),
            Err(e) => Err(e),
        }
    }

    fn status(&self) -> PlayerStatus {
        PlayerStatus {
            state: self.state,
            current: self.current.clone(),
            queue_len: self.queue.len(),
            upcoming: self.queue.iter().take(QUEUE_PREVIEW_LEN).cloned().collect(),
            connected: self.sink.is_some(),
        }
    }

    /// Pops the next track (refilling first if needed) and starts resolving
    /// it off the loop. The result comes back as `PlayerEvent::Resolved`.
    fn advance(&mut self) {
        self.generation += 1;
        self.state = PlaybackState::Advancing;
        self.current = None;

        if self.sink.is_none() {
            warn!("Not connected to a channel; nothing to play into");
            self.settle_idle();
            return;
        }

        if self.queue.is_empty() {
            if self.dry_cycle {
                error!("Every track of the last cycle failed; pausing until the next command");
                self.dry_cycle = false;
                self.settle_idle();
                return;
            }
            self.queue = self.source.shuffled_snapshot().into();
            self.dry_cycle = true;
            debug!("Refilled the queue with {} tracks", self.queue.len());
        }

        let Some(track) = self.queue.pop_front() else {
            info!("Catalog is empty; nothing to play");
            self.settle_idle();
            return;
        };

        self.current = Some(track.clone());
        let generation = self.generation;
        let resolver = Arc::clone(&self.resolver);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = resolver.resolve(&track).await;
            let _ = events.send(PlayerEvent::Resolved {
                generation,
                track,
                result,
            });
        });
    }

    fn on_resolved(
        &mut self,
        generation: u64,
        track: Track,
        result: std::result::Result<PlayableSource, ResolutionError>,
    ) {
        if generation != self.generation || self.state != PlaybackState::Advancing {
            // Dropping a stale source also removes its scratch file.
            debug!("Discarding stale resolution of {}", track);
            return;
        }

        let source = match result {
            Ok(source) => source,
            Err(e) => {
                warn!("Skipping {}: {}", track, e);
                self.advance();
                return;
            }
        };

        let Some(sink) = self.sink.clone() else {
            self.settle_idle();
            return;
        };

        let done = CompletionSignal {
            generation,
            events: self.events.clone(),
        };
        match sink.play(source, done) {
            Ok(()) => {
                info!("Now playing: {}", track);
                self.dry_cycle = false;
                self.state = PlaybackState::Playing;
                self.presence.report(&track);
                self.current = Some(track);
            }
            Err(e) => {
                error!("Could not play {}: {}", track, e);
                self.advance();
            }
        }
    }

    fn on_sink_finished(&mut self, generation: u64, error: Option<SinkError>) {
        if generation != self.generation {
            debug!("Ignoring completion of generation {}", generation);
            return;
        }

        match error {
            Some(e) => warn!("Playback of {} ended with an error: {}", self.describe_current(), e),
            None => debug!("Finished {}", self.describe_current()),
        }

        if self.state == PlaybackState::Playing {
            self.advance();
        }
    }

    fn on_watchdog(&mut self) {
        let Some(sink) = &self.sink else {
            return;
        };
        if sink.is_playing() {
            return;
        }

        match self.state {
            PlaybackState::Playing => {
                warn!("Watchdog: sink went quiet while playing {}; advancing", self.describe_current());
                self.advance();
            }
            PlaybackState::Idle if !self.queue.is_empty() => {
                info!("Watchdog: {} tracks waiting; resuming playback", self.queue.len());
                self.dry_cycle = false;
                self.advance();
            }
            _ => {}
        }
    }

    /// Stops whatever is attached or in flight and goes idle. The queue stays.
    fn halt(&mut self) {
        self.generation += 1;
        if let Some(sink) = &self.sink {
            sink.stop();
        }
        self.state = PlaybackState::Idle;
        self.current = None;
        self.presence.clear();
    }

    fn settle_idle(&mut self) {
        self.state = PlaybackState::Idle;
        self.current = None;
    }

    fn describe_current(&self) -> String {
        self.current
            .as_ref()
            .map(Track::label)
            .unwrap_or_else(|| "nothing".to_string())
    }
}
