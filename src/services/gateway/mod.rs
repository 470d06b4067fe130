//! The outside world the player talks to: who is listening where, the audio
//! output for a channel, and the "now playing" indicator.

mod broadcast;

pub use broadcast::{BroadcastGateway, BroadcastSink, ListenerGuard, Presence};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PresenceError, SinkError};
use crate::services::player::CompletionSignal;
use crate::services::resolver::PlayableSource;

/// Renders one source at a time and fires `done` exactly once when that
/// source ends, fails or is stopped.
pub trait AudioSink: Send + Sync {
    /// Starts rendering `source`. On `Err` the signal is dropped unfired and
    /// the caller handles the failure itself.
    fn play(&self, source: PlayableSource, done: CompletionSignal) -> Result<(), SinkError>;

    /// Ends the current source early. Its completion still fires.
    fn stop(&self);

    fn is_playing(&self) -> bool;
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// The channel `user` currently occupies, if any.
    fn voice_channel_of(&self, user: &str) -> Option<String>;

    /// Joins `channel`, or returns the existing connection to it.
    async fn connect(&self, channel: &str) -> Result<Arc<dyn AudioSink>, SinkError>;
}

pub trait PresenceTarget: Send + Sync {
    /// `None` clears the indicator.
    fn publish(&self, activity: Option<&str>) -> Result<(), PresenceError>;
}
