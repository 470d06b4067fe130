use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::models::Track;
use crate::services::gateway::PresenceTarget;

/// Best-effort "now playing" status.
///
/// At most one update goes out per `min_interval`; anything sooner is dropped,
/// not delayed. Failures are logged and otherwise ignored.
pub struct PresenceReporter {
    target: Arc<dyn PresenceTarget>,
    min_interval: Duration,
    last_update: Option<Instant>,
}

impl PresenceReporter {
    pub fn new(target: Arc<dyn PresenceTarget>, min_interval: Duration) -> Self {
        Self {
            target,
            min_interval,
            last_update: None,
        }
    }

    /// Returns whether an update was actually sent.
    pub fn report(&mut self, track: &Track) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_update {
            if now.duration_since(last) < self.min_interval {
                debug!("Presence update for {} skipped (rate limited)", track);
                return false;
            }
        }

        match self.target.publish(Some(&track.label())) {
            Ok(()) => {
                self.last_update = Some(now);
                true
            }
            Err(e) => {
                warn!("Failed to update presence: {}", e);
                false
            }
        }
    }

    /// Blanks the status. The next report goes out regardless of the rate limit.
    pub fn clear(&mut self) {
        self.last_update = None;
        if let Err(e) = self.target.publish(None) {
            warn!("Failed to clear presence: {}", e);
        }
    }
}
