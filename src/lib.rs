// Library exports for the radiobot crate.
// The binary and the integration tests both build on this API.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod radio;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::{Backend, Config};
pub use error::{RadioError, Result};
pub use models::{Origin, Track};
pub use radio::RadioStation;
pub use services::catalog::TrackCatalog;
pub use services::player::{PlaybackState, PlayerHandle};
