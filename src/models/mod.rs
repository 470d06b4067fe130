pub mod playlist;
pub mod track;

pub use playlist::PlaylistBook;
pub use track::{Origin, Track, TrackRecord};
