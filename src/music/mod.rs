//! Background music: source resolution, decoding and the playback
//! transport.
//!
//! ```text
//! MusicSource → SourceResolver (asset root / TrackCache + RemoteFetcher)
//!             → TrackDecoder (blocking worker) → MixTrack → MusicVoice
//! ```

mod cache;
mod decode;
mod loader;
mod poller;
mod source;
mod transport;

use std::time::Duration;

pub use cache::{cache_key, RemoteFetcher, TrackCache};
pub use decode::{DecodedTrack, SymphoniaDecoder, TrackDecoder};
pub(crate) use loader::TrackLoader;
pub use source::MusicSource;
pub(crate) use source::SourceResolver;
pub(crate) use transport::MusicTransport;

/// What happens when a track finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Advance through the playlist once, then stop.
    #[default]
    None,
    /// Repeat the current track.
    Track,
    /// Wrap around to the first track after the last.
    Playlist,
}

impl LoopMode {
    /// Parses `none`, `track` or `playlist` (case-insensitive). Unknown
    /// names fall back to `None`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "track" => Self::Track,
            "playlist" => Self::Playlist,
            "none" | "" => Self::None,
            other => {
                tracing::warn!(loop_mode = other, "unknown loop mode, using none");
                Self::None
            }
        }
    }
}

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Nothing scheduled.
    #[default]
    Stopped,
    /// Resolving or decoding a track.
    Loading,
    /// A track is playing.
    Playing,
    /// A track is scheduled but paused.
    Paused,
}

/// Point-in-time view of the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicSnapshot {
    /// Current state.
    pub state: TransportState,
    /// Index of the current track in the playlist.
    pub current_index: usize,
    /// Number of tracks in the playlist.
    pub playlist_len: usize,
    /// Active loop mode.
    pub loop_mode: LoopMode,
    /// Position within the current track.
    pub position: Duration,
    /// Duration of the current track, zero when none is loaded.
    pub duration: Duration,
    /// Music gain in [0, 1].
    pub volume: f32,
}

impl MusicSnapshot {
    /// `true` while a track is playing.
    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_mode_parse() {
        assert_eq!(LoopMode::parse("track"), LoopMode::Track);
        assert_eq!(LoopMode::parse("Playlist"), LoopMode::Playlist);
        assert_eq!(LoopMode::parse("none"), LoopMode::None);
        assert_eq!(LoopMode::parse("shuffle"), LoopMode::None);
    }
}
