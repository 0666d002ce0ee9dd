//! Capture and playback pipelines.
//!
//! ```text
//! Capture:  Input tap (RT) → Ring Buffer → Capture Bridge → event sink + ChunkStreams
//! Playback: play_audio_chunk → PlaybackConverter → Bot voice → Mixer (RT)
//! ```
//!
//! The ring buffer keeps the capture callback from ever blocking; the bot
//! voice queue does the same for the render callback.

mod capture;
mod playback;
mod ring_buffer;

pub use capture::ChunkStream;
pub(crate) use capture::CapturePipeline;
pub use playback::PlaybackState;
pub(crate) use playback::PlaybackPipeline;
