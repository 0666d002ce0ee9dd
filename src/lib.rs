//! # duplex-audio
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time full-duplex audio core for voice bots.
//!
//! `duplex-audio` captures the microphone and delivers it as fixed-format
//! wire chunks (16-bit little-endian PCM), plays back wire chunks received
//! from a remote peer, and mixes a background-music track underneath. It
//! survives device reconfiguration (route changes, sample-rate changes,
//! stopped output) without the collaborator re-initializing.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use duplex_audio::{event_sink, AudioConfig, DuplexAudio, EngineEvent, SessionConfig};
//!
//! let sink = event_sink(|event: EngineEvent| {
//!     if let EngineEvent::Error { message } = event {
//!         tracing::warn!(%message, "engine error");
//!     }
//! });
//!
//! let engine = DuplexAudio::builder().event_sink(&sink).build()?;
//! engine.initialize(AudioConfig::default(), SessionConfig::default())?;
//!
//! // Microphone → peer
//! let mut chunks = engine.start_recording()?;
//! tokio::spawn(async move {
//!     while let Some(chunk) = chunks.next().await {
//!         // send chunk.data over the network
//!     }
//! });
//!
//! // Peer → speaker
//! engine.play_audio_chunk(&bytes_from_peer)?;
//!
//! // Music underneath
//! engine.play_background_music("lobby.mp3", true).await;
//! engine.set_background_music_volume(0.3);
//!
//! engine.shutdown_all();
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Audio callbacks**: capture tap and output render never block; they
//!   use `try_lock`, atomics and a lock-free SPSC ring
//! - **Converters**: published as an immutable pair behind a generation
//!   counter, so the callbacks never see a half-built converter
//! - **Tokio runtime**: the capture bridge, music loading, position polling
//!   and device notifications run here, and every event is emitted here

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod backend;
mod builder;
mod chunk;
mod config;
mod engine;
mod error;
mod event;
pub mod format;
mod graph;
pub mod music;
mod pipeline;
mod stats;

pub use backend::{
    AudioBackend, CpalBackend, DeviceInfo, DeviceNotification, HardwarePreferences, MockBackend,
};
pub use builder::{DuplexAudio, EngineBuilder};
pub use chunk::{WireChunk, WIRE_BYTES_PER_SAMPLE};
pub use config::{
    AudioConfig, EngineTuning, SessionCategory, SessionConfig, SessionMode, SessionOption,
    VoiceProcessing, WIRE_SAMPLE_RATE,
};
pub use engine::{Engine, Interruption, InterruptionHandler};
pub use error::{
    ConfigError, ConversionError, DeviceError, EngineError, PlaybackError, ResolutionError,
};
pub use event::{event_sink, EngineEvent, EventSink};
pub use format::{FormatProfile, FormatSet};
pub use music::{LoopMode, MusicSnapshot, MusicSource, RemoteFetcher, TrackCache, TransportState};
pub use pipeline::{ChunkStream, PlaybackState};
pub use stats::EngineStats;
