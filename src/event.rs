//! Outbound events and the event sink handle.
//!
//! The collaborator owns its sink; the engine only keeps a weak reference
//! and silently skips emission when the sink is unset or has been dropped.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;

use crate::chunk::WireChunk;

/// Events pushed from the engine to the collaborator.
///
/// # Example
///
/// ```
/// use duplex_audio::EngineEvent;
///
/// fn handle_event(event: EngineEvent) {
///     match event {
///         EngineEvent::AudioChunk(chunk) => {
///             println!("{} bytes of wire audio", chunk.data.len());
///         }
///         EngineEvent::MusicPosition { position, duration } => {
///             println!("music at {:?} / {:?}", position, duration);
///         }
///         EngineEvent::MusicState { playing } => {
///             println!("music playing: {}", playing);
///         }
///         EngineEvent::Error { message } => {
///             eprintln!("engine error: {}", message);
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A captured buffer in wire format.
    AudioChunk(WireChunk),

    /// Periodic or seek-triggered music position report.
    MusicPosition {
        /// Current position within the track, in `[0, duration]`.
        position: Duration,
        /// Duration of the current track.
        duration: Duration,
    },

    /// Music started (`true`) or stopped/paused (`false`).
    MusicState {
        /// Whether music is now playing.
        playing: bool,
    },

    /// An asynchronous failure.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl EngineEvent {
    /// Returns the event's wire tag (`audio_chunk`, `music_position`,
    /// `music_state` or `error`).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AudioChunk(_) => "audio_chunk",
            Self::MusicPosition { .. } => "music_position",
            Self::MusicState { .. } => "music_state",
            Self::Error { .. } => "error",
        }
    }

    /// Builds an error event from anything displayable.
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }
}

/// Receiver of engine events.
///
/// Implemented for every `Fn(EngineEvent) + Send + Sync` closure.
pub trait EventSink: Send + Sync {
    /// Handles one event. Called from the control context, never from the
    /// real-time audio callback.
    fn on_event(&self, event: EngineEvent);
}

impl<F> EventSink for F
where
    F: Fn(EngineEvent) + Send + Sync,
{
    fn on_event(&self, event: EngineEvent) {
        self(event);
    }
}

/// Creates a shareable [`EventSink`] from a closure.
///
/// Keep the returned `Arc` alive for as long as events should be delivered;
/// the engine only holds a weak reference.
///
/// ```
/// use duplex_audio::{event_sink, EngineEvent, EventSink};
///
/// let sink = event_sink(|event: EngineEvent| println!("{}", event.type_name()));
/// sink.on_event(EngineEvent::MusicState { playing: false });
/// ```
pub fn event_sink<F>(f: F) -> Arc<dyn EventSink>
where
    F: Fn(EngineEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Optional, weakly-held event sink shared by all engine components.
#[derive(Clone, Default)]
pub(crate) struct EventEmitter {
    sink: Arc<RwLock<Option<Weak<dyn EventSink>>>>,
}

impl EventEmitter {
    pub fn new(sink: Option<&Arc<dyn EventSink>>) -> Self {
        let emitter = Self::default();
        emitter.set(sink);
        emitter
    }

    /// Replaces (or clears) the sink.
    pub fn set(&self, sink: Option<&Arc<dyn EventSink>>) {
        *self.sink.write() = sink.map(Arc::downgrade);
    }

    /// Delivers the event if a live sink is attached.
    pub fn emit(&self, event: EngineEvent) {
        let sink = self.sink.read().as_ref().and_then(Weak::upgrade);
        if let Some(sink) = sink {
            sink.on_event(event);
        }
    }

    pub fn emit_error(&self, err: impl std::fmt::Display) {
        self.emit(EngineEvent::error(err));
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let attached = self
            .sink
            .read()
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0);
        f.debug_struct("EventEmitter")
            .field("attached", &attached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_type_names() {
        let chunk = WireChunk::new(vec![], Duration::ZERO, 24_000, 1);
        assert_eq!(EngineEvent::AudioChunk(chunk).type_name(), "audio_chunk");
        assert_eq!(
            EngineEvent::MusicPosition {
                position: Duration::ZERO,
                duration: Duration::ZERO
            }
            .type_name(),
            "music_position"
        );
        assert_eq!(
            EngineEvent::MusicState { playing: true }.type_name(),
            "music_state"
        );
        assert_eq!(EngineEvent::error("boom").type_name(), "error");
    }

    #[test]
    fn test_emitter_without_sink_is_noop() {
        let emitter = EventEmitter::default();
        emitter.emit(EngineEvent::MusicState { playing: true });
        emitter.emit_error("nobody listening");
    }

    #[test]
    fn test_emitter_delivers_to_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let sink = event_sink(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let emitter = EventEmitter::new(Some(&sink));
        emitter.emit(EngineEvent::MusicState { playing: true });
        emitter.emit(EngineEvent::MusicState { playing: false });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_emitter_holds_weak_reference() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let sink = event_sink(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let emitter = EventEmitter::new(Some(&sink));
        drop(sink);
        emitter.emit(EngineEvent::MusicState { playing: true });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_emitter_clones_share_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let sink = event_sink(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let emitter = EventEmitter::default();
        let clone = emitter.clone();
        emitter.set(Some(&sink));
        clone.emit(EngineEvent::error("shared"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
