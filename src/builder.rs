//! Builder pattern for the [`Engine`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::backend::{AudioBackend, CpalBackend};
use crate::config::{AudioConfig, EngineTuning};
use crate::engine::{Engine, EngineContext, Interruption, InterruptionHandler};
use crate::error::{ConfigError, EngineError};
use crate::event::{EventEmitter, EventSink};
use crate::music::{
    MusicTransport, RemoteFetcher, SourceResolver, SymphoniaDecoder, TrackCache, TrackDecoder,
    TrackLoader,
};

/// Entry point for creating an [`Engine`].
pub struct DuplexAudio;

impl DuplexAudio {
    /// Creates a new builder with default settings.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }
}

/// Builder for configuring an [`Engine`].
///
/// Use [`DuplexAudio::builder()`] to create a new builder.
///
/// # Example
///
/// ```ignore
/// use duplex_audio::{event_sink, DuplexAudio, EngineEvent};
///
/// let sink = event_sink(|event: EngineEvent| tracing::debug!(kind = event.type_name()));
///
/// let engine = DuplexAudio::builder()
///     .event_sink(&sink)
///     .asset_root("assets/music")
///     .cache_dir("/var/cache/duplex-audio")
///     .on_interruption(|i| tracing::info!(?i, "interruption"))
///     .build()?;
/// ```
#[must_use]
pub struct EngineBuilder {
    backend: Option<Arc<dyn AudioBackend>>,
    events: EventEmitter,
    interruption: Option<InterruptionHandler>,
    tuning: EngineTuning,
    cache_dir: Option<PathBuf>,
    asset_root: Option<PathBuf>,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
    decoder: Option<Arc<dyn TrackDecoder>>,
    runtime: Option<Handle>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            backend: None,
            events: EventEmitter::default(),
            interruption: None,
            tuning: EngineTuning::default(),
            cache_dir: None,
            asset_root: None,
            fetcher: None,
            decoder: None,
            runtime: None,
        }
    }

    /// Sets the audio backend. Default: [`CpalBackend`].
    pub fn backend(mut self, backend: Arc<dyn AudioBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the event sink. The engine holds it weakly; keep the `Arc`
    /// alive for as long as events should be delivered.
    pub fn event_sink(self, sink: &Arc<dyn EventSink>) -> Self {
        self.events.set(Some(sink));
        self
    }

    /// Sets a callback for session interruptions.
    pub fn on_interruption<F>(mut self, callback: F) -> Self
    where
        F: Fn(Interruption) + Send + Sync + 'static,
    {
        self.interruption = Some(Arc::new(callback));
        self
    }

    /// Sets engine tuning (ring sizes, poll intervals).
    pub fn tuning(mut self, tuning: EngineTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Directory for downloaded music. Default: a subdirectory of the
    /// system temp dir.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Base directory for relative local music paths.
    pub fn asset_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(dir.into());
        self
    }

    /// Sets the fetcher used for `http(s)` music sources. Without one,
    /// remote sources only play if already cached.
    pub fn fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replaces the music decoder. Default: [`SymphoniaDecoder`].
    pub fn decoder(mut self, decoder: Arc<dyn TrackDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Sets the runtime background tasks are spawned on. Default: the
    /// runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the engine. Nothing touches the audio hardware until
    /// [`Engine::initialize`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoRuntime`] if no runtime was given and `build`
    /// is called outside a tokio runtime.
    pub fn build(self) -> Result<Engine, EngineError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(CpalBackend::new()));
        let cache = self
            .cache_dir
            .map_or_else(TrackCache::in_temp_dir, TrackCache::new);
        let decoder = self
            .decoder
            .unwrap_or_else(|| Arc::new(SymphoniaDecoder));

        tracing::debug!(
            backend = backend.name(),
            cache_dir = %cache.dir().display(),
            remote = self.fetcher.is_some(),
            "building engine"
        );

        let ctx = Arc::new(EngineContext::new(
            backend,
            self.events.clone(),
            self.tuning.clone(),
            runtime.clone(),
        ));

        let resolver = SourceResolver::new(self.asset_root, cache, self.fetcher);
        let loader = TrackLoader::new(resolver, decoder, runtime.clone());
        let music = MusicTransport::new(
            Arc::clone(&ctx.music_voice),
            loader,
            self.events,
            self.tuning.position_poll_interval,
            runtime,
            AudioConfig::default().sample_rate,
        );

        Ok(Engine::new(ctx, music, self.interruption))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = DuplexAudio::builder()
            .backend(Arc::new(MockBackend::default()))
            .build();
        assert!(matches!(
            result,
            Err(EngineError::Config(ConfigError::NoRuntime))
        ));
    }

    #[test]
    fn test_build_with_explicit_runtime() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let engine = DuplexAudio::builder()
            .backend(Arc::new(MockBackend::default()))
            .runtime(rt.handle().clone())
            .build()
            .unwrap();
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_build_inside_runtime() {
        let engine = DuplexAudio::builder()
            .backend(Arc::new(MockBackend::default()))
            .build()
            .unwrap();
        assert!(!engine.is_running());
        assert!(!engine.is_recording());
    }
}
