//! Engine lifecycle: session activation, the output graph, reconfiguration
//! recovery and shutdown.
//!
//! The [`Engine`] is the single entry point for the collaborator. Every
//! inbound call maps to one method here; the pipelines and the music
//! transport do the actual work.

mod context;

pub(crate) use context::EngineContext;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use self::context::playback_queue_capacity;
use crate::backend::{DeviceNotification, HardwarePreferences, OutputStream};
use crate::config::{AudioConfig, SessionConfig, VoiceProcessing};
use crate::error::{ConfigError, ConversionError, DeviceError, EngineError, PlaybackError};
use crate::event::EventSink;
use crate::format::{build_converters, FormatSet};
use crate::graph::Mixer;
use crate::music::{LoopMode, MusicSnapshot, MusicSource, MusicTransport};
use crate::pipeline::{CapturePipeline, ChunkStream, PlaybackPipeline, PlaybackState};
use crate::stats::EngineStats;

/// Interruption phases forwarded to the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// The session was taken away. Bot playback has been stopped.
    Began,
    /// The session is available again. Nothing resumes automatically.
    Ended {
        /// Platform hint that resuming is appropriate.
        should_resume: bool,
    },
}

/// Callback invoked on interruptions.
pub type InterruptionHandler = Arc<dyn Fn(Interruption) + Send + Sync>;

/// Graph resources owned while initialized.
#[derive(Default)]
struct GraphState {
    formats: Option<FormatSet>,
    output: Option<OutputStream>,
    watcher: Option<JoinHandle<()>>,
}

struct EngineInner {
    ctx: Arc<EngineContext>,
    capture: CapturePipeline,
    playback: PlaybackPipeline,
    music: Arc<MusicTransport>,
    graph: Mutex<GraphState>,
    interruption: Option<InterruptionHandler>,
}

/// Full-duplex audio engine.
///
/// Created with [`DuplexAudio::builder()`](crate::DuplexAudio::builder).
/// Cheap to clone; clones share the same engine.
///
/// # Example
///
/// ```ignore
/// let engine = DuplexAudio::builder().event_sink(&sink).build()?;
/// engine.initialize(AudioConfig::default(), SessionConfig::default())?;
///
/// let mut chunks = engine.start_recording()?;
/// while let Some(chunk) = chunks.next().await {
///     peer.send(&chunk.data).await?;
/// }
///
/// engine.shutdown_all();
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub(crate) fn new(
        ctx: Arc<EngineContext>,
        music: Arc<MusicTransport>,
        interruption: Option<InterruptionHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                capture: CapturePipeline::new(Arc::clone(&ctx)),
                playback: PlaybackPipeline::new(Arc::clone(&ctx)),
                ctx,
                music,
                graph: Mutex::new(GraphState::default()),
                interruption,
            }),
        }
    }

    /// Validates the configuration, activates the audio session, derives
    /// the format profiles, builds the converters and starts the output
    /// graph.
    ///
    /// Calling it again re-initializes from scratch.
    ///
    /// # Errors
    ///
    /// - [`ConfigError`] for out-of-range configuration
    /// - [`DeviceError`] if the session or output cannot be started; the
    ///   failure is also emitted as an error event
    pub fn initialize(&self, audio: AudioConfig, session: SessionConfig) -> Result<(), EngineError> {
        audio.validate()?;
        self.inner.initialize(audio, session)
    }

    /// Starts capture and returns a stream of wire chunks. Chunks are also
    /// delivered to the event sink as [`EngineEvent::AudioChunk`].
    ///
    /// Calling it while already recording returns another subscription.
    ///
    /// [`EngineEvent::AudioChunk`]: crate::EngineEvent::AudioChunk
    pub fn start_recording(&self) -> Result<ChunkStream, EngineError> {
        let ctx = &self.inner.ctx;
        if !ctx.is_running() {
            return Err(ConfigError::NotInitialized.into());
        }
        let session = ctx.session_config();
        if !session.category.allows_capture() {
            return Err(ConfigError::CaptureNotAllowed {
                category: format!("{:?}", session.category),
            }
            .into());
        }
        Ok(self.inner.capture.start()?)
    }

    /// Stops capture. Idempotent.
    pub fn stop_recording(&self) {
        self.inner.capture.stop();
    }

    /// Delivers pending capture chunks right away instead of waiting for
    /// the next bridge tick. Returns how many chunks were emitted.
    pub fn flush_capture(&self) -> usize {
        self.inner.capture.pump()
    }

    /// Queues one wire-format chunk from the remote peer for playback.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::EngineNotRunning`] before `initialize` or after
    ///   `shutdown_all`
    /// - [`PlaybackError::ConverterUnavailable`] if no converter is built
    /// - [`PlaybackError::ConversionFailed`] for a malformed chunk
    pub fn play_audio_chunk(&self, bytes: &[u8]) -> Result<(), PlaybackError> {
        self.inner.playback.play_chunk(bytes)
    }

    /// Stops bot playback and discards queued audio. Idempotent.
    pub fn stop_playback(&self) {
        self.inner.playback.stop();
    }

    /// Plays one track, replacing whatever music is playing.
    ///
    /// Resolution and decoding failures are reported as error events and
    /// leave the transport stopped.
    pub async fn play_background_music(&self, source: impl Into<MusicSource>, looping: bool) {
        self.inner.music.play_single(source.into(), looping).await;
    }

    /// Plays a playlist from its first track.
    pub async fn play_background_music_playlist<I, S>(&self, sources: I, loop_mode: LoopMode)
    where
        I: IntoIterator<Item = S>,
        S: Into<MusicSource>,
    {
        let sources = sources.into_iter().map(Into::into).collect();
        self.inner.music.play_playlist(sources, loop_mode).await;
    }

    /// Stops music and clears the playlist. Idempotent.
    pub fn stop_background_music(&self) {
        self.inner.music.stop();
    }

    /// Pauses music at the current position.
    pub fn pause_background_music(&self) {
        self.inner.music.pause();
    }

    /// Resumes paused music.
    pub fn resume_background_music(&self) {
        self.inner.music.resume();
    }

    /// Seeks the current track. The position is clamped to the track.
    pub fn seek_background_music(&self, position_seconds: f64) {
        let position = Duration::try_from_secs_f64(position_seconds.max(0.0))
            .unwrap_or(Duration::MAX);
        self.inner.music.seek(position);
    }

    /// Sets the music volume, clamped to [0, 1].
    pub fn set_background_music_volume(&self, volume: f32) {
        self.inner.music.set_volume(volume);
    }

    /// Returns the music volume.
    pub fn background_music_volume(&self) -> f32 {
        self.inner.music.volume()
    }

    /// Stops capture and bot playback. The graph and music keep running.
    pub fn shutdown_bot(&self) {
        tracing::info!("shutting down bot audio");
        self.inner.capture.stop();
        self.inner.playback.stop();
    }

    /// Stops everything, tears down the graph, deactivates the session and
    /// releases the converters. Idempotent.
    pub fn shutdown_all(&self) {
        self.inner.capture.stop();
        self.inner.playback.stop();
        self.inner.music.stop();

        let mut graph = self.inner.graph.lock();
        self.inner.teardown_locked(&mut graph);
    }

    /// Applies a platform notification. Backends deliver these on their own;
    /// this entry point exists for platform glue that observes them
    /// elsewhere.
    pub async fn handle_notification(&self, notification: DeviceNotification) {
        self.inner.handle_notification(notification).await;
    }

    /// Replaces (or clears) the event sink. The engine holds it weakly.
    pub fn set_event_sink(&self, sink: Option<&Arc<dyn EventSink>>) {
        self.inner.ctx.events.set(sink);
    }

    /// `true` between a successful `initialize` and `shutdown_all`.
    pub fn is_running(&self) -> bool {
        self.inner.ctx.is_running()
    }

    /// `true` while capture is running.
    pub fn is_recording(&self) -> bool {
        self.inner.capture.is_active()
    }

    /// Bot playback state.
    pub fn playback_state(&self) -> PlaybackState {
        self.inner.playback.state()
    }

    /// `true` while bot audio is queued or playing.
    pub fn is_bot_playing(&self) -> bool {
        self.inner.ctx.bot_voice.is_speaking()
    }

    /// Point-in-time view of the music transport.
    pub fn music_snapshot(&self) -> MusicSnapshot {
        self.inner.music.snapshot()
    }

    /// Current format profiles, if initialized.
    pub fn formats(&self) -> Option<FormatSet> {
        self.inner.graph.lock().formats
    }

    /// Pipeline counters.
    pub fn stats(&self) -> EngineStats {
        self.inner.ctx.stats.snapshot()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.inner.ctx.backend.name())
            .field("running", &self.is_running())
            .field("recording", &self.is_recording())
            .finish_non_exhaustive()
    }
}

impl EngineInner {
    fn initialize(
        self: &Arc<Self>,
        audio: AudioConfig,
        session: SessionConfig,
    ) -> Result<(), EngineError> {
        // Capture stops outside the graph lock: it waits for an in-flight
        // drain, and that drain's sink may call into the engine.
        if self.ctx.is_running() {
            tracing::info!("re-initializing engine");
            self.capture.stop();
            self.playback.stop();
        }
        let mut graph = self.graph.lock();
        if self.ctx.is_running() {
            self.teardown_locked(&mut graph);
        }

        let processing = VoiceProcessing::from_config(&audio, &session);
        let preferences = HardwarePreferences {
            sample_rate: audio.sample_rate,
            buffer_duration: session.preferred_buffer_duration,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let activation = self
            .ctx
            .backend
            .activate_session(&session, processing, preferences, tx);
        let info = match activation {
            Ok(info) => info,
            Err(err) => {
                tracing::error!(error = %err, "audio session activation failed");
                self.ctx.events.emit_error(&err);
                return Err(err.into());
            }
        };

        let formats = FormatSet::from_device(
            info.input_sample_rate,
            info.input_channels,
            info.output_sample_rate,
            audio.channels,
        );
        self.ctx.set_configs(audio, session);

        // Best effort: without converters the pipelines skip data but the
        // graph still runs.
        let _ = self.publish_converters(&formats);
        self.apply_mix_rate(formats.mix.sample_rate);

        let output = match self.start_output(formats.mix.sample_rate) {
            Ok(output) => output,
            Err(err) => {
                tracing::error!(error = %err, "failed to start output graph");
                self.ctx.events.emit_error(&err);
                self.ctx.converters.store(None);
                self.ctx.backend.deactivate_session();
                return Err(err.into());
            }
        };

        graph.formats = Some(formats);
        graph.output = Some(output);
        graph.watcher = Some(self.spawn_watcher(rx));
        self.ctx.set_running(true);

        tracing::info!(
            backend = self.ctx.backend.name(),
            hardware = %formats.hardware,
            mix = %formats.mix,
            wire = %formats.wire,
            ?processing,
            "engine initialized"
        );
        Ok(())
    }

    /// Drops the output, stops the watcher, deactivates the session and
    /// releases the converters.
    fn teardown_locked(&self, graph: &mut GraphState) {
        let was_running = self.ctx.is_running();
        self.ctx.set_running(false);

        graph.output = None;
        if let Some(watcher) = graph.watcher.take() {
            watcher.abort();
        }
        graph.formats = None;
        self.ctx.converters.store(None);
        self.ctx.backend.deactivate_session();

        if was_running {
            tracing::info!("engine shut down");
        }
    }

    fn publish_converters(&self, formats: &FormatSet) -> Result<(), ConversionError> {
        match build_converters(formats.hardware, formats.mix, formats.wire) {
            Ok(pair) => {
                self.ctx.converters.store(Some(pair));
                tracing::debug!(
                    hardware = %formats.hardware,
                    mix = %formats.mix,
                    "converters published"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to build converters");
                self.ctx.events.emit_error(&err);
                Err(err)
            }
        }
    }

    /// Sizes the bot queue for `mix_rate` and tells the transport. Returns
    /// `true` if the current music track needs re-converting.
    fn apply_mix_rate(&self, mix_rate: u32) -> bool {
        let capacity = playback_queue_capacity(&self.ctx.tuning, mix_rate);
        if self.ctx.bot_voice.capacity() != capacity {
            self.ctx.bot_voice.flush();
            self.ctx.bot_voice.resize(capacity);
        }

        let resync = self.music.update_mix_rate(mix_rate);
        if resync {
            let music = Arc::clone(&self.music);
            self.ctx
                .runtime
                .spawn(async move { music.resync_track_rate().await });
        }
        resync
    }

    fn start_output(&self, mix_rate: u32) -> Result<OutputStream, DeviceError> {
        let mixer = Mixer::new(
            Arc::clone(&self.ctx.bot_voice),
            Arc::clone(&self.ctx.music_voice),
        );
        self.ctx
            .backend
            .start_output(mix_rate, Box::new(move |out: &mut [f32]| mixer.render(out)))
    }

    fn spawn_watcher(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<DeviceNotification>,
    ) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.ctx.runtime.spawn(async move {
            while let Some(notification) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_notification(notification).await;
            }
        })
    }

    async fn handle_notification(&self, notification: DeviceNotification) {
        tracing::debug!(?notification, "device notification");
        match notification {
            DeviceNotification::RouteChanged => self.handle_route_change(),
            DeviceNotification::InterruptionBegan => {
                tracing::info!("audio session interrupted");
                self.playback.stop();
                if let Some(handler) = &self.interruption {
                    handler(Interruption::Began);
                }
            }
            DeviceNotification::InterruptionEnded { should_resume } => {
                tracing::info!(should_resume, "audio session interruption ended");
                if let Some(handler) = &self.interruption {
                    handler(Interruption::Ended { should_resume });
                }
            }
        }
    }

    /// Re-derives the formats, rebuilds converters on change, restarts a
    /// stopped graph and reinstalls the capture tap when needed.
    fn handle_route_change(&self) {
        let mut graph = self.graph.lock();
        if !self.ctx.is_running() {
            tracing::debug!("route change ignored, engine not running");
            return;
        }

        let info = match self.ctx.backend.device_info() {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!(error = %err, "cannot query device after route change");
                self.ctx.events.emit_error(&err);
                return;
            }
        };

        let wire_channels = self.ctx.audio_config().channels;
        let formats = FormatSet::from_device(
            info.input_sample_rate,
            info.input_channels,
            info.output_sample_rate,
            wire_channels,
        );
        let previous = graph.formats;
        let hardware_changed = previous.map_or(true, |p| p.hardware != formats.hardware);
        let mix_changed = previous.map_or(true, |p| p.mix != formats.mix);

        if hardware_changed || mix_changed {
            tracing::info!(
                hardware = %formats.hardware,
                mix = %formats.mix,
                "device format changed, rebuilding converters"
            );
            // On failure the previous pair stays published
            if self.publish_converters(&formats).is_ok() {
                graph.formats = Some(formats);
            }
        }
        if mix_changed {
            self.apply_mix_rate(formats.mix.sample_rate);
        }

        let output_running = graph.output.as_ref().is_some_and(OutputStream::is_running);
        let mut restarted = false;
        if mix_changed || !output_running {
            graph.output = None;
            match self.start_output(formats.mix.sample_rate) {
                Ok(output) => {
                    tracing::info!(mix = %formats.mix, "output graph restarted");
                    graph.output = Some(output);
                    restarted = true;
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to restart output graph");
                    self.ctx.events.emit_error(&err);
                }
            }
        }

        if self.capture.is_active() && (hardware_changed || restarted) {
            // Failures are reported by the pipeline
            let _ = self.capture.reinstall();
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if self.ctx.is_running() {
            let mut graph = std::mem::take(self.graph.get_mut());
            self.teardown_locked(&mut graph);
        }
    }
}
