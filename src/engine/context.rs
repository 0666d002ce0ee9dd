//! State shared by the pipelines, the transport and the lifecycle manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::backend::AudioBackend;
use crate::config::{AudioConfig, EngineTuning, SessionConfig};
use crate::event::EventEmitter;
use crate::format::ConverterSlot;
use crate::graph::{BotVoice, MusicVoice};
use crate::stats::StatsCounters;

pub(crate) struct EngineContext {
    pub backend: Arc<dyn AudioBackend>,
    pub converters: Arc<ConverterSlot>,
    pub events: EventEmitter,
    pub tuning: EngineTuning,
    pub bot_voice: Arc<BotVoice>,
    pub music_voice: Arc<MusicVoice>,
    pub stats: Arc<StatsCounters>,
    pub runtime: Handle,
    running: AtomicBool,
    audio: RwLock<AudioConfig>,
    session: RwLock<SessionConfig>,
}

impl EngineContext {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        events: EventEmitter,
        tuning: EngineTuning,
        runtime: Handle,
    ) -> Self {
        let audio = AudioConfig::default();
        let capacity = playback_queue_capacity(&tuning, audio.sample_rate);
        Self {
            backend,
            converters: Arc::new(ConverterSlot::new()),
            events,
            tuning,
            bot_voice: Arc::new(BotVoice::new(capacity)),
            music_voice: Arc::new(MusicVoice::new()),
            stats: Arc::new(StatsCounters::new()),
            runtime,
            running: AtomicBool::new(false),
            audio: RwLock::new(audio),
            session: RwLock::new(SessionConfig::default()),
        }
    }

    /// The output graph is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn audio_config(&self) -> AudioConfig {
        self.audio.read().clone()
    }

    pub fn session_config(&self) -> SessionConfig {
        self.session.read().clone()
    }

    pub fn set_configs(&self, audio: AudioConfig, session: SessionConfig) {
        *self.audio.write() = audio;
        *self.session.write() = session;
    }
}

/// Stereo mix-format samples needed to queue the configured playback
/// duration at `mix_rate`.
pub(crate) fn playback_queue_capacity(tuning: &EngineTuning, mix_rate: u32) -> usize {
    (tuning.playback_queue_duration.as_secs_f64() * f64::from(mix_rate)) as usize * 2
}
