//! Playback pipeline: wire chunks from the remote peer → bot voice.

use std::sync::Arc;

use crate::engine::EngineContext;
use crate::error::PlaybackError;
use crate::stats::StatsCounters;

/// Bot playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing scheduled since the last stop.
    Idle,
    /// The bot voice is playing or has audio queued.
    Playing,
}

/// Converts incoming wire chunks and queues them on the bot voice.
pub(crate) struct PlaybackPipeline {
    ctx: Arc<EngineContext>,
}

impl PlaybackPipeline {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Converts one wire chunk to the mix format and appends it to the bot
    /// voice. Chunks play back-to-back in submission order.
    pub fn play_chunk(&self, bytes: &[u8]) -> Result<(), PlaybackError> {
        if !self.ctx.is_running() {
            return Err(PlaybackError::EngineNotRunning);
        }
        let pair = self
            .ctx
            .converters
            .load()
            .ok_or(PlaybackError::ConverterUnavailable)?;
        let samples = pair
            .playback
            .convert(bytes)
            .map_err(PlaybackError::ConversionFailed)?;

        let voice = &self.ctx.bot_voice;
        let was_active = voice.activate();
        let pushed = voice.enqueue(&samples);
        StatsCounters::incr(&self.ctx.stats.playback_chunks);

        if pushed < samples.len() {
            let dropped = samples.len() - pushed;
            StatsCounters::add(&self.ctx.stats.playback_overflow_samples, dropped as u64);
            tracing::warn!(
                dropped,
                capacity = voice.capacity(),
                "bot playback queue full, dropping samples"
            );
        }
        if !was_active {
            tracing::debug!("bot playback started");
        }
        Ok(())
    }

    /// Stops the bot voice and discards everything queued. Idempotent.
    pub fn stop(&self) {
        let voice = &self.ctx.bot_voice;
        let was_active = voice.is_active();
        voice.flush();
        if was_active {
            tracing::debug!("bot playback stopped");
        }
    }

    pub fn state(&self) -> PlaybackState {
        if self.ctx.bot_voice.is_active() {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        }
    }
}
