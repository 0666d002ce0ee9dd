//! Output mixer.

use std::sync::Arc;

use super::voice::{BotVoice, MusicVoice};

/// Sums the bot and music voices into the stereo mix buffer.
pub(crate) struct Mixer {
    bot: Arc<BotVoice>,
    music: Arc<MusicVoice>,
}

impl Mixer {
    pub fn new(bot: Arc<BotVoice>, music: Arc<MusicVoice>) -> Self {
        Self { bot, music }
    }

    /// Renders one output buffer. Real-time safe.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        self.bot.render_into(out);
        self.music.render_into(out);
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}
