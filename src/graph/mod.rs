//! The output graph: two voices summed by a mixer into the output stream.
//!
//! ```text
//! Bot FIFO ──┐
//!            ├─→ Mixer → output stream (mix format)
//! Music  ────┘
//! ```

mod mixer;
mod voice;

pub(crate) use mixer::Mixer;
pub(crate) use voice::{BotVoice, MusicVoice};
