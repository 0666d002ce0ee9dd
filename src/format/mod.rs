//! Audio format descriptions and conversion.
//!
//! This module provides:
//! - [`FormatProfile`]s for the hardware-capture, mix and wire domains
//! - Sample encoding conversion (f32 ↔ i16 little-endian bytes)
//! - Channel conversion (any ↔ mono, mono ↔ stereo)
//! - Sample rate conversion (linear resampling)
//! - The [`ConverterPair`] used by capture and playback, published through a
//!   [`ConverterSlot`] so the real-time path never sees a half-built pair

mod convert;
mod converter;
mod profile;
mod resample;

pub use convert::{
    decode_i16_le, encode_i16_le, f32_to_i16, i16_to_f32, peak_amplitude,
    remap_channels,
};
pub(crate) use converter::ConverterCache;
pub use converter::{
    build_converters, CaptureConverter, Converter, ConverterPair, ConverterSlot,
    PlaybackConverter, MAX_CHANNELS,
};
pub use profile::{FormatProfile, FormatSet, SampleEncoding};
pub use resample::{output_frames, resample};
