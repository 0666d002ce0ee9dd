//! Sample format descriptions for the three live format domains.

use std::fmt;

use crate::config::WIRE_SAMPLE_RATE;

/// Sample encoding of a format domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    /// 32-bit float in [-1.0, 1.0].
    Float32,
    /// Signed 16-bit little-endian integer.
    Int16,
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float32 => write!(f, "f32"),
            Self::Int16 => write!(f, "i16"),
        }
    }
}

/// Describes one sample format.
///
/// Three profiles are live at once:
/// - **hardware capture**: the microphone's native rate and channel count, float32
/// - **mix**: the output graph format, stereo float32 at the session rate
/// - **wire**: 24 kHz int16 with the configured channel count; never changes
///
/// # Example
///
/// ```
/// use duplex_audio::format::{FormatProfile, SampleEncoding};
///
/// let wire = FormatProfile::wire(1);
/// assert_eq!(wire.sample_rate, 24_000);
/// assert_eq!(wire.encoding, SampleEncoding::Int16);
/// assert_eq!(wire.to_string(), "24000Hz/1ch/i16");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatProfile {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
    /// Sample encoding.
    pub encoding: SampleEncoding,
    /// Whether channels are interleaved in a single buffer.
    pub interleaved: bool,
}

impl FormatProfile {
    /// Creates an interleaved profile.
    pub fn new(sample_rate: u32, channels: u16, encoding: SampleEncoding) -> Self {
        Self {
            sample_rate,
            channels,
            encoding,
            interleaved: true,
        }
    }

    /// The microphone's native format.
    pub fn hardware_capture(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, SampleEncoding::Float32)
    }

    /// The output graph format at the given session rate.
    pub fn mix(sample_rate: u32) -> Self {
        Self::new(sample_rate, 2, SampleEncoding::Float32)
    }

    /// The transport format with the configured channel count.
    pub fn wire(channels: u16) -> Self {
        Self::new(WIRE_SAMPLE_RATE, channels, SampleEncoding::Int16)
    }

    /// Samples in `frames` frames of this format.
    pub fn samples_for_frames(&self, frames: usize) -> usize {
        frames * self.channels as usize
    }
}

impl fmt::Display for FormatProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}",
            self.sample_rate, self.channels, self.encoding
        )?;
        if !self.interleaved {
            write!(f, "/planar")?;
        }
        Ok(())
    }
}

/// The three profiles the engine converts between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSet {
    /// Microphone format.
    pub hardware: FormatProfile,
    /// Output graph format.
    pub mix: FormatProfile,
    /// Transport format.
    pub wire: FormatProfile,
}

impl FormatSet {
    /// Derives the profiles from the device rates and the wire channel count.
    pub fn from_device(
        input_rate: u32,
        input_channels: u16,
        output_rate: u32,
        wire_channels: u16,
    ) -> Self {
        Self {
            hardware: FormatProfile::hardware_capture(input_rate, input_channels),
            mix: FormatProfile::mix(output_rate),
            wire: FormatProfile::wire(wire_channels),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_constructors() {
        let hw = FormatProfile::hardware_capture(44_100, 1);
        assert_eq!(hw.encoding, SampleEncoding::Float32);
        assert!(hw.interleaved);

        let mix = FormatProfile::mix(48_000);
        assert_eq!(mix.channels, 2);
        assert_eq!(mix.encoding, SampleEncoding::Float32);

        let wire = FormatProfile::wire(2);
        assert_eq!(wire.sample_rate, WIRE_SAMPLE_RATE);
        assert_eq!(wire.channels, 2);
    }

    #[test]
    fn test_profile_display() {
        let mut profile = FormatProfile::mix(48_000);
        assert_eq!(profile.to_string(), "48000Hz/2ch/f32");
        profile.interleaved = false;
        assert_eq!(profile.to_string(), "48000Hz/2ch/f32/planar");
    }

    #[test]
    fn test_format_set_keeps_wire_fixed() {
        let a = FormatSet::from_device(48_000, 1, 48_000, 1);
        let b = FormatSet::from_device(16_000, 1, 16_000, 1);
        assert_eq!(a.wire, b.wire);
        assert_ne!(a.hardware, b.hardware);
        assert_ne!(a.mix, b.mix);
    }

    #[test]
    fn test_samples_for_frames() {
        assert_eq!(FormatProfile::mix(48_000).samples_for_frames(10), 20);
    }
}
