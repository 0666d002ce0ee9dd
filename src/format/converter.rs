//! Converters between format domains and their atomically-published pair.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::convert::{decode_i16_le, encode_i16_le, remap_channels};
use super::profile::{FormatProfile, FormatSet, SampleEncoding};
use super::resample::resample;
use crate::chunk::WIRE_BYTES_PER_SAMPLE;
use crate::error::ConversionError;

/// Largest channel count a converter will bridge.
pub const MAX_CHANNELS: u16 = 8;

/// Converts interleaved float audio between two profiles (channels + rate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converter {
    from: FormatProfile,
    to: FormatProfile,
}

impl Converter {
    /// Creates a converter, checking that the two profiles can be bridged.
    pub fn new(from: FormatProfile, to: FormatProfile) -> Result<Self, ConversionError> {
        for profile in [&from, &to] {
            if profile.channels == 0 || profile.channels > MAX_CHANNELS {
                return Err(ConversionError::unsupported(
                    from,
                    to,
                    format!("channel count {} outside 1..={MAX_CHANNELS}", profile.channels),
                ));
            }
            if profile.sample_rate == 0 {
                return Err(ConversionError::unsupported(from, to, "zero sample rate"));
            }
            if !profile.interleaved {
                return Err(ConversionError::unsupported(
                    from,
                    to,
                    "planar buffers are not supported",
                ));
            }
        }
        Ok(Self { from, to })
    }

    /// Source profile.
    pub fn source(&self) -> FormatProfile {
        self.from
    }

    /// Target profile.
    pub fn target(&self) -> FormatProfile {
        self.to
    }

    /// Converts interleaved f32 samples from the source to the target
    /// channel layout and rate.
    pub fn convert_samples(&self, samples: &[f32]) -> Result<Vec<f32>, ConversionError> {
        let channels = self.from.channels as usize;
        if samples.len() % channels != 0 {
            return Err(ConversionError::malformed(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }
        let remapped = remap_channels(samples, self.from.channels, self.to.channels);
        Ok(resample(
            &remapped,
            self.to.channels,
            self.from.sample_rate,
            self.to.sample_rate,
        ))
    }
}

/// Hardware capture format → wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConverter(Converter);

impl CaptureConverter {
    /// Converts one hardware buffer to wire bytes.
    pub fn convert(&self, hardware: &[f32]) -> Result<Vec<u8>, ConversionError> {
        let samples = self.0.convert_samples(hardware)?;
        Ok(encode_i16_le(&samples))
    }

    /// Source (hardware) profile.
    pub fn input(&self) -> FormatProfile {
        self.0.source()
    }

    /// Target (wire) profile.
    pub fn output(&self) -> FormatProfile {
        self.0.target()
    }
}

/// Wire format → mix format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackConverter(Converter);

impl PlaybackConverter {
    /// Converts wire bytes to interleaved mix-format samples.
    pub fn convert(&self, wire: &[u8]) -> Result<Vec<f32>, ConversionError> {
        let frame_bytes = WIRE_BYTES_PER_SAMPLE * self.0.source().channels as usize;
        if wire.len() % frame_bytes != 0 {
            return Err(ConversionError::malformed(format!(
                "{} bytes is not a whole number of {frame_bytes}-byte wire frames",
                wire.len()
            )));
        }
        self.0.convert_samples(&decode_i16_le(wire))
    }

    /// Source (wire) profile.
    pub fn input(&self) -> FormatProfile {
        self.0.source()
    }

    /// Target (mix) profile.
    pub fn output(&self) -> FormatProfile {
        self.0.target()
    }
}

/// The two converters the pipelines need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterPair {
    /// Hardware → wire, used by capture.
    pub capture: CaptureConverter,
    /// Wire → mix, used by bot playback.
    pub playback: PlaybackConverter,
}

impl ConverterPair {
    /// Profiles this pair was built from.
    pub fn formats(&self) -> FormatSet {
        FormatSet {
            hardware: self.capture.input(),
            mix: self.playback.output(),
            wire: self.capture.output(),
        }
    }
}

/// Builds the capture and playback converters for a set of profiles.
///
/// Fails when a profile is malformed or when an encoding does not match its
/// domain (hardware and mix must be float32, wire must be int16).
pub fn build_converters(
    hardware: FormatProfile,
    mix: FormatProfile,
    wire: FormatProfile,
) -> Result<ConverterPair, ConversionError> {
    if hardware.encoding != SampleEncoding::Float32 {
        return Err(ConversionError::unsupported(
            hardware,
            wire,
            "hardware capture must be float32",
        ));
    }
    if mix.encoding != SampleEncoding::Float32 {
        return Err(ConversionError::unsupported(wire, mix, "mix must be float32"));
    }
    if wire.encoding != SampleEncoding::Int16 {
        return Err(ConversionError::unsupported(hardware, wire, "wire must be int16"));
    }

    Ok(ConverterPair {
        capture: CaptureConverter(Converter::new(hardware, wire)?),
        playback: PlaybackConverter(Converter::new(wire, mix)?),
    })
}

/// Atomically-published converter pair.
///
/// Writers (control context) replace the whole pair; the real-time reader
/// keeps its own `Arc` and only refreshes it when the generation changes, so
/// it always sees a complete old or new pair.
#[derive(Debug, Default)]
pub struct ConverterSlot {
    pair: RwLock<Option<Arc<ConverterPair>>>,
    generation: AtomicU64,
}

impl ConverterSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new pair (or clears it with `None`).
    pub fn store(&self, pair: Option<ConverterPair>) {
        let pair = pair.map(Arc::new);
        *self.pair.write() = pair;
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Returns the current pair.
    pub fn load(&self) -> Option<Arc<ConverterPair>> {
        self.pair.read().clone()
    }

    /// Non-blocking load for the real-time path. `None` on contention.
    pub fn try_load(&self) -> Option<Option<Arc<ConverterPair>>> {
        self.pair.try_read().map(|guard| guard.clone())
    }

    /// Incremented on every `store`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Real-time side cache of a [`ConverterSlot`].
#[derive(Debug)]
pub(crate) struct ConverterCache {
    slot: Arc<ConverterSlot>,
    cached: Option<Arc<ConverterPair>>,
    generation: Option<u64>,
}

impl ConverterCache {
    pub fn new(slot: Arc<ConverterSlot>) -> Self {
        Self {
            slot,
            cached: None,
            generation: None,
        }
    }

    /// Returns the freshest pair obtainable without blocking.
    pub fn get(&mut self) -> Option<&ConverterPair> {
        let current = self.slot.generation();
        if self.generation != Some(current) {
            if let Some(pair) = self.slot.try_load() {
                self.cached = pair;
                self.generation = Some(current);
            }
        }
        self.cached.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::output_frames;

    fn sine(frames: usize, channels: u16, rate: u32) -> Vec<f32> {
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for i in 0..frames {
            let v = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin() * 0.5;
            for _ in 0..channels {
                samples.push(v);
            }
        }
        samples
    }

    #[test]
    fn test_build_converters_default_profiles() {
        let set = FormatSet::from_device(48_000, 1, 48_000, 1);
        let pair = build_converters(set.hardware, set.mix, set.wire).unwrap();
        assert_eq!(pair.formats(), set);
    }

    #[test]
    fn test_build_rejects_zero_channels() {
        let hardware = FormatProfile::hardware_capture(48_000, 0);
        let result = build_converters(hardware, FormatProfile::mix(48_000), FormatProfile::wire(1));
        assert!(matches!(result, Err(ConversionError::Unsupported { .. })));
    }

    #[test]
    fn test_build_rejects_wrong_encoding() {
        let hardware = FormatProfile::new(48_000, 1, SampleEncoding::Int16);
        let result = build_converters(hardware, FormatProfile::mix(48_000), FormatProfile::wire(1));
        assert!(result.is_err());

        let wire = FormatProfile::new(24_000, 1, SampleEncoding::Float32);
        let result = build_converters(
            FormatProfile::hardware_capture(48_000, 1),
            FormatProfile::mix(48_000),
            wire,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_build_rejects_planar() {
        let mut mix = FormatProfile::mix(48_000);
        mix.interleaved = false;
        let result = build_converters(
            FormatProfile::hardware_capture(48_000, 1),
            mix,
            FormatProfile::wire(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sine_round_trip_frame_count() {
        let cases = [
            (48_000u32, 48_000u32, 1u16),
            (44_100, 44_100, 1),
            (16_000, 16_000, 2),
            (48_000, 48_000, 2),
            // Input and output devices at different rates
            (44_100, 48_000, 1),
            (48_000, 44_100, 1),
            (16_000, 48_000, 2),
        ];
        for (hardware, mix_rate, channels) in cases {
            let set = FormatSet::from_device(hardware, channels, mix_rate, 1);
            let pair = build_converters(set.hardware, set.mix, set.wire).unwrap();

            let frames = 4096;
            let wire = pair.capture.convert(&sine(frames, channels, hardware)).unwrap();
            let wire_frames = wire.len() / WIRE_BYTES_PER_SAMPLE;
            assert_eq!(wire_frames, output_frames(frames, hardware, 24_000));

            let mix = pair.playback.convert(&wire).unwrap();
            let expected = (frames as f64 * f64::from(mix_rate) / f64::from(hardware)).round();
            assert_eq!(
                mix.len() / 2,
                expected as usize,
                "hardware {hardware} mix {mix_rate} channels {channels}"
            );
        }
    }

    #[test]
    fn test_capture_converter_output_size() {
        let set = FormatSet::from_device(48_000, 2, 48_000, 1);
        let pair = build_converters(set.hardware, set.mix, set.wire).unwrap();
        let wire = pair.capture.convert(&sine(4096, 2, 48_000)).unwrap();
        // 2048 mono frames * 2 bytes
        assert_eq!(wire.len(), 4096);
    }

    #[test]
    fn test_capture_converter_rejects_partial_frame() {
        let set = FormatSet::from_device(48_000, 2, 48_000, 1);
        let pair = build_converters(set.hardware, set.mix, set.wire).unwrap();
        let result = pair.capture.convert(&[0.1, 0.2, 0.3]);
        assert!(matches!(result, Err(ConversionError::MalformedBuffer { .. })));
    }

    #[test]
    fn test_playback_converter_rejects_odd_bytes() {
        let set = FormatSet::from_device(48_000, 1, 48_000, 1);
        let pair = build_converters(set.hardware, set.mix, set.wire).unwrap();
        assert!(pair.playback.convert(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_playback_converter_upmixes_to_stereo() {
        let set = FormatSet::from_device(24_000, 1, 24_000, 1);
        let pair = build_converters(set.hardware, set.mix, set.wire).unwrap();
        let mix = pair.playback.convert(&[0x00, 0x40, 0x00, 0xC0]).unwrap();
        assert_eq!(mix.len(), 4);
        assert!((mix[0] - 0.5).abs() < 1e-3);
        assert_eq!(mix[0], mix[1]);
        assert!((mix[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_slot_publish_and_clear() {
        let slot = ConverterSlot::new();
        assert!(slot.load().is_none());
        let before = slot.generation();

        let set = FormatSet::from_device(48_000, 1, 48_000, 1);
        slot.store(Some(build_converters(set.hardware, set.mix, set.wire).unwrap()));
        assert!(slot.load().is_some());
        assert!(slot.generation() > before);

        slot.store(None);
        assert!(slot.load().is_none());
    }

    #[test]
    fn test_cache_sees_whole_replacement() {
        let slot = Arc::new(ConverterSlot::new());
        let mut cache = ConverterCache::new(Arc::clone(&slot));
        assert!(cache.get().is_none());

        let a = FormatSet::from_device(48_000, 1, 48_000, 1);
        slot.store(Some(build_converters(a.hardware, a.mix, a.wire).unwrap()));
        assert_eq!(cache.get().map(ConverterPair::formats), Some(a));

        let b = FormatSet::from_device(16_000, 1, 16_000, 1);
        slot.store(Some(build_converters(b.hardware, b.mix, b.wire).unwrap()));
        assert_eq!(cache.get().map(ConverterPair::formats), Some(b));
    }
}
