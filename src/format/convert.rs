//! Sample encoding and channel conversion.

use crate::chunk::WIRE_BYTES_PER_SAMPLE;

/// Converts an f32 sample to i16.
///
/// Input should be in the range [-1.0, 1.0].
/// Values outside this range are clamped.
///
/// Uses × 32767 (not 32768) for symmetric scaling. This means -1.0 maps
/// to -32767 rather than -32768, losing 1 LSB at the negative extreme.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts an i16 sample to f32.
///
/// Output will be in the range [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Encodes f32 samples as interleaved i16 little-endian bytes.
pub fn encode_i16_le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * WIRE_BYTES_PER_SAMPLE);
    for &sample in samples {
        bytes.extend_from_slice(&f32_to_i16(sample).to_le_bytes());
    }
    bytes
}

/// Decodes i16 little-endian bytes into f32 samples.
///
/// A trailing odd byte is ignored; callers that care validate the length
/// first.
pub fn decode_i16_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(WIRE_BYTES_PER_SAMPLE)
        .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Returns the peak absolute amplitude of a buffer.
#[inline]
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, &s| peak.max(s.abs()))
}

/// Converts interleaved audio between channel counts.
///
/// - Any → mono: averages all channels of each frame.
/// - Mono → any: duplicates the sample into every channel.
/// - N → M otherwise: copies the first `min(N, M)` channels and fills the
///   rest with the average of the source frame.
///
/// Trailing samples that do not form a complete frame are dropped.
pub fn remap_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let from = from as usize;
    let to = to as usize;
    let frames = samples.len() / from;
    let mut output = Vec::with_capacity(frames * to);

    for frame in samples.chunks_exact(from) {
        let mean = frame.iter().sum::<f32>() / from as f32;
        if to == 1 {
            output.push(mean);
        } else if from == 1 {
            output.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            for ch in 0..to {
                output.push(if ch < from { frame[ch] } else { mean });
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_full_range() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_f32_to_i16_clamping() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_i16_to_f32_full_range() {
        let max = i16_to_f32(32767);
        assert!((max - 0.99997).abs() < 0.001);

        let min = i16_to_f32(-32768);
        assert!((min - (-1.0)).abs() < 0.001);

        assert_eq!(i16_to_f32(0), 0.0);
    }

    #[test]
    fn test_encode_is_little_endian() {
        let bytes = encode_i16_le(&[1.0, 0.0]);
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x00, 0x00]);
    }

    #[test]
    fn test_decode_ignores_trailing_byte() {
        let samples = decode_i16_le(&[0x00, 0x40, 0x12]);
        assert_eq!(samples.len(), 1);
        assert!((samples[0] - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_bytes_roundtrip_within_one_lsb() {
        let original = [0.0f32, 0.25, -0.25, 0.9];
        let back = decode_i16_le(&encode_i16_le(&original));
        for (a, b) in original.iter().zip(&back) {
            assert!((a - b).abs() < 2.0 / 32768.0);
        }
    }

    #[test]
    fn test_peak_amplitude() {
        assert_eq!(peak_amplitude(&[]), 0.0);
        assert_eq!(peak_amplitude(&[0.1, -0.7, 0.3]), 0.7);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mono = remap_channels(&[0.2, 0.4, -0.5, 0.5], 2, 1);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let stereo = remap_channels(&[0.1, 0.2], 1, 2);
        assert_eq!(stereo, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_quad_to_stereo_keeps_front_pair() {
        let stereo = remap_channels(&[0.1, 0.2, 0.3, 0.4], 4, 2);
        assert_eq!(stereo, vec![0.1, 0.2]);
    }

    #[test]
    fn test_remap_drops_partial_frame() {
        let mono = remap_channels(&[0.1, 0.2, 0.3], 2, 1);
        assert_eq!(mono.len(), 1);
    }
}
