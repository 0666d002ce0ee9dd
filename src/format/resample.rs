//! Sample rate conversion.
//!
//! Linear interpolation over interleaved frames. Fast and allocation-bounded,
//! which keeps it usable inside the capture callback; quality is adequate for
//! speech and background music.

/// Number of output frames produced when resampling `frames` frames.
///
/// Rounded to the nearest frame so that a round trip through an
/// intermediate rate returns to the original frame count.
pub fn output_frames(frames: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 || to_rate == 0 {
        return 0;
    }
    if from_rate == to_rate {
        return frames;
    }
    (frames as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize
}

/// Resamples interleaved audio from one sample rate to another.
///
/// # Arguments
///
/// * `samples` - Interleaved input samples
/// * `channels` - Number of interleaved channels
/// * `from_rate` - Source sample rate in Hz
/// * `to_rate` - Target sample rate in Hz
///
/// Returns `output_frames(frames, from_rate, to_rate) * channels` samples.
pub fn resample(samples: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || channels == 0 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    let in_frames = samples.len() / channels;
    let out_frames = output_frames(in_frames, from_rate, to_rate);
    if in_frames == 0 || out_frames == 0 {
        return Vec::new();
    }

    let step = f64::from(from_rate) / f64::from(to_rate);
    let mut output = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let src_pos = i as f64 * step;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        for ch in 0..channels {
            let sample = if src_idx + 1 < in_frames {
                // Linear interpolation between two frames
                let s1 = samples[src_idx * channels + ch];
                let s2 = samples[(src_idx + 1) * channels + ch];
                s1 + (s2 - s1) * frac
            } else {
                // Past the last frame, hold the final value
                samples[(in_frames - 1) * channels + ch]
            };
            output.push(sample);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_same_rate() {
        let samples = vec![0.1f32, 0.2, 0.3];
        let resampled = resample(&samples, 1, 24_000, 24_000);
        assert_eq!(resampled, samples);
    }

    #[test]
    fn test_resample_empty() {
        let resampled = resample(&[], 1, 48_000, 24_000);
        assert!(resampled.is_empty());
    }

    #[test]
    fn test_resample_downsample() {
        // 48kHz to 24kHz = 2:1 ratio
        let samples: Vec<f32> = (0..4096).map(|i| i as f32 / 4096.0).collect();
        let resampled = resample(&samples, 1, 48_000, 24_000);
        assert_eq!(resampled.len(), 2048);
    }

    #[test]
    fn test_resample_upsample_stereo() {
        let samples = vec![0.0f32, 0.0, 1.0, -1.0];
        let resampled = resample(&samples, 2, 24_000, 48_000);

        assert_eq!(resampled.len(), 8);
        // Channels stay separated through interpolation
        assert_eq!(resampled[0], 0.0);
        assert!((resampled[2] - 0.5).abs() < 1e-6);
        assert!((resampled[3] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_precision_boundary() {
        let samples = vec![0.0f32, 0.1, 0.2, 0.3];
        // 2x upsample: original samples land on even positions
        let result = resample(&samples, 1, 1, 2);

        assert_eq!(result[0], 0.0);
        assert!((result[2] - 0.1).abs() < 1e-6);
        assert!((result[4] - 0.2).abs() < 1e-6);
        assert!((result[6] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_resample_zero_rate() {
        let result = resample(&[0.1, 0.2], 1, 16_000, 0);
        assert!(result.is_empty());
        assert_eq!(output_frames(100, 0, 16_000), 0);
    }

    #[test]
    fn test_output_frames_round_trip() {
        for &rate in &[8_000u32, 16_000, 22_050, 44_100, 48_000, 96_000] {
            let wire = output_frames(4096, rate, 24_000);
            assert_eq!(output_frames(wire, 24_000, rate), 4096, "rate {rate}");
        }
    }

    #[test]
    fn test_resample_single_frame() {
        let result = resample(&[0.5f32], 1, 1, 10);
        assert_eq!(result.len(), 10);
        assert!(result.iter().all(|&s| s == 0.5));
    }
}
