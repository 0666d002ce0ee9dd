//! Wire-format audio chunk.

use std::sync::Arc;
use std::time::Duration;

/// Bytes per wire sample (signed 16-bit little-endian).
pub const WIRE_BYTES_PER_SAMPLE: usize = 2;

/// One captured hardware buffer after conversion to the wire format.
///
/// The payload is interleaved signed 16-bit little-endian PCM. It is stored
/// in an `Arc` so the event sink and every [`ChunkStream`](crate::ChunkStream)
/// subscriber share one allocation.
///
/// # Example
///
/// ```
/// use duplex_audio::WireChunk;
/// use std::time::Duration;
///
/// let chunk = WireChunk::new(vec![0u8; 4800], Duration::ZERO, 24_000, 1);
/// assert_eq!(chunk.frame_count(), 2400);
/// assert_eq!(chunk.duration(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireChunk {
    /// Interleaved i16 little-endian PCM.
    pub data: Arc<Vec<u8>>,

    /// Offset from the start of the recording.
    pub timestamp: Duration,

    /// Sample rate in Hz (always the wire rate).
    pub sample_rate: u32,

    /// Number of interleaved channels.
    pub channels: u16,
}

impl WireChunk {
    /// Creates a chunk from raw wire bytes.
    pub fn new(data: Vec<u8>, timestamp: Duration, sample_rate: u32, channels: u16) -> Self {
        Self {
            data: Arc::new(data),
            timestamp,
            sample_rate,
            channels,
        }
    }

    /// Returns the number of frames in this chunk.
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.data.len() / WIRE_BYTES_PER_SAMPLE / self.channels as usize
    }

    /// Returns the playback duration of this chunk.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / f64::from(self.sample_rate))
    }

    /// Returns `true` if the chunk carries no audio.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a copy of the payload bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_mono() {
        let chunk = WireChunk::new(vec![0u8; 4800], Duration::ZERO, 24_000, 1);
        assert_eq!(chunk.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_frame_count_stereo() {
        // 400 bytes / 2 bytes per sample / 2 channels
        let chunk = WireChunk::new(vec![0u8; 400], Duration::ZERO, 24_000, 2);
        assert_eq!(chunk.frame_count(), 100);
    }

    #[test]
    fn test_zero_channels() {
        let chunk = WireChunk::new(vec![0u8; 100], Duration::ZERO, 24_000, 0);
        assert_eq!(chunk.frame_count(), 0);
        assert_eq!(chunk.duration(), Duration::ZERO);
    }

    #[test]
    fn test_empty_chunk() {
        let chunk = WireChunk::new(vec![], Duration::ZERO, 24_000, 1);
        assert!(chunk.is_empty());
        assert_eq!(chunk.duration(), Duration::ZERO);
    }

    #[test]
    fn test_clone_shares_payload() {
        let chunk = WireChunk::new(vec![1, 2, 3, 4], Duration::ZERO, 24_000, 1);
        let other = chunk.clone();
        assert!(Arc::ptr_eq(&chunk.data, &other.data));
        assert_eq!(other.to_bytes(), vec![1, 2, 3, 4]);
    }
}
