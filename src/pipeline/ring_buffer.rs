//! Ring buffer between the capture callback and the capture bridge.

use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::error::ConversionError;
use crate::format::FormatProfile;
use crate::WireChunk;

/// What the capture callback hands to the bridge for one hardware buffer.
#[derive(Debug)]
pub(crate) enum CaptureMessage {
    /// Wire-format bytes ready to emit.
    Chunk(Vec<u8>),
    /// The buffer could not be converted.
    ConversionFailed(ConversionError),
}

/// Consumer side of the capture ring with timestamp tracking.
///
/// Timestamps are derived from the number of wire frames already emitted, so
/// they stay contiguous when the ring is swapped during a tap reinstall.
pub(crate) struct CaptureBuffer {
    consumer: HeapCons<CaptureMessage>,
    wire: FormatProfile,
    frames_emitted: u64,
}

impl CaptureBuffer {
    pub fn new(consumer: HeapCons<CaptureMessage>, wire: FormatProfile) -> Self {
        Self {
            consumer,
            wire,
            frames_emitted: 0,
        }
    }

    /// Pops the next message, turning wire bytes into a timestamped chunk.
    pub fn try_read_chunk(&mut self) -> Option<Result<WireChunk, ConversionError>> {
        match self.consumer.try_pop()? {
            CaptureMessage::Chunk(bytes) => {
                let timestamp = Duration::from_secs_f64(
                    self.frames_emitted as f64 / f64::from(self.wire.sample_rate),
                );
                let chunk = WireChunk::new(
                    bytes,
                    timestamp,
                    self.wire.sample_rate,
                    self.wire.channels,
                );
                self.frames_emitted += chunk.frame_count() as u64;
                Some(Ok(chunk))
            }
            CaptureMessage::ConversionFailed(err) => Some(Err(err)),
        }
    }

    /// Number of messages waiting.
    pub fn available(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Swaps in a fresh consumer, discarding whatever the old ring held.
    pub fn replace_consumer(&mut self, consumer: HeapCons<CaptureMessage>) {
        let dropped = self.available();
        if dropped > 0 {
            tracing::debug!(dropped, "discarding pending capture buffers on ring swap");
        }
        self.consumer = consumer;
    }
}

/// Creates a capture ring holding up to `capacity_chunks` hardware buffers.
///
/// Returns the producer (for the capture callback) and the consumer wrapper
/// (for the bridge).
pub(crate) fn create_capture_buffer(
    capacity_chunks: usize,
    wire: FormatProfile,
) -> (HeapProd<CaptureMessage>, CaptureBuffer) {
    let (producer, consumer) = create_capture_ring(capacity_chunks);
    (producer, CaptureBuffer::new(consumer, wire))
}

pub(crate) fn create_capture_ring(
    capacity_chunks: usize,
) -> (HeapProd<CaptureMessage>, HeapCons<CaptureMessage>) {
    HeapRb::<CaptureMessage>::new(capacity_chunks.max(1)).split()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Producer;

    #[test]
    fn test_timestamps_advance_by_frames() {
        let (mut producer, mut buffer) = create_capture_buffer(4, FormatProfile::wire(1));

        // 2400 frames of mono i16 = 100ms at 24kHz
        producer
            .try_push(CaptureMessage::Chunk(vec![0; 4800]))
            .unwrap();
        producer
            .try_push(CaptureMessage::Chunk(vec![0; 4800]))
            .unwrap();

        let first = buffer.try_read_chunk().unwrap().unwrap();
        let second = buffer.try_read_chunk().unwrap().unwrap();
        assert_eq!(first.timestamp, Duration::ZERO);
        assert_eq!(second.timestamp, Duration::from_millis(100));
        assert!(buffer.try_read_chunk().is_none());
    }

    #[test]
    fn test_conversion_failure_passes_through() {
        let (mut producer, mut buffer) = create_capture_buffer(2, FormatProfile::wire(1));
        producer
            .try_push(CaptureMessage::ConversionFailed(ConversionError::Unavailable))
            .unwrap();
        assert_eq!(
            buffer.try_read_chunk(),
            Some(Err(ConversionError::Unavailable))
        );
    }

    #[test]
    fn test_ring_capacity_bounded() {
        let (mut producer, buffer) = create_capture_buffer(2, FormatProfile::wire(1));
        assert!(producer.try_push(CaptureMessage::Chunk(vec![])).is_ok());
        assert!(producer.try_push(CaptureMessage::Chunk(vec![])).is_ok());
        assert!(producer.try_push(CaptureMessage::Chunk(vec![])).is_err());
        assert_eq!(buffer.available(), 2);
    }

    #[test]
    fn test_replace_consumer_keeps_timeline() {
        let (mut producer, mut buffer) = create_capture_buffer(4, FormatProfile::wire(1));
        producer
            .try_push(CaptureMessage::Chunk(vec![0; 4800]))
            .unwrap();
        buffer.try_read_chunk();
        producer
            .try_push(CaptureMessage::Chunk(vec![0; 4800]))
            .unwrap();

        let (mut fresh, consumer) = create_capture_ring(4);
        buffer.replace_consumer(consumer);
        fresh.try_push(CaptureMessage::Chunk(vec![0; 4800])).unwrap();

        let chunk = buffer.try_read_chunk().unwrap().unwrap();
        assert_eq!(chunk.timestamp, Duration::from_millis(100));
        assert!(buffer.try_read_chunk().is_none());
    }
}
