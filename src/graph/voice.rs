//! Voices feeding the output mixer.
//!
//! Both voices are shared between the control context and the render
//! callback. The render side only uses `try_lock` and atomics; if a control
//! operation holds a lock, the voice renders silence for that cycle.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// FIFO voice for remote-peer speech in mix format.
pub(crate) struct BotVoice {
    producer: Mutex<HeapProd<f32>>,
    consumer: Mutex<HeapCons<f32>>,
    /// Last occupancy seen by a holder of the consumer lock. Lock-free
    /// view for the capture gate; never a running total.
    queued: AtomicUsize,
    active: AtomicBool,
    capacity: AtomicUsize,
}

impl BotVoice {
    /// Creates a voice able to queue `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            queued: AtomicUsize::new(0),
            active: AtomicBool::new(false),
            capacity: AtomicUsize::new(capacity.max(1)),
        }
    }

    /// Replaces the queue with an empty one of `capacity` samples.
    pub fn resize(&self, capacity: usize) {
        let capacity = capacity.max(1);
        let mut producer = self.producer.lock();
        let mut consumer = self.consumer.lock();
        let (p, c) = HeapRb::<f32>::new(capacity).split();
        *producer = p;
        *consumer = c;
        self.sync_queued(&consumer);
        self.capacity.store(capacity, Ordering::SeqCst);
    }

    /// Marks the voice as playing. Returns the previous state.
    pub fn activate(&self) -> bool {
        self.active.swap(true, Ordering::SeqCst)
    }

    /// Queues samples. Returns how many fit; the rest are dropped.
    pub fn enqueue(&self, samples: &[f32]) -> usize {
        let pushed = self.producer.lock().push_slice(samples);
        // A render holding the consumer refreshes the count when it ends
        if let Some(consumer) = self.consumer.try_lock() {
            self.sync_queued(&consumer);
        }
        pushed
    }

    /// Stops the voice and discards everything queued.
    pub fn flush(&self) {
        self.active.store(false, Ordering::SeqCst);
        let mut consumer = self.consumer.lock();
        consumer.clear();
        self.sync_queued(&consumer);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Active with audio still queued. Safe to call from the capture
    /// callback.
    pub fn is_speaking(&self) -> bool {
        self.is_active() && self.queued.load(Ordering::SeqCst) > 0
    }

    pub fn queued(&self) -> usize {
        let consumer = self.consumer.lock();
        self.sync_queued(&consumer);
        consumer.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Adds queued samples onto `out`. Real-time safe.
    pub fn render_into(&self, out: &mut [f32]) {
        if !self.is_active() {
            return;
        }
        let Some(mut consumer) = self.consumer.try_lock() else {
            return;
        };

        for sample in out.iter_mut() {
            match consumer.try_pop() {
                Some(value) => *sample += value,
                None => break,
            }
        }
        self.sync_queued(&consumer);
    }

    fn sync_queued(&self, consumer: &HeapCons<f32>) {
        self.queued.store(consumer.occupied_len(), Ordering::SeqCst);
    }
}

/// Music voice: a scheduled track rendered from an atomic frame cursor.
///
/// The cursor doubles as the render clock the transport reads positions
/// from. A looping voice wraps to the start inside the render callback and
/// counts the wrap, so repeats are gapless and never reach `finished`.
pub(crate) struct MusicVoice {
    track: Mutex<Option<Arc<Vec<f32>>>>,
    cursor: AtomicU64,
    total_frames: AtomicU64,
    playing: AtomicBool,
    finished: AtomicBool,
    looping: AtomicBool,
    wraps: AtomicU64,
    gain: AtomicU32,
}

impl MusicVoice {
    pub fn new() -> Self {
        Self {
            track: Mutex::new(None),
            cursor: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            wraps: AtomicU64::new(0),
            gain: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Schedules a stereo mix-format track starting at `start_frame` and
    /// resets the wrap count. The voice stays paused until
    /// [`set_playing`](Self::set_playing).
    pub fn schedule(&self, samples: Arc<Vec<f32>>, start_frame: u64) {
        let total = (samples.len() / 2) as u64;
        let mut track = self.track.lock();
        *track = Some(samples);
        self.total_frames.store(total, Ordering::SeqCst);
        self.wraps.store(0, Ordering::SeqCst);
        self.place_cursor(start_frame, total);
    }

    /// Moves the cursor, keeping the play/pause state. Seeking to the end
    /// of a looping track wraps to the start.
    pub fn seek(&self, frame: u64) {
        let _track = self.track.lock();
        let total = self.total_frames.load(Ordering::SeqCst);
        self.place_cursor(frame, total);
    }

    fn place_cursor(&self, frame: u64, total: u64) {
        let frame = frame.min(total);
        if frame >= total && total > 0 && self.is_looping() {
            self.cursor.store(0, Ordering::SeqCst);
            self.wraps.fetch_add(1, Ordering::SeqCst);
            self.finished.store(false, Ordering::SeqCst);
        } else {
            self.cursor.store(frame, Ordering::SeqCst);
            self.finished.store(frame >= total, Ordering::SeqCst);
        }
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    /// Makes the render path wrap to the start instead of finishing.
    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::SeqCst);
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }

    /// Stops and unschedules the track.
    pub fn clear(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.looping.store(false, Ordering::SeqCst);
        let mut track = self.track.lock();
        *track = None;
        self.cursor.store(0, Ordering::SeqCst);
        self.total_frames.store(0, Ordering::SeqCst);
        self.wraps.store(0, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// The cursor reached the end of a scheduled, non-looping track.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// How many times the track wrapped since it was scheduled.
    pub fn wraps(&self) -> u64 {
        self.wraps.load(Ordering::SeqCst)
    }

    /// Current render position in frames.
    pub fn position_frames(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::SeqCst)
    }

    /// Sets the voice gain, clamped to [0, 1]. NaN maps to silence.
    pub fn set_gain(&self, gain: f32) {
        let gain = if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) };
        self.gain.store(gain.to_bits(), Ordering::SeqCst);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::SeqCst))
    }

    /// Adds the track's next frames onto the stereo buffer `out`. Real-time
    /// safe.
    pub fn render_into(&self, out: &mut [f32]) {
        if !self.is_playing() || self.is_finished() {
            return;
        }
        let Some(track) = self.track.try_lock() else {
            return;
        };
        let Some(samples) = track.as_ref() else {
            return;
        };

        let total = (samples.len() / 2) as u64;
        if total == 0 {
            self.finished.store(true, Ordering::SeqCst);
            return;
        }

        let gain = self.gain();
        let looping = self.is_looping();
        let mut cursor = self.cursor.load(Ordering::SeqCst).min(total);
        let mut remaining = out.chunks_exact_mut(2);

        loop {
            if cursor >= total {
                if !looping {
                    self.finished.store(true, Ordering::SeqCst);
                    break;
                }
                cursor = 0;
                self.wraps.fetch_add(1, Ordering::SeqCst);
            }
            let Some(frame) = remaining.next() else {
                break;
            };
            let from = cursor as usize * 2;
            frame[0] += samples[from] * gain;
            frame[1] += samples[from + 1] * gain;
            cursor += 1;
        }

        self.cursor.store(cursor, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_voice_fifo() {
        let voice = BotVoice::new(16);
        voice.activate();
        assert_eq!(voice.enqueue(&[0.1, 0.2, 0.3, 0.4]), 4);
        assert!(voice.is_speaking());

        let mut out = [0.0f32; 2];
        voice.render_into(&mut out);
        assert_eq!(out, [0.1, 0.2]);
        assert_eq!(voice.queued(), 2);

        let mut out = [0.0f32; 4];
        voice.render_into(&mut out);
        assert_eq!(out, [0.3, 0.4, 0.0, 0.0]);
        assert!(!voice.is_speaking());
        assert!(voice.is_active());
    }

    #[test]
    fn test_bot_voice_overflow() {
        let voice = BotVoice::new(4);
        assert_eq!(voice.enqueue(&[0.5; 6]), 4);
        assert_eq!(voice.queued(), 4);
    }

    #[test]
    fn test_bot_voice_flush() {
        let voice = BotVoice::new(8);
        voice.activate();
        voice.enqueue(&[0.5; 8]);
        voice.flush();

        assert!(!voice.is_active());
        assert_eq!(voice.queued(), 0);

        voice.activate();
        let mut out = [0.0f32; 8];
        voice.render_into(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_bot_voice_inactive_renders_nothing() {
        let voice = BotVoice::new(8);
        voice.enqueue(&[0.5; 4]);
        let mut out = [0.0f32; 4];
        voice.render_into(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(voice.queued(), 4);
    }

    #[test]
    fn test_bot_voice_resize() {
        let voice = BotVoice::new(4);
        voice.enqueue(&[0.5; 4]);
        voice.resize(32);
        assert_eq!(voice.capacity(), 32);
        assert_eq!(voice.queued(), 0);
        assert_eq!(voice.enqueue(&[0.5; 20]), 20);
    }

    #[test]
    fn test_music_voice_renders_and_finishes() {
        let voice = MusicVoice::new();
        voice.schedule(Arc::new(vec![0.5; 8]), 0);
        assert!(!voice.is_finished());

        // Paused voices do not advance
        let mut out = [0.0f32; 4];
        voice.render_into(&mut out);
        assert_eq!(voice.position_frames(), 0);

        voice.set_playing(true);
        voice.render_into(&mut out);
        assert_eq!(out, [0.5; 4]);
        assert_eq!(voice.position_frames(), 2);

        let mut out = [0.0f32; 8];
        voice.render_into(&mut out);
        assert_eq!(&out[..4], &[0.5; 4]);
        assert_eq!(&out[4..], &[0.0; 4]);
        assert!(voice.is_finished());
    }

    #[test]
    fn test_music_voice_loops_within_one_render() {
        let voice = MusicVoice::new();
        voice.set_looping(true);
        voice.schedule(Arc::new(vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]), 0);
        voice.set_playing(true);

        let mut out = [0.0f32; 10];
        voice.render_into(&mut out);
        assert_eq!(out, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.1, 0.1, 0.2, 0.2]);
        assert_eq!(voice.position_frames(), 2);
        assert_eq!(voice.wraps(), 1);
        assert!(!voice.is_finished());
    }

    #[test]
    fn test_music_voice_seek_to_end_wraps_when_looping() {
        let voice = MusicVoice::new();
        voice.set_looping(true);
        voice.schedule(Arc::new(vec![0.0; 200]), 0);
        voice.seek(1_000);
        assert_eq!(voice.position_frames(), 0);
        assert_eq!(voice.wraps(), 1);
        assert!(!voice.is_finished());

        voice.clear();
        assert!(!voice.is_looping());
        assert_eq!(voice.wraps(), 0);
    }

    #[test]
    fn test_bot_voice_flush_races_enqueue() {
        let voice = Arc::new(BotVoice::new(64));
        let producer = {
            let voice = Arc::clone(&voice);
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    voice.activate();
                    voice.enqueue(&[0.5; 8]);
                }
            })
        };
        for _ in 0..2_000 {
            voice.flush();
        }
        producer.join().unwrap();

        voice.flush();
        voice.activate();
        assert_eq!(voice.queued(), 0);
        assert!(!voice.is_speaking());
    }

    #[test]
    fn test_music_voice_gain() {
        let voice = MusicVoice::new();
        voice.set_gain(1.5);
        assert_eq!(voice.gain(), 1.0);
        voice.set_gain(-0.2);
        assert_eq!(voice.gain(), 0.0);
        voice.set_gain(f32::NAN);
        assert_eq!(voice.gain(), 0.0);

        voice.set_gain(0.5);
        voice.schedule(Arc::new(vec![1.0; 4]), 0);
        voice.set_playing(true);
        let mut out = [0.0f32; 4];
        voice.render_into(&mut out);
        assert_eq!(out, [0.5; 4]);
    }

    #[test]
    fn test_music_voice_seek() {
        let voice = MusicVoice::new();
        voice.schedule(Arc::new(vec![0.0; 200]), 0);
        voice.seek(50);
        assert_eq!(voice.position_frames(), 50);
        assert!(!voice.is_finished());

        voice.seek(1_000);
        assert_eq!(voice.position_frames(), 100);
        assert!(voice.is_finished());
    }

    #[test]
    fn test_music_voice_clear() {
        let voice = MusicVoice::new();
        voice.schedule(Arc::new(vec![0.0; 20]), 4);
        voice.set_playing(true);
        voice.clear();
        assert!(!voice.is_playing());
        assert_eq!(voice.position_frames(), 0);
        assert_eq!(voice.total_frames(), 0);
    }
}
