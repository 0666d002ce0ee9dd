//! Capture pipeline: microphone tap → ring buffer → bridge task → subscribers.
//!
//! The tap runs on the real-time thread. It gates, converts each hardware
//! buffer to the wire format and pushes the result into a bounded ring
//! without blocking. The bridge task drains the ring on the control side,
//! timestamps chunks and fans them out to the event sink and every
//! [`ChunkStream`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use ringbuf::traits::Producer;
use ringbuf::HeapProd;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::ring_buffer::{create_capture_buffer, create_capture_ring, CaptureBuffer, CaptureMessage};
use crate::backend::InputTap;
use crate::engine::EngineContext;
use crate::error::DeviceError;
use crate::event::{EngineEvent, EventEmitter};
use crate::format::{peak_amplitude, ConverterCache, FormatProfile};
use crate::graph::BotVoice;
use crate::stats::StatsCounters;
use crate::WireChunk;

/// Decides whether a quiet capture buffer is dropped while the bot speaks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CaptureGate {
    enabled: bool,
    threshold: f32,
}

impl CaptureGate {
    pub fn new(enabled: bool, threshold: f32) -> Self {
        Self { enabled, threshold }
    }

    pub fn should_drop(&self, peak: f32, bot_speaking: bool) -> bool {
        self.enabled && bot_speaking && peak < self.threshold
    }
}

/// Real-time half of the pipeline, owned by the input callback.
struct CaptureTap {
    producer: HeapProd<CaptureMessage>,
    converters: ConverterCache,
    gate: CaptureGate,
    bot_voice: Arc<BotVoice>,
    active: Arc<AtomicBool>,
    stats: Arc<StatsCounters>,
}

impl CaptureTap {
    fn process(&mut self, frames: &[f32]) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }

        let peak = peak_amplitude(frames);
        if self.gate.should_drop(peak, self.bot_voice.is_speaking()) {
            StatsCounters::incr(&self.stats.buffers_gated);
            return;
        }

        // No converter: skip this cycle. The build failure was already
        // reported when the pair was published.
        let Some(pair) = self.converters.get() else {
            StatsCounters::incr(&self.stats.conversion_failures);
            return;
        };

        let message = match pair.capture.convert(frames) {
            Ok(bytes) => CaptureMessage::Chunk(bytes),
            Err(err) => CaptureMessage::ConversionFailed(err),
        };
        if self.producer.try_push(message).is_err() {
            StatsCounters::incr(&self.stats.capture_overflows);
        }
    }
}

/// State shared between the bridge task and explicit drains.
///
/// Lock order is `emitting` before `buffer`. The buffer lock is never held
/// while the sink runs, so a sink may call back into the engine.
struct BridgeShared {
    buffer: Mutex<CaptureBuffer>,
    /// Held for the whole of a drain. `stop` takes it after clearing
    /// `active`, so it returns only once no chunk is in flight. Reentrant
    /// so the sink can stop or flush from its own callback.
    emitting: ReentrantMutex<()>,
    chunks: broadcast::Sender<WireChunk>,
    active: Arc<AtomicBool>,
    events: EventEmitter,
    stats: Arc<StatsCounters>,
}

impl BridgeShared {
    /// Emits every pending chunk in capture order. Returns how many chunks
    /// were delivered.
    fn drain(&self) -> usize {
        let _emitting = self.emitting.lock();
        let mut emitted = 0;

        // One message per pass, so a nested drain from the sink keeps
        // capture order.
        while self.active.load(Ordering::Acquire) {
            let next = self.buffer.lock().try_read_chunk();
            match next {
                Some(Ok(chunk)) => {
                    // No subscribers is fine
                    let _ = self.chunks.send(chunk.clone());
                    self.events.emit(EngineEvent::AudioChunk(chunk));
                    StatsCounters::incr(&self.stats.chunks_emitted);
                    emitted += 1;
                }
                Some(Err(err)) => {
                    StatsCounters::incr(&self.stats.conversion_failures);
                    tracing::warn!(error = %err, "dropping capture buffer");
                    self.events.emit_error(err);
                }
                None => break,
            }
        }

        emitted
    }

    /// Ends the session for every drain. Waits out a drain running on
    /// another thread.
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        drop(self.emitting.lock());
    }
}

struct CaptureSession {
    tap: Option<InputTap>,
    bridge: JoinHandle<()>,
    shared: Arc<BridgeShared>,
}

/// A subscription to captured wire chunks.
///
/// Ends (`next` returns `None`) when recording stops. Subscribers that fall
/// too far behind skip the chunks they missed.
///
/// # Example
///
/// ```ignore
/// let mut chunks = engine.start_recording()?;
/// while let Some(chunk) = chunks.next().await {
///     send_to_peer(&chunk.data);
/// }
/// ```
pub struct ChunkStream {
    rx: broadcast::Receiver<WireChunk>,
}

impl ChunkStream {
    fn new(rx: broadcast::Receiver<WireChunk>) -> Self {
        Self { rx }
    }

    /// Waits for the next chunk.
    pub async fn next(&mut self) -> Option<WireChunk> {
        loop {
            match self.rx.recv().await {
                Ok(chunk) => return Some(chunk),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "chunk subscriber lagging, skipping chunks");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next chunk if one is ready.
    pub fn try_next(&mut self) -> Option<WireChunk> {
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => return Some(chunk),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "chunk subscriber lagging, skipping chunks");
                }
                Err(_) => return None,
            }
        }
    }
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("pending", &self.rx.len())
            .finish()
    }
}

/// Owns the capture tap and the bridge task while recording.
pub(crate) struct CapturePipeline {
    ctx: Arc<EngineContext>,
    session: Mutex<Option<CaptureSession>>,
}

impl CapturePipeline {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            session: Mutex::new(None),
        }
    }

    /// Installs the tap and starts the bridge.
    ///
    /// Calling it while already capturing returns another subscription to
    /// the running session.
    pub fn start(&self) -> Result<ChunkStream, DeviceError> {
        let mut session = self.session.lock();
        if let Some(running) = session.as_ref() {
            tracing::debug!("capture already running, adding subscriber");
            return Ok(ChunkStream::new(running.shared.chunks.subscribe()));
        }

        let audio = self.ctx.audio_config();
        let wire = FormatProfile::wire(audio.channels);
        let capacity = self.ctx.tuning.capture_ring_chunks;
        let active = Arc::new(AtomicBool::new(true));

        let (producer, buffer) = create_capture_buffer(capacity, wire);
        let tap = match self.install_tap(producer, &active) {
            Ok(tap) => tap,
            Err(err) => {
                tracing::error!(error = %err, "failed to install capture tap");
                self.ctx.events.emit_error(&err);
                return Err(err);
            }
        };

        let (chunks, rx) = broadcast::channel(capacity.max(1));
        let shared = Arc::new(BridgeShared {
            buffer: Mutex::new(buffer),
            emitting: ReentrantMutex::new(()),
            chunks,
            active,
            events: self.ctx.events.clone(),
            stats: Arc::clone(&self.ctx.stats),
        });
        let bridge = self.spawn_bridge(Arc::clone(&shared));

        tracing::info!(
            wire = %wire,
            buffer_frames = audio.buffer_size,
            gated = audio.gate_during_playback,
            "capture started"
        );

        *session = Some(CaptureSession {
            tap: Some(tap),
            bridge,
            shared,
        });
        Ok(ChunkStream::new(rx))
    }

    /// Stops capture. No chunk captured before this call is emitted after
    /// it returns. Idempotent.
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        session.shared.deactivate();
        // Removing the tap drops the producer with it
        drop(session.tap);
        session.bridge.abort();
        tracing::info!("capture stopped");
    }

    pub fn is_active(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Reinstalls the tap against the current hardware format, keeping
    /// subscribers and the chunk timeline.
    pub fn reinstall(&self) -> Result<(), DeviceError> {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return Ok(());
        };

        session.tap = None;
        let (producer, consumer) = create_capture_ring(self.ctx.tuning.capture_ring_chunks);
        session.shared.buffer.lock().replace_consumer(consumer);

        match self.install_tap(producer, &session.shared.active) {
            Ok(tap) => {
                session.tap = Some(tap);
                tracing::info!("capture tap reinstalled");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to reinstall capture tap");
                self.ctx.events.emit_error(&err);
                Err(err)
            }
        }
    }

    /// Drains the ring right away instead of waiting for the next bridge
    /// tick. Returns how many chunks were emitted.
    pub fn pump(&self) -> usize {
        let shared = match self.session.lock().as_ref() {
            Some(session) => Arc::clone(&session.shared),
            None => return 0,
        };
        shared.drain()
    }

    fn install_tap(
        &self,
        producer: HeapProd<CaptureMessage>,
        active: &Arc<AtomicBool>,
    ) -> Result<InputTap, DeviceError> {
        let audio = self.ctx.audio_config();
        let mut tap = CaptureTap {
            producer,
            converters: ConverterCache::new(Arc::clone(&self.ctx.converters)),
            gate: CaptureGate::new(audio.gate_during_playback, audio.amplitude_threshold),
            bot_voice: Arc::clone(&self.ctx.bot_voice),
            active: Arc::clone(active),
            stats: Arc::clone(&self.ctx.stats),
        };

        self.ctx.backend.install_input_tap(
            audio.buffer_size,
            Box::new(move |frames: &[f32]| tap.process(frames)),
        )
    }

    fn spawn_bridge(&self, shared: Arc<BridgeShared>) -> JoinHandle<()> {
        let poll = self.ctx.tuning.bridge_poll_interval;
        self.ctx.runtime.spawn(async move {
            let mut interval = tokio::time::interval(poll);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while shared.active.load(Ordering::Acquire) {
                interval.tick().await;
                let emitted = shared.drain();
                if emitted > 0 {
                    tracing::trace!(emitted, "capture bridge drained ring");
                }
            }
        })
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_disabled_never_drops() {
        let gate = CaptureGate::new(false, 0.05);
        assert!(!gate.should_drop(0.0, true));
    }

    #[test]
    fn test_gate_drops_quiet_buffers_while_bot_speaks() {
        let gate = CaptureGate::new(true, 0.05);
        assert!(gate.should_drop(0.01, true));
        assert!(!gate.should_drop(0.01, false));
        assert!(!gate.should_drop(0.5, true));
    }

    #[test]
    fn test_gate_threshold_is_exclusive() {
        let gate = CaptureGate::new(true, 0.05);
        assert!(!gate.should_drop(0.05, true));
    }
}
