//! Mock backend for testing without hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    AudioBackend, DeviceInfo, DeviceNotification, HardwarePreferences, InputCallback, InputTap,
    NotificationSender, OutputStream, RenderCallback,
};
use crate::config::{SessionConfig, VoiceProcessing};
use crate::error::DeviceError;

type TapSlot = Arc<Mutex<Option<(u64, InputCallback)>>>;
type RenderSlot = Arc<Mutex<Option<(u64, RenderCallback)>>>;

/// A deterministic backend that drives the engine from test code.
///
/// Input buffers are delivered with [`deliver_input`](Self::deliver_input)
/// and output is pulled with [`render`](Self::render), both synchronously on
/// the calling thread. Device changes and failures are simulated explicitly.
///
/// # Example
///
/// ```
/// use duplex_audio::backend::MockBackend;
///
/// let mock = MockBackend::new(48_000, 1, 48_000);
///
/// // 100ms of a 440Hz tone in the microphone's format
/// let tone = mock.sine(440.0, 0.5, 4800);
/// assert_eq!(tone.len(), 4800);
/// ```
pub struct MockBackend {
    state: Mutex<MockState>,
    tap: TapSlot,
    output: RenderSlot,
    output_running: Mutex<Option<Arc<AtomicBool>>>,
    next_id: AtomicU64,
}

struct MockState {
    info: DeviceInfo,
    activation_failure: Option<String>,
    output_failure: Option<String>,
    notifications: Option<NotificationSender>,
    session: Option<SessionConfig>,
    processing: Option<VoiceProcessing>,
    preferences: Option<HardwarePreferences>,
    tap_buffer_frames: Option<u32>,
    output_rate: Option<u32>,
}

impl MockBackend {
    /// Creates a mock device with the given input format and output rate.
    /// Output is stereo.
    pub fn new(input_rate: u32, input_channels: u16, output_rate: u32) -> Self {
        Self {
            state: Mutex::new(MockState {
                info: DeviceInfo {
                    input_sample_rate: input_rate,
                    input_channels,
                    output_sample_rate: output_rate,
                    output_channels: 2,
                },
                activation_failure: None,
                output_failure: None,
                notifications: None,
                session: None,
                processing: None,
                preferences: None,
                tap_buffer_frames: None,
                output_rate: None,
            }),
            tap: Arc::new(Mutex::new(None)),
            output: Arc::new(Mutex::new(None)),
            output_running: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Makes the next session activations fail with `reason`.
    pub fn fail_activation(&self, reason: impl Into<String>) {
        self.state.lock().activation_failure = Some(reason.into());
    }

    /// Makes the next output starts fail with `reason`.
    pub fn fail_output(&self, reason: impl Into<String>) {
        self.state.lock().output_failure = Some(reason.into());
    }

    /// Clears simulated failures.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.activation_failure = None;
        state.output_failure = None;
    }

    /// Changes the reported device rates, as a route change would.
    ///
    /// Call [`notify`](Self::notify) afterwards to let the engine know.
    pub fn set_device_rates(&self, input_rate: u32, output_rate: u32) {
        let mut state = self.state.lock();
        state.info.input_sample_rate = input_rate;
        state.info.output_sample_rate = output_rate;
    }

    /// Marks the running output stream as stopped, as if the platform
    /// halted the graph.
    pub fn stop_output(&self) {
        if let Some(running) = self.output_running.lock().as_ref() {
            running.store(false, Ordering::SeqCst);
        }
        self.output.lock().take();
    }

    /// Sends a notification to the active session. Returns `false` if no
    /// session is active.
    pub fn notify(&self, notification: DeviceNotification) -> bool {
        self.state
            .lock()
            .notifications
            .as_ref()
            .is_some_and(|tx| tx.send(notification).is_ok())
    }

    /// Delivers one input buffer to the installed tap. Returns `false` if no
    /// tap is installed.
    pub fn deliver_input(&self, samples: &[f32]) -> bool {
        match self.tap.lock().as_mut() {
            Some((_, callback)) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    /// Pulls `frames` stereo frames from the output stream. Returns silence
    /// when no output is running.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut buffer = vec![0.0; frames * 2];
        if let Some((_, render)) = self.output.lock().as_mut() {
            render(&mut buffer);
        }
        buffer
    }

    /// Generates a sine buffer in the current input format.
    pub fn sine(&self, frequency: f64, amplitude: f32, frames: usize) -> Vec<f32> {
        let info = self.state.lock().info;
        let rate = f64::from(info.input_sample_rate);
        let mut samples = Vec::with_capacity(frames * info.input_channels as usize);
        for i in 0..frames {
            let t = i as f64 / rate;
            let value = (2.0 * std::f64::consts::PI * frequency * t).sin() as f32 * amplitude;
            for _ in 0..info.input_channels {
                samples.push(value);
            }
        }
        samples
    }

    /// Generates a silent buffer in the current input format.
    pub fn silence(&self, frames: usize) -> Vec<f32> {
        let channels = self.state.lock().info.input_channels as usize;
        vec![0.0; frames * channels]
    }

    /// Returns `true` while a session is active.
    pub fn is_session_active(&self) -> bool {
        self.state.lock().notifications.is_some()
    }

    /// Returns `true` while a capture tap is installed.
    pub fn is_tap_installed(&self) -> bool {
        self.tap.lock().is_some()
    }

    /// Returns `true` while an output stream is running.
    pub fn is_output_active(&self) -> bool {
        self.output.lock().is_some()
    }

    /// Buffer size requested by the last tap installation.
    pub fn tap_buffer_frames(&self) -> Option<u32> {
        self.state.lock().tap_buffer_frames
    }

    /// Sample rate requested by the last output start.
    pub fn output_rate(&self) -> Option<u32> {
        self.state.lock().output_rate
    }

    /// Session configuration passed to the last activation.
    pub fn last_session(&self) -> Option<SessionConfig> {
        self.state.lock().session.clone()
    }

    /// Voice-processing toggles passed to the last activation.
    pub fn last_voice_processing(&self) -> Option<VoiceProcessing> {
        self.state.lock().processing
    }

    /// Hardware preferences passed to the last activation.
    pub fn last_preferences(&self) -> Option<HardwarePreferences> {
        self.state.lock().preferences
    }

    /// Hardware buffer size the last activation asked for, in frames at the
    /// device's input rate.
    pub fn requested_buffer_frames(&self) -> Option<u32> {
        let state = self.state.lock();
        state
            .preferences
            .and_then(|p| p.buffer_frames(state.info.input_sample_rate))
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(48_000, 1, 48_000)
    }
}

impl AudioBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn activate_session(
        &self,
        session: &SessionConfig,
        processing: VoiceProcessing,
        preferences: HardwarePreferences,
        notifications: NotificationSender,
    ) -> Result<DeviceInfo, DeviceError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.activation_failure {
            return Err(DeviceError::ActivationFailed {
                reason: reason.clone(),
            });
        }
        state.session = Some(session.clone());
        state.processing = Some(processing);
        state.preferences = Some(preferences);
        state.notifications = Some(notifications);
        Ok(state.info)
    }

    fn deactivate_session(&self) {
        self.state.lock().notifications = None;
    }

    fn device_info(&self) -> Result<DeviceInfo, DeviceError> {
        Ok(self.state.lock().info)
    }

    fn install_input_tap(
        &self,
        buffer_frames: u32,
        callback: InputCallback,
    ) -> Result<InputTap, DeviceError> {
        let id = self.next_id();
        self.state.lock().tap_buffer_frames = Some(buffer_frames);
        *self.tap.lock() = Some((id, callback));
        Ok(InputTap::new(SlotGuard {
            slot: Arc::clone(&self.tap),
            id,
        }))
    }

    fn start_output(
        &self,
        sample_rate: u32,
        render: RenderCallback,
    ) -> Result<OutputStream, DeviceError> {
        {
            let mut state = self.state.lock();
            if let Some(reason) = &state.output_failure {
                return Err(DeviceError::backend(reason));
            }
            state.output_rate = Some(sample_rate);
        }

        let id = self.next_id();
        let running = Arc::new(AtomicBool::new(true));
        *self.output.lock() = Some((id, render));
        *self.output_running.lock() = Some(Arc::clone(&running));

        Ok(OutputStream::new(
            SlotGuard {
                slot: Arc::clone(&self.output),
                id,
            },
            running,
        ))
    }
}

/// Clears a callback slot on drop, unless a newer callback replaced it.
struct SlotGuard<T: Send> {
    slot: Arc<Mutex<Option<(u64, T)>>>,
    id: u64,
}

impl<T: Send> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|(id, _)| *id == self.id) {
            *slot = None;
        }
    }
}
