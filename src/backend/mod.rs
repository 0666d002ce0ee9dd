//! Hardware abstraction between the engine and the platform audio stack.
//!
//! The engine never talks to a device directly. It activates a session,
//! installs an input tap and starts one output stream through an
//! [`AudioBackend`]. Two implementations ship with the crate:
//!
//! - [`CpalBackend`]: real devices via CPAL
//! - [`MockBackend`]: a deterministic double for tests and CI

mod cpal;
mod mock;

pub use self::cpal::CpalBackend;
pub use mock::MockBackend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{SessionConfig, VoiceProcessing};
use crate::error::DeviceError;

/// Device formats reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Microphone sample rate in Hz.
    pub input_sample_rate: u32,
    /// Microphone channel count.
    pub input_channels: u16,
    /// Output (session) sample rate in Hz.
    pub output_sample_rate: u32,
    /// Output channel count.
    pub output_channels: u16,
}

/// Hardware parameters the engine asks the backend to negotiate. The
/// backend picks the closest the device supports and reports what it got
/// through [`DeviceInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwarePreferences {
    /// Preferred hardware sample rate in Hz.
    pub sample_rate: u32,
    /// Preferred I/O buffer duration. `None` keeps the device default.
    pub buffer_duration: Option<Duration>,
}

impl HardwarePreferences {
    /// Hardware buffer size in frames for the preferred duration at
    /// `sample_rate`, never less than one frame.
    pub fn buffer_frames(&self, sample_rate: u32) -> Option<u32> {
        self.buffer_duration.map(|duration| {
            let frames = (duration.as_secs_f64() * f64::from(sample_rate)).round();
            (frames as u32).max(1)
        })
    }
}

/// Platform notifications the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceNotification {
    /// The route or device configuration changed (device switch, sample
    /// rate change, device lost).
    RouteChanged,
    /// Another app or the system took the audio session.
    InterruptionBegan,
    /// The interruption ended. The engine does not resume on its own.
    InterruptionEnded {
        /// Platform hint that resuming is appropriate.
        should_resume: bool,
    },
}

/// Sender the backend uses to deliver [`DeviceNotification`]s.
pub type NotificationSender = mpsc::UnboundedSender<DeviceNotification>;

/// Real-time input callback: receives one hardware buffer of interleaved
/// f32 frames in the device's native channel layout.
///
/// Must not block or allocate unboundedly.
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Real-time render callback: fills an interleaved stereo f32 buffer at the
/// output sample rate.
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Platform audio access.
pub trait AudioBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Activates the audio session with the requested parameters and
    /// voice-processing toggles. Toggles the platform cannot honor are
    /// logged and ignored. Streams opened afterwards use the hardware
    /// format negotiated from `preferences`.
    fn activate_session(
        &self,
        session: &SessionConfig,
        processing: VoiceProcessing,
        preferences: HardwarePreferences,
        notifications: NotificationSender,
    ) -> Result<DeviceInfo, DeviceError>;

    /// Deactivates the session. Idempotent.
    fn deactivate_session(&self);

    /// Queries the current device formats.
    fn device_info(&self) -> Result<DeviceInfo, DeviceError>;

    /// Installs a capture tap delivering `buffer_frames` frames per call.
    /// The tap stays installed while the returned handle is alive.
    fn install_input_tap(
        &self,
        buffer_frames: u32,
        callback: InputCallback,
    ) -> Result<InputTap, DeviceError>;

    /// Starts the output stream. Output runs while the returned handle is
    /// alive.
    fn start_output(
        &self,
        sample_rate: u32,
        render: RenderCallback,
    ) -> Result<OutputStream, DeviceError>;
}

/// An installed capture tap. Dropping it removes the tap.
#[must_use]
pub struct InputTap {
    _guard: Box<dyn Send>,
}

impl InputTap {
    /// Wraps a backend-specific guard whose `Drop` removes the tap.
    pub fn new(guard: impl Send + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for InputTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputTap").finish_non_exhaustive()
    }
}

/// A running output stream. Dropping it stops output.
#[must_use]
pub struct OutputStream {
    _guard: Box<dyn Send>,
    running: Arc<AtomicBool>,
}

impl OutputStream {
    /// Wraps a backend-specific guard. The backend clears `running` when
    /// the stream dies underneath it.
    pub fn new(guard: impl Send + 'static, running: Arc<AtomicBool>) -> Self {
        Self {
            _guard: Box::new(guard),
            running,
        }
    }

    /// Returns `false` once the backend reported the stream as stopped.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Regroups arbitrarily-sized device callbacks into fixed-size tap buffers.
///
/// The accumulator is allocated once; `push` never allocates.
pub(crate) struct TapAccumulator {
    buffer: Vec<f32>,
    filled: usize,
}

impl TapAccumulator {
    pub fn new(buffer_frames: u32, channels: u16) -> Self {
        let len = (buffer_frames as usize * channels as usize).max(1);
        Self {
            buffer: vec![0.0; len],
            filled: 0,
        }
    }

    /// Appends samples, invoking `deliver` each time a full buffer is ready.
    pub fn push(&mut self, mut samples: &[f32], deliver: &mut dyn FnMut(&[f32])) {
        while !samples.is_empty() {
            let space = self.buffer.len() - self.filled;
            let take = space.min(samples.len());
            self.buffer[self.filled..self.filled + take].copy_from_slice(&samples[..take]);
            self.filled += take;
            samples = &samples[take..];

            if self.filled == self.buffer.len() {
                deliver(&self.buffer);
                self.filled = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_regroups() {
        let mut acc = TapAccumulator::new(4, 1);
        let mut delivered: Vec<Vec<f32>> = Vec::new();
        let mut deliver = |buf: &[f32]| delivered.push(buf.to_vec());

        acc.push(&[1.0, 2.0, 3.0], &mut deliver);
        acc.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], &mut deliver);

        assert_eq!(
            delivered,
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );
    }

    #[test]
    fn test_accumulator_stereo_size() {
        let mut acc = TapAccumulator::new(2, 2);
        let mut count = 0;
        let mut deliver = |buf: &[f32]| {
            assert_eq!(buf.len(), 4);
            count += 1;
        };
        acc.push(&[0.0; 10], &mut deliver);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_buffer_frames_from_duration() {
        let preferences = HardwarePreferences {
            sample_rate: 48_000,
            buffer_duration: Some(Duration::from_millis(10)),
        };
        assert_eq!(preferences.buffer_frames(48_000), Some(480));
        assert_eq!(preferences.buffer_frames(44_100), Some(441));

        let tiny = HardwarePreferences {
            buffer_duration: Some(Duration::from_nanos(1)),
            ..preferences
        };
        assert_eq!(tiny.buffer_frames(8_000), Some(1));

        let unset = HardwarePreferences {
            buffer_duration: None,
            ..preferences
        };
        assert_eq!(unset.buffer_frames(48_000), None);
    }

    #[test]
    fn test_output_stream_running_flag() {
        let running = Arc::new(AtomicBool::new(true));
        let stream = OutputStream::new((), Arc::clone(&running));
        assert!(stream.is_running());
        running.store(false, Ordering::SeqCst);
        assert!(!stream.is_running());
    }
}
