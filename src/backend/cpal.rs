//! CPAL-backed device access.
//!
//! `cpal::Stream` is not `Send`, so every stream lives on its own thread and
//! is dropped there when the owning handle signals stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize,
    SupportedStreamConfig, SupportedStreamConfigRange,
};
use parking_lot::Mutex;

use super::{
    AudioBackend, DeviceInfo, DeviceNotification, HardwarePreferences, InputCallback, InputTap,
    NotificationSender, OutputStream, RenderCallback, TapAccumulator,
};
use crate::config::{SessionConfig, VoiceProcessing};
use crate::error::DeviceError;
use crate::format::{f32_to_i16, remap_channels};

/// Largest device callback we pre-size scratch buffers for. Larger callbacks
/// grow the scratch once and keep it.
const SCRATCH_FRAMES: usize = 8192;

/// Default-device backend using the CPAL host.
pub struct CpalBackend {
    notifications: Arc<Mutex<Option<NotificationSender>>>,
    /// Set while a session is active.
    preferences: Mutex<Option<HardwarePreferences>>,
}

impl CpalBackend {
    /// Creates a backend for the default host.
    pub fn new() -> Self {
        Self {
            notifications: Arc::new(Mutex::new(None)),
            preferences: Mutex::new(None),
        }
    }

    fn input_config(
        device: &Device,
        preferences: Option<HardwarePreferences>,
    ) -> Result<SupportedStreamConfig, DeviceError> {
        let default = device
            .default_input_config()
            .map_err(DeviceError::backend)?;
        let Some(preferences) = preferences else {
            return Ok(default);
        };
        match device.supported_input_configs() {
            Ok(ranges) => Ok(nearest_config(default, ranges, preferences.sample_rate)),
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    "input config ranges unavailable, using device default"
                );
                Ok(default)
            }
        }
    }

    fn output_config(
        device: &Device,
        sample_rate: u32,
    ) -> Result<SupportedStreamConfig, DeviceError> {
        let default = device
            .default_output_config()
            .map_err(DeviceError::backend)?;
        match device.supported_output_configs() {
            Ok(ranges) => Ok(nearest_config(default, ranges, sample_rate)),
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    "output config ranges unavailable, using device default"
                );
                Ok(default)
            }
        }
    }

    fn input_device() -> Result<Device, DeviceError> {
        cpal::default_host()
            .default_input_device()
            .ok_or(DeviceError::NoInputDevice)
    }

    fn output_device() -> Result<Device, DeviceError> {
        cpal::default_host()
            .default_output_device()
            .ok_or(DeviceError::NoOutputDevice)
    }

    fn error_handler(
        notifications: &Arc<Mutex<Option<NotificationSender>>>,
        running: Option<Arc<AtomicBool>>,
        direction: &'static str,
    ) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let notifications = Arc::clone(notifications);
        move |err| {
            tracing::error!(direction, error = %err, "audio stream error");
            if let cpal::StreamError::DeviceNotAvailable = err {
                if let Some(running) = &running {
                    running.store(false, Ordering::SeqCst);
                }
                if let Some(tx) = notifications.lock().as_ref() {
                    let _ = tx.send(DeviceNotification::RouteChanged);
                }
            }
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn activate_session(
        &self,
        session: &SessionConfig,
        processing: VoiceProcessing,
        preferences: HardwarePreferences,
        notifications: NotificationSender,
    ) -> Result<DeviceInfo, DeviceError> {
        if processing != VoiceProcessing::default() {
            tracing::debug!(
                ?processing,
                "voice processing not available on this host, continuing without it"
            );
        }
        if !session.options.is_empty() {
            tracing::debug!(options = ?session.options, "session options ignored by cpal host");
        }

        *self.preferences.lock() = Some(preferences);
        let info = match self.device_info() {
            Ok(info) => info,
            Err(e) => {
                self.preferences.lock().take();
                return Err(DeviceError::ActivationFailed {
                    reason: e.to_string(),
                });
            }
        };
        *self.notifications.lock() = Some(notifications);

        tracing::info!(
            category = ?session.category,
            mode = ?session.mode,
            preferred_rate = preferences.sample_rate,
            buffer_duration = ?preferences.buffer_duration,
            input_rate = info.input_sample_rate,
            output_rate = info.output_sample_rate,
            "audio session activated"
        );
        Ok(info)
    }

    fn deactivate_session(&self) {
        self.preferences.lock().take();
        if self.notifications.lock().take().is_some() {
            tracing::info!("audio session deactivated");
        }
    }

    fn device_info(&self) -> Result<DeviceInfo, DeviceError> {
        let preferences = *self.preferences.lock();
        let input = Self::input_config(&Self::input_device()?, preferences)?;
        let output_device = Self::output_device()?;
        let output = match preferences {
            Some(p) => Self::output_config(&output_device, p.sample_rate)?,
            None => output_device
                .default_output_config()
                .map_err(DeviceError::backend)?,
        };

        Ok(DeviceInfo {
            input_sample_rate: input.sample_rate().0,
            input_channels: input.channels(),
            output_sample_rate: output.sample_rate().0,
            output_channels: output.channels(),
        })
    }

    fn install_input_tap(
        &self,
        buffer_frames: u32,
        callback: InputCallback,
    ) -> Result<InputTap, DeviceError> {
        let on_error = Self::error_handler(&self.notifications, None, "input");
        let preferences = *self.preferences.lock();

        let thread = StreamThread::spawn("duplex-audio-input", move || {
            let device = Self::input_device()?;
            let supported = Self::input_config(&device, preferences)?;
            let sample_format = supported.sample_format();
            let hardware_frames = preferences
                .and_then(|p| p.buffer_frames(supported.sample_rate().0))
                .unwrap_or(buffer_frames);
            let buffer_size = fixed_buffer_size(supported.buffer_size(), hardware_frames);
            let mut config: StreamConfig = supported.into();
            config.buffer_size = buffer_size;

            build_input_stream(&device, &config, sample_format, buffer_frames, callback, on_error)
        })?;

        tracing::debug!(buffer_frames, "input tap installed");
        Ok(InputTap::new(thread))
    }

    fn start_output(
        &self,
        sample_rate: u32,
        render: RenderCallback,
    ) -> Result<OutputStream, DeviceError> {
        let running = Arc::new(AtomicBool::new(true));
        let on_error =
            Self::error_handler(&self.notifications, Some(Arc::clone(&running)), "output");
        let preferences = *self.preferences.lock();

        let thread = StreamThread::spawn("duplex-audio-output", move || {
            let device = Self::output_device()?;
            let supported = Self::output_config(&device, sample_rate)?;
            let sample_format = supported.sample_format();
            let buffer_size = match preferences.and_then(|p| p.buffer_frames(sample_rate)) {
                Some(frames) => fixed_buffer_size(supported.buffer_size(), frames),
                None => BufferSize::Default,
            };
            let mut config: StreamConfig = supported.into();
            config.buffer_size = buffer_size;
            if config.sample_rate.0 != sample_rate {
                tracing::warn!(
                    device_rate = config.sample_rate.0,
                    requested = sample_rate,
                    "output device rate differs from mix rate, requesting mix rate"
                );
                config.sample_rate = SampleRate(sample_rate);
            }

            build_output_stream(&device, &config, sample_format, render, on_error)
        })?;

        tracing::debug!(sample_rate, "output stream started");
        Ok(OutputStream::new(thread, running))
    }
}

fn fixed_buffer_size(supported: &SupportedBufferSize, frames: u32) -> BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => BufferSize::Default,
    }
}

/// Picks the supported config whose rate range comes closest to `preferred`,
/// keeping the default's channel layout and sample format. Falls back to
/// `default` when nothing is closer.
fn nearest_config(
    default: SupportedStreamConfig,
    ranges: impl IntoIterator<Item = SupportedStreamConfigRange>,
    preferred: u32,
) -> SupportedStreamConfig {
    let mut distance = default.sample_rate().0.abs_diff(preferred);
    let channels = default.channels();
    let format = default.sample_format();
    let mut best = default;

    for range in ranges {
        if distance == 0 {
            break;
        }
        if range.channels() != channels || range.sample_format() != format {
            continue;
        }
        let rate = preferred.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
        if rate.abs_diff(preferred) < distance {
            if let Some(config) = range.try_with_sample_rate(SampleRate(rate)) {
                distance = rate.abs_diff(preferred);
                best = config;
            }
        }
    }
    best
}

fn build_input_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    buffer_frames: u32,
    mut callback: InputCallback,
    on_error: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<Stream, DeviceError> {
    let mut accumulator = TapAccumulator::new(buffer_frames, config.channels);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                accumulator.push(data, &mut |buffer| callback(buffer));
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::with_capacity(SCRATCH_FRAMES * config.channels as usize);
            device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| f32::from(s) / i16::MAX as f32));
                    accumulator.push(&scratch, &mut |buffer| callback(buffer));
                },
                on_error,
                None,
            )
        }
        format => {
            return Err(DeviceError::UnsupportedFormat {
                format: format!("{format:?}"),
            })
        }
    };

    stream.map_err(DeviceError::backend)
}

fn build_output_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    mut render: RenderCallback,
    on_error: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<Stream, DeviceError> {
    let device_channels = config.channels;
    let mut mix = Vec::with_capacity(SCRATCH_FRAMES * 2);

    // Renders one device callback's worth of stereo mix, then maps it onto
    // the device channel layout.
    let mut render_device = move |frames: usize, out: &mut dyn FnMut(&[f32])| {
        mix.clear();
        mix.resize(frames * 2, 0.0);
        render(&mut mix);
        if device_channels == 2 {
            out(&mix);
        } else {
            out(&remap_channels(&mix, 2, device_channels));
        }
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / device_channels as usize;
                render_device(frames, &mut |samples| {
                    let n = samples.len().min(data.len());
                    data[..n].copy_from_slice(&samples[..n]);
                    data[n..].fill(0.0);
                });
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / device_channels as usize;
                render_device(frames, &mut |samples| {
                    for (dst, &src) in data.iter_mut().zip(samples) {
                        *dst = f32_to_i16(src);
                    }
                });
            },
            on_error,
            None,
        ),
        format => {
            return Err(DeviceError::UnsupportedFormat {
                format: format!("{format:?}"),
            })
        }
    };

    stream.map_err(DeviceError::backend)
}

/// Owns a thread that builds, plays and finally drops one CPAL stream.
struct StreamThread {
    stop: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> Result<Self, DeviceError>
    where
        F: FnOnce() -> Result<Stream, DeviceError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), DeviceError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(DeviceError::backend(e)));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Blocks until the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(DeviceError::backend)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop: Some(stop_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(DeviceError::backend("stream thread exited during setup"))
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        // Dropping the sender wakes the thread
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("audio stream thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_buffer_size_in_range() {
        let supported = SupportedBufferSize::Range { min: 64, max: 8192 };
        assert_eq!(fixed_buffer_size(&supported, 4096), BufferSize::Fixed(4096));
    }

    #[test]
    fn test_fixed_buffer_size_falls_back() {
        let supported = SupportedBufferSize::Range { min: 64, max: 1024 };
        assert_eq!(fixed_buffer_size(&supported, 4096), BufferSize::Default);
        assert_eq!(
            fixed_buffer_size(&SupportedBufferSize::Unknown, 4096),
            BufferSize::Default
        );
    }

    fn range(min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            2,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Range { min: 64, max: 4096 },
            format,
        )
    }

    fn default_config(rate: u32) -> SupportedStreamConfig {
        SupportedStreamConfig::new(
            2,
            SampleRate(rate),
            SupportedBufferSize::Range { min: 64, max: 4096 },
            SampleFormat::F32,
        )
    }

    #[test]
    fn test_nearest_config_hits_preferred_rate() {
        let ranges = vec![
            range(8_000, 16_000, SampleFormat::F32),
            range(44_100, 96_000, SampleFormat::F32),
        ];
        let config = nearest_config(default_config(44_100), ranges, 48_000);
        assert_eq!(config.sample_rate(), SampleRate(48_000));
        assert_eq!(config.sample_format(), SampleFormat::F32);
    }

    #[test]
    fn test_nearest_config_clamps_into_closest_range() {
        let ranges = vec![
            range(8_000, 16_000, SampleFormat::F32),
            range(22_050, 32_000, SampleFormat::F32),
        ];
        let config = nearest_config(default_config(8_000), ranges, 48_000);
        assert_eq!(config.sample_rate(), SampleRate(32_000));
    }

    #[test]
    fn test_nearest_config_keeps_default_format() {
        let ranges = vec![range(48_000, 48_000, SampleFormat::U8)];
        let config = nearest_config(default_config(44_100), ranges, 48_000);
        assert_eq!(config.sample_rate(), SampleRate(44_100));
        assert_eq!(config.sample_format(), SampleFormat::F32);
    }

    #[test]
    fn test_nearest_config_default_already_matches() {
        let ranges = vec![range(8_000, 96_000, SampleFormat::F32)];
        let config = nearest_config(default_config(48_000), ranges, 48_000);
        assert_eq!(config.sample_rate(), SampleRate(48_000));
    }

    #[test]
    fn test_fixed_buffer_size_from_preferred_duration() {
        let preferences = HardwarePreferences {
            sample_rate: 48_000,
            buffer_duration: Some(std::time::Duration::from_millis(5)),
        };
        let frames = preferences.buffer_frames(48_000).unwrap();
        let supported = SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(fixed_buffer_size(&supported, frames), BufferSize::Fixed(240));
    }

    // Device tests require actual audio hardware and are skipped in CI
    #[test]
    #[ignore = "requires audio hardware"]
    fn test_device_info() {
        let backend = CpalBackend::new();
        let info = backend.device_info().unwrap();
        assert!(info.input_sample_rate > 0);
        assert!(info.output_sample_rate > 0);
    }
}
