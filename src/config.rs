//! Configuration types for the engine.
//!
//! Every recognized option has a documented default, so a collaborator that
//! only knows a subset of keys can start from `Default` and override.

use std::time::Duration;

use crate::error::ConfigError;

/// Wire sample rate. Fixed for the lifetime of the engine.
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// Capture and wire format options.
///
/// # Example
///
/// ```
/// use duplex_audio::AudioConfig;
///
/// let config = AudioConfig {
///     channels: 2,
///     gate_during_playback: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    /// Wire channel count (1 = mono, 2 = stereo). Default: 1
    pub channels: u16,

    /// Preferred hardware sample rate in Hz. The device may run at a
    /// different rate; the engine adapts. Default: 48000
    pub sample_rate: u32,

    /// Wire bit depth. Only 16 is accepted. Default: 16
    pub bit_depth: u16,

    /// Frames per hardware buffer delivered to the capture tap. Default: 4096
    pub buffer_size: u32,

    /// Peak amplitude below which a capture buffer counts as quiet. Default: 0.05
    pub amplitude_threshold: f32,

    /// Request echo cancellation from the platform. Default: true
    pub enable_aec: bool,

    /// Drop quiet capture buffers while bot audio is playing.
    ///
    /// Known to cause intermittent capture gaps, hence off by default.
    pub gate_during_playback: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 48_000,
            bit_depth: 16,
            buffer_size: 4096,
            amplitude_threshold: 0.05,
            enable_aec: true,
            gate_during_playback: false,
        }
    }
}

impl AudioConfig {
    /// Checks that every field is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=2).contains(&self.channels) {
            return Err(ConfigError::InvalidChannels {
                channels: self.channels,
            });
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        if self.bit_depth != 16 {
            return Err(ConfigError::InvalidBitDepth {
                bit_depth: self.bit_depth,
            });
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }
        if !(0.0..=1.0).contains(&self.amplitude_threshold) {
            return Err(ConfigError::InvalidThreshold {
                threshold: self.amplitude_threshold,
            });
        }
        Ok(())
    }
}

/// Audio session category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionCategory {
    /// Simultaneous capture and playback.
    #[default]
    PlayAndRecord,
    /// Playback only.
    Playback,
    /// Capture only.
    Record,
    /// Playback that mixes with other apps and respects the silent switch.
    Ambient,
}

impl SessionCategory {
    /// Parses a category name, falling back to `PlayAndRecord`.
    pub fn parse(name: &str) -> Self {
        match normalize(name).as_str() {
            "playandrecord" => Self::PlayAndRecord,
            "playback" => Self::Playback,
            "record" => Self::Record,
            "ambient" => Self::Ambient,
            _ => {
                tracing::warn!(category = name, "unknown session category, using playAndRecord");
                Self::default()
            }
        }
    }

    /// Returns `true` if this category captures from the microphone.
    pub fn allows_capture(&self) -> bool {
        matches!(self, Self::PlayAndRecord | Self::Record)
    }
}

/// Audio session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Speech-oriented processing.
    #[default]
    SpokenAudio,
    /// Two-way voice chat; implies platform voice processing.
    VoiceChat,
    /// Video-call tuned voice processing.
    VideoChat,
    /// Raw measurement, no processing.
    Measurement,
    /// Platform default.
    Default,
}

impl SessionMode {
    /// Parses a mode name, falling back to `SpokenAudio`.
    pub fn parse(name: &str) -> Self {
        match normalize(name).as_str() {
            "spokenaudio" => Self::SpokenAudio,
            "voicechat" => Self::VoiceChat,
            "videochat" => Self::VideoChat,
            "measurement" => Self::Measurement,
            "default" => Self::Default,
            _ => {
                tracing::warn!(mode = name, "unknown session mode, using spokenAudio");
                Self::default()
            }
        }
    }
}

/// Audio session routing option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOption {
    /// Route output to the speaker rather than the receiver.
    DefaultToSpeaker,
    /// Allow Bluetooth HFP devices.
    AllowBluetooth,
    /// Allow Bluetooth A2DP devices.
    AllowBluetoothA2dp,
    /// Mix with audio from other apps.
    MixWithOthers,
    /// Lower other apps' audio while active.
    DuckOthers,
}

impl SessionOption {
    /// Parses an option name. Unknown names are dropped.
    pub fn parse(name: &str) -> Option<Self> {
        match normalize(name).as_str() {
            "defaulttospeaker" => Some(Self::DefaultToSpeaker),
            "allowbluetooth" => Some(Self::AllowBluetooth),
            "allowbluetootha2dp" => Some(Self::AllowBluetoothA2dp),
            "mixwithothers" => Some(Self::MixWithOthers),
            "duckothers" => Some(Self::DuckOthers),
            _ => {
                tracing::warn!(option = name, "ignoring unknown session option");
                None
            }
        }
    }
}

/// Audio session parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionConfig {
    /// Session category. Default: play and record
    pub category: SessionCategory,
    /// Session mode. Default: spoken audio
    pub mode: SessionMode,
    /// Routing options. Default: none (platform default routing)
    pub options: Vec<SessionOption>,
    /// Preferred hardware I/O buffer duration. Default: platform choice
    pub preferred_buffer_duration: Option<Duration>,
}

impl SessionConfig {
    /// Builds a session config from loosely-typed names.
    ///
    /// Unknown category or mode names fall back to the defaults; unknown
    /// options are dropped.
    pub fn from_names<S: AsRef<str>>(
        category: Option<&str>,
        mode: Option<&str>,
        options: &[S],
        preferred_buffer_duration: Option<Duration>,
    ) -> Self {
        Self {
            category: category.map(SessionCategory::parse).unwrap_or_default(),
            mode: mode.map(SessionMode::parse).unwrap_or_default(),
            options: options
                .iter()
                .filter_map(|o| SessionOption::parse(o.as_ref()))
                .collect(),
            preferred_buffer_duration,
        }
    }

    /// Returns `true` if the option is set.
    pub fn has_option(&self, option: SessionOption) -> bool {
        self.options.contains(&option)
    }
}

/// Voice-processing toggles requested from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoiceProcessing {
    /// Acoustic echo cancellation.
    pub echo_cancellation: bool,
    /// Noise suppression.
    pub noise_suppression: bool,
    /// Automatic gain control.
    pub auto_gain: bool,
}

impl VoiceProcessing {
    /// Derives the toggles from the audio and session configuration.
    ///
    /// AEC brings noise suppression and gain control with it; measurement
    /// mode disables all processing.
    pub fn from_config(audio: &AudioConfig, session: &SessionConfig) -> Self {
        if session.mode == SessionMode::Measurement {
            return Self::default();
        }
        let voice_mode = matches!(session.mode, SessionMode::VoiceChat | SessionMode::VideoChat);
        let enabled = audio.enable_aec || voice_mode;
        Self {
            echo_cancellation: enabled,
            noise_suppression: enabled,
            auto_gain: enabled,
        }
    }
}

/// Internal timing and capacity knobs.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    /// Number of hardware buffers the capture ring can hold before the
    /// real-time callback starts dropping. Default: 64
    pub capture_ring_chunks: usize,

    /// How often the capture bridge drains the ring. Default: 20ms
    pub bridge_poll_interval: Duration,

    /// Music position reporting interval. Default: 200ms
    pub position_poll_interval: Duration,

    /// Amount of mix-format audio the bot voice can queue. Default: 30 seconds
    pub playback_queue_duration: Duration,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            capture_ring_chunks: 64,
            bridge_poll_interval: Duration::from_millis(20),
            position_poll_interval: Duration::from_millis(200),
            playback_queue_duration: Duration::from_secs(30),
        }
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_config_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.channels, 1);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.bit_depth, 16);
        assert_eq!(config.buffer_size, 4096);
        assert!((config.amplitude_threshold - 0.05).abs() < f32::EPSILON);
        assert!(config.enable_aec);
        assert!(!config.gate_during_playback);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_audio_config_rejects_bad_channels() {
        let config = AudioConfig {
            channels: 3,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidChannels { channels: 3 })
        );
    }

    #[test]
    fn test_audio_config_rejects_bad_bit_depth() {
        let config = AudioConfig {
            bit_depth: 24,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBitDepth { bit_depth: 24 })
        ));
    }

    #[test]
    fn test_audio_config_rejects_threshold() {
        let config = AudioConfig {
            amplitude_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_session_parse_known_names() {
        assert_eq!(SessionCategory::parse("playback"), SessionCategory::Playback);
        assert_eq!(
            SessionCategory::parse("playAndRecord"),
            SessionCategory::PlayAndRecord
        );
        assert_eq!(SessionMode::parse("voice_chat"), SessionMode::VoiceChat);
        assert_eq!(
            SessionOption::parse("defaultToSpeaker"),
            Some(SessionOption::DefaultToSpeaker)
        );
    }

    #[test]
    fn test_session_parse_falls_back() {
        assert_eq!(
            SessionCategory::parse("soloAmbientish"),
            SessionCategory::PlayAndRecord
        );
        assert_eq!(SessionMode::parse("karaoke"), SessionMode::SpokenAudio);
        assert_eq!(SessionOption::parse("teleport"), None);
    }

    #[test]
    fn test_session_from_names() {
        let session = SessionConfig::from_names(
            Some("nonsense"),
            None,
            &["allowBluetooth", "bogus"],
            Some(Duration::from_millis(5)),
        );
        assert_eq!(session.category, SessionCategory::PlayAndRecord);
        assert_eq!(session.mode, SessionMode::SpokenAudio);
        assert_eq!(session.options, vec![SessionOption::AllowBluetooth]);
        assert!(session.has_option(SessionOption::AllowBluetooth));
    }

    #[test]
    fn test_voice_processing_from_config() {
        let audio = AudioConfig::default();
        let vp = VoiceProcessing::from_config(&audio, &SessionConfig::default());
        assert!(vp.echo_cancellation && vp.noise_suppression && vp.auto_gain);

        let audio = AudioConfig {
            enable_aec: false,
            ..Default::default()
        };
        let vp = VoiceProcessing::from_config(&audio, &SessionConfig::default());
        assert_eq!(vp, VoiceProcessing::default());

        let measurement = SessionConfig {
            mode: SessionMode::Measurement,
            ..Default::default()
        };
        let vp = VoiceProcessing::from_config(&AudioConfig::default(), &measurement);
        assert!(!vp.echo_cancellation);
    }

    #[test]
    fn test_engine_tuning_defaults() {
        let tuning = EngineTuning::default();
        assert_eq!(tuning.capture_ring_chunks, 64);
        assert_eq!(tuning.position_poll_interval, Duration::from_millis(200));
        assert_eq!(tuning.playback_queue_duration, Duration::from_secs(30));
    }
}
