//! Error types for duplex-audio.
//!
//! Errors follow the engine's propagation policy:
//! - **Call-level errors** ([`ConfigError`], [`PlaybackError`], and [`DeviceError`] during
//!   `initialize`) are returned synchronously to the caller.
//! - **Asynchronous errors** ([`ConversionError`] on the real-time path, [`ResolutionError`]
//!   while loading music, device reconfiguration) are surfaced as
//!   [`EngineEvent::Error`](crate::EngineEvent::Error) through the event sink.

use std::path::PathBuf;

/// Invalid or missing initialization arguments.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Channel count outside the supported range.
    #[error("unsupported channel count {channels} (expected 1 or 2)")]
    InvalidChannels {
        /// The rejected channel count.
        channels: u16,
    },

    /// Sample rate of zero.
    #[error("sample rate must be positive")]
    InvalidSampleRate,

    /// Only 16-bit wire encoding is supported.
    #[error("unsupported bit depth {bit_depth} (only 16-bit wire audio is supported)")]
    InvalidBitDepth {
        /// The rejected bit depth.
        bit_depth: u16,
    },

    /// Buffer size of zero frames.
    #[error("buffer size must be at least one frame")]
    InvalidBufferSize,

    /// Amplitude threshold outside `[0, 1]`.
    #[error("amplitude threshold {threshold} outside [0, 1]")]
    InvalidThreshold {
        /// The rejected threshold.
        threshold: f32,
    },

    /// An operation that needs `initialize` was called before it.
    #[error("engine not initialized")]
    NotInitialized,

    /// Recording was requested under a session category without input.
    #[error("session category {category} does not allow recording")]
    CaptureNotAllowed {
        /// The active category.
        category: String,
    },

    /// The engine was built outside a Tokio runtime and none was supplied.
    #[error("no tokio runtime available")]
    NoRuntime,
}

/// Failure to build a converter or convert a buffer.
///
/// Conversion failures on the real-time path never stop a pipeline: the
/// offending buffer is dropped and an error event is emitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    /// The converter cannot bridge the given formats.
    #[error("cannot convert {from} to {to}: {reason}")]
    Unsupported {
        /// Description of the source format.
        from: String,
        /// Description of the target format.
        to: String,
        /// Why the bridge is impossible.
        reason: String,
    },

    /// An input buffer did not match the converter's input format.
    #[error("malformed buffer: {reason}")]
    MalformedBuffer {
        /// What was wrong with the buffer.
        reason: String,
    },

    /// No converter pair has been built yet (or it was released).
    #[error("converter unavailable")]
    Unavailable,
}

impl ConversionError {
    /// Creates an `Unsupported` error for the given formats.
    pub fn unsupported(
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::Unsupported {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a `MalformedBuffer` error with the given reason.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedBuffer {
            reason: reason.into(),
        }
    }
}

/// Hardware or audio session failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// No default input device is configured.
    #[error("no input device available")]
    NoInputDevice,

    /// No default output device is configured.
    #[error("no output device available")]
    NoOutputDevice,

    /// The audio session could not be activated.
    #[error("session activation failed: {reason}")]
    ActivationFailed {
        /// Backend-specific reason.
        reason: String,
    },

    /// The device delivers a sample format the engine cannot read.
    #[error("unsupported device sample format: {format}")]
    UnsupportedFormat {
        /// The format reported by the device.
        format: String,
    },

    /// Any other error from the audio backend.
    #[error("audio backend error: {0}")]
    Backend(String),
}

impl DeviceError {
    /// Creates a backend error from any displayable error.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Failure to turn a music source into decoded audio.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// A local file does not exist.
    #[error("music file not found: {path}")]
    NotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// The remote fetch hook failed.
    #[error("download failed for {url}: {reason}")]
    DownloadFailed {
        /// URL being downloaded.
        url: String,
        /// Why the download failed.
        reason: String,
    },

    /// Remote source requested but no fetcher was configured.
    #[error("no fetcher configured for remote source {url}")]
    NoFetcher {
        /// URL that could not be fetched.
        url: String,
    },

    /// The file could not be decoded.
    #[error("cannot decode {path}: {reason}")]
    Decode {
        /// File being decoded.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// The decoded track could not be converted to the mix format.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// File I/O error in the cache.
    #[error("cache error: {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A playlist with no entries.
    #[error("playlist is empty")]
    EmptyPlaylist,
}

impl ResolutionError {
    /// Creates an I/O error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a download error.
    pub fn download(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Failure to schedule a bot-playback chunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// `play_audio_chunk` was called before `initialize` or after `shutdown_all`.
    #[error("engine not running")]
    EngineNotRunning,

    /// No playback converter is available.
    #[error("playback converter unavailable")]
    ConverterUnavailable,

    /// The chunk could not be converted to the mix format.
    #[error("conversion failed: {0}")]
    ConversionFailed(#[source] ConversionError),
}

/// Top-level error returned by [`Engine`](crate::Engine) calls.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Converter build failure.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Hardware or session failure.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Music source failure.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Bot playback failure.
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidChannels { channels: 6 };
        assert_eq!(err.to_string(), "unsupported channel count 6 (expected 1 or 2)");
    }

    #[test]
    fn test_conversion_error_unsupported() {
        let err = ConversionError::unsupported("48000Hz/0ch/f32", "24000Hz/1ch/i16", "no channels");
        assert_eq!(
            err.to_string(),
            "cannot convert 48000Hz/0ch/f32 to 24000Hz/1ch/i16: no channels"
        );
    }

    #[test]
    fn test_resolution_error_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ResolutionError::io("/tmp/cache/abc.mp3", io_err);
        assert!(err.to_string().contains("/tmp/cache/abc.mp3"));
    }

    #[test]
    fn test_engine_error_is_transparent() {
        let err: EngineError = PlaybackError::EngineNotRunning.into();
        assert_eq!(err.to_string(), "engine not running");
    }

    #[test]
    fn test_playback_error_wraps_conversion() {
        let err = PlaybackError::ConversionFailed(ConversionError::malformed("odd byte count"));
        assert_eq!(
            err.to_string(),
            "conversion failed: malformed buffer: odd byte count"
        );
    }
}
