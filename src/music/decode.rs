//! Track decoding and conversion to the mix format.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{ConversionError, ResolutionError};
use crate::format::{Converter, FormatProfile, SampleEncoding};

/// A fully decoded track in its source format.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTrack {
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
    /// Source sample rate in Hz.
    pub sample_rate: u32,
    /// Source channel count.
    pub channels: u16,
}

impl DecodedTrack {
    /// Number of frames.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback duration at the source rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    fn profile(&self) -> FormatProfile {
        FormatProfile::new(self.sample_rate, self.channels, SampleEncoding::Float32)
    }
}

/// Decodes an audio file into PCM.
pub trait TrackDecoder: Send + Sync {
    /// Decodes the whole file. Runs on a blocking worker thread.
    fn decode(&self, path: &Path) -> Result<DecodedTrack, ResolutionError>;
}

/// Decoder for MP3, AAC/M4A, FLAC, Vorbis and WAV via Symphonia.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl TrackDecoder for SymphoniaDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedTrack, ResolutionError> {
        let decode_err = |reason: String| ResolutionError::Decode {
            path: path.to_path_buf(),
            reason,
        };

        let file = std::fs::File::open(path).map_err(|e| ResolutionError::io(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| decode_err(format!("probe failed: {e}")))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| decode_err("no audio track".to_string()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
        let mut channels = codec_params.channels.map_or(0, |c| c.count() as u16);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| decode_err(format!("unsupported codec: {e}")))?;

        let mut samples = Vec::new();
        let mut buffer: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "error reading packet");
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;

                    // Reuse the sample buffer unless this packet is larger
                    let needed = decoded.capacity() * spec.channels.count();
                    if buffer.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                        buffer = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = buffer.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        samples.extend_from_slice(buf.samples());
                    }
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!(path = %path.display(), error = e, "skipping corrupt packet");
                }
                Err(e) => return Err(decode_err(e.to_string())),
            }
        }

        if sample_rate == 0 || channels == 0 {
            return Err(decode_err("missing sample rate or channel layout".to_string()));
        }
        if samples.is_empty() {
            return Err(decode_err("no audio decoded".to_string()));
        }

        tracing::debug!(
            path = %path.display(),
            sample_rate,
            channels,
            frames = samples.len() / channels as usize,
            "track decoded"
        );

        Ok(DecodedTrack {
            samples,
            sample_rate,
            channels,
        })
    }
}

/// A track converted to the mix format, ready to schedule on the music
/// voice. Keeps the decoded source so it can be re-converted when the mix
/// rate changes.
#[derive(Debug, Clone)]
pub(crate) struct MixTrack {
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: u32,
    pub source: Arc<DecodedTrack>,
}

impl MixTrack {
    pub fn from_decoded(source: Arc<DecodedTrack>, mix_rate: u32) -> Result<Self, ConversionError> {
        let converter = Converter::new(source.profile(), FormatProfile::mix(mix_rate))?;
        let samples = converter.convert_samples(&source.samples)?;
        Ok(Self {
            samples: Arc::new(samples),
            sample_rate: mix_rate,
            source,
        })
    }

    pub fn frames(&self) -> u64 {
        (self.samples.len() / 2) as u64
    }

    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frames(), self.sample_rate)
    }
}

pub(crate) fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / f64::from(sample_rate))
}

pub(crate) fn duration_to_frames(duration: Duration, sample_rate: u32) -> u64 {
    (duration.as_secs_f64() * f64::from(sample_rate)).round() as u64
}
