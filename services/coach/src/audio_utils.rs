use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Assumed until the agent announces its output format.
pub const DEFAULT_OUTPUT_FORMAT: AudioFormat = AudioFormat::Pcm16 { sample_rate: 16000 };

/// Encodings the agent may stream to us, as named on the wire
/// (`pcm_16000`, `ulaw_8000`, `mp3_44100_128`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Mono 16-bit little-endian PCM.
    Pcm16 { sample_rate: u32 },
    /// Mono 8-bit μ-law.
    Ulaw { sample_rate: u32 },
    Mp3 { sample_rate: u32, bitrate_kbps: u32 },
}

impl AudioFormat {
    pub fn sample_rate(&self) -> u32 {
        match *self {
            AudioFormat::Pcm16 { sample_rate }
            | AudioFormat::Ulaw { sample_rate }
            | AudioFormat::Mp3 { sample_rate, .. } => sample_rate,
        }
    }

    /// Playback time of `len` bytes of this format.
    pub fn clip_duration(&self, len: usize) -> Duration {
        let bytes_per_second = match *self {
            AudioFormat::Pcm16 { sample_rate } => sample_rate as f64 * 2.0,
            AudioFormat::Ulaw { sample_rate } => sample_rate as f64,
            AudioFormat::Mp3 { bitrate_kbps, .. } => bitrate_kbps as f64 * 1000.0 / 8.0,
        };
        if bytes_per_second <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(len as f64 / bytes_per_second)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        DEFAULT_OUTPUT_FORMAT
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported audio format '{0}'")]
pub struct UnsupportedFormat(pub String);

impl FromStr for AudioFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || UnsupportedFormat(s.to_string());
        let mut parts = s.trim().split('_');
        let codec = parts.next().ok_or_else(unsupported)?;
        let sample_rate: u32 = parts
            .next()
            .and_then(|rate| rate.parse().ok())
            .filter(|rate| *rate > 0)
            .ok_or_else(unsupported)?;

        let format = match codec.to_ascii_lowercase().as_str() {
            "pcm" => AudioFormat::Pcm16 { sample_rate },
            "ulaw" => AudioFormat::Ulaw { sample_rate },
            "mp3" => {
                let bitrate_kbps = parts
                    .next()
                    .and_then(|rate| rate.parse().ok())
                    .filter(|rate| *rate > 0)
                    .ok_or_else(unsupported)?;
                AudioFormat::Mp3 {
                    sample_rate,
                    bitrate_kbps,
                }
            }
            _ => return Err(unsupported()),
        };
        if parts.next().is_some() {
            return Err(unsupported());
        }
        Ok(format)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFormat::Pcm16 { sample_rate } => write!(f, "pcm_{sample_rate}"),
            AudioFormat::Ulaw { sample_rate } => write!(f, "ulaw_{sample_rate}"),
            AudioFormat::Mp3 {
                sample_rate,
                bitrate_kbps,
            } => write!(f, "mp3_{sample_rate}_{bitrate_kbps}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_parse_wire_names() {
        assert_eq!(
            "pcm_16000".parse::<AudioFormat>().unwrap(),
            AudioFormat::Pcm16 { sample_rate: 16000 }
        );
        assert_eq!(
            "ulaw_8000".parse::<AudioFormat>().unwrap(),
            AudioFormat::Ulaw { sample_rate: 8000 }
        );
        assert_eq!(
            "mp3_44100_128".parse::<AudioFormat>().unwrap(),
            AudioFormat::Mp3 {
                sample_rate: 44100,
                bitrate_kbps: 128
            }
        );
        assert_eq!("pcm_22050".parse::<AudioFormat>().unwrap().sample_rate(), 22050);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "pcm", "pcm_", "pcm_0", "opus_48000", "mp3_44100", "pcm_16000_1"] {
            assert!(bad.parse::<AudioFormat>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_display_matches_wire_name() {
        for name in ["pcm_16000", "ulaw_8000", "mp3_22050_32"] {
            assert_eq!(name.parse::<AudioFormat>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn test_clip_duration() {
        // One second of 16 kHz 16-bit mono.
        let pcm = AudioFormat::Pcm16 { sample_rate: 16000 };
        assert_abs_diff_eq!(pcm.clip_duration(32_000).as_secs_f64(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pcm.clip_duration(8_000).as_secs_f64(), 0.25, epsilon = 1e-9);

        let ulaw = AudioFormat::Ulaw { sample_rate: 8000 };
        assert_abs_diff_eq!(ulaw.clip_duration(4_000).as_secs_f64(), 0.5, epsilon = 1e-9);

        let mp3 = AudioFormat::Mp3 {
            sample_rate: 44100,
            bitrate_kbps: 128,
        };
        assert_abs_diff_eq!(mp3.clip_duration(16_000).as_secs_f64(), 1.0, epsilon = 1e-9);

        assert_eq!(pcm.clip_duration(0), Duration::ZERO);
    }
}
