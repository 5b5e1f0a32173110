use crate::capture::{CaptureMode, PacerSettings};
use crate::orchestrator::SessionSettings;
use crate::ws::connection::{ConnectionSettings, ReconnectPolicy};
use repcoach_core::protocol::ConversationConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub agent_id: String,
    pub api_key: String,
    pub signed_url_base: String,
    pub frame_interval: Duration,
    pub frame_tick: Duration,
    pub capture_mode: CaptureMode,
    pub jpeg_quality: u8,
    pub frame_width: u32,
    pub frame_height: u32,
    pub camera_frames_dir: PathBuf,
    pub countdown_ticks: u8,
    pub countdown_tick: Duration,
    pub reconnect: ReconnectPolicy,
    pub tool_timeout: Duration,
    pub session_log_path: Option<PathBuf>,
    pub conversation: ConversationConfig,
    pub log_level: Level,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> Result<String, ConfigError> {
    var(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{raw}': {e}"))),
    }
}

fn optional<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{raw}': {e}")))
        })
        .transpose()
}

fn millis(name: &str, default: u64) -> Result<Duration, ConfigError> {
    parsed(name, default).map(Duration::from_millis)
}

/// Parses `key=value` pairs separated by commas.
fn key_values(name: &str) -> Result<HashMap<String, String>, ConfigError> {
    let Some(raw) = var(name) else {
        return Ok(HashMap::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{pair}' is not a key=value pair"),
            )),
        })
        .collect()
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let agent_id = required("AGENT_ID")?;
        let api_key = required("ELEVENLABS_API_KEY")?;
        let signed_url_base = var("SIGNED_URL_BASE")
            .unwrap_or_else(|| "https://api.elevenlabs.io".to_string())
            .trim_end_matches('/')
            .to_string();

        let frame_interval = millis("FRAME_INTERVAL_MS", 2300)?;
        let frame_tick = millis("FRAME_TICK_MS", 100)?;
        if frame_tick.is_zero() {
            return Err(ConfigError::InvalidValue(
                "FRAME_TICK_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let capture_mode = parsed("CAPTURE_MODE", CaptureMode::Stream)?;

        let jpeg_quality: u8 = parsed("JPEG_QUALITY", 80)?;
        if !(1..=100).contains(&jpeg_quality) {
            return Err(ConfigError::InvalidValue(
                "JPEG_QUALITY".to_string(),
                format!("{jpeg_quality} is outside 1..=100"),
            ));
        }

        let frame_width = parsed("FRAME_WIDTH", 640)?;
        let frame_height = parsed("FRAME_HEIGHT", 480)?;
        let camera_frames_dir = var("CAMERA_FRAMES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./frames"));

        let countdown_ticks = parsed("COUNTDOWN_TICKS", 3)?;
        let countdown_tick = millis("COUNTDOWN_TICK_MS", 1000)?;
        if countdown_tick.is_zero() {
            return Err(ConfigError::InvalidValue(
                "COUNTDOWN_TICK_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let reconnect_delay = millis("RECONNECT_DELAY_MS", 2000)?;
        let multiplier: f64 = parsed("RECONNECT_BACKOFF", 1.0)?;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(
                "RECONNECT_BACKOFF".to_string(),
                format!("{multiplier} must be a finite number >= 1.0"),
            ));
        }
        let max_delay = optional::<u64>("RECONNECT_MAX_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(reconnect_delay)
            .max(reconnect_delay);
        let jitter = millis("RECONNECT_JITTER_MS", 0)?;
        let reconnect = ReconnectPolicy {
            delay: reconnect_delay,
            multiplier,
            max_delay,
            jitter,
        };

        let tool_timeout = millis("TOOL_TIMEOUT_MS", 15_000)?;
        let session_log_path = var("SESSION_LOG_PATH").map(PathBuf::from);

        let conversation = ConversationConfig {
            prompt: var("AGENT_PROMPT"),
            first_message: var("AGENT_FIRST_MESSAGE"),
            language: var("AGENT_LANGUAGE"),
            voice_id: var("AGENT_VOICE_ID"),
            temperature: optional("AGENT_TEMPERATURE")?,
            max_tokens: optional("AGENT_MAX_TOKENS")?,
            dynamic_variables: key_values("AGENT_DYNAMIC_VARIABLES")?,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            agent_id,
            api_key,
            signed_url_base,
            frame_interval,
            frame_tick,
            capture_mode,
            jpeg_quality,
            frame_width,
            frame_height,
            camera_frames_dir,
            countdown_ticks,
            countdown_tick,
            reconnect,
            tool_timeout,
            session_log_path,
            conversation,
            log_level,
        })
    }

    pub fn pacer_settings(&self) -> PacerSettings {
        PacerSettings {
            min_interval: self.frame_interval,
            tick: self.frame_tick,
            mode: self.capture_mode,
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            countdown_ticks: self.countdown_ticks,
            countdown_tick: self.countdown_tick,
            pacer: self.pacer_settings(),
            tool_timeout: self.tool_timeout,
            connection: ConnectionSettings {
                agent_id: self.agent_id.clone(),
                initiation: self.conversation.initiation_envelope(),
                reconnect: self.reconnect.clone(),
            },
        }
    }
}
