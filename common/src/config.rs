use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Environment variable that overrides `capture.url`.
pub const STREAM_URL_ENV: &str = "SENTINEL_STREAM_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub zone: Option<ZoneConfig>,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
    #[serde(default = "default_poll_fps")]
    pub poll_fps: f64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Longest wait for the source to open or deliver the next frame.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_processing_width")]
    pub width: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default)]
    pub person_class_id: u32,
    #[serde(default)]
    pub font_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default = "default_model_input")]
    pub input_width: u32,
    #[serde(default = "default_model_input")]
    pub input_height: u32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_iou")]
    pub iou: f32,
    /// Overrides the built-in COCO label set.
    #[serde(default)]
    pub class_names: Option<Vec<String>>,
}

/// Forbidden zone as written in the config file (and accepted by `PUT /zone`).
///
/// Coordinates are in source-frame pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ZoneConfig {
    Rectangle {
        x_min: i32,
        y_min: i32,
        x_max: i32,
        y_max: i32,
    },
    Polygon {
        points: Vec<[i32; 2]>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Messages buffered per observer before it is considered failed.
    #[serde(default = "default_observer_queue")]
    pub observer_queue: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            width: default_processing_width(),
            jpeg_quality: default_jpeg_quality(),
            person_class_id: 0,
            font_path: None,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model_path: None,
            input_width: default_model_input(),
            input_height: default_model_input(),
            confidence: default_confidence(),
            iou: default_iou(),
            class_names: None,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            observer_queue: default_observer_queue(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let mut config = Self::from_toml_str(&content)?;
        if let Ok(url) = std::env::var(STREAM_URL_ENV) {
            if !url.is_empty() {
                info!(env = STREAM_URL_ENV, "capture url overridden from environment");
                config.capture.url = url;
            }
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.url.is_empty() {
            return Err(ConfigError::Invalid("capture.url must not be empty".into()));
        }
        if self.processing.width == 0 {
            return Err(ConfigError::Invalid("processing.width must be positive".into()));
        }
        if self.broadcast.tick_ms == 0 {
            return Err(ConfigError::Invalid("broadcast.tick_ms must be positive".into()));
        }
        if self.broadcast.observer_queue == 0 {
            return Err(ConfigError::Invalid(
                "broadcast.observer_queue must be positive".into(),
            ));
        }
        if !matches!(self.capture.mode.as_str(), "mjpeg" | "polling") {
            return Err(ConfigError::Invalid(format!(
                "capture.mode must be 'mjpeg' or 'polling', got '{}'",
                self.capture.mode
            )));
        }
        if self.capture.mode == "polling" && self.capture.poll_fps <= 0.0 {
            return Err(ConfigError::Invalid("capture.poll_fps must be positive".into()));
        }
        if self.capture.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "capture.read_timeout_secs must be positive".into(),
            ));
        }
        if self.capture.mode == "polling"
            && self.capture.read_timeout_secs as f64 * self.capture.poll_fps <= 1.0
        {
            return Err(ConfigError::Invalid(
                "capture.read_timeout_secs must exceed the polling interval".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_reconnect_backoff() -> u64 {
    5
}
fn default_poll_fps() -> f64 {
    10.0
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    10
}
fn default_processing_width() -> u32 {
    320
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_backend() -> String {
    "stub".into()
}
fn default_model_input() -> u32 {
    640
}
fn default_confidence() -> f32 {
    0.25
}
fn default_iou() -> f32 {
    0.45
}
fn default_tick_ms() -> u64 {
    50
}
fn default_observer_queue() -> usize {
    8
}
fn default_bind() -> String {
    "0.0.0.0:8000".into()
}
fn default_log_level() -> String {
    "info".into()
}
