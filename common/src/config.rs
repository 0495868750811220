use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub capture: CaptureConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_retrieve_timeout_ms")]
    pub retrieve_timeout_ms: u64,
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
}

impl CameraConfig {
    pub fn retrieve_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieve_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub folder: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_color")]
    pub color: bool,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Mean absolute luma difference between consecutive frames that counts as motion.
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: f64,
    #[serde(default = "default_enter_batches")]
    pub enter_batches: u32,
    #[serde(default = "default_exit_batches")]
    pub exit_batches: u32,
    /// Passages shorter than this many moving batches are aborted instead of kept.
    #[serde(default = "default_min_active_batches")]
    pub min_active_batches: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            motion_threshold: default_motion_threshold(),
            enter_batches: default_enter_batches(),
            exit_batches: default_exit_batches(),
            min_active_batches: default_min_active_batches(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_mode")]
    pub mode: String,
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mode: default_bus_mode(),
            brokers: default_brokers(),
            group_id: default_group_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
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
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera frame size must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if self.camera.fps.is_nan() || self.camera.fps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "camera fps must be positive, got {}",
                self.camera.fps
            )));
        }
        if self.capture.folder.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("capture folder must not be empty".into()));
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
fn default_fps() -> f64 {
    25.0
}
fn default_retrieve_timeout_ms() -> u64 {
    5000
}
fn default_error_threshold() -> u32 {
    5
}
fn default_extension() -> String {
    "mp4".into()
}
fn default_color() -> bool {
    true
}
fn default_codec() -> String {
    "h264".into()
}
fn default_crf() -> u32 {
    23
}
fn default_preset() -> String {
    "veryfast".into()
}
fn default_motion_threshold() -> f64 {
    6.0
}
fn default_enter_batches() -> u32 {
    2
}
fn default_exit_batches() -> u32 {
    8
}
fn default_min_active_batches() -> u32 {
    4
}
fn default_bus_mode() -> String {
    "local".into()
}
fn default_brokers() -> String {
    "localhost:9092".into()
}
fn default_group_id() -> String {
    "visible-light-reader".into()
}
fn default_log_level() -> String {
    "info".into()
}
