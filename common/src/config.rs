use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    pub stream: StreamConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub broker: BrokerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub id: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Upstream camera endpoint, e.g. `http://10.0.0.12/stream`.
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_quality")]
    pub quality: u32,
}

/// Initial motion policy. Every field can be changed at runtime through
/// the control endpoints, except the reference memory budget.
#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_motion_enabled")]
    pub enabled: bool,
    /// Number of changed samples a frame needs to count as motion.
    #[serde(default = "default_motion_threshold")]
    pub threshold: u32,
    /// Per-sample byte difference above which a sample counts as changed.
    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Upper bound on the reference frame copy, in bytes.
    #[serde(default = "default_max_reference_bytes")]
    pub max_reference_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_data_topic")]
    pub data_topic: String,
    #[serde(default = "default_compression")]
    pub compression: String,
    /// librdkafka `security.protocol`, `ssl` or `sasl_ssl`. `plaintext` is
    /// only for a local broker.
    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,
    /// PEM file holding the broker's CA or pinned server certificate.
    #[serde(default)]
    pub ca_location: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    #[serde(default = "default_split_threshold_bytes")]
    pub split_threshold_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            device_type: default_device_type(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: default_motion_enabled(),
            threshold: default_motion_threshold(),
            pixel_threshold: default_pixel_threshold(),
            cooldown_ms: default_cooldown_ms(),
            max_reference_bytes: default_max_reference_bytes(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
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
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_device_id() -> String {
    "Camera001".into()
}
fn default_device_type() -> String {
    "Camera1".into()
}
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_fps() -> f64 {
    10.0
}
fn default_quality() -> u32 {
    80
}
fn default_motion_enabled() -> bool {
    true
}
fn default_motion_threshold() -> u32 {
    15_000
}
fn default_pixel_threshold() -> u32 {
    25
}
fn default_cooldown_ms() -> u64 {
    2_000
}
fn default_max_reference_bytes() -> usize {
    1024 * 1024
}
fn default_http_port() -> u16 {
    80
}
fn default_topic() -> String {
    "camera.live".into()
}
fn default_data_topic() -> String {
    "camera.live.data".into()
}
fn default_compression() -> String {
    "snappy".into()
}
fn default_security_protocol() -> String {
    "ssl".into()
}
fn default_max_image_bytes() -> usize {
    512 * 1024
}
fn default_split_threshold_bytes() -> usize {
    256 * 1024
}
fn default_log_level() -> String {
    "info".into()
}
