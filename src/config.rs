use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from `config.toml` by embedders that want
/// file-driven defaults. Everything can also be built in code.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    pub logging: Option<LoggingConfig>,
}

/// Per-queue behavior. Used both as registry-wide defaults and as the options
/// for a single queue at creation time.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
    /// How long a queue may sit with no humans in the channel before it
    /// destroys itself.
    #[serde(default = "default_leave_timeout_ms")]
    pub leave_on_empty_timeout_ms: u64,
    /// How long a queue may sit with nothing to play before it destroys
    /// itself.
    #[serde(default = "default_leave_timeout_ms")]
    pub leave_on_idle_timeout_ms: u64,
    #[serde(default = "default_max_volume")]
    pub max_volume: u32,
    /// Initial playback volume, applied until `set_volume` changes it.
    #[serde(default = "default_volume")]
    pub volume: u32,
    /// Disables both self-destruct timers for this queue.
    #[serde(default)]
    pub always_on: bool,
    /// Deadline for voice transport state transitions (readiness, teardown).
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub filters: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            leave_on_empty_timeout_ms: default_leave_timeout_ms(),
            leave_on_idle_timeout_ms: default_leave_timeout_ms(),
            max_volume: default_max_volume(),
            volume: default_volume(),
            always_on: false,
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_str = std::fs::read_to_string("config.toml").unwrap_or_else(|_| "".to_string());
        if config_str.is_empty() {
            return Err("config.toml not found or empty".into());
        }
        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    }
}

fn default_leave_timeout_ms() -> u64 {
    30_000
}

fn default_max_volume() -> u32 {
    200
}

fn default_volume() -> u32 {
    100
}

fn default_connection_timeout_ms() -> u64 {
    20_000
}
