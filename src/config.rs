use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or fall back to defaults.
    /// Environment overrides are applied either way.
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/vxmon/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("vxmon/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                let mut config = Self::load(path)?;
                config.apply_env();
                return Ok(config);
            }
        }

        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Apply the deployment environment variables over the file values.
    /// Unparseable values are ignored in favor of the configured ones.
    pub fn apply_env(&mut self) {
        if let Some(port) = env_parse::<u16>("VXLAN_PORT") {
            self.sensor.port = port;
        }
        if let Some(workers) = env_parse::<usize>("WORKERS") {
            self.sensor.workers = workers;
        }
        if let Some(queue_max) = env_parse::<usize>("QUEUE_MAX") {
            self.sensor.queue_max = queue_max;
        }
        if let Some(window) = env_parse::<f64>("WINDOW_SECONDS") {
            self.sensor.window_seconds = window;
        }
        if let Some(max_pkts) = env_parse::<usize>("MAX_PKTS_PER_WINDOW") {
            self.sensor.max_pkts_per_window = max_pkts;
        }
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.store.db_path)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// UDP listen port (VXLAN standard port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Worker threads (0 = one per CPU)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Work queue capacity; frames beyond it are dropped, not queued
    #[serde(default = "default_queue_max")]
    pub queue_max: usize,

    /// Flow window duration in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,

    /// Packet cap per window
    #[serde(default = "default_max_pkts")]
    pub max_pkts_per_window: usize,

    /// Janitor sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: f64,

    /// Grace period for draining workers on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            workers: default_workers(),
            queue_max: default_queue_max(),
            window_seconds: default_window_seconds(),
            max_pkts_per_window: default_max_pkts(),
            sweep_interval_secs: default_sweep_interval(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl SensorConfig {
    /// Get actual number of workers
    pub fn actual_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Bytes/sec that maps to score 1.0 in the built-in rate classifier
    #[serde(default = "default_bps_threshold")]
    pub bps_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            bps_threshold: default_bps_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite detection database
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    4789
}

fn default_workers() -> usize {
    4
}

fn default_queue_max() -> usize {
    20_000
}

fn default_window_seconds() -> f64 {
    3.0
}

fn default_max_pkts() -> usize {
    256
}

fn default_sweep_interval() -> f64 {
    1.0
}

fn default_shutdown_grace() -> f64 {
    5.0
}

fn default_bps_threshold() -> f64 {
    1_000_000.0
}

fn default_db_path() -> String {
    "/var/lib/vxmon/detections.db".to_string()
}
