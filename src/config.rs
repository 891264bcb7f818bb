//! ==============================================================================
//! config.rs - Monitor Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `monitor.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - PollingConfig / SourceConfig: where results come from and how often.
//!     - StalenessConfig: when a furnace result counts as old.
//!     - LightsConfig / DisplayConfig: output tick rates.
//!     - OutputConfig / FieldBusConfig / SerialConfig: which panel drives the
//!       lights and display boards.
//!     - StoreConfig / ApiConfig: durable store and the read api.
//!     - FurnaceConfig: static per-furnace bus addresses.
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{frame, staleness};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MonitorConfig {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub staleness: StalenessConfig,
    #[serde(default)]
    pub lights: LightsConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub time_sync: TimeSyncConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub fieldbus: FieldBusConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub store: Option<StoreConfig>,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub furnaces: Vec<FurnaceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    /// per-request bound on every source fetch
    pub timeout_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 25, timeout_seconds: 10 }
    }
}

/// One spectrometer result endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// spectro machine number stamped on results that carry none
    pub id: i64,
    pub url: String,
    /// append `f=<furnace>` for every configured furnace
    #[serde(default)]
    pub furnace_filter: bool,
    /// append `t=true`
    #[serde(default)]
    pub transfer_samples_only: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StalenessConfig {
    pub max_age_minutes: u64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self { max_age_minutes: 180 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LightsConfig {
    pub update_interval_seconds: u64,
}

impl Default for LightsConfig {
    fn default() -> Self {
        Self { update_interval_seconds: 5 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub update_interval_seconds: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { update_interval_seconds: 1 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeSyncConfig {
    pub url: Option<String>,
    /// 0 disables the job
    pub interval_seconds: u64,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self { url: None, interval_seconds: 300 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// coils and display bytes on a PLC over modbus tcp
    FieldBus,
    /// display boards on a serial line, lights on i2c cards
    Standalone,
    /// collector only, no physical outputs
    #[default]
    None,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub mode: OutputMode,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FieldBusConfig {
    /// e.g. "tcp://192.168.1.20:502"
    pub url: String,
    pub unit_id: u8,
    pub lights_address: u16,
    pub displays_address: u16,
    pub timeout_seconds: u64,
}

impl Default for FieldBusConfig {
    fn default() -> Self {
        Self {
            url: "tcp://127.0.0.1:502".to_string(),
            unit_id: 1,
            lights_address: 0,
            displays_address: 0,
            timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub i2c_bus: u8,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { port: "/dev/ttyUSB0".to_string(), baud_rate: 9600, i2c_bus: 1 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// sqlite database file, ":memory:" for a throwaway store
    pub path: PathBuf,
    #[serde(default = "default_transaction_timeout")]
    pub transaction_timeout_seconds: u64,
    #[serde(default = "default_store_retry")]
    pub retry_seconds: u64,
}

fn default_transaction_timeout() -> u64 {
    5
}

fn default_store_retry() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
    pub results_limit: u32,
    pub cache_ttl_seconds: u64,
    pub website_dir: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 80,
            results_limit: 20,
            cache_ttl_seconds: 5,
            website_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// rolling log file, stdout only when unset
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file: None }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FurnaceConfig {
    pub name: String,
    pub display_board_address: u8,
    /// i2c address of the light card (standalone output)
    #[serde(default)]
    pub light_card_address: u8,
    /// bit mask in the card's output register, e.g. 0x01, 0x04; not a bit index
    #[serde(default)]
    pub green_light_address: u8,
    /// bit mask in the card's output register, e.g. 0x02, 0x08; not a bit index
    #[serde(default)]
    pub red_light_address: u8,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

impl StalenessConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_minutes * 60)
    }
}

impl MonitorConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: MonitorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;

        Ok(config)
    }

    /// Load with default fallback.
    ///
    /// An explicit path must load; the well-known locations are only tried.
    pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let paths = [
            PathBuf::from("config").join("monitor.toml"),
            PathBuf::from("..").join("config").join("monitor.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {}", path.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        tracing::warn!("No config file found - using defaults");
        Ok(Self::default())
    }

    /// Reject settings the outputs cannot show.
    ///
    /// A stale furnace displays the threshold itself, so it has to fit a
    /// display board message.
    pub fn validate(&self) -> anyhow::Result<()> {
        let threshold = staleness::format_elapsed(self.staleness.max_age(), true);
        if threshold.len() > frame::MAX_MESSAGE_LEN {
            anyhow::bail!(
                "staleness.max_age_minutes = {} displays as {:?}, longer than the {} characters a display board takes",
                self.staleness.max_age_minutes,
                threshold,
                frame::MAX_MESSAGE_LEN
            );
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        tracing::info!(
            poll_interval_s = self.polling.interval_seconds,
            sources = self.sources.len(),
            furnaces = self.furnaces.len(),
            max_age_min = self.staleness.max_age_minutes,
            output = ?self.output.mode,
            store = self.store.as_ref().map(|s| s.path.display().to_string()).unwrap_or_else(|| "-".into()),
            api = self.api.enabled,
            "configuration"
        );
    }
}
