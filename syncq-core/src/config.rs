use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub thumbnail: ThumbnailConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Incremental change-feed polling interval per room
    pub poll_interval_ms: u64,
    /// Client-side deadline for the room creation chain
    pub room_create_timeout_seconds: u64,
    /// Time-limit timer period; every tick counts one second
    pub limit_tick_ms: u64,
    /// Persist the host's time counter every N ticks
    pub limit_persist_every_ticks: u32,
    /// How far back a full fetch reaches when no watermark is given
    pub full_fetch_lookback_seconds: u64,
    /// Window in which a repeated push notification is ignored
    pub notification_dedup_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            room_create_timeout_seconds: 20,
            limit_tick_ms: 1000,
            limit_persist_every_ticks: 30,
            full_fetch_lookback_seconds: 24 * 60 * 60,
            notification_dedup_seconds: 5,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn room_create_timeout(&self) -> Duration {
        Duration::from_secs(self.room_create_timeout_seconds)
    }

    #[must_use]
    pub const fn limit_tick(&self) -> Duration {
        Duration::from_millis(self.limit_tick_ms)
    }

    #[must_use]
    pub const fn notification_dedup_window(&self) -> Duration {
        Duration::from_secs(self.notification_dedup_seconds)
    }

    #[must_use]
    pub fn full_fetch_lookback(&self) -> chrono::Duration {
        i64::try_from(self.full_fetch_lookback_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Longest edge of uploaded artwork thumbnails, in pixels
    pub max_edge: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self { max_edge: 256 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // SYNCQ__SYNC__POLL_INTERVAL_MS, SYNCQ__LOGGING__LEVEL, ...
        builder = builder.add_source(
            Environment::with_prefix("SYNCQ")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sync.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.sync.room_create_timeout(), Duration::from_secs(20));
        assert_eq!(config.thumbnail.max_edge, 256);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[sync]\npoll_interval_ms = 500\n\n[thumbnail]\nmax_edge = 64").unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.sync.poll_interval_ms, 500);
        assert_eq!(config.sync.room_create_timeout_seconds, 20);
        assert_eq!(config.thumbnail.max_edge, 64);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some("/nonexistent/syncq.toml")).unwrap();
        assert_eq!(config.sync.limit_tick_ms, 1000);
    }
}
