use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::orchestrator::AutomationFlags;

pub const DEFAULT_VOLUME_PATH: &str = r"E:\Databases";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 250;
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_DATABASE_SERVICE: &str = "MsSqlServer";
pub const DEFAULT_DATABASE_LABEL: &str = "MsSql";
pub const DEFAULT_BROKER_SERVICE: &str = "RabbitMQ";
pub const DEFAULT_BROKER_LABEL: &str = "RabbitMQ";

/// Root configuration structure. Deserialized from %APPDATA%\UsbWatch\config.toml.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default = "default_database")]
    pub database: ServiceConfig,
    #[serde(default = "default_broker")]
    pub broker: ServiceConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
}

/// The watched removable volume.
#[derive(Debug, Deserialize)]
pub struct VolumeConfig {
    /// Path whose existence means "volume connected". Must start with `X:`.
    #[serde(default = "default_volume_path")]
    pub path: String,
    /// Poll interval used only when device notifications are unavailable.
    /// Clamped to [250, 60000] ms.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_VOLUME_PATH.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl VolumeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }
}

/// A dependent OS service.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Name registered with the service control manager.
    pub service_name: String,
    /// Shown in status text and notifications. Defaults to the service name.
    pub display_name: Option<String>,
}

impl ServiceConfig {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.service_name)
    }
}

/// Initial automation flags; toggles at runtime are not written back.
#[derive(Debug, Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "enabled")]
    pub auto_start_database: bool,
    #[serde(default = "enabled")]
    pub auto_start_broker: bool,
    #[serde(default = "enabled")]
    pub auto_eject: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            auto_start_database: true,
            auto_start_broker: true,
            auto_eject: true,
        }
    }
}

impl AutomationConfig {
    pub fn flags(&self) -> AutomationFlags {
        AutomationFlags::new(self.auto_start_database, self.auto_start_broker, self.auto_eject)
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volume: VolumeConfig::default(),
            database: default_database(),
            broker: default_broker(),
            automation: AutomationConfig::default(),
        }
    }
}

fn default_volume_path() -> String {
    DEFAULT_VOLUME_PATH.to_string()
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_database() -> ServiceConfig {
    ServiceConfig {
        service_name: DEFAULT_DATABASE_SERVICE.to_string(),
        display_name: Some(DEFAULT_DATABASE_LABEL.to_string()),
    }
}

fn default_broker() -> ServiceConfig {
    ServiceConfig {
        service_name: DEFAULT_BROKER_SERVICE.to_string(),
        display_name: Some(DEFAULT_BROKER_LABEL.to_string()),
    }
}

fn enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn config_default_values() {
        let c = Config::default();
        assert_eq!(c.volume.path, DEFAULT_VOLUME_PATH);
        assert_eq!(c.volume.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(c.database.service_name, DEFAULT_DATABASE_SERVICE);
        assert_eq!(c.database.label(), DEFAULT_DATABASE_LABEL);
        assert_eq!(c.broker.service_name, DEFAULT_BROKER_SERVICE);
        assert!(c.automation.auto_start_database);
        assert!(c.automation.auto_start_broker);
        assert!(c.automation.auto_eject);
    }

    #[test]
    fn label_falls_back_to_service_name() {
        let svc = ServiceConfig {
            service_name: "postgresql-x64-16".to_string(),
            display_name: None,
        };
        assert_eq!(svc.label(), "postgresql-x64-16");
    }

    // ── poll_interval ─────────────────────────────────────────────────────────

    #[test]
    fn poll_interval_clamps_to_bounds() {
        let mut v = VolumeConfig::default();
        v.poll_interval_ms = 1;
        assert_eq!(v.poll_interval(), Duration::from_millis(MIN_POLL_INTERVAL_MS));
        v.poll_interval_ms = 10_000_000;
        assert_eq!(v.poll_interval(), Duration::from_millis(MAX_POLL_INTERVAL_MS));
        v.poll_interval_ms = 1_500;
        assert_eq!(v.poll_interval(), Duration::from_millis(1_500));
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_or_default(&path).unwrap();
        assert_eq!(config.volume.path, DEFAULT_VOLUME_PATH);
        assert_eq!(config.broker.service_name, DEFAULT_BROKER_SERVICE);
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[volume]
path = "F:\\Data"
poll_interval_ms = 500

[database]
service_name = "postgresql-x64-16"
display_name = "Postgres"

[broker]
service_name = "Redis"

[automation]
auto_start_database = true
auto_start_broker = false
auto_eject = false
"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.volume.path, r"F:\Data");
        assert_eq!(config.volume.poll_interval_ms, 500);
        assert_eq!(config.database.service_name, "postgresql-x64-16");
        assert_eq!(config.database.label(), "Postgres");
        assert_eq!(config.broker.label(), "Redis");

        let flags = config.automation.flags().snapshot();
        assert!(flags.auto_start_database);
        assert!(!flags.auto_start_broker);
        assert!(!flags.auto_eject);
    }

    #[test]
    fn load_or_default_partial_toml_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[automation]\nauto_eject = false\n").unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.volume.path, DEFAULT_VOLUME_PATH);
        assert_eq!(config.database.service_name, DEFAULT_DATABASE_SERVICE);
        assert_eq!(config.broker.service_name, DEFAULT_BROKER_SERVICE);
        assert!(config.automation.auto_start_database);
        assert!(!config.automation.auto_eject);
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn load_or_default_service_without_name_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[broker]\ndisplay_name = \"Queue\"\n").unwrap();
        assert!(load_or_default(&path).is_err());
    }
}
