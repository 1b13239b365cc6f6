//! LanWake configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LanWakeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LanWakeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub wol: WolConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl LanWakeConfig {
    /// Load config from the default path (~/.lanwake/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LanWakeError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LanWakeError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| LanWakeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `WOL_METHOD` / `WOL_INTERFACE` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(method) = std::env::var("WOL_METHOD") {
            self.wol.method = method.parse()?;
        }
        if let Ok(interface) = std::env::var("WOL_INTERFACE") {
            self.wol.interface = interface;
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the LanWake home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lanwake")
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 8000 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.lanwake/lanwake.db".into() }

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// How the magic packet leaves the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WolMethod {
    /// UDP broadcast first, `etherwake` as fallback.
    #[default]
    Auto,
    /// UDP broadcast socket only.
    Socket,
    /// `etherwake` raw Ethernet frame only.
    Etherwake,
}

impl std::str::FromStr for WolMethod {
    type Err = LanWakeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(WolMethod::Auto),
            "socket" => Ok(WolMethod::Socket),
            "etherwake" => Ok(WolMethod::Etherwake),
            other => Err(LanWakeError::Config(format!(
                "Unknown WOL method '{other}' (expected auto, socket or etherwake)"
            ))),
        }
    }
}

impl std::fmt::Display for WolMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WolMethod::Auto => write!(f, "auto"),
            WolMethod::Socket => write!(f, "socket"),
            WolMethod::Etherwake => write!(f, "etherwake"),
        }
    }
}

/// Wake-signal sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WolConfig {
    #[serde(default)]
    pub method: WolMethod,
    /// NIC passed to `etherwake -i`. Empty = let etherwake pick.
    #[serde(default)]
    pub interface: String,
}

/// Post-wake verification policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// How long a finished monitor stays visible before eviction.
    #[serde(default = "default_display_secs")]
    pub display_secs: u64,
}

fn default_interval_secs() -> u64 { 5 }
fn default_max_attempts() -> u32 { 12 }
fn default_probe_timeout_secs() -> u64 { 2 }
fn default_display_secs() -> u64 { 300 }

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn display_period(&self) -> Duration {
        Duration::from_secs(self.display_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            display_secs: default_display_secs(),
        }
    }
}

/// Wall clock used to match cron expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleClock {
    #[default]
    Local,
    Utc,
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default)]
    pub clock: ScheduleClock,
    /// Fire one-off tasks whose time passed while the server was down.
    #[serde(default = "bool_true")]
    pub catch_up_one_off: bool,
}

fn default_tick_secs() -> u64 { 30 }
fn bool_true() -> bool { true }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            clock: ScheduleClock::default(),
            catch_up_one_off: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LanWakeConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.wol.method, WolMethod::Auto);
        assert_eq!(config.monitor.interval_secs, 5);
        assert_eq!(config.monitor.max_attempts, 12);
        assert_eq!(config.scheduler.tick_secs, 30);
        assert!(config.scheduler.catch_up_one_off);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [wol]
            method = "etherwake"
            interface = "eth0"

            [monitor]
            max_attempts = 3

            [scheduler]
            clock = "utc"
        "#;

        let config: LanWakeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.wol.method, WolMethod::Etherwake);
        assert_eq!(config.wol.interface, "eth0");
        assert_eq!(config.monitor.max_attempts, 3);
        assert_eq!(config.monitor.interval_secs, 5);
        assert_eq!(config.scheduler.clock, ScheduleClock::Utc);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: LanWakeConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.monitor.display_secs, 300);
    }

    #[test]
    fn test_wol_method_parse() {
        assert_eq!("SOCKET".parse::<WolMethod>().unwrap(), WolMethod::Socket);
        assert_eq!("".parse::<WolMethod>().unwrap(), WolMethod::Auto);
        assert!("carrier-pigeon".parse::<WolMethod>().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join("lanwake-test-config");
        let path = dir.join("config.toml");
        let mut config = LanWakeConfig::default();
        config.server.port = 9100;
        config.save_to(&path).unwrap();

        let loaded = LanWakeConfig::load_from(&path).unwrap();
        assert_eq!(loaded.server.port, 9100);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_home_dir() {
        assert!(LanWakeConfig::home_dir().ends_with(".lanwake"));
        assert!(LanWakeConfig::default_path().ends_with("config.toml"));
    }
}
