//! Configuration loading and root folder resolution
//!
//! Bootstrap settings only. Resolution order for every value:
//! 1. Command-line argument (highest priority, handled by the binary via clap)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::time::{SiteZone, DEFAULT_UTC_OFFSET_MINUTES};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "TENTWATCH_ROOT_FOLDER";

/// Environment variable pointing at an explicit config file
pub const CONFIG_FILE_ENV: &str = "TENTWATCH_CONFIG";

/// Bootstrap configuration read from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Data folder holding the database and evidence images
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// SQLite file; defaults to `<root_folder>/tentwatch.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Site civil time offset east of UTC
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,

    /// Prefix for evidence image URLs in responses
    #[serde(default = "default_media_base_url")]
    pub media_base_url: String,

    /// Optional TOML file with sites and devices seeded at startup
    #[serde(default)]
    pub registry_file: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            database_path: None,
            bind_address: default_bind_address(),
            port: default_port(),
            utc_offset_minutes: default_utc_offset_minutes(),
            media_base_url: default_media_base_url(),
            registry_file: None,
            logging: LoggingConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl TomlConfig {
    pub fn site_zone(&self) -> Result<SiteZone> {
        SiteZone::from_offset_minutes(self.utc_offset_minutes)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        self.site_zone()?;
        if self.reconcile.tick_interval_ms == 0 {
            return Err(Error::Config("reconcile.tick_interval_ms must be > 0".to_string()));
        }
        if self.reconcile.offsets_secs.is_empty() {
            return Err(Error::Config("reconcile.offsets_secs must not be empty".to_string()));
        }
        if self.reconcile.offsets_secs.iter().any(|&s| s < 0) {
            return Err(Error::Config("reconcile.offsets_secs must be >= 0".to_string()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

/// Reconciliation scheduler tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Scheduler tick period
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// How far behind "now" each re-merge pass looks
    #[serde(default = "default_offsets_secs")]
    pub offsets_secs: Vec<i64>,

    /// Attempts at the optimistic upsert before giving up on a key
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    /// Upper bound on backoff while SQLite reports lock contention
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            offsets_secs: default_offsets_secs(),
            max_conflict_retries: default_max_conflict_retries(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5830
}

fn default_utc_offset_minutes() -> i32 {
    DEFAULT_UTC_OFFSET_MINUTES
}

fn default_media_base_url() -> String {
    "/media/".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_offsets_secs() -> Vec<i64> {
    vec![5, 300, 600]
}

fn default_max_conflict_retries() -> u32 {
    5
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

/// Load configuration from an explicit path, or the platform default location.
///
/// A missing default file is not an error: compiled defaults apply. A missing
/// explicit file is.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => PathBuf::from(path),
            Err(_) => match default_config_file() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("No config file found, using compiled defaults");
                    return Ok(TomlConfig::default());
                }
            },
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
    let config = parse_toml_config(&content)?;
    tracing::info!(path = %path.display(), "Loaded configuration file");
    Ok(config)
}

pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    let config: TomlConfig =
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Root folder resolution: CLI > environment > TOML > OS default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        return PathBuf::from(path);
    }
    if let Some(path) = &config.root_folder {
        return path.clone();
    }
    default_root_folder()
}

/// Database file inside the resolved root, unless configured explicitly
pub fn database_path(root_folder: &Path, config: &TomlConfig) -> PathBuf {
    config
        .database_path
        .clone()
        .unwrap_or_else(|| root_folder.join("tentwatch.db"))
}

/// Evidence image directory inside the root folder
pub fn media_root(root_folder: &Path) -> PathBuf {
    root_folder.join("media")
}

/// `~/.config/tentwatch/config.toml` (or the platform equivalent)
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("tentwatch").join("config.toml"));
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/tentwatch/config.toml");
        match user_config {
            Some(path) if path.exists() => Some(path),
            _ => Some(system_config),
        }
    } else {
        user_config
    }
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tentwatch"))
        .unwrap_or_else(|| PathBuf::from("./tentwatch_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = parse_toml_config("").unwrap();
        assert_eq!(config.port, 5830);
        assert_eq!(config.utc_offset_minutes, 180);
        assert_eq!(config.reconcile.offsets_secs, vec![5, 300, 600]);
        assert_eq!(config.reconcile.tick_interval_ms, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_reconcile_section() {
        let config = parse_toml_config(
            r#"
            port = 9000
            [reconcile]
            offsets_secs = [10, 60]
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.reconcile.offsets_secs, vec![10, 60]);
        assert_eq!(config.reconcile.max_conflict_retries, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(parse_toml_config("utc_offset_minutes = 2000").is_err());
        assert!(parse_toml_config("[reconcile]\noffsets_secs = []").is_err());
        assert!(parse_toml_config("[reconcile]\ntick_interval_ms = 0").is_err());
        assert!(parse_toml_config("port = \"eighty\"").is_err());
    }

    #[test]
    fn test_cli_root_folder_wins() {
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..TomlConfig::default()
        };
        let resolved = resolve_root_folder(Some(Path::new("/from/cli")), &config);
        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }

    #[test]
    fn test_database_path_defaults_under_root() {
        let config = TomlConfig::default();
        assert_eq!(
            database_path(Path::new("/data"), &config),
            PathBuf::from("/data/tentwatch.db")
        );
        assert_eq!(media_root(Path::new("/data")), PathBuf::from("/data/media"));
    }
}
