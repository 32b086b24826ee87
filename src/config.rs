//! Configuration for restro-gamification

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GamificationError, Result};
use crate::points::PointsPolicy;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("restro-gamification")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// How long a writer waits on a locked database before failing (ms)
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Page size used when a request does not specify one
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Upper bound on requested page sizes
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Points per repetition outcome
    #[serde(default)]
    pub points: PointsPolicy,
}

fn default_http_port() -> u16 {
    5001
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_page_size() -> u32 {
    10
}

fn default_max_page_size() -> u32 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            busy_timeout_ms: default_busy_timeout_ms(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            points: PointsPolicy::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| GamificationError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `config.toml` from a storage directory, or defaults when absent.
    ///
    /// The returned config always points at `storage_dir`.
    pub fn load_from_storage_dir<P: AsRef<Path>>(storage_dir: P) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        let path = storage_dir.join("config.toml");
        let mut config = if path.exists() {
            Config::load(&path)?
        } else {
            Config::default()
        };
        config.storage_dir = storage_dir;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GamificationError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.points.validate()?;
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(GamificationError::Config("page sizes must be > 0".into()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(GamificationError::Config(
                "default_page_size must not exceed max_page_size".into(),
            ));
        }
        Ok(())
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("restro.db")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
http_port = 8080

[points]
perfect = 20
"#,
        )
        .unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.points.perfect, 20);
        assert_eq!(config.points.imperfect, 5);
        assert_eq!(config.points.undetected, 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.storage_dir = dir.path().to_path_buf();
        config.points.undetected = 0;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.points, config.points);
        assert_eq!(loaded.database_path(), dir.path().join("restro.db"));
    }

    #[test]
    fn test_storage_dir_config_is_read_on_restart() {
        let dir = tempfile::tempdir().unwrap();

        let fresh = Config::load_from_storage_dir(dir.path()).unwrap();
        assert_eq!(fresh.http_port, 5001);
        assert_eq!(fresh.storage_dir, dir.path());

        std::fs::write(
            dir.path().join("config.toml"),
            "http_port = 6001\nstorage_dir = \"/elsewhere\"\n\n[points]\nperfect = 12\n",
        )
        .unwrap();
        let reloaded = Config::load_from_storage_dir(dir.path()).unwrap();
        assert_eq!(reloaded.http_port, 6001);
        assert_eq!(reloaded.points.perfect, 12);
        assert_eq!(reloaded.storage_dir, dir.path());
    }

    #[test]
    fn test_negative_points_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[points]\nperfect = -1\n").unwrap();
        assert!(matches!(Config::load(&path), Err(GamificationError::Config(_))));
    }
}
