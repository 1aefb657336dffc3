use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Sync-point configuration.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/library.db")
}

/// Sync-point configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Days to keep sync points before retention cleanup (0 to keep forever).
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Whether snapshots may rely on file hashes for change detection.
    /// When hashing is disabled library-side, hashes are simply absent and
    /// hash comparison is skipped during diffing.
    #[serde(default = "default_hash_books")]
    pub hash_books: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            hash_books: default_hash_books(),
        }
    }
}

fn default_retention_days() -> u32 {
    0
}

fn default_hash_books() -> bool {
    true
}

impl SyncConfig {
    /// Check if retention cleanup is enabled.
    pub fn retention_enabled(&self) -> bool {
        self.retention_days > 0
    }

    /// Retention window in seconds, or None when retention is disabled.
    pub fn retention_seconds(&self) -> Option<i64> {
        self.retention_enabled()
            .then(|| self.retention_days as i64 * 24 * 60 * 60)
    }
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("shelfsync.toml"),
            dirs::config_dir()
                .map(|p| p.join("shelfsync").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/shelfsync/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# shelfsync configuration

[database]
# path = "/var/lib/shelfsync/library.db"

[sync]
# Days to keep sync points before retention cleanup (0 to keep forever)
retention_days = 0
# Whether snapshots may rely on file hashes for change detection
hash_books = true
"#
        .to_string()
    }
}
