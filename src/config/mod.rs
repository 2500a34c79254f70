//! Application configuration

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CONFIG_FILE_NAME: &str = "tandem.json";

/// Main application configuration, stored as pretty JSON in the data dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Config schema version
    pub version: u32,

    /// Data directory path
    pub data_dir: PathBuf,

    /// Logging filter (tracing-subscriber env-filter syntax)
    pub log_filter: String,

    /// Whether op execution starts enabled (the play state)
    pub enable_op_execution: bool,

    /// Cap on concurrently running user-op commands
    pub max_concurrent_user_op_tasks: usize,

    /// Cap on concurrently running non-user-op tasks
    pub max_concurrent_non_user_op_tasks: usize,

    /// How long a cache-load waiter blocks before raising TimedOut
    pub cache_load_timeout_sec: u64,

    /// Running tasks older than this get a "taking too long" warning
    pub task_time_warning_threshold_sec: u64,

    /// Whether the planner computes UI selection hints for dropped nodes
    pub highlight_dropped_nodes_after_drag: bool,
}

impl AppConfig {
    /// Load configuration from `data_dir`, creating a default one if absent.
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            info!("Loading config from {:?}", config_path);
            let json = fs::read_to_string(&config_path)?;
            let config: AppConfig = serde_json::from_str(&json)?;
            Ok(config)
        } else {
            warn!("No config found, creating default at {:?}", config_path);
            let config = Self::default_with_dir(data_dir.to_path_buf());
            config.save()?;
            Ok(config)
        }
    }

    pub fn default_with_dir(data_dir: PathBuf) -> Self {
        Self {
            version: 1,
            data_dir,
            log_filter: "info".to_string(),
            enable_op_execution: true,
            max_concurrent_user_op_tasks: 1,
            max_concurrent_non_user_op_tasks: 4,
            cache_load_timeout_sec: 15,
            task_time_warning_threshold_sec: 60,
            highlight_dropped_nodes_after_drag: true,
        }
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        let config_path = self.data_dir.join(CONFIG_FILE_NAME);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, json)?;
        info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Path of the process-wide registry database (devices, catalog, uid
    /// maps, content meta).
    pub fn registry_db_path(&self) -> PathBuf {
        self.data_dir.join("registry.db")
    }

    /// Path of the op ledger database.
    pub fn ops_db_path(&self) -> PathBuf {
        self.data_dir.join("ops.db")
    }
}

/// Default data directory under the platform config dir.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().ok_or_else(|| anyhow::anyhow!("No data directory available"))?;
    Ok(base.join("tandem"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let created = AppConfig::load_or_create(dir.path()).unwrap();
        let loaded = AppConfig::load_or_create(dir.path()).unwrap();
        assert_eq!(created.version, loaded.version);
        assert_eq!(created.enable_op_execution, loaded.enable_op_execution);
    }
}
