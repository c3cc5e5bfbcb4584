use std::path::PathBuf;

/// Runtime configuration resolved from environment variables (spec §6,
/// SPEC_FULL.md §10.4). `TdbConfig` is the only place environment input
/// enters the store; every other component takes explicit arguments.
#[derive(Debug, Clone)]
pub struct TdbConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    pub log_to_file: bool,
}

impl TdbConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("TEMPLEDB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_db_path());

        let log_level = std::env::var("TEMPLEDB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_to_file = std::env::var("TEMPLEDB_LOG_TO_FILE")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        Self { db_path, log_level, log_to_file }
    }

    fn default_db_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("templedb")
            .join("templedb.sqlite")
    }

    pub fn log_file_path(&self) -> Option<PathBuf> {
        if !self.log_to_file {
            return None;
        }
        self.db_path.parent().map(|dir| dir.join("templedb.log"))
    }
}
