use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

pub const DEFAULT_CONFIG_FILE: &str = "daymark.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: StoreConfig,
    pub target: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    Sqlite { path: PathBuf },
    Postgres { url: String },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: StoreConfig::Sqlite {
                path: PathBuf::from("events.db"),
            },
            target: StoreConfig::Postgres {
                url: "postgres://localhost:5432/metrics".to_string(),
            },
        }
    }
}

/// A missing file falls back to the built-in defaults; a file that exists
/// but does not parse is fatal.
pub fn load_or_default(path: Option<PathBuf>) -> Result<Config> {
    let config_path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if !config_path.exists() {
        info!(
            "{} not found, continuing with default values",
            config_path.display()
        );
        return Ok(Config::default());
    }
    load(&config_path)
}

fn load(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    let config = toml::from_str(&contents)?;
    Ok(config)
}

/// Per-run switches, threaded through the stores instead of living in a
/// process-wide global.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub log_sql: bool,
}
