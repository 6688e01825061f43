pub mod schema;

pub use schema::MarketConfig;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default bidhouse home directory (~/.bidhouse).
pub fn default_home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".bidhouse"))
        .unwrap_or_else(|| PathBuf::from(".bidhouse"))
}

/// Load config from the given path, or return defaults.
pub fn load_config(path: &Path) -> Result<MarketConfig> {
    let config = if path.exists() {
        let contents =
            std::fs::read_to_string(path).context("Failed to read market config file")?;
        toml::from_str::<MarketConfig>(&contents)
            .context("Failed to parse market config (TOML)")?
    } else {
        MarketConfig::default()
    };
    config.validate()?;
    Ok(config)
}

/// Save config to the given path (TOML format).
pub fn save_config(config: &MarketConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents).context("Failed to write config file")?;
    Ok(())
}
