use super::schema::JoltConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./jolt.yaml
    /// 2. ~/.jolt/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<JoltConfig, ConfigError> {
        let local_config = PathBuf::from("./jolt.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".jolt").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        debug!("No config file found; using defaults");
        Ok(JoltConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<JoltConfig, ConfigError> {
        debug!(path = %path.display(), "Loading config");
        let content = tokio::fs::read_to_string(path).await?;
        if content.trim().is_empty() {
            return Ok(JoltConfig::default());
        }
        let config: JoltConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}
