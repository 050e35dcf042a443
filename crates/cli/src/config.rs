use cryptobot_brokers_binance::{BinanceConfig, Credentials};
use cryptobot_brokers_bitfinex::BitfinexConfig;
use cryptobot_brokers_common::ClientError;
use cryptobot_engine::BotConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("cannot load keys: {0}")]
    Keys(#[from] ClientError),

    #[error("no Binance credentials: pass --keys or set BINANCE_API_KEY and BINANCE_SECRET_KEY")]
    NoCredentials,
}

/// Contents of the TOML config file. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub binance: BinanceConfig,
    pub bot: BotConfig,
    pub bitfinex: BitfinexConfig,
}

impl FileConfig {
    /// Load the file, or the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

/// Credentials from the keys file when given, else from the environment.
pub fn resolve_credentials(
    keys: Option<&Path>,
    api_key: Option<&str>,
    secret_key: Option<&str>,
) -> Result<Option<Credentials>, ConfigError> {
    if let Some(path) = keys {
        return Ok(Some(Credentials::from_json_file(path)?));
    }
    match (api_key, secret_key) {
        (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
            Ok(Some(Credentials::new(key, secret)))
        }
        _ => Ok(None),
    }
}
