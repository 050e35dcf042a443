use cryptobot_brokers_common::{ClientError, GovernorConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const BASE_ENDPOINT: &str = "https://api.binance.com";
pub const BASE_TEST_ENDPOINT: &str = "https://testnet.binance.vision";
pub const WEBSOCKET_BASE_ENDPOINT: &str = "wss://stream.binance.com:9443";
pub const WEBSOCKET_TEST_ENDPOINT: &str = "wss://testnet.binance.vision";

/// Configuration for the Binance client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinanceConfig {
    /// Use the test network instead of production.
    pub sandbox: bool,
    /// Override for the REST base URL.
    pub base_url: Option<String>,
    /// Override for the WebSocket base URL.
    pub ws_url: Option<String>,
    /// Default `recvWindow` for signed requests, in milliseconds.
    pub recv_window_ms: u64,
    pub request_timeout_secs: u64,
    pub governor: GovernorConfig,
    pub tracker: TrackerConfig,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            sandbox: false,
            base_url: None,
            ws_url: None,
            recv_window_ms: 5000,
            request_timeout_secs: 10,
            governor: GovernorConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl BinanceConfig {
    pub fn rest_base(&self) -> &str {
        match (&self.base_url, self.sandbox) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, true) => BASE_TEST_ENDPOINT,
            (None, false) => BASE_ENDPOINT,
        }
    }

    pub fn ws_base(&self) -> &str {
        match (&self.ws_url, self.sandbox) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, true) => WEBSOCKET_TEST_ENDPOINT,
            (None, false) => WEBSOCKET_BASE_ENDPOINT,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Order completion polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub poll_interval_secs: u64,
    /// Status queries before the order is given up and cancelled.
    pub max_attempts: u32,
    pub max_cancel_attempts: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            max_attempts: 50,
            max_cancel_attempts: 5,
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// API key pair. The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    #[serde(rename = "API_KEY")]
    pub api_key: String,
    #[serde(rename = "SECRET_KEY")]
    pub secret_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Load a `{"API_KEY": ..., "SECRET_KEY": ...}` keys file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Configuration(format!("cannot read keys file {}: {}", path.display(), e))
        })?;
        let creds: Credentials = serde_json::from_str(&raw)?;
        if creds.api_key.is_empty() || creds.secret_key.is_empty() {
            return Err(ClientError::MissingCredentials("empty key in keys file"));
        }
        Ok(creds)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.api_key.chars().take(4).collect();
        f.debug_struct("Credentials")
            .field("api_key", &format!("{}***", visible))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
