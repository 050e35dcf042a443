use cryptobot_predictors::SgdConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings of the trading bot. Every field has a default, so a config
/// file only needs the values it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Asset every tracked pair is quoted in.
    pub quote_asset: String,
    /// How many of the day's best growers to follow.
    pub max_tracked_tickers: usize,
    /// Bucket width and execution cycle period, in minutes.
    pub ops_frequency_mins: u64,
    /// Buckets ahead each forecast targets.
    pub future_periods: usize,
    pub refresh_mins: u64,
    pub crunch_mins: u64,
    /// Cap on buffered buckets and forecasts per pair.
    pub buffer_cap: usize,
    /// Validate orders on the test endpoint instead of placing them.
    pub test_orders: bool,
    pub wallet_history_path: PathBuf,
    /// Directory of `ts,price,vol` CSV files to pre-train on.
    pub training_data_dir: Option<PathBuf>,
    pub discord_webhook_url: Option<String>,
    pub sgd: SgdConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            quote_asset: "BTC".to_string(),
            max_tracked_tickers: 10,
            ops_frequency_mins: 60,
            future_periods: 1,
            refresh_mins: 10,
            crunch_mins: 1,
            buffer_cap: 2000,
            test_orders: true,
            wallet_history_path: PathBuf::from("history/wallet_history.csv"),
            training_data_dir: None,
            discord_webhook_url: None,
            sgd: SgdConfig::default(),
        }
    }
}

impl BotConfig {
    pub fn ops_period(&self) -> Duration {
        Duration::from_secs(self.ops_frequency_mins.max(1) * 60)
    }

    pub fn bucket_width(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.ops_frequency_mins.max(1) as i64)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_mins.max(1) * 60)
    }

    pub fn crunch_period(&self) -> Duration {
        Duration::from_secs(self.crunch_mins.max(1) * 60)
    }

    /// Old entries are trimmed every four execution cycles.
    pub fn trim_period(&self) -> Duration {
        self.ops_period() * 4
    }
}
