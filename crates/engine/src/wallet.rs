use chrono::{DateTime, Utc};
use cryptobot_brokers_binance::models::{decode, AccountInformation, ExchangeInfo, TradeFee};
use cryptobot_brokers_binance::BinanceClient;
use cryptobot_core::SymbolRules;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::EngineError;

/// One row of the wallet history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Unix seconds.
    pub ts: i64,
    pub coin: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
}

/// Keeps the bot's view of the account: free balances, symbol rules and
/// fees.
pub struct WalletManager {
    client: Arc<BinanceClient>,
    history_path: PathBuf,
    balances: BTreeMap<String, Decimal>,
    rules: HashMap<String, SymbolRules>,
    fees: HashMap<String, TradeFee>,
}

impl WalletManager {
    pub fn new(client: Arc<BinanceClient>, history_path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            history_path: history_path.into(),
            balances: BTreeMap::new(),
            rules: HashMap::new(),
            fees: HashMap::new(),
        }
    }

    /// Free balances of every asset with a non-zero free or locked amount.
    pub fn balances(&self) -> &BTreeMap<String, Decimal> {
        &self.balances
    }

    pub fn balance(&self, asset: &str) -> Decimal {
        self.balances.get(asset).copied().unwrap_or_default()
    }

    pub fn rules(&self) -> &HashMap<String, SymbolRules> {
        &self.rules
    }

    pub fn fees(&self) -> &HashMap<String, TradeFee> {
        &self.fees
    }

    pub async fn update_balances(&mut self) -> Result<(), EngineError> {
        info!("Updating account balances");
        let resp = self.client.spot_account_trade.account_information().await?;
        let account: AccountInformation = decode(&resp)?;
        self.balances = account
            .balances
            .into_iter()
            .filter(|b| !b.is_empty())
            .map(|b| (b.asset, b.free))
            .collect();
        Ok(())
    }

    pub async fn fetch_trading_rules(&mut self) -> Result<(), EngineError> {
        info!("Fetching trading rules");
        let resp = self.client.market_data.exchange_information(None).await?;
        let info: ExchangeInfo = decode(&resp)?;
        self.rules = info
            .symbol_rules()
            .into_iter()
            .map(|r| (r.symbol.clone(), r))
            .collect();
        Ok(())
    }

    pub async fn update_fees(&mut self) -> Result<(), EngineError> {
        info!("Updating fees");
        let resp = self.client.wallet.trade_fee(None).await?;
        let fees: Vec<TradeFee> = decode(&resp)?;
        self.fees = fees.into_iter().map(|f| (f.symbol.clone(), f)).collect();
        Ok(())
    }

    /// Append the current balances to the history file.
    pub fn record_history(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let records: Vec<WalletRecord> = self
            .balances
            .iter()
            .map(|(coin, balance)| WalletRecord {
                ts: now.timestamp(),
                coin: coin.clone(),
                balance: *balance,
            })
            .collect();
        append_history(&self.history_path, &records)?;
        Ok(records.len())
    }

    pub fn history(&self) -> Result<Vec<WalletRecord>, EngineError> {
        load_history(&self.history_path)
    }
}

/// Append records, writing the `ts,coin,balance` header when the file is
/// new.
pub fn append_history(path: &Path, records: &[WalletRecord]) -> Result<(), EngineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let is_new = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn load_history(path: &Path) -> Result<Vec<WalletRecord>, EngineError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader.deserialize().collect::<Result<Vec<WalletRecord>, _>>()?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptobot_brokers_binance::{BinanceConfig, Credentials};
    use cryptobot_brokers_common::{HttpMethod, RawResponse, ReplayTransport};
    use rust_decimal_macros::dec;

    fn manager(transport: Arc<ReplayTransport>, history: PathBuf) -> WalletManager {
        let client = BinanceClient::with_transport(
            BinanceConfig::default(),
            Some(Credentials::new("key", "secret")),
            transport,
        )
        .unwrap();
        WalletManager::new(Arc::new(client), history)
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("cryptobot-{}-{}", name, std::process::id()))
            .join("wallet_history.csv")
    }

    #[tokio::test]
    async fn test_balances_skip_empty_assets() {
        let transport = Arc::new(ReplayTransport::new());
        transport.push(
            HttpMethod::Get,
            "/api/v3/account",
            RawResponse::new(
                200,
                r#"{"balances":[
                    {"asset":"BTC","free":"0.5","locked":"0"},
                    {"asset":"ETH","free":"0","locked":"1.0"},
                    {"asset":"XRP","free":"0","locked":"0"}
                ]}"#,
            ),
        );
        let mut wallet = manager(transport, temp_path("balances"));

        wallet.update_balances().await.unwrap();
        assert_eq!(wallet.balances().len(), 2);
        assert_eq!(wallet.balance("BTC"), dec!(0.5));
        assert_eq!(wallet.balance("ETH"), dec!(0));
        assert_eq!(wallet.balance("XRP"), dec!(0));
        assert!(!wallet.balances().contains_key("XRP"));
    }

    #[tokio::test]
    async fn test_trading_rules_and_fees() {
        let transport = Arc::new(ReplayTransport::new());
        transport.push(
            HttpMethod::Get,
            "/api/v3/exchangeInfo",
            RawResponse::new(
                200,
                r#"{"rateLimits":[],"symbols":[{"symbol":"ETHBTC","baseAsset":"ETH","quoteAsset":"BTC",
                    "filters":[{"filterType":"LOT_SIZE","minQty":"0.001","maxQty":"100000","stepSize":"0.001"}]}]}"#,
            ),
        );
        transport.push(
            HttpMethod::Get,
            "/sapi/v1/asset/tradeFee",
            RawResponse::new(
                200,
                r#"[{"symbol":"ETHBTC","makerCommission":"0.001","takerCommission":"0.001"}]"#,
            ),
        );
        let mut wallet = manager(transport, temp_path("rules"));

        wallet.fetch_trading_rules().await.unwrap();
        wallet.update_fees().await.unwrap();
        assert_eq!(wallet.rules()["ETHBTC"].min_qty, dec!(0.001));
        assert_eq!(wallet.fees()["ETHBTC"].taker_commission, dec!(0.001));
    }

    #[test]
    fn test_history_appends_with_single_header() {
        let path = temp_path("history");
        let _ = std::fs::remove_file(&path);

        let first = [WalletRecord {
            ts: 1_600_000_000,
            coin: "BTC".to_string(),
            balance: dec!(0.5),
        }];
        let second = [WalletRecord {
            ts: 1_600_003_600,
            coin: "ETH".to_string(),
            balance: dec!(12.25),
        }];
        append_history(&path, &first).unwrap();
        append_history(&path, &second).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.matches("ts,coin,balance").count(), 1);

        let records = load_history(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].coin, "ETH");
        assert_eq!(records[1].balance, dec!(12.25));
    }

    #[test]
    fn test_missing_history_is_empty() {
        let records = load_history(Path::new("/nonexistent/wallet_history.csv")).unwrap();
        assert!(records.is_empty());
    }
}
