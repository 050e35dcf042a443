//! Typed views over Binance response bodies.

use chrono::{DateTime, TimeZone, Utc};
use cryptobot_brokers_common::{ApiResponse, ClientError};
use cryptobot_core::{Balance, OrderStatus, SymbolRules, TradeTick};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

/// Decode a successful response body; a non-2xx status is a decode error
/// carrying the status and body.
pub fn decode<T: DeserializeOwned>(resp: &ApiResponse) -> Result<T, ClientError> {
    if !resp.is_success() {
        return Err(ClientError::Decode(format!(
            "unexpected status {}: {}",
            resp.status, resp.body
        )));
    }
    Ok(serde_json::from_value(resp.body.clone())?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_change_percent: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quote_volume: Decimal,
}

/// One kline row. The exchange sends positional arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
}

pub fn parse_klines(body: &Value) -> Result<Vec<Kline>, ClientError> {
    let rows = body
        .as_array()
        .ok_or_else(|| ClientError::Decode("klines body is not an array".to_string()))?;

    rows.iter()
        .map(|row| {
            Ok(Kline {
                open_time: millis_at(row, 0)?,
                open: decimal_at(row, 1)?,
                high: decimal_at(row, 2)?,
                low: decimal_at(row, 3)?,
                close: decimal_at(row, 4)?,
                volume: decimal_at(row, 5)?,
                close_time: millis_at(row, 6)?,
            })
        })
        .collect()
}

fn decimal_at(row: &Value, idx: usize) -> Result<Decimal, ClientError> {
    row.get(idx)
        .and_then(Value::as_str)
        .and_then(|s| Decimal::from_str(s).ok())
        .ok_or_else(|| ClientError::Decode(format!("kline field {} is not a decimal", idx)))
}

fn millis_at(row: &Value, idx: usize) -> Result<DateTime<Utc>, ClientError> {
    row.get(idx)
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| ClientError::Decode(format!("kline field {} is not a timestamp", idx)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub rate_limit_type: String,
    pub interval: String,
    pub interval_num: u32,
    pub limit: u32,
}

impl RateLimit {
    pub fn window(&self) -> Duration {
        let unit = match self.interval.as_str() {
            "SECOND" => 1,
            "MINUTE" => 60,
            "HOUR" => 3600,
            "DAY" => 86_400,
            _ => 60,
        };
        Duration::from_secs(unit * u64::from(self.interval_num.max(1)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    #[serde(default)]
    pub rate_limits: Vec<RateLimit>,
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<Value>,
}

impl ExchangeInfo {
    pub fn request_weight_limit(&self) -> Option<&RateLimit> {
        self.rate_limits
            .iter()
            .find(|r| r.rate_limit_type == "REQUEST_WEIGHT")
    }

    /// Trading rules from the LOT_SIZE and (MIN_)NOTIONAL filters.
    pub fn symbol_rules(&self) -> Vec<SymbolRules> {
        self.symbols.iter().map(SymbolInfo::rules).collect()
    }
}

impl SymbolInfo {
    fn filter_value(&self, filter_type: &str, key: &str) -> Option<Decimal> {
        self.filters
            .iter()
            .find(|f| f.get("filterType").and_then(Value::as_str) == Some(filter_type))
            .and_then(|f| f.get(key))
            .and_then(Value::as_str)
            .and_then(|s| Decimal::from_str(s).ok())
    }

    pub fn rules(&self) -> SymbolRules {
        SymbolRules {
            symbol: self.symbol.clone(),
            base_asset: self.base_asset.clone(),
            quote_asset: self.quote_asset.clone(),
            min_qty: self.filter_value("LOT_SIZE", "minQty").unwrap_or_default(),
            step_size: self.filter_value("LOT_SIZE", "stepSize").unwrap_or_default(),
            min_notional: self
                .filter_value("MIN_NOTIONAL", "minNotional")
                .or_else(|| self.filter_value("NOTIONAL", "minNotional"))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInformation {
    pub balances: Vec<Balance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFee {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub maker_commission: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub taker_commission: Decimal,
}

/// The fields of an order response the bot acts on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub symbol: String,
    pub order_id: u64,
    pub client_order_id: String,
    pub status: OrderStatus,
}

/// Order status from a query-order body, if present and known.
pub fn order_status(body: &Value) -> Option<OrderStatus> {
    body.get("status")
        .and_then(Value::as_str)
        .and_then(|s| OrderStatus::from_str(s).ok())
}

/// Raw `trade` stream event.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(rename = "E")]
    pub event_time: i64,
}

impl TradeEvent {
    pub fn into_tick(self) -> Option<TradeTick> {
        let event_time = Utc.timestamp_millis_opt(self.event_time).single()?;
        Some(TradeTick {
            symbol: self.symbol,
            price: self.price,
            quantity: self.quantity,
            event_time,
        })
    }
}

pub fn parse_trade_tick(event: &Value) -> Result<TradeTick, ClientError> {
    let trade: TradeEvent = serde_json::from_value(event.clone())?;
    trade
        .into_tick()
        .ok_or_else(|| ClientError::Decode("trade event time out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_klines() {
        let body = json!([[
            1499040000000i64, "0.01634790", "0.80000000", "0.01575800", "0.01577100",
            "148976.11427815", 1499644799999i64, "2434.19055334", 308, "1756.87402397",
            "28.46694368", "0"
        ]]);
        let klines = parse_klines(&body).unwrap();
        assert_eq!(klines.len(), 1);
        assert_eq!(klines[0].high, dec!(0.8));
        assert_eq!(klines[0].volume, dec!(148976.11427815));
        assert_eq!(klines[0].open_time.timestamp_millis(), 1499040000000);

        assert!(parse_klines(&json!({"code": -1121})).is_err());
        assert!(parse_klines(&json!([[1, "x"]])).is_err());
    }

    #[test]
    fn test_exchange_info_rules_and_limits() {
        let body = json!({
            "rateLimits": [
                {"rateLimitType": "REQUEST_WEIGHT", "interval": "MINUTE", "intervalNum": 1, "limit": 6000},
                {"rateLimitType": "ORDERS", "interval": "SECOND", "intervalNum": 10, "limit": 100}
            ],
            "symbols": [{
                "symbol": "ETHBTC", "baseAsset": "ETH", "quoteAsset": "BTC",
                "filters": [
                    {"filterType": "LOT_SIZE", "minQty": "0.00010000", "maxQty": "100000", "stepSize": "0.00010000"},
                    {"filterType": "NOTIONAL", "minNotional": "0.00010000"}
                ]
            }]
        });
        let info: ExchangeInfo = serde_json::from_value(body).unwrap();
        let weight = info.request_weight_limit().unwrap();
        assert_eq!(weight.limit, 6000);
        assert_eq!(weight.window(), Duration::from_secs(60));

        let rules = info.symbol_rules();
        assert_eq!(rules[0].base_asset, "ETH");
        assert_eq!(rules[0].step_size, dec!(0.0001));
        assert_eq!(rules[0].min_notional, dec!(0.0001));
    }

    #[test]
    fn test_decode_rejects_error_status() {
        let resp = ApiResponse {
            status: 400,
            headers: Vec::new(),
            body: json!({"code": -1100}),
        };
        assert!(matches!(decode::<Value>(&resp), Err(ClientError::Decode(_))));
    }

    #[test]
    fn test_trade_event_to_tick() {
        let event = json!({
            "e": "trade", "E": 1672515782136i64, "s": "BNBBTC", "t": 12345,
            "p": "0.001", "q": "100", "T": 1672515782136i64, "m": true, "M": true
        });
        let tick = parse_trade_tick(&event).unwrap();
        assert_eq!(tick.symbol, "BNBBTC");
        assert_eq!(tick.price, dec!(0.001));
        assert_eq!(tick.quantity, dec!(100));

        assert!(parse_trade_tick(&json!({"e": "trade"})).is_err());
    }

    #[test]
    fn test_order_status_lookup() {
        assert_eq!(
            order_status(&json!({"status": "PARTIALLY_FILLED"})),
            Some(OrderStatus::PartiallyFilled)
        );
        assert_eq!(order_status(&json!({"code": -2013})), None);
    }
}
