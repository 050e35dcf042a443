//! Bitfinex answers with positional arrays; these types give the rows
//! names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BitfinexError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformStatus {
    Operative,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub bid: f64,
    pub bid_size: f64,
    pub ask: f64,
    pub ask_size: f64,
    pub daily_change: f64,
    pub daily_change_relative: f64,
    pub last_price: f64,
    pub volume: f64,
    pub high: f64,
    pub low: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    /// Millisecond timestamp.
    pub mts: i64,
    /// Positive for buys, negative for sells.
    pub amount: f64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub mts: i64,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_type: String,
    pub currency: String,
    pub balance: f64,
    pub unsettled_interest: f64,
    /// Null when the exchange has not computed it yet.
    pub available_balance: Option<f64>,
}

fn row(value: &Value) -> Result<&[Value], BitfinexError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| BitfinexError::Shape(format!("expected an array, got {}", value)))
}

fn rows(value: &Value) -> Result<Vec<&[Value]>, BitfinexError> {
    row(value)?.iter().map(row).collect()
}

fn num(row: &[Value], idx: usize) -> Result<f64, BitfinexError> {
    row.get(idx)
        .and_then(Value::as_f64)
        .ok_or_else(|| BitfinexError::Shape(format!("field {} is not a number", idx)))
}

fn int(row: &[Value], idx: usize) -> Result<i64, BitfinexError> {
    row.get(idx)
        .and_then(Value::as_i64)
        .ok_or_else(|| BitfinexError::Shape(format!("field {} is not an integer", idx)))
}

fn text(row: &[Value], idx: usize) -> Result<String, BitfinexError> {
    row.get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BitfinexError::Shape(format!("field {} is not a string", idx)))
}

pub fn parse_platform_status(body: &Value) -> Result<PlatformStatus, BitfinexError> {
    match row(body)?.first().and_then(Value::as_i64) {
        Some(1) => Ok(PlatformStatus::Operative),
        Some(0) => Ok(PlatformStatus::Maintenance),
        _ => Err(BitfinexError::Shape(format!("unknown platform status {}", body))),
    }
}

/// Trading-pair ticker fields, without the symbol.
fn ticker_fields(symbol: &str, fields: &[Value]) -> Result<Ticker, BitfinexError> {
    if !symbol.starts_with('t') {
        return Err(BitfinexError::Shape(format!(
            "{} is not a trading pair",
            symbol
        )));
    }
    Ok(Ticker {
        symbol: symbol.to_string(),
        bid: num(fields, 0)?,
        bid_size: num(fields, 1)?,
        ask: num(fields, 2)?,
        ask_size: num(fields, 3)?,
        daily_change: num(fields, 4)?,
        daily_change_relative: num(fields, 5)?,
        last_price: num(fields, 6)?,
        volume: num(fields, 7)?,
        high: num(fields, 8)?,
        low: num(fields, 9)?,
    })
}

pub fn parse_ticker(symbol: &str, body: &Value) -> Result<Ticker, BitfinexError> {
    ticker_fields(symbol, row(body)?)
}

/// `/tickers` rows lead with the symbol. Funding rows are skipped.
pub fn parse_tickers(body: &Value) -> Result<Vec<Ticker>, BitfinexError> {
    rows(body)?
        .into_iter()
        .filter(|r| r.first().and_then(Value::as_str).is_some_and(|s| s.starts_with('t')))
        .map(|r| ticker_fields(&text(r, 0)?, &r[1..]))
        .collect()
}

pub fn parse_trades(body: &Value) -> Result<Vec<Trade>, BitfinexError> {
    rows(body)?
        .into_iter()
        .map(|r| {
            Ok(Trade {
                id: int(r, 0)?,
                mts: int(r, 1)?,
                amount: num(r, 2)?,
                price: num(r, 3)?,
            })
        })
        .collect()
}

fn candle(r: &[Value]) -> Result<Candle, BitfinexError> {
    Ok(Candle {
        mts: int(r, 0)?,
        open: num(r, 1)?,
        close: num(r, 2)?,
        high: num(r, 3)?,
        low: num(r, 4)?,
        volume: num(r, 5)?,
    })
}

/// The `last` section is a single row, `hist` a list of rows.
pub fn parse_candles(body: &Value) -> Result<Vec<Candle>, BitfinexError> {
    let outer = row(body)?;
    if outer.first().is_some_and(Value::is_number) {
        return Ok(vec![candle(outer)?]);
    }
    rows(body)?.into_iter().map(candle).collect()
}

pub fn parse_wallets(body: &Value) -> Result<Vec<Wallet>, BitfinexError> {
    rows(body)?
        .into_iter()
        .map(|r| {
            Ok(Wallet {
                wallet_type: text(r, 0)?,
                currency: text(r, 1)?,
                balance: num(r, 2)?,
                unsettled_interest: num(r, 3)?,
                available_balance: r.get(4).and_then(Value::as_f64),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_platform_status() {
        assert_eq!(parse_platform_status(&json!([1])).unwrap(), PlatformStatus::Operative);
        assert_eq!(parse_platform_status(&json!([0])).unwrap(), PlatformStatus::Maintenance);
        assert!(parse_platform_status(&json!({})).is_err());
    }

    #[test]
    fn test_tickers_skip_funding_rows() {
        let body = json!([
            ["tBTCUSD", 10654, 53.62, 10655, 76.68, 56.3, 0.0053, 10655, 2.8, 10683, 10583],
            ["fUSD", 0.0003, 0.0002, 30, 1, 0.0003, 2, 2, 0.0, 0.0, 0.0003, 1, 0.0003, 0.0002, null, null, 1]
        ]);
        let tickers = parse_tickers(&body).unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].symbol, "tBTCUSD");
        assert_eq!(tickers[0].last_price, 10655.0);
        assert_eq!(tickers[0].low, 10583.0);
    }

    #[test]
    fn test_single_ticker() {
        let body = json!([10654, 53.62, 10655, 76.68, 56.3, 0.0053, 10655, 2.8, 10683, 10583]);
        let ticker = parse_ticker("tBTCUSD", &body).unwrap();
        assert_eq!(ticker.ask, 10655.0);
        assert!(parse_ticker("fUSD", &body).is_err());
    }

    #[test]
    fn test_candles_last_and_hist() {
        let last = json!([1678465320000i64, 20097, 20094, 20097, 20094, 0.07870586]);
        assert_eq!(parse_candles(&last).unwrap().len(), 1);

        let hist = json!([
            [1678465320000i64, 20097, 20094, 20097, 20094, 0.07870586],
            [1678465260000i64, 20100, 20097, 20100, 20096, 0.14523688]
        ]);
        let candles = parse_candles(&hist).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].high, 20100.0);
    }

    #[test]
    fn test_wallets() {
        let body = json!([["exchange", "UST", 19788.6529257, 0, 19788.6529257, null, null]]);
        let wallets = parse_wallets(&body).unwrap();
        assert_eq!(wallets[0].currency, "UST");
        assert_eq!(wallets[0].available_balance, Some(19788.6529257));
    }

    #[test]
    fn test_trades() {
        let body = json!([[388063448, 1567526214876i64, 1.918524, 10682]]);
        let trades = parse_trades(&body).unwrap();
        assert_eq!(trades[0].id, 388063448);
        assert_eq!(trades[0].price, 10682.0);
    }
}
