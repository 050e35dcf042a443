use chrono::{DateTime, Duration, TimeZone, Utc};
use cryptobot_brokers_binance::models::{decode, parse_klines, parse_trade_tick, Kline, Ticker24h};
use cryptobot_brokers_binance::stream::topic;
use cryptobot_brokers_binance::{BinanceClient, StreamClient};
use cryptobot_brokers_common::ClientError;
use cryptobot_core::{KlineInterval, SymbolRules, TradeTick};
use cryptobot_predictors::Normaliser;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::EngineError;

/// Assets that are never followed as holdings.
const IGNORED_HOLDINGS: &[&str] = &["USDT"];

/// Pairs listed for less than this are skipped.
const MIN_PAIR_AGE_HOURS: i64 = 24;

/// A pair the bot follows, with its 24h change.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub symbol: String,
    pub change_pct: Decimal,
}

/// Quote-asset pairs ordered by 24h change, best first.
pub fn rank_growers(tickers: Vec<Ticker24h>, quote_asset: &str) -> Vec<Target> {
    let mut growers: Vec<Target> = tickers
        .into_iter()
        .filter(|t| t.symbol.ends_with(quote_asset))
        .map(|t| Target {
            symbol: t.symbol,
            change_pct: t.price_change_percent,
        })
        .collect();
    growers.sort_by(|a, b| b.change_pct.cmp(&a.change_pct));
    growers
}

/// Pairs of held assets whose balance clears the LOT_SIZE minimum.
pub fn held_symbols(
    balances: &BTreeMap<String, Decimal>,
    rules: &HashMap<String, SymbolRules>,
    quote_asset: &str,
) -> Vec<String> {
    balances
        .iter()
        .filter(|(asset, _)| asset.as_str() != quote_asset && !IGNORED_HOLDINGS.contains(&asset.as_str()))
        .filter_map(|(asset, balance)| {
            let symbol = format!("{}{}", asset, quote_asset);
            let rule = rules.get(&symbol)?;
            (*balance > rule.min_qty).then_some(symbol)
        })
        .collect()
}

/// The top `max` growers, followed by held pairs not already among them.
pub fn select_targets(growers: &[Target], held: &[String], max: usize) -> Vec<String> {
    let mut chosen: Vec<String> = growers.iter().take(max).map(|t| t.symbol.clone()).collect();
    for symbol in held {
        if !chosen.contains(symbol) {
            chosen.push(symbol.clone());
        }
    }
    chosen
}

/// Historical price and volume maxima of a pair, or `None` when the pair
/// has no history or is younger than a day.
pub fn pair_extremes(klines: &[Kline], now: DateTime<Utc>) -> Option<Normaliser> {
    let earliest = klines.iter().map(|k| k.open_time).min()?;
    if now - earliest < Duration::hours(MIN_PAIR_AGE_HOURS) {
        return None;
    }
    let max_price = klines.iter().map(|k| k.high).max()?;
    let max_volume = klines.iter().map(|k| k.volume).max()?;
    Some(Normaliser::new(max_price.to_f64()?, max_volume.to_f64()?))
}

/// Picks the pairs to follow and keeps a trade stream subscribed to them.
pub struct StreamsManager {
    client: Arc<BinanceClient>,
    stream: StreamClient,
    events: Option<mpsc::UnboundedReceiver<Value>>,
    quote_asset: String,
    max_tracked: usize,
    targets: Vec<Target>,
    normalisers: HashMap<String, Normaliser>,
}

impl StreamsManager {
    pub fn new(client: Arc<BinanceClient>, quote_asset: impl Into<String>, max_tracked: usize) -> Self {
        let mut stream = StreamClient::new(client.config().ws_base());
        let events = stream.take_receiver();
        Self {
            client,
            stream,
            events,
            quote_asset: quote_asset.into(),
            max_tracked,
            targets: Vec::new(),
            normalisers: HashMap::new(),
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn normalisers(&self) -> &HashMap<String, Normaliser> {
        &self.normalisers
    }

    pub fn topics(&self) -> Vec<String> {
        self.targets
            .iter()
            .map(|t| topic(&t.symbol, "trade"))
            .collect()
    }

    /// Choose the pairs to follow: the day's best growers plus current
    /// holdings, minus pairs too young to have a history.
    pub async fn acquire_targets(
        &mut self,
        balances: &BTreeMap<String, Decimal>,
        rules: &HashMap<String, SymbolRules>,
        now: DateTime<Utc>,
    ) -> Result<&[Target], EngineError> {
        info!("Getting best market growers");
        let resp = self.client.market_data.ticker_24hr(None).await?;
        let tickers: Vec<Ticker24h> = decode(&resp)?;
        let growers = rank_growers(tickers, &self.quote_asset);

        let held = held_symbols(balances, rules, &self.quote_asset);
        let chosen = select_targets(&growers, &held, self.max_tracked);
        info!(pairs = ?chosen, "Fetching max prices and volumes");

        let mut normalisers = HashMap::new();
        for symbol in &chosen {
            let klines = match self.monthly_klines(symbol, now).await {
                Ok(klines) => klines,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Could not fetch pair history, skipping");
                    continue;
                }
            };
            match pair_extremes(&klines, now) {
                Some(normaliser) => {
                    normalisers.insert(symbol.clone(), normaliser);
                }
                None => info!(symbol = %symbol, "Pair is younger than 24 hours, ignoring"),
            }
        }

        self.targets = growers
            .into_iter()
            .filter(|t| normalisers.contains_key(&t.symbol))
            .collect();
        self.normalisers = normalisers;
        Ok(&self.targets)
    }

    async fn monthly_klines(&self, symbol: &str, now: DateTime<Utc>) -> Result<Vec<Kline>, ClientError> {
        let start = Utc
            .with_ymd_and_hms(2010, 1, 1, 0, 0, 0)
            .single()
            .map(|t| t.timestamp_millis());
        let resp = self
            .client
            .market_data
            .kline_candlestick_data(
                symbol,
                KlineInterval::Months1,
                start,
                Some(now.timestamp_millis()),
                Some(500),
            )
            .await?;
        if !resp.is_success() {
            return Err(ClientError::Decode(format!(
                "unexpected status {}: {}",
                resp.status, resp.body
            )));
        }
        parse_klines(&resp.body)
    }

    pub async fn start(&mut self) -> Result<(), EngineError> {
        let topics = self.topics();
        if topics.is_empty() {
            warn!("No pairs to follow, streams not started");
            return Ok(());
        }
        self.stream.start(topics).await?;
        Ok(())
    }

    /// Re-acquire targets and move the subscription over to them.
    pub async fn refresh(
        &mut self,
        balances: &BTreeMap<String, Decimal>,
        rules: &HashMap<String, SymbolRules>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.acquire_targets(balances, rules, now).await?;
        self.stream.stop().await;
        self.start().await
    }

    pub async fn stop(&mut self) {
        self.stream.stop().await;
    }

    /// Take every buffered trade event. Frames that are not trades are
    /// logged and dropped.
    pub fn drain(&mut self) -> Vec<TradeTick> {
        let Some(events) = self.events.as_mut() else {
            return Vec::new();
        };
        let mut ticks = Vec::new();
        while let Ok(event) = events.try_recv() {
            match parse_trade_tick(&event) {
                Ok(tick) => ticks.push(tick),
                Err(e) => warn!(error = %e, frame = %event, "Skipping malformed trade frame"),
            }
        }
        ticks
    }
}
