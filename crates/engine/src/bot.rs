use chrono::{DateTime, Utc};
use cryptobot_brokers_binance::BinanceClient;
use cryptobot_core::{Notifier, Predictor};
use cryptobot_predictors::SgdPredictor;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::BotConfig;
use crate::decisions::DecisionsManager;
use crate::error::EngineError;
use crate::orders::{LegOutcome, OrdersManager};
use crate::predictions::PredictionsManager;
use crate::report::{DiscordNotifier, LogNotifier, ReportManager};
use crate::streams::StreamsManager;
use crate::wallet::WalletManager;

/// The trading bot. Owns one of each manager and runs them on their own
/// cadences until shut down.
pub struct Bot {
    config: BotConfig,
    client: Arc<BinanceClient>,
    streams: StreamsManager,
    wallet: WalletManager,
    predictions: PredictionsManager,
    decisions: DecisionsManager,
    orders: OrdersManager,
    reports: ReportManager,
}

impl Bot {
    /// A bot with the SGD predictor, reporting to Discord when a webhook
    /// is configured and to the log otherwise.
    pub fn new(config: BotConfig, client: Arc<BinanceClient>) -> Result<Self, EngineError> {
        let notifier: Arc<dyn Notifier> = match &config.discord_webhook_url {
            Some(url) => Arc::new(DiscordNotifier::new(url.as_str())?),
            None => Arc::new(LogNotifier),
        };
        let mut sgd = config.sgd.clone();
        sgd.future_periods = config.future_periods;
        let predictor = Box::new(SgdPredictor::new(&sgd));
        Ok(Self::with_parts(config, client, predictor, notifier))
    }

    pub fn with_parts(
        config: BotConfig,
        client: Arc<BinanceClient>,
        predictor: Box<dyn Predictor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let quote = config.quote_asset.clone();
        let tracker = client.config().tracker.clone();
        Self {
            streams: StreamsManager::new(client.clone(), quote.as_str(), config.max_tracked_tickers),
            wallet: WalletManager::new(client.clone(), config.wallet_history_path.clone()),
            predictions: PredictionsManager::new(
                predictor,
                config.bucket_width(),
                config.future_periods,
                config.buffer_cap,
            ),
            decisions: DecisionsManager::new(quote.as_str()),
            orders: OrdersManager::new(client.clone(), quote.as_str(), config.test_orders, tracker),
            reports: ReportManager::new(notifier, config.bucket_width()),
            client,
            config,
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn streams(&self) -> &StreamsManager {
        &self.streams
    }

    pub fn wallet(&self) -> &WalletManager {
        &self.wallet
    }

    pub fn predictions(&self) -> &PredictionsManager {
        &self.predictions
    }

    /// Load account state, pick the pairs to follow and subscribe to
    /// their trades.
    pub async fn startup(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.prepare(now).await?;
        self.streams.start().await
    }

    async fn prepare(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        info!(quote = %self.config.quote_asset, test_orders = self.config.test_orders, "Starting bot");
        if let Err(e) = self.client.refresh_rate_limits().await {
            warn!(error = %e, "Could not refresh rate limits, keeping defaults");
        }
        self.wallet.update_balances().await?;
        self.wallet.fetch_trading_rules().await?;
        if let Err(e) = self.wallet.update_fees().await {
            warn!(error = %e, "Could not fetch trading fees");
        }
        if let Some(dir) = &self.config.training_data_dir {
            self.predictions.train_from_dir(dir)?;
        }
        self.streams
            .acquire_targets(self.wallet.balances(), self.wallet.rules(), now)
            .await?;
        Ok(())
    }

    /// Move buffered trades into the prediction buckets.
    pub fn crunch(&mut self, now: DateTime<Utc>) {
        let ticks = self.streams.drain();
        if !ticks.is_empty() {
            info!(ticks = ticks.len(), "Crunching trades");
        }
        self.predictions.ingest(ticks, self.streams.normalisers(), now);
    }

    /// Predict, report, decide and trade, then record the wallet.
    pub async fn execution_cycle(&mut self, now: DateTime<Utc>) -> Result<Vec<LegOutcome>, EngineError> {
        info!("Running execution cycle");
        self.crunch(now);
        self.predictions.run_prediction(self.streams.normalisers());
        let forecasts = self.predictions.latest_forecasts();

        if let Err(e) = self.reports.report(self.streams.targets(), &forecasts, now).await {
            warn!(error = %e, "Could not send report");
        }

        self.wallet.update_balances().await?;
        let decisions = self.decisions.decide(
            self.wallet.balances(),
            self.wallet.rules(),
            self.streams.targets(),
            &forecasts,
        );
        let outcomes = self.orders.execute(&decisions, &mut self.wallet).await;

        let recorded = self.wallet.record_history(now)?;
        info!(legs = outcomes.len(), balances = recorded, "Execution cycle complete");
        Ok(outcomes)
    }

    /// Re-pick the followed pairs and move the subscription to them.
    pub async fn refresh_streams(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        info!("Refreshing followed pairs");
        if let Err(e) = self.client.refresh_rate_limits().await {
            warn!(error = %e, "Could not refresh rate limits");
        }
        self.wallet.update_balances().await?;
        self.streams
            .refresh(self.wallet.balances(), self.wallet.rules(), now)
            .await
    }

    pub fn trim(&mut self) {
        self.predictions.trim();
    }

    /// Start up, then run every cadence until `shutdown` resolves. A
    /// failing job is logged and retried on its next tick.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), EngineError>
    where
        F: Future<Output = ()>,
    {
        self.startup(Utc::now()).await?;

        let mut crunch = every(self.config.crunch_period());
        let mut cycle = every(self.config.ops_period());
        let mut refresh = every(self.config.refresh_period());
        let mut trim = every(self.config.trim_period());
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = crunch.tick() => self.crunch(Utc::now()),
                _ = cycle.tick() => {
                    if let Err(e) = self.execution_cycle(Utc::now()).await {
                        error!(error = %e, "Execution cycle failed");
                    }
                }
                _ = refresh.tick() => {
                    if let Err(e) = self.refresh_streams(Utc::now()).await {
                        error!(error = %e, "Stream refresh failed");
                    }
                }
                _ = trim.tick() => self.trim(),
            }
        }

        self.streams.stop().await;
        info!("Bot stopped");
        Ok(())
    }
}

/// An interval whose first tick is one period away.
fn every(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use cryptobot_brokers_binance::{BinanceConfig, Credentials};
    use cryptobot_brokers_common::{HttpMethod, RawResponse, ReplayTransport};
    use cryptobot_core::{Decision, NotifyError, PriceSample, TradeTick};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    use crate::orders::LegStatus;

    /// Always forecasts a 1% rise.
    struct Rising;

    impl Predictor for Rising {
        fn predict(&self, history: &[PriceSample]) -> Option<f64> {
            history.last().map(|s| s.price * 1.01)
        }

        fn learn(&mut self, _history: &[PriceSample]) {}

        fn calculate_errors(&self, actual: &[f64], predicted: &[f64]) -> (f64, f64) {
            cryptobot_predictors::calculate_errors(actual, predicted)
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, text: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn exchange() -> Arc<ReplayTransport> {
        let transport = Arc::new(ReplayTransport::new());
        transport.push(
            HttpMethod::Get,
            "/api/v3/exchangeInfo",
            RawResponse::new(
                200,
                r#"{"rateLimits":[],"symbols":[
                    {"symbol":"ETHBTC","baseAsset":"ETH","quoteAsset":"BTC",
                     "filters":[{"filterType":"LOT_SIZE","minQty":"0.001","maxQty":"100000","stepSize":"0.001"}]},
                    {"symbol":"XRPBTC","baseAsset":"XRP","quoteAsset":"BTC",
                     "filters":[{"filterType":"LOT_SIZE","minQty":"1","maxQty":"100000","stepSize":"1"}]}]}"#,
            ),
        );
        transport.push(
            HttpMethod::Get,
            "/sapi/v1/asset/tradeFee",
            RawResponse::new(200, r#"[{"symbol":"ETHBTC","makerCommission":"0.001","takerCommission":"0.001"}]"#),
        );
        transport.push(
            HttpMethod::Get,
            "/api/v3/account",
            RawResponse::new(200, r#"{"balances":[{"asset":"BTC","free":"0.5","locked":"0"}]}"#),
        );
        transport.push(
            HttpMethod::Get,
            "/api/v3/ticker/24hr",
            RawResponse::new(
                200,
                r#"[
                    {"symbol":"ETHBTC","priceChangePercent":"1.5","lastPrice":"0.05","volume":"10","quoteVolume":"0.5"},
                    {"symbol":"XRPBTC","priceChangePercent":"4.0","lastPrice":"0.00001","volume":"10","quoteVolume":"0.5"}
                ]"#,
            ),
        );
        transport.push(
            HttpMethod::Get,
            "/api/v3/klines",
            RawResponse::new(
                200,
                r#"[[1500000000000,"0.01","0.09","0.01","0.05","1200.5",1502000000000,"0",1,"0","0","0"]]"#,
            ),
        );
        transport.push(HttpMethod::Post, "/api/v3/order/test", RawResponse::new(200, "{}"));
        transport
    }

    fn bot(transport: Arc<ReplayTransport>, notifier: Arc<Recorder>, name: &str) -> Bot {
        let client = BinanceClient::with_transport(
            BinanceConfig::default(),
            Some(Credentials::new("key", "secret")),
            transport,
        )
        .unwrap();
        let config = BotConfig {
            wallet_history_path: std::env::temp_dir().join(format!("cryptobot-bot-{name}.csv")),
            ..Default::default()
        };
        let _ = std::fs::remove_file(&config.wallet_history_path);
        Bot::with_parts(config, Arc::new(client), Box::new(Rising), notifier)
    }

    fn tick(symbol: &str, secs: i64, price: &str) -> TradeTick {
        TradeTick {
            symbol: symbol.to_string(),
            price: price.parse().unwrap(),
            quantity: dec!(1),
            event_time: at(secs),
        }
    }

    #[tokio::test]
    async fn test_prepare_loads_account_and_targets() {
        let transport = exchange();
        let mut bot = bot(transport.clone(), Arc::new(Recorder::default()), "prepare");

        bot.prepare(at(1_700_000_000)).await.unwrap();

        assert_eq!(bot.wallet().balance("BTC"), dec!(0.5));
        assert_eq!(bot.wallet().rules()["XRPBTC"].min_qty, dec!(1));
        let symbols: Vec<&str> = bot.streams().targets().iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["XRPBTC", "ETHBTC"]);
    }

    #[tokio::test]
    async fn test_execution_cycle_buys_best_rising_pair() {
        let transport = exchange();
        let recorder = Arc::new(Recorder::default());
        let mut bot = bot(transport.clone(), recorder.clone(), "cycle");
        bot.prepare(at(1_700_000_000)).await.unwrap();

        let ticks = vec![
            tick("ETHBTC", 1_700_000_000, "0.05"),
            tick("XRPBTC", 1_700_000_010, "0.00001"),
        ];
        bot.predictions.ingest(ticks, bot.streams.normalisers(), at(1_700_000_000));
        assert!(bot.predictions().history("ETHBTC").is_empty());

        // The bucket holding the ticks closes at 1_700_002_800.
        let outcomes = bot.execution_cycle(at(1_700_003_000)).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].decision, Decision::buy("XRP"));
        assert_eq!(outcomes[0].status, LegStatus::Validated);
        let order = transport.requests_to(HttpMethod::Post, "/api/v3/order/test")[0]
            .body
            .clone()
            .unwrap_or_default();
        assert!(order.contains("symbol=XRPBTC&side=BUY"));
        assert!(order.contains("quoteOrderQty=0.5"));

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("For XRPBTC predicted a increase of 1.0000%"));

        let history = bot.wallet().history().unwrap();
        std::fs::remove_file(&bot.config().wallet_history_path).ok();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].coin, "BTC");
        assert_eq!(history[0].ts, 1_700_003_000);
    }

    #[tokio::test]
    async fn test_cycle_without_data_does_nothing() {
        let transport = exchange();
        let recorder = Arc::new(Recorder::default());
        let mut bot = bot(transport.clone(), recorder.clone(), "empty");
        bot.prepare(at(1_700_000_000)).await.unwrap();

        let outcomes = bot.execution_cycle(at(1_700_003_000)).await.unwrap();
        std::fs::remove_file(&bot.config().wallet_history_path).ok();

        assert!(outcomes.is_empty());
        assert!(recorder.sent.lock().unwrap().is_empty());
        assert!(transport.requests_to(HttpMethod::Post, "/api/v3/order/test").is_empty());
    }
}
