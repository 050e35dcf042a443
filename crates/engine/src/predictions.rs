use chrono::{DateTime, Duration, Utc};
use cryptobot_core::{Forecast, PriceSample, Predictor, TradeTick};
use cryptobot_predictors::{bucketize, classify, load_history_csv, resample, Normaliser};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

use crate::error::EngineError;

/// Turns trade ticks into per-pair bucket histories, trains the predictor
/// on completed buckets and keeps the forecasts it produces.
pub struct PredictionsManager {
    predictor: Box<dyn Predictor>,
    bucket: Duration,
    future_periods: usize,
    buffer_cap: usize,
    /// Ticks of buckets that are still open.
    pending: HashMap<String, Vec<TradeTick>>,
    /// Completed buckets, in exchange units.
    history: HashMap<String, Vec<PriceSample>>,
    forecasts: Vec<Forecast>,
    errors: BTreeMap<String, (f64, f64)>,
}

impl PredictionsManager {
    pub fn new(
        predictor: Box<dyn Predictor>,
        bucket: Duration,
        future_periods: usize,
        buffer_cap: usize,
    ) -> Self {
        Self {
            predictor,
            bucket,
            future_periods: future_periods.max(1),
            buffer_cap,
            pending: HashMap::new(),
            history: HashMap::new(),
            forecasts: Vec::new(),
            errors: BTreeMap::new(),
        }
    }

    pub fn history(&self, symbol: &str) -> &[PriceSample] {
        self.history.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn forecasts(&self) -> &[Forecast] {
        &self.forecasts
    }

    /// `(rmse, mae)` per pair.
    pub fn errors(&self) -> &BTreeMap<String, (f64, f64)> {
        &self.errors
    }

    /// Most recent forecast per pair.
    pub fn latest_forecasts(&self) -> HashMap<String, Forecast> {
        let mut latest: HashMap<String, Forecast> = HashMap::new();
        for forecast in &self.forecasts {
            match latest.get(&forecast.symbol) {
                Some(existing) if existing.target_time >= forecast.target_time => {}
                _ => {
                    latest.insert(forecast.symbol.clone(), forecast.clone());
                }
            }
        }
        latest
    }

    /// Pre-train on every `ts,price,vol` CSV file in `dir`, each file
    /// scaled by its own maxima.
    pub fn train_from_dir(&mut self, dir: &Path) -> Result<usize, EngineError> {
        info!(dir = %dir.display(), "Training model on stored history");
        let mut trained = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let raw = match load_history_csv(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unreadable history file");
                    continue;
                }
            };
            let samples = resample(raw, self.bucket);
            if samples.is_empty() {
                continue;
            }
            let normaliser = Normaliser::from_samples(&samples);
            self.predictor.learn(&normaliser.normalise_all(&samples));
            trained += 1;
        }
        info!(files = trained, "Model training complete");
        Ok(trained)
    }

    /// Add trade ticks. Buckets that ended by `now` move into the pair's
    /// history and the predictor learns from the rows they complete.
    pub fn ingest(
        &mut self,
        ticks: Vec<TradeTick>,
        normalisers: &HashMap<String, Normaliser>,
        now: DateTime<Utc>,
    ) {
        for tick in ticks {
            self.pending.entry(tick.symbol.clone()).or_default().push(tick);
        }

        let bucket = self.bucket;
        let mut completed: Vec<(String, Vec<PriceSample>)> = Vec::new();
        for (symbol, ticks) in self.pending.iter_mut() {
            let (done, open): (Vec<TradeTick>, Vec<TradeTick>) = ticks
                .drain(..)
                .partition(|t| bucket_end(t.event_time, bucket) <= now);
            *ticks = open;
            if !done.is_empty() {
                completed.push((symbol.clone(), bucketize(&done, bucket)));
            }
        }
        self.pending.retain(|_, ticks| !ticks.is_empty());

        for (symbol, samples) in completed {
            let history = self.history.entry(symbol.clone()).or_default();
            let old_len = history.len();
            history.extend(samples);

            // Only the rows whose targets are new buckets.
            let Some(normaliser) = normalisers.get(&symbol) else {
                continue;
            };
            let start = old_len.saturating_sub(self.future_periods + 2);
            let window = normaliser.normalise_all(&history[start..]);
            self.predictor.learn(&window);
        }
    }

    /// Forecast every pair with a known normaliser, then re-score the
    /// forecasts whose target time has passed.
    pub fn run_prediction(&mut self, normalisers: &HashMap<String, Normaliser>) -> Vec<Forecast> {
        let mut made = Vec::new();
        for (symbol, normaliser) in normalisers {
            let history = self.history(symbol);
            let Some(last) = history.last() else {
                info!(symbol = %symbol, "Not enough data gathered to run prediction");
                continue;
            };
            let Some(predicted) = self.predictor.predict(&normaliser.normalise_all(history)) else {
                info!(symbol = %symbol, "Not enough data gathered to run prediction");
                continue;
            };
            let predicted = normaliser.denormalise_price(predicted);
            let forecast = Forecast {
                symbol: symbol.clone(),
                target_time: last.timestamp + self.bucket * self.future_periods as i32,
                price: last.price,
                predicted,
                trend: classify(last.price, predicted),
            };
            info!(
                symbol = %symbol,
                price = forecast.price,
                predicted = forecast.predicted,
                trend = %forecast.trend,
                "Forecast"
            );
            made.push(forecast);
        }
        made.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        self.forecasts.extend(made.iter().cloned());
        self.calculate_errors();
        made
    }

    /// Score forecasts against the bucket that later materialised at
    /// their target time.
    pub fn calculate_errors(&mut self) {
        let mut per_pair: HashMap<&str, (Vec<f64>, Vec<f64>)> = HashMap::new();
        for forecast in &self.forecasts {
            let entry = per_pair.entry(forecast.symbol.as_str()).or_default();
            if let Some(actual) = self
                .history(&forecast.symbol)
                .iter()
                .find(|s| s.timestamp == forecast.target_time)
            {
                entry.0.push(actual.price);
                entry.1.push(forecast.predicted);
            }
        }

        for (symbol, (actual, predicted)) in per_pair {
            if actual.is_empty() {
                info!(symbol = %symbol, "Cannot evaluate prediction performance yet");
            }
            let errors = self.predictor.calculate_errors(&actual, &predicted);
            self.errors.insert(symbol.to_string(), errors);
        }
    }

    /// Keep the newest entries only, and forget unscored pairs.
    pub fn trim(&mut self) {
        info!("Cleaning up old entries");
        let cap = self.buffer_cap;
        for history in self.history.values_mut() {
            if history.len() > cap {
                history.drain(..history.len() - cap);
            }
        }
        if self.forecasts.len() > cap {
            self.forecasts.drain(..self.forecasts.len() - cap);
        }
        self.errors.retain(|_, (rmse, mae)| !rmse.is_nan() && !mae.is_nan());
    }
}

fn bucket_end(at: DateTime<Utc>, bucket: Duration) -> DateTime<Utc> {
    let width = bucket.num_milliseconds().max(1);
    let start = at.timestamp_millis().div_euclid(width) * width;
    DateTime::from_timestamp_millis(start + width).unwrap_or(at)
}
