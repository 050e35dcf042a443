use cryptobot_core::{PriceSample, Predictor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::features::{feature_row, training_rows, FeatureRow, FEATURE_COUNT};
use crate::metrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdConfig {
    /// L2 penalty.
    pub alpha: f64,
    pub eta0: f64,
    /// Exponent of the inverse-scaling learning rate.
    pub power_t: f64,
    /// How many buckets ahead the target lies.
    pub future_periods: usize,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            alpha: 1e-4,
            eta0: 0.01,
            power_t: 0.25,
            future_periods: 1,
        }
    }
}

/// Linear model fitted online with stochastic gradient descent on the
/// squared loss. The learning rate decays as `eta0 / t^power_t`, `t`
/// counting every sample seen so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgdRegressor {
    weights: [f64; FEATURE_COUNT],
    intercept: f64,
    alpha: f64,
    eta0: f64,
    power_t: f64,
    t: f64,
}

impl SgdRegressor {
    pub fn new(alpha: f64, eta0: f64, power_t: f64) -> Self {
        Self {
            weights: [0.0; FEATURE_COUNT],
            intercept: 0.0,
            alpha,
            eta0,
            power_t,
            t: 1.0,
        }
    }

    pub fn weights(&self) -> &[f64; FEATURE_COUNT] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Number of samples fitted so far.
    pub fn samples_seen(&self) -> u64 {
        (self.t - 1.0) as u64
    }

    pub fn predict(&self, row: &FeatureRow) -> f64 {
        self.weights
            .iter()
            .zip(row.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept
    }

    /// One pass over `rows`, updating after each sample.
    pub fn partial_fit(&mut self, rows: &[(FeatureRow, f64)]) {
        for (row, target) in rows {
            let eta = self.eta0 / self.t.powf(self.power_t);
            let gradient = self.predict(row) - target;
            let decay = 1.0 - eta * self.alpha;
            for (w, x) in self.weights.iter_mut().zip(row.iter()) {
                *w = *w * decay - eta * gradient * x;
            }
            self.intercept -= eta * gradient;
            self.t += 1.0;
        }
    }
}

/// [`Predictor`] backed by an [`SgdRegressor`] over lagged features.
#[derive(Debug, Clone)]
pub struct SgdPredictor {
    regressor: SgdRegressor,
    future_periods: usize,
}

impl SgdPredictor {
    pub fn new(config: &SgdConfig) -> Self {
        Self {
            regressor: SgdRegressor::new(config.alpha, config.eta0, config.power_t),
            future_periods: config.future_periods.max(1),
        }
    }

    pub fn regressor(&self) -> &SgdRegressor {
        &self.regressor
    }

    pub fn future_periods(&self) -> usize {
        self.future_periods
    }

    pub fn is_trained(&self) -> bool {
        self.regressor.samples_seen() > 0
    }
}

impl Default for SgdPredictor {
    fn default() -> Self {
        Self::new(&SgdConfig::default())
    }
}

impl Predictor for SgdPredictor {
    fn predict(&self, history: &[PriceSample]) -> Option<f64> {
        if !self.is_trained() {
            return None;
        }
        let row = feature_row(history, history.len().checked_sub(1)?)?;
        Some(self.regressor.predict(&row))
    }

    fn learn(&mut self, history: &[PriceSample]) {
        let rows = training_rows(history, self.future_periods);
        if rows.is_empty() {
            return;
        }
        self.regressor.partial_fit(&rows);
        debug!(
            rows = rows.len(),
            seen = self.regressor.samples_seen(),
            "SGD model updated"
        );
    }

    fn calculate_errors(&self, actual: &[f64], predicted: &[f64]) -> (f64, f64) {
        metrics::calculate_errors(actual, predicted)
    }
}
