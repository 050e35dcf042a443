use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Predictor Trait
// ---------------------------------------------------------------------------

/// One resampled observation of a pair: mean price and traded volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
}

/// A regression-style price predictor.
///
/// Samples handed to a predictor are already normalised by the caller;
/// the forecast comes back in the same units.
pub trait Predictor: Send + Sync {
    /// Forecast the price following the most recent sample.
    /// Returns `None` when the history is too short.
    fn predict(&self, history: &[PriceSample]) -> Option<f64>;

    /// Incrementally train on a history of samples.
    fn learn(&mut self, history: &[PriceSample]);

    /// Root mean squared error and mean absolute error of paired values.
    fn calculate_errors(&self, actual: &[f64], predicted: &[f64]) -> (f64, f64);
}

// ---------------------------------------------------------------------------
// Notifier Trait
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// A sink for plain text reports.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), NotifyError>;
}
