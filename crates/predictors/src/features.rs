use cryptobot_core::PriceSample;
use serde::{Deserialize, Serialize};

/// `[price, vol, price_t-1, price_t-2, vol_t-1, vol_t-2]`
pub const FEATURE_COUNT: usize = 6;

pub type FeatureRow = [f64; FEATURE_COUNT];

/// Scales a pair's samples by its historical maxima.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normaliser {
    pub max_price: f64,
    pub max_volume: f64,
}

impl Normaliser {
    pub fn new(max_price: f64, max_volume: f64) -> Self {
        Self {
            max_price,
            max_volume,
        }
    }

    /// Maxima of the samples themselves.
    pub fn from_samples(samples: &[PriceSample]) -> Self {
        let max_price = samples.iter().map(|s| s.price).fold(0.0, f64::max);
        let max_volume = samples.iter().map(|s| s.volume).fold(0.0, f64::max);
        Self::new(max_price, max_volume)
    }

    pub fn normalise(&self, sample: &PriceSample) -> PriceSample {
        PriceSample {
            timestamp: sample.timestamp,
            price: scale(sample.price, self.max_price),
            volume: scale(sample.volume, self.max_volume),
        }
    }

    pub fn normalise_all(&self, samples: &[PriceSample]) -> Vec<PriceSample> {
        samples.iter().map(|s| self.normalise(s)).collect()
    }

    /// Back to exchange units.
    pub fn denormalise_price(&self, price: f64) -> f64 {
        if self.max_price > 0.0 {
            price * self.max_price
        } else {
            price
        }
    }
}

fn scale(value: f64, max: f64) -> f64 {
    if max > 0.0 {
        value / max
    } else {
        value
    }
}

/// The feature row ending at `samples[idx]`, if two earlier samples exist.
pub fn feature_row(samples: &[PriceSample], idx: usize) -> Option<FeatureRow> {
    if idx < 2 || idx >= samples.len() {
        return None;
    }
    let (now, prev, prev2) = (&samples[idx], &samples[idx - 1], &samples[idx - 2]);
    Some([
        now.price,
        now.volume,
        prev.price,
        prev2.price,
        prev.volume,
        prev2.volume,
    ])
}

/// Feature rows paired with the price `future_periods` buckets later.
///
/// Rows whose target price is zero carry no signal and are skipped.
pub fn training_rows(samples: &[PriceSample], future_periods: usize) -> Vec<(FeatureRow, f64)> {
    let future_periods = future_periods.max(1);
    (2..samples.len().saturating_sub(future_periods))
        .filter_map(|idx| {
            let target = samples[idx + future_periods].price;
            if target == 0.0 {
                return None;
            }
            feature_row(samples, idx).map(|row| (row, target))
        })
        .collect()
}
