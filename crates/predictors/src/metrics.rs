use tracing::warn;

fn paired(actual: &[f64], predicted: &[f64]) -> Vec<(f64, f64)> {
    actual
        .iter()
        .copied()
        .zip(predicted.iter().copied())
        .collect()
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    let pairs = paired(actual, predicted);
    if pairs.is_empty() {
        return f64::NAN;
    }
    let mse = pairs.iter().map(|(a, p)| (a - p).powi(2)).sum::<f64>() / pairs.len() as f64;
    mse.sqrt()
}

pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    let pairs = paired(actual, predicted);
    if pairs.is_empty() {
        return f64::NAN;
    }
    pairs.iter().map(|(a, p)| (a - p).abs()).sum::<f64>() / pairs.len() as f64
}

/// `(rmse, mae)` over index-aligned values.
///
/// Returns a NaN pair when the series do not overlap or contain
/// non-finite values.
pub fn calculate_errors(actual: &[f64], predicted: &[f64]) -> (f64, f64) {
    let pairs = paired(actual, predicted);
    if pairs.is_empty() {
        warn!("No overlap between predictions and actual prices");
        return (f64::NAN, f64::NAN);
    }
    if pairs.iter().any(|(a, p)| !a.is_finite() || !p.is_finite()) {
        warn!("Cannot score predictions containing NaN or infinity");
        return (f64::NAN, f64::NAN);
    }
    (rmse(actual, predicted), mae(actual, predicted))
}
