use cryptobot_core::Trend;

/// A forecast only counts as a rise once it clears this factor.
pub const INCREASE_MARGIN: f64 = 1.00075;

pub fn classify(price: f64, predicted: f64) -> Trend {
    if predicted > price * INCREASE_MARGIN {
        Trend::Increase
    } else if predicted < price {
        Trend::Decrease
    } else {
        Trend::NoChange
    }
}
