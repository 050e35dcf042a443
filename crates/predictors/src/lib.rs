pub mod bucket;
pub mod features;
pub mod metrics;
pub mod sgd;
pub mod trend;

pub use bucket::{bucketize, load_history_csv, resample, HistoryError};
pub use features::{feature_row, training_rows, FeatureRow, Normaliser, FEATURE_COUNT};
pub use metrics::{calculate_errors, mae, rmse};
pub use sgd::{SgdConfig, SgdPredictor, SgdRegressor};
pub use trend::{classify, INCREASE_MARGIN};
