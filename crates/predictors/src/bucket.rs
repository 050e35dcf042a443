use chrono::{DateTime, Duration, Utc};
use cryptobot_core::{PriceSample, TradeTick};
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Timestamp out of range: {0}")]
    Timestamp(f64),
}

#[derive(Default)]
struct Accumulator {
    price_sum: f64,
    count: u32,
    volume: f64,
}

/// Resample raw points into fixed-width buckets aligned to the epoch.
///
/// Each bucket is labelled with its start time and carries the mean
/// price and summed volume of its points. Buckets without points are
/// dropped rather than zero-filled.
pub fn resample<I>(points: I, width: Duration) -> Vec<PriceSample>
where
    I: IntoIterator<Item = PriceSample>,
{
    let width_ms = width.num_milliseconds().max(1);
    let mut buckets: BTreeMap<i64, Accumulator> = BTreeMap::new();
    for point in points {
        let start = point.timestamp.timestamp_millis().div_euclid(width_ms) * width_ms;
        let acc = buckets.entry(start).or_default();
        acc.price_sum += point.price;
        acc.count += 1;
        acc.volume += point.volume;
    }

    buckets
        .into_iter()
        .filter_map(|(start, acc)| {
            Some(PriceSample {
                timestamp: DateTime::from_timestamp_millis(start)?,
                price: acc.price_sum / f64::from(acc.count),
                volume: acc.volume,
            })
        })
        .collect()
}

/// Bucket stream trades by time: mean price, summed quantity.
pub fn bucketize(ticks: &[TradeTick], width: Duration) -> Vec<PriceSample> {
    let points = ticks.iter().filter_map(|tick| {
        Some(PriceSample {
            timestamp: tick.event_time,
            price: tick.price.to_f64()?,
            volume: tick.quantity.to_f64()?,
        })
    });
    resample(points, width)
}

/// Read a headerless `ts,price,vol` history file (ts in seconds).
pub fn load_history_csv(path: &Path) -> Result<Vec<PriceSample>, HistoryError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    let mut samples = Vec::new();
    for record in reader.deserialize::<(f64, f64, f64)>() {
        let (ts, price, volume) = record?;
        let timestamp: DateTime<Utc> = DateTime::from_timestamp_millis((ts * 1000.0) as i64)
            .ok_or(HistoryError::Timestamp(ts))?;
        samples.push(PriceSample {
            timestamp,
            price,
            volume,
        });
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(secs: i64, price: rust_decimal::Decimal, qty: rust_decimal::Decimal) -> TradeTick {
        TradeTick {
            symbol: "ETHBTC".to_string(),
            price,
            quantity: qty,
            event_time: DateTime::from_timestamp(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_bucket_mean_price_and_summed_volume() {
        let ticks = vec![
            tick(0, dec!(1.0), dec!(2)),
            tick(30, dec!(3.0), dec!(1)),
            tick(61, dec!(5.0), dec!(4)),
        ];
        let samples = bucketize(&ticks, Duration::minutes(1));
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].price, 2.0);
        assert_eq!(samples[0].volume, 3.0);
        assert_eq!(samples[1].timestamp.timestamp(), 60);
        assert_eq!(samples[1].price, 5.0);
    }

    #[test]
    fn test_empty_buckets_are_dropped() {
        let ticks = vec![tick(0, dec!(1), dec!(1)), tick(600, dec!(2), dec!(1))];
        let samples = bucketize(&ticks, Duration::minutes(1));
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].timestamp.timestamp(), 600);
    }

    #[test]
    fn test_unordered_ticks_come_out_sorted() {
        let ticks = vec![tick(120, dec!(2), dec!(1)), tick(0, dec!(1), dec!(1))];
        let samples = bucketize(&ticks, Duration::minutes(1));
        assert!(samples[0].timestamp < samples[1].timestamp);
    }

    #[test]
    fn test_load_history_csv() {
        let path = std::env::temp_dir().join(format!("history-{}.csv", std::process::id()));
        std::fs::write(&path, "1600000000,0.034,12.5\n1600000030.5,0.035,1\n").unwrap();

        let samples = load_history_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp.timestamp(), 1_600_000_000);
        assert_eq!(samples[1].timestamp.timestamp_millis(), 1_600_000_030_500);
        assert_eq!(samples[1].volume, 1.0);
    }
}
