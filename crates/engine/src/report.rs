use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cryptobot_core::{Forecast, Notifier, NotifyError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::error::EngineError;
use crate::streams::Target;

/// Discord rejects messages longer than this.
const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// Posts reports to a Discord webhook.
pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        for chunk in split_message(text, DISCORD_MESSAGE_LIMIT) {
            let resp = self
                .client
                .post(&self.webhook_url)
                .json(&json!({ "content": chunk }))
                .send()
                .await
                .map_err(|e| NotifyError::Delivery(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(NotifyError::Delivery(format!(
                    "webhook answered {}",
                    resp.status()
                )));
            }
        }
        Ok(())
    }
}

/// Writes reports to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        info!("\n{}", text);
        Ok(())
    }
}

/// Split on line boundaries into messages of at most `limit` characters.
/// A single line longer than the limit is cut.
fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        let line: String = line.chars().take(limit).collect();
        let needed = current.chars().count() + 1 + line.chars().count();
        if !current.is_empty() && needed > limit {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub struct ReportManager {
    notifier: Arc<dyn Notifier>,
    /// Width of the bucket a forecast targets.
    bucket: chrono::Duration,
}

impl ReportManager {
    pub fn new(notifier: Arc<dyn Notifier>, bucket: chrono::Duration) -> Self {
        Self { notifier, bucket }
    }

    /// One line per followed pair, best grower first, for forecasts whose
    /// target bucket has not closed yet. Empty when there is nothing to
    /// report.
    pub fn generate(
        &self,
        targets: &[Target],
        forecasts: &HashMap<String, Forecast>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut ranked: Vec<&Target> = targets.iter().collect();
        ranked.sort_by(|a, b| b.change_pct.cmp(&a.change_pct));

        let lines: Vec<String> = ranked
            .into_iter()
            .filter_map(|target| {
                let Some(forecast) = forecasts.get(&target.symbol) else {
                    error!(symbol = %target.symbol, "No forecast found");
                    return None;
                };
                if forecast.target_time + self.bucket <= now {
                    return None;
                }
                Some(format!(
                    "For {} predicted a {} of {:.4}% happening at {}",
                    forecast.symbol,
                    forecast.trend,
                    forecast.projection_pct(),
                    forecast.target_time.format("%Y-%m-%d %H:%M:%S")
                ))
            })
            .collect();

        if lines.is_empty() {
            return lines;
        }
        let mut report = vec![
            "#".repeat(40),
            format!("LATEST REPORT: {}", now.format("%Y-%m-%d %H:%M:%S")),
            "-".repeat(50),
        ];
        report.extend(lines);
        report
    }

    /// Send the report. Returns whether anything was sent.
    pub async fn report(
        &self,
        targets: &[Target],
        forecasts: &HashMap<String, Forecast>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let report = self.generate(targets, forecasts, now);
        if report.is_empty() {
            return Ok(false);
        }
        self.notifier.notify(&report.join("\n")).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cryptobot_core::Trend;
    use httpmock::prelude::*;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

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

    fn forecast(symbol: &str, target: i64, predicted: f64) -> (String, Forecast) {
        (
            symbol.to_string(),
            Forecast {
                symbol: symbol.to_string(),
                target_time: at(target),
                price: 100.0,
                predicted,
                trend: cryptobot_predictors::classify(100.0, predicted),
            },
        )
    }

    fn targets() -> Vec<Target> {
        vec![
            Target { symbol: "ETHBTC".to_string(), change_pct: dec!(1) },
            Target { symbol: "XRPBTC".to_string(), change_pct: dec!(3) },
            Target { symbol: "ADABTC".to_string(), change_pct: dec!(2) },
        ]
    }

    #[test]
    fn test_report_lines() {
        let manager = ReportManager::new(Arc::new(LogNotifier), chrono::Duration::hours(1));
        let forecasts = HashMap::from([
            forecast("ETHBTC", 7200, 101.0),
            forecast("XRPBTC", 7200, 99.0),
            // Target bucket already closed: not reported.
            forecast("ADABTC", 0, 100.0),
        ]);

        let report = manager.generate(&targets(), &forecasts, at(3600));
        assert_eq!(report.len(), 5);
        assert_eq!(report[1], "LATEST REPORT: 1970-01-01 01:00:00");
        assert_eq!(
            report[3],
            "For XRPBTC predicted a decrease of -1.0000% happening at 1970-01-01 02:00:00"
        );
        assert!(report[4].starts_with("For ETHBTC predicted a increase of 1.0000%"));
        assert_eq!(forecasts["ETHBTC"].trend, Trend::Increase);
    }

    #[tokio::test]
    async fn test_empty_report_is_not_sent() {
        let recorder = Arc::new(Recorder::default());
        let manager = ReportManager::new(recorder.clone(), chrono::Duration::hours(1));

        let sent = manager.report(&targets(), &HashMap::new(), at(0)).await.unwrap();
        assert!(!sent);
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_split_message() {
        let text = "aaaa\nbbbb\ncc";
        assert_eq!(split_message(text, 9), vec!["aaaa\nbbbb", "cc"]);
        assert_eq!(split_message("abcdefgh", 3), vec!["abc"]);
        assert!(split_message("", 10).is_empty());
    }

    #[tokio::test]
    async fn test_discord_webhook_post() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/webhooks/1/token")
                    .json_body(json!({ "content": "hello" }));
                then.status(204);
            })
            .await;

        let notifier = DiscordNotifier::new(server.url("/api/webhooks/1/token")).unwrap();
        notifier.notify("hello").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_discord_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(401);
            })
            .await;

        let notifier = DiscordNotifier::new(server.url("/hook")).unwrap();
        assert!(notifier.notify("hello").await.is_err());
    }
}
