use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Response headers that report consumed request weight. Different
/// endpoint groups use different suffixes (`-1m`, `-1d`, ...), so names
/// are matched by prefix.
pub const USAGE_HEADER_PREFIXES: &[&str] = &[
    "x-mbx-used-weight",
    "x-sapi-used-ip-weight",
    "x-sapi-used-uid-weight",
];

/// Configuration for the shared rate-limit governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Weight limit assumed until the exchange reports its own.
    pub initial_limit: u32,
    /// Fraction of the limit above which requests are held back.
    pub usage_threshold: f64,
    /// Cool-down applied once usage crosses the threshold.
    pub cooldown_secs: u64,
    /// Upper bound on 429/418 retries for a single request.
    pub max_rate_limit_retries: u32,
    /// Delay used when a 429/418 response carries no `Retry-After`.
    pub retry_after_fallback_secs: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            initial_limit: 1200,
            usage_threshold: 0.9,
            cooldown_secs: 30,
            max_rate_limit_retries: 5,
            retry_after_fallback_secs: 30,
        }
    }
}

/// Snapshot of the request-weight budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBudget {
    /// Weight allowed per interval. Zero means not yet known.
    pub limit: u32,
    /// Weight consumed in the current interval, as last reported.
    pub used: u32,
    pub interval: Duration,
}

impl RateBudget {
    pub fn is_over(&self, threshold: f64) -> bool {
        self.limit > 0 && f64::from(self.used) > threshold * f64::from(self.limit)
    }
}

#[derive(Debug)]
struct GovernorState {
    budget: RateBudget,
    /// Set after a cool-down, cleared by the next usage report, so one
    /// stale reading does not stall every following request.
    cooled: bool,
}

/// Process-wide request-weight governor.
///
/// One instance is shared (behind an `Arc`) by every endpoint group of a
/// credentialed session. The interval rollover is not tracked locally:
/// `used` only ever changes when the exchange reports it.
#[derive(Debug)]
pub struct RateGovernor {
    config: GovernorConfig,
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let budget = RateBudget {
            limit: config.initial_limit,
            used: 0,
            interval: Duration::from_secs(60),
        };
        Self {
            config,
            state: Mutex::new(GovernorState {
                budget,
                cooled: false,
            }),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.cooldown_secs)
    }

    /// Wait until a request may be sent.
    ///
    /// When usage is above the threshold the lock is held for the whole
    /// cool-down, so concurrent callers queue behind it.
    pub async fn before_request(&self) {
        let mut state = self.state.lock().await;
        if state.cooled || !state.budget.is_over(self.config.usage_threshold) {
            return;
        }

        warn!(
            used = state.budget.used,
            limit = state.budget.limit,
            cooldown_secs = self.config.cooldown_secs,
            "Request weight above threshold, cooling down"
        );
        tokio::time::sleep(self.cooldown()).await;
        state.cooled = true;
    }

    pub async fn record_usage(&self, used: u32) {
        let mut state = self.state.lock().await;
        state.budget.used = used;
        state.cooled = false;
    }

    /// Record usage from the first weight header present. Returns the
    /// recorded value, or `None` when no header matched.
    pub async fn record_headers(&self, headers: &[(String, String)]) -> Option<u32> {
        let used = headers.iter().find_map(|(name, value)| {
            let name = name.to_ascii_lowercase();
            USAGE_HEADER_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
                .then(|| value.trim().parse::<u32>().ok())
                .flatten()
        })?;
        debug!(used, "Recorded request weight");
        self.record_usage(used).await;
        Some(used)
    }

    pub async fn set_limit(&self, limit: u32, interval: Duration) {
        let mut state = self.state.lock().await;
        state.budget.limit = limit;
        state.budget.interval = interval;
    }

    pub async fn budget(&self) -> RateBudget {
        self.state.lock().await.budget
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn governor(limit: u32) -> RateGovernor {
        RateGovernor::new(GovernorConfig {
            initial_limit: limit,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_above_threshold() {
        let gov = governor(1000);
        gov.record_usage(950).await;

        let start = Instant::now();
        gov.before_request().await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cooldown_below_threshold() {
        let gov = governor(1000);
        gov.record_usage(100).await;

        let start = Instant::now();
        gov.before_request().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_is_strict() {
        let gov = governor(1000);
        gov.record_usage(900).await;

        let start = Instant::now();
        gov.before_request().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_once_per_usage_report() {
        let gov = governor(1000);
        gov.record_usage(990).await;

        let start = Instant::now();
        gov.before_request().await;
        gov.before_request().await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));

        // A fresh report that is still high triggers another cool-down.
        gov.record_usage(995).await;
        gov.before_request().await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_limit_never_cools() {
        let gov = governor(0);
        gov.record_usage(5000).await;

        let start = Instant::now();
        gov.before_request().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_record_headers_takes_first_weight_header() {
        let gov = governor(1200);
        let headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("x-sapi-used-ip-weight-1m".to_string(), "42".to_string()),
            ("x-mbx-used-weight-1m".to_string(), "7".to_string()),
        ];
        assert_eq!(gov.record_headers(&headers).await, Some(42));
        assert_eq!(gov.budget().await.used, 42);

        let none = vec![("content-type".to_string(), "text/plain".to_string())];
        assert_eq!(gov.record_headers(&none).await, None);
        assert_eq!(gov.budget().await.used, 42);
    }

    #[tokio::test]
    async fn test_set_limit() {
        let gov = governor(1200);
        gov.set_limit(6000, Duration::from_secs(60)).await;
        let budget = gov.budget().await;
        assert_eq!(budget.limit, 6000);
        assert!(!budget.is_over(0.9));
    }
}
