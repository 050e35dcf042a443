use cryptobot_brokers_common::{
    dispatch, sign_sha384, ApiResponse, BackoffPolicy, ClientError, GovernorConfig, HttpMethod,
    HttpTransport, Params, PreparedRequest, RateGovernor, Transport,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::BitfinexError;
use crate::models::{self, Candle, PlatformStatus, Ticker, Trade, Wallet};

pub const PUBLIC_ENDPOINT: &str = "https://api-pub.bitfinex.com";
pub const PRIVATE_ENDPOINT: &str = "https://api.bitfinex.com";

/// Millisecond clock used for nonces.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BitfinexConfig {
    pub public_url: String,
    pub private_url: String,
    pub request_timeout_secs: u64,
    pub governor: GovernorConfig,
}

impl Default for BitfinexConfig {
    fn default() -> Self {
        Self {
            public_url: PUBLIC_ENDPOINT.to_string(),
            private_url: PRIVATE_ENDPOINT.to_string(),
            request_timeout_secs: 10,
            governor: GovernorConfig::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BitfinexCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl BitfinexCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Load `{"api_key": ..., "api_secret": ...}` from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ClientError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl fmt::Debug for BitfinexCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.api_key.chars().take(4).collect();
        f.debug_struct("BitfinexCredentials")
            .field("api_key", &format!("{}***", visible))
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Which part of the candle history to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleSection {
    Last,
    Hist,
}

impl CandleSection {
    fn as_str(&self) -> &'static str {
        match self {
            CandleSection::Last => "last",
            CandleSection::Hist => "hist",
        }
    }
}

pub struct BitfinexClient {
    config: BitfinexConfig,
    credentials: Option<BitfinexCredentials>,
    transport: Arc<dyn Transport>,
    governor: Arc<RateGovernor>,
    clock: Clock,
    last_nonce: AtomicU64,
}

impl BitfinexClient {
    pub fn new(
        config: BitfinexConfig,
        credentials: Option<BitfinexCredentials>,
    ) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self::with_transport(config, credentials, Arc::new(transport)))
    }

    pub fn with_transport(
        config: BitfinexConfig,
        credentials: Option<BitfinexCredentials>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let governor = Arc::new(RateGovernor::new(config.governor.clone()));
        Self {
            config,
            credentials,
            transport,
            governor,
            clock: system_clock(),
            last_nonce: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    pub async fn platform_status(&self) -> Result<PlatformStatus, BitfinexError> {
        let body = self.public_get("/v2/platform/status", Params::new()).await?;
        models::parse_platform_status(&body)
    }

    /// Tickers for several symbols at once. Funding symbols are dropped.
    pub async fn tickers(&self, symbols: &[&str]) -> Result<Vec<Ticker>, BitfinexError> {
        let params = Params::new().with("symbols", symbols.join(","));
        let body = self.public_get("/v2/tickers", params).await?;
        models::parse_tickers(&body)
    }

    pub async fn ticker(&self, symbol: &str) -> Result<Ticker, BitfinexError> {
        let body = self
            .public_get(&format!("/v2/ticker/{}", symbol), Params::new())
            .await?;
        models::parse_ticker(symbol, &body)
    }

    pub async fn trades(
        &self,
        symbol: &str,
        limit: Option<u32>,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Trade>, BitfinexError> {
        let params = Params::new()
            .with_opt("limit", limit)
            .with_opt("start", start)
            .with_opt("end", end);
        let body = self
            .public_get(&format!("/v2/trades/{}/hist", symbol), params)
            .await?;
        models::parse_trades(&body)
    }

    pub async fn candles(
        &self,
        symbol: &str,
        timeframe: &str,
        section: CandleSection,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, BitfinexError> {
        let path = format!(
            "/v2/candles/trade:{}:{}/{}",
            timeframe,
            symbol,
            section.as_str()
        );
        let params = Params::new().with_opt("limit", limit);
        let body = self.public_get(&path, params).await?;
        models::parse_candles(&body)
    }

    pub async fn wallets(&self) -> Result<Vec<Wallet>, BitfinexError> {
        let body = self.auth_post("/v2/auth/r/wallets", None).await?;
        models::parse_wallets(&body)
    }

    async fn public_get(&self, path: &str, params: Params) -> Result<Value, BitfinexError> {
        let mut url = format!("{}{}", self.config.public_url, path);
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.encode());
        }
        let request = PreparedRequest {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            body: None,
        };
        self.governor.before_request().await;
        self.send(&request).await
    }

    /// Signed POST. The signature covers the exact body bytes sent.
    pub async fn auth_post(
        &self,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, BitfinexError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(ClientError::MissingCredentials("Bitfinex API key"))?;

        self.governor.before_request().await;

        let body = match body {
            Some(value) => serde_json::to_string(value).map_err(ClientError::from)?,
            None => "{}".to_string(),
        };
        let nonce = self.nonce().to_string();
        let payload = format!("/api{}{}{}", path, nonce, body);
        let signature = sign_sha384(&credentials.api_secret, &payload);

        let request = PreparedRequest {
            method: HttpMethod::Post,
            url: format!("{}{}", self.config.private_url, path),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("bfx-nonce".to_string(), nonce),
                ("bfx-apikey".to_string(), credentials.api_key.clone()),
                ("bfx-signature".to_string(), signature),
            ],
            body: Some(body),
        };
        self.send(&request).await
    }

    async fn send(&self, request: &PreparedRequest) -> Result<Value, BitfinexError> {
        let policy = BackoffPolicy::from(self.governor.config());
        let raw = dispatch(self.transport.as_ref(), &self.governor, request, policy).await?;
        let response: ApiResponse = raw.into_api_response();
        debug!(status = response.status, url = %request.url, "Bitfinex response");
        if !response.is_success() {
            return Err(BitfinexError::Api {
                status: response.status,
                body: response.body.to_string(),
            });
        }
        Ok(response.body)
    }

    /// Strictly increasing, even when the clock stalls or steps back.
    fn nonce(&self) -> u64 {
        let now = (self.clock)();
        let mut prev = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_nonce
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}
