use std::time::Duration;
use tracing::warn;

use crate::error::ClientError;
use crate::governor::{GovernorConfig, RateGovernor};
use crate::transport::{PreparedRequest, RawResponse, Transport};

/// How 429/418 responses are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    /// Delay when the response has no usable `Retry-After`.
    pub fallback: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&GovernorConfig::default())
    }
}

impl From<&GovernorConfig> for BackoffPolicy {
    fn from(config: &GovernorConfig) -> Self {
        Self {
            max_retries: config.max_rate_limit_retries,
            fallback: Duration::from_secs(config.retry_after_fallback_secs),
        }
    }
}

/// Send a prepared request and feed reported usage to the governor.
///
/// Callers await `governor.before_request()` before building the request,
/// so signed timestamps are taken after any cool-down. A 429/418 response
/// is slept on for its `Retry-After` and the identical request is resent,
/// outside the weight budget, until the server answers with another
/// status or the policy's retry bound is reached; the last response is
/// then returned as-is. Transport errors are returned immediately.
pub async fn dispatch(
    transport: &dyn Transport,
    governor: &RateGovernor,
    request: &PreparedRequest,
    policy: BackoffPolicy,
) -> Result<RawResponse, ClientError> {
    let mut response = transport.send(request).await?;
    governor.record_headers(&response.headers).await;

    let mut retries = 0;
    while response.is_rate_limited() && retries < policy.max_retries {
        let delay = response.retry_after().unwrap_or(policy.fallback);
        warn!(
            status = response.status,
            retry_after_secs = delay.as_secs(),
            method = %request.method,
            url = %request.url,
            "Rate limited, backing off"
        );
        tokio::time::sleep(delay).await;

        response = transport.send(request).await?;
        governor.record_headers(&response.headers).await;
        retries += 1;
    }

    if response.is_rate_limited() {
        warn!(
            status = response.status,
            retries,
            url = %request.url,
            "Still rate limited after retry bound"
        );
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::ReplayTransport;
    use crate::transport::HttpMethod;
    use tokio::time::Instant;

    fn order_request() -> PreparedRequest {
        PreparedRequest {
            method: HttpMethod::Get,
            url: "https://api.binance.com/api/v3/order?symbol=ETHBTC&origClientOrderId=abc"
                .to_string(),
            headers: vec![("X-MBX-APIKEY".to_string(), "key".to_string())],
            body: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_sleeps_retry_after_and_retries_once() {
        let transport = ReplayTransport::new();
        transport.push(
            HttpMethod::Get,
            "/api/v3/order",
            RawResponse::new(429, "{}").with_header("Retry-After", "3"),
        );
        transport.push(
            HttpMethod::Get,
            "/api/v3/order",
            RawResponse::new(200, "{\"status\":\"FILLED\"}"),
        );
        let governor = RateGovernor::default();
        let request = order_request();

        let start = Instant::now();
        let resp = dispatch(&transport, &governor, &request, BackoffPolicy::default())
            .await
            .unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(sent[1], request);
    }

    #[tokio::test(start_paused = true)]
    async fn test_418_without_retry_after_uses_fallback() {
        let transport = ReplayTransport::new();
        transport.push(HttpMethod::Get, "/api/v3/order", RawResponse::new(418, ""));
        transport.push(HttpMethod::Get, "/api/v3/order", RawResponse::new(200, "{}"));
        let governor = RateGovernor::default();

        let start = Instant::now();
        let resp = dispatch(&transport, &governor, &order_request(), BackoffPolicy::default())
            .await
            .unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let transport = ReplayTransport::new();
        transport.push(
            HttpMethod::Get,
            "/api/v3/order",
            RawResponse::new(429, "").with_header("Retry-After", "1"),
        );
        let governor = RateGovernor::default();
        let policy = BackoffPolicy {
            max_retries: 2,
            fallback: Duration::from_secs(1),
        };

        let resp = dispatch(&transport, &governor, &order_request(), policy)
            .await
            .unwrap();

        assert_eq!(resp.status, 429);
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_2xx_is_returned_without_retry() {
        let transport = ReplayTransport::new();
        transport.push(
            HttpMethod::Get,
            "/api/v3/order",
            RawResponse::new(400, "{\"code\":-2013,\"msg\":\"Order does not exist.\"}"),
        );
        let governor = RateGovernor::default();

        let resp = dispatch(&transport, &governor, &order_request(), BackoffPolicy::default())
            .await
            .unwrap();

        assert_eq!(resp.status, 400);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_usage_header_updates_governor() {
        let transport = ReplayTransport::new();
        transport.push(
            HttpMethod::Get,
            "/api/v3/order",
            RawResponse::new(200, "{}").with_header("x-mbx-used-weight-1m", "1100"),
        );
        let governor = RateGovernor::default();

        dispatch(&transport, &governor, &order_request(), BackoffPolicy::default())
            .await
            .unwrap();

        assert_eq!(governor.budget().await.used, 1100);
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let transport = ReplayTransport::new();
        let governor = RateGovernor::default();

        let err = dispatch(&transport, &governor, &order_request(), BackoffPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
