use cryptobot_brokers_common::{
    ApiResponse, ClientError, HttpTransport, Params, RateGovernor, Transport,
};
use cryptobot_core::{KlineInterval, OrderRequest};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{BinanceConfig, Credentials};
use crate::endpoints::{validate_registry, ClientGroup, Endpoint};
use crate::forge::{Clock, RequestForge};
use crate::gateway::RestGateway;
use crate::models::{decode, ExchangeInfo};

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

pub struct WalletClient {
    gateway: RestGateway,
}

impl WalletClient {
    pub async fn call(&self, name: &str, params: Params) -> Result<ApiResponse, ClientError> {
        self.gateway.call(name, params).await
    }

    pub async fn system_status(&self) -> Result<ApiResponse, ClientError> {
        self.gateway.call_endpoint(Endpoint::SystemStatus, Params::new()).await
    }

    pub async fn all_coins_information(&self) -> Result<ApiResponse, ClientError> {
        self.gateway
            .call_endpoint(Endpoint::AllCoinsInformation, Params::new())
            .await
    }

    pub async fn daily_account_snapshot(
        &self,
        kind: &str,
        limit: Option<u32>,
    ) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with("type", kind).with_opt("limit", limit);
        self.gateway
            .call_endpoint(Endpoint::DailyAccountSnapshot, params)
            .await
    }

    pub async fn deposit_history(
        &self,
        coin: Option<&str>,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<ApiResponse, ClientError> {
        let params = Params::new()
            .with_opt("coin", coin)
            .with_opt("startTime", start_time)
            .with_opt("endTime", end_time);
        self.gateway
            .call_endpoint(Endpoint::DepositHistorySapi, params)
            .await
    }

    pub async fn asset_detail(&self, asset: Option<&str>) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with_opt("asset", asset);
        self.gateway.call_endpoint(Endpoint::AssetDetail, params).await
    }

    pub async fn trade_fee(&self, symbol: Option<&str>) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with_opt("symbol", symbol);
        self.gateway.call_endpoint(Endpoint::TradeFee, params).await
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

pub struct MarketDataClient {
    gateway: RestGateway,
}

impl MarketDataClient {
    pub async fn call(&self, name: &str, params: Params) -> Result<ApiResponse, ClientError> {
        self.gateway.call(name, params).await
    }

    pub async fn test_connectivity(&self) -> Result<ApiResponse, ClientError> {
        self.gateway
            .call_endpoint(Endpoint::TestConnectivity, Params::new())
            .await
    }

    pub async fn check_server_time(&self) -> Result<ApiResponse, ClientError> {
        self.gateway
            .call_endpoint(Endpoint::CheckServerTime, Params::new())
            .await
    }

    pub async fn exchange_information(
        &self,
        symbol: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with_opt("symbol", symbol);
        self.gateway
            .call_endpoint(Endpoint::ExchangeInformation, params)
            .await
    }

    pub async fn order_book(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with("symbol", symbol).with_opt("limit", limit);
        self.gateway.call_endpoint(Endpoint::OrderBook, params).await
    }

    pub async fn recent_trades_list(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with("symbol", symbol).with_opt("limit", limit);
        self.gateway
            .call_endpoint(Endpoint::RecentTradesList, params)
            .await
    }

    pub async fn kline_candlestick_data(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<ApiResponse, ClientError> {
        let params = Params::new()
            .with("symbol", symbol)
            .with("interval", interval)
            .with_opt("startTime", start_time)
            .with_opt("endTime", end_time)
            .with_opt("limit", limit);
        self.gateway
            .call_endpoint(Endpoint::KlineCandlestickData, params)
            .await
    }

    pub async fn current_average_price(&self, symbol: &str) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with("symbol", symbol);
        self.gateway
            .call_endpoint(Endpoint::CurrentAveragePrice, params)
            .await
    }

    /// 24h statistics for one symbol, or for every symbol when `None`.
    pub async fn ticker_24hr(&self, symbol: Option<&str>) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with_opt("symbol", symbol);
        self.gateway.call_endpoint(Endpoint::Ticker24hr, params).await
    }

    pub async fn symbol_price_ticker(
        &self,
        symbol: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with_opt("symbol", symbol);
        self.gateway
            .call_endpoint(Endpoint::SymbolPriceTicker, params)
            .await
    }
}

// ---------------------------------------------------------------------------
// Spot account / trade
// ---------------------------------------------------------------------------

pub struct SpotAccountTradeClient {
    gateway: RestGateway,
}

/// Order parameters, with a fresh client order id when the request has
/// none.
fn order_params(order: &OrderRequest) -> Params {
    let client_order_id = order
        .client_order_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    Params::new()
        .with("symbol", &order.symbol)
        .with("side", order.side)
        .with("type", order.order_type)
        .with_opt("timeInForce", order.time_in_force)
        .with_opt("quantity", order.quantity)
        .with_opt("quoteOrderQty", order.quote_order_qty)
        .with_opt("price", order.price)
        .with("newClientOrderId", client_order_id)
}

impl SpotAccountTradeClient {
    pub async fn call(&self, name: &str, params: Params) -> Result<ApiResponse, ClientError> {
        self.gateway.call(name, params).await
    }

    pub async fn new_order(&self, order: &OrderRequest) -> Result<ApiResponse, ClientError> {
        self.gateway
            .call_endpoint(Endpoint::NewOrder, order_params(order))
            .await
    }

    /// Validate an order without sending it to the matching engine.
    pub async fn test_new_order(&self, order: &OrderRequest) -> Result<ApiResponse, ClientError> {
        self.gateway
            .call_endpoint(Endpoint::TestNewOrder, order_params(order))
            .await
    }

    pub async fn query_order(
        &self,
        symbol: &str,
        order_id: Option<u64>,
        orig_client_order_id: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let params = Params::new()
            .with("symbol", symbol)
            .with_opt("orderId", order_id)
            .with_opt("origClientOrderId", orig_client_order_id);
        self.gateway.call_endpoint(Endpoint::QueryOrder, params).await
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: Option<u64>,
        orig_client_order_id: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let params = Params::new()
            .with("symbol", symbol)
            .with_opt("orderId", order_id)
            .with_opt("origClientOrderId", orig_client_order_id);
        self.gateway.call_endpoint(Endpoint::CancelOrder, params).await
    }

    pub async fn current_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with_opt("symbol", symbol);
        self.gateway
            .call_endpoint(Endpoint::CurrentOpenOrders, params)
            .await
    }

    pub async fn account_information(&self) -> Result<ApiResponse, ClientError> {
        self.gateway
            .call_endpoint(Endpoint::AccountInformation, Params::new())
            .await
    }

    pub async fn account_trade_list(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with("symbol", symbol).with_opt("limit", limit);
        self.gateway
            .call_endpoint(Endpoint::AccountTradeList, params)
            .await
    }
}

// ---------------------------------------------------------------------------
// User data stream
// ---------------------------------------------------------------------------

pub struct UserDataStreamClient {
    gateway: RestGateway,
}

impl UserDataStreamClient {
    pub async fn create_listen_key(&self) -> Result<ApiResponse, ClientError> {
        self.gateway
            .call_endpoint(Endpoint::CreateListenKey, Params::new())
            .await
    }

    pub async fn keepalive_listen_key(&self, listen_key: &str) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with("listenKey", listen_key);
        self.gateway
            .call_endpoint(Endpoint::KeepaliveListenKey, params)
            .await
    }

    pub async fn close_listen_key(&self, listen_key: &str) -> Result<ApiResponse, ClientError> {
        let params = Params::new().with("listenKey", listen_key);
        self.gateway
            .call_endpoint(Endpoint::CloseListenKey, params)
            .await
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Binance client: one sub-client per endpoint group, all sharing a
/// single transport and a single rate governor.
pub struct BinanceClient {
    pub wallet: WalletClient,
    pub market_data: MarketDataClient,
    pub spot_account_trade: SpotAccountTradeClient,
    pub user_data_stream: UserDataStreamClient,
    governor: Arc<RateGovernor>,
    config: BinanceConfig,
}

impl BinanceClient {
    pub fn new(config: BinanceConfig, credentials: Option<Credentials>) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(config.request_timeout())?;
        Self::with_transport(config, credentials, Arc::new(transport))
    }

    pub fn with_transport(
        config: BinanceConfig,
        credentials: Option<Credentials>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        Self::build(config, credentials, transport, None)
    }

    /// Like [`BinanceClient::with_transport`], with a fixed clock for
    /// signed timestamps.
    pub fn with_clock(
        config: BinanceConfig,
        credentials: Option<Credentials>,
        transport: Arc<dyn Transport>,
        clock: Clock,
    ) -> Result<Self, ClientError> {
        Self::build(config, credentials, transport, Some(clock))
    }

    fn build(
        config: BinanceConfig,
        credentials: Option<Credentials>,
        transport: Arc<dyn Transport>,
        clock: Option<Clock>,
    ) -> Result<Self, ClientError> {
        validate_registry()?;
        let governor = Arc::new(RateGovernor::new(config.governor.clone()));

        let gateway = |group: ClientGroup| {
            let mut forge = RequestForge::new(group, &config, credentials.clone());
            if let Some(clock) = &clock {
                forge = forge.with_clock(clock.clone());
            }
            RestGateway::new(forge, transport.clone(), governor.clone())
        };

        let wallet = WalletClient {
            gateway: gateway(ClientGroup::Wallet),
        };
        let market_data = MarketDataClient {
            gateway: gateway(ClientGroup::MarketData),
        };
        let spot_account_trade = SpotAccountTradeClient {
            gateway: gateway(ClientGroup::SpotAccountTrade),
        };
        let user_data_stream = UserDataStreamClient {
            gateway: gateway(ClientGroup::UserDataStream),
        };

        info!(
            base_url = config.rest_base(),
            sandbox = config.sandbox,
            authenticated = credentials.is_some(),
            "Binance client ready"
        );

        Ok(Self {
            wallet,
            market_data,
            spot_account_trade,
            user_data_stream,
            governor,
            config,
        })
    }

    pub fn config(&self) -> &BinanceConfig {
        &self.config
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Set the governor limit from the exchange's REQUEST_WEIGHT rate
    /// limit. Returns the new limit, or `None` when the exchange did not
    /// report one.
    pub async fn refresh_rate_limits(&self) -> Result<Option<u32>, ClientError> {
        let resp = self.market_data.exchange_information(None).await?;
        let info: ExchangeInfo = decode(&resp)?;

        match info.request_weight_limit() {
            Some(limit) => {
                self.governor.set_limit(limit.limit, limit.window()).await;
                info!(limit = limit.limit, interval = %limit.interval, "Request weight limit refreshed");
                Ok(Some(limit.limit))
            }
            None => {
                warn!("Exchange information carried no REQUEST_WEIGHT limit");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptobot_brokers_common::{HttpMethod, RawResponse, ReplayTransport};
    use cryptobot_core::Side;
    use rust_decimal_macros::dec;

    fn client(transport: Arc<ReplayTransport>) -> BinanceClient {
        BinanceClient::with_clock(
            BinanceConfig::default(),
            Some(Credentials::new("key", "secret")),
            transport,
            Arc::new(|| 1_700_000_000_000),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_refresh_rate_limits() {
        let transport = Arc::new(ReplayTransport::new());
        transport.push(
            HttpMethod::Get,
            "/api/v3/exchangeInfo",
            RawResponse::new(
                200,
                r#"{"rateLimits":[{"rateLimitType":"REQUEST_WEIGHT","interval":"MINUTE","intervalNum":1,"limit":6000}],"symbols":[]}"#,
            ),
        );
        let client = client(transport);

        assert_eq!(client.refresh_rate_limits().await.unwrap(), Some(6000));
        assert_eq!(client.governor().budget().await.limit, 6000);
    }

    #[tokio::test]
    async fn test_market_order_by_quote_amount() {
        let transport = Arc::new(ReplayTransport::new());
        transport.push(HttpMethod::Post, "/api/v3/order/test", RawResponse::new(200, "{}"));
        let client = client(transport.clone());

        let order = OrderRequest::market_quote("ETHBTC", Side::Buy, dec!(0.5))
            .with_client_order_id("fixedid");
        let resp = client.spot_account_trade.test_new_order(&order).await.unwrap();
        assert!(resp.is_success());

        let sent = transport.requests();
        let body = sent[0].body.as_deref().unwrap();
        assert!(body.starts_with(
            "symbol=ETHBTC&side=BUY&type=MARKET&quoteOrderQty=0.5&newClientOrderId=fixedid\
             &recvWindow=5000&timestamp=1700000000000&signature="
        ));
        assert!(!body.contains("quantity="));
        assert!(!body.contains("price="));
    }

    #[test]
    fn test_generated_client_order_id() {
        let order = OrderRequest::market("ETHBTC", Side::Sell, dec!(1.25));
        let params = order_params(&order);
        let id = params.get("newClientOrderId").unwrap();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(params.get("quantity"), Some("1.25"));
    }

    #[tokio::test]
    async fn test_generic_call_is_group_scoped() {
        let transport = Arc::new(ReplayTransport::new());
        transport.push(HttpMethod::Get, "/api/v3/time", RawResponse::new(200, r#"{"serverTime":1}"#));
        let client = client(transport);

        let resp = client.market_data.call("check_server_time", Params::new()).await.unwrap();
        assert_eq!(resp.body["serverTime"], 1);
        assert!(matches!(
            client.wallet.call("check_server_time", Params::new()).await,
            Err(ClientError::Configuration(_))
        ));
    }
}
