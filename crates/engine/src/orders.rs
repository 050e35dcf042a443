use cryptobot_brokers_binance::{BinanceClient, FillOutcome, OrderCompletionTracker, TrackerConfig};
use cryptobot_core::{Decision, OrderRequest, Side};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::wallet::WalletManager;

/// Quote amounts are sent with at most this many decimals, truncated so
/// the order never spends more than the free balance.
const QUOTE_PRECISION: u32 = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum LegStatus {
    /// Accepted by the test endpoint.
    Validated,
    /// Placed and filled.
    Filled,
    /// Placed, but not filled within the tracker's ceiling.
    NotFilled(FillOutcome),
    /// The exchange refused the order.
    Rejected { status: u16, body: String },
    /// Not sent: nothing to trade.
    Skipped(String),
    /// Not sent because the sell leg before it failed.
    Abandoned,
    /// The request never got an answer.
    Failed(String),
}

impl LegStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, LegStatus::Validated | LegStatus::Filled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegOutcome {
    pub decision: Decision,
    pub symbol: String,
    pub status: LegStatus,
}

/// Turns decisions into market orders.
pub struct OrdersManager {
    client: Arc<BinanceClient>,
    quote_asset: String,
    test_orders: bool,
    tracker: TrackerConfig,
}

impl OrdersManager {
    pub fn new(
        client: Arc<BinanceClient>,
        quote_asset: impl Into<String>,
        test_orders: bool,
        tracker: TrackerConfig,
    ) -> Self {
        Self {
            client,
            quote_asset: quote_asset.into(),
            test_orders,
            tracker,
        }
    }

    /// Execute decisions in order. A sell leg that does not complete
    /// abandons every leg after it, so the bot never buys with funds it
    /// does not have.
    pub async fn execute(&self, decisions: &[Decision], wallet: &mut WalletManager) -> Vec<LegOutcome> {
        let mut outcomes = Vec::with_capacity(decisions.len());
        let mut abandoned = false;

        for decision in decisions {
            let symbol = format!("{}{}", decision.asset, self.quote_asset);
            if abandoned {
                warn!(symbol = %symbol, side = %decision.side, "Previous sell leg failed, abandoning order");
                outcomes.push(LegOutcome {
                    decision: decision.clone(),
                    symbol,
                    status: LegStatus::Abandoned,
                });
                continue;
            }

            let status = self.execute_leg(decision, &symbol, wallet).await;
            if decision.side == Side::Sell && !status.is_success() {
                abandoned = true;
            }
            if status == LegStatus::Filled {
                if let Err(e) = wallet.update_balances().await {
                    warn!(error = %e, "Could not refresh balances after fill");
                }
            }
            outcomes.push(LegOutcome {
                decision: decision.clone(),
                symbol,
                status,
            });
        }
        outcomes
    }

    fn build_order(&self, decision: &Decision, symbol: &str, wallet: &WalletManager) -> Result<OrderRequest, String> {
        match decision.side {
            Side::Sell => {
                let balance = wallet.balance(&decision.asset);
                let quantity = match wallet.rules().get(symbol) {
                    Some(rules) => rules.round_quantity(balance),
                    None => balance,
                };
                if quantity <= Decimal::ZERO {
                    return Err(format!("no {} balance to sell", decision.asset));
                }
                Ok(OrderRequest::market(symbol, Side::Sell, quantity))
            }
            Side::Buy => {
                let spend = wallet
                    .balance(&self.quote_asset)
                    .round_dp_with_strategy(QUOTE_PRECISION, RoundingStrategy::ToZero);
                if spend <= Decimal::ZERO {
                    return Err(format!("no {} balance to spend", self.quote_asset));
                }
                Ok(OrderRequest::market_quote(symbol, Side::Buy, spend))
            }
        }
    }

    async fn execute_leg(&self, decision: &Decision, symbol: &str, wallet: &WalletManager) -> LegStatus {
        let order = match self.build_order(decision, symbol, wallet) {
            Ok(order) => order,
            Err(reason) => {
                warn!(symbol = %symbol, side = %decision.side, %reason, "Order skipped");
                return LegStatus::Skipped(reason);
            }
        };
        let client_order_id = Uuid::new_v4().simple().to_string();
        let order = order.with_client_order_id(client_order_id.as_str());
        let trade = &self.client.spot_account_trade;

        let sent = if self.test_orders {
            trade.test_new_order(&order).await
        } else {
            trade.new_order(&order).await
        };
        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Order request failed");
                return LegStatus::Failed(e.to_string());
            }
        };
        if !resp.is_success() {
            error!(symbol = %symbol, status = resp.status, body = %resp.body, "Order rejected");
            return LegStatus::Rejected {
                status: resp.status,
                body: resp.body.to_string(),
            };
        }
        if self.test_orders {
            info!(symbol = %symbol, side = %decision.side, "Correct order formation");
            return LegStatus::Validated;
        }

        info!(symbol = %symbol, side = %decision.side, client_order_id = %client_order_id, "Order placed");
        let tracker = OrderCompletionTracker::new(trade, self.tracker.clone());
        match tracker.await_fill(&client_order_id, symbol, decision.side).await {
            FillOutcome::Filled => LegStatus::Filled,
            outcome => LegStatus::NotFilled(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptobot_brokers_binance::{BinanceConfig, Credentials};
    use cryptobot_brokers_common::{HttpMethod, RawResponse, ReplayTransport};
    use rust_decimal_macros::dec;

    const ACCOUNT: &str = "/api/v3/account";
    const ORDER: &str = "/api/v3/order";
    const TEST_ORDER: &str = "/api/v3/order/test";

    async fn setup(transport: Arc<ReplayTransport>, test_orders: bool) -> (OrdersManager, WalletManager) {
        transport.push(
            HttpMethod::Get,
            ACCOUNT,
            RawResponse::new(
                200,
                r#"{"balances":[{"asset":"BTC","free":"0.123456789","locked":"0"},{"asset":"ETH","free":"2.5","locked":"0"}]}"#,
            ),
        );
        setup_with(transport, test_orders).await
    }

    /// Like [`setup`], with the account reply already queued.
    async fn setup_with(transport: Arc<ReplayTransport>, test_orders: bool) -> (OrdersManager, WalletManager) {
        let client = Arc::new(
            BinanceClient::with_transport(
                BinanceConfig::default(),
                Some(Credentials::new("key", "secret")),
                transport,
            )
            .unwrap(),
        );
        let history = std::env::temp_dir().join("cryptobot-orders-history.csv");
        let mut wallet = WalletManager::new(client.clone(), history);
        wallet.update_balances().await.unwrap();
        let tracker = TrackerConfig {
            poll_interval_secs: 2,
            max_attempts: 3,
            max_cancel_attempts: 2,
        };
        (OrdersManager::new(client, "BTC", test_orders, tracker), wallet)
    }

    fn body_of(transport: &ReplayTransport, path: &str, idx: usize) -> String {
        transport.requests_to(HttpMethod::Post, path)[idx]
            .body
            .clone()
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_test_mode_validates_both_legs() {
        let transport = Arc::new(ReplayTransport::new());
        transport.push(HttpMethod::Post, TEST_ORDER, RawResponse::new(200, "{}"));
        let (orders, mut wallet) = setup(transport.clone(), true).await;

        let outcomes = orders
            .execute(&[Decision::sell("ETH"), Decision::buy("XRP")], &mut wallet)
            .await;

        assert!(outcomes.iter().all(|o| o.status == LegStatus::Validated));
        assert_eq!(outcomes[1].symbol, "XRPBTC");
        let sell = body_of(&transport, TEST_ORDER, 0);
        assert!(sell.contains("symbol=ETHBTC&side=SELL&type=MARKET"));
        assert!(sell.contains("quantity=2.5"));
        let buy = body_of(&transport, TEST_ORDER, 1);
        assert!(buy.contains("quoteOrderQty=0.12345678"));
        assert!(transport.requests_to(HttpMethod::Post, ORDER).is_empty());
    }

    #[tokio::test]
    async fn test_failed_sell_abandons_buy() {
        let transport = Arc::new(ReplayTransport::new());
        transport.push(
            HttpMethod::Post,
            ORDER,
            RawResponse::new(400, r#"{"code":-2010,"msg":"Account has insufficient balance"}"#),
        );
        let (orders, mut wallet) = setup(transport.clone(), false).await;

        let outcomes = orders
            .execute(&[Decision::sell("ETH"), Decision::buy("XRP")], &mut wallet)
            .await;

        assert!(matches!(outcomes[0].status, LegStatus::Rejected { status: 400, .. }));
        assert_eq!(outcomes[1].status, LegStatus::Abandoned);
        assert_eq!(transport.requests_to(HttpMethod::Post, ORDER).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_legs_tracked_to_fill() {
        let transport = Arc::new(ReplayTransport::new());
        transport.push(
            HttpMethod::Post,
            ORDER,
            RawResponse::new(200, r#"{"symbol":"ETHBTC","orderId":1,"status":"NEW"}"#),
        );
        transport.push(HttpMethod::Get, ORDER, RawResponse::new(200, r#"{"status":"NEW"}"#));
        transport.push(HttpMethod::Get, ORDER, RawResponse::new(200, r#"{"status":"FILLED"}"#));
        let (orders, mut wallet) = setup(transport.clone(), false).await;

        let outcomes = orders
            .execute(&[Decision::sell("ETH"), Decision::buy("XRP")], &mut wallet)
            .await;

        assert_eq!(outcomes[0].status, LegStatus::Filled);
        assert_eq!(outcomes[1].status, LegStatus::Filled);
        // Balances are re-read after every fill.
        assert_eq!(transport.requests_to(HttpMethod::Get, ACCOUNT).len(), 3);
        let polled = transport.requests_to(HttpMethod::Get, ORDER);
        let placed = body_of(&transport, ORDER, 0);
        assert!(polled[0].url.contains("origClientOrderId="));
        assert!(placed.contains("newClientOrderId="));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfilled_sell_abandons_buy() {
        let transport = Arc::new(ReplayTransport::new());
        transport.push(HttpMethod::Post, ORDER, RawResponse::new(200, r#"{"status":"NEW"}"#));
        transport.push(HttpMethod::Get, ORDER, RawResponse::new(200, r#"{"status":"NEW"}"#));
        transport.push(HttpMethod::Delete, ORDER, RawResponse::new(200, r#"{"status":"CANCELED"}"#));
        let (orders, mut wallet) = setup(transport.clone(), false).await;

        let outcomes = orders
            .execute(&[Decision::sell("ETH"), Decision::buy("XRP")], &mut wallet)
            .await;

        assert!(matches!(outcomes[0].status, LegStatus::NotFilled(_)));
        assert_eq!(outcomes[1].status, LegStatus::Abandoned);
        assert_eq!(transport.requests_to(HttpMethod::Get, ORDER).len(), 3);
    }

    #[tokio::test]
    async fn test_quote_spend_never_exceeds_balance() {
        for (free, spend) in [
            ("0.999999995", dec!(0.99999999)),
            ("0.123456787", dec!(0.12345678)),
            ("0.5", dec!(0.5)),
        ] {
            let transport = Arc::new(ReplayTransport::new());
            transport.push(
                HttpMethod::Get,
                ACCOUNT,
                RawResponse::new(
                    200,
                    format!(r#"{{"balances":[{{"asset":"BTC","free":"{free}","locked":"0"}}]}}"#),
                ),
            );
            let (orders, wallet) = setup_with(transport, true).await;

            let order = orders
                .build_order(&Decision::buy("XRP"), "XRPBTC", &wallet)
                .unwrap();
            let quote = order.quote_order_qty.unwrap();
            assert_eq!(quote, spend);
            assert!(quote <= wallet.balance("BTC"));
        }
    }

    #[tokio::test]
    async fn test_nothing_to_sell_is_skipped() {
        let transport = Arc::new(ReplayTransport::new());
        let (orders, mut wallet) = setup(transport.clone(), true).await;

        let outcomes = orders.execute(&[Decision::sell("ADA")], &mut wallet).await;
        assert!(matches!(outcomes[0].status, LegStatus::Skipped(_)));
        assert!(transport.requests_to(HttpMethod::Post, TEST_ORDER).is_empty());
    }
}
