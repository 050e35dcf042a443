use async_trait::async_trait;
use cryptobot_brokers_common::{ApiResponse, ClientError};
use cryptobot_core::{OrderStatus, Side};
use tracing::{debug, error, info, warn};

use crate::clients::SpotAccountTradeClient;
use crate::config::TrackerConfig;
use crate::models::order_status;

/// The order calls the tracker needs.
#[async_trait]
pub trait OrderStatusApi: Send + Sync {
    async fn query_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<ApiResponse, ClientError>;

    async fn cancel_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<ApiResponse, ClientError>;
}

#[async_trait]
impl OrderStatusApi for SpotAccountTradeClient {
    async fn query_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<ApiResponse, ClientError> {
        SpotAccountTradeClient::query_order(self, symbol, None, Some(client_order_id)).await
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<ApiResponse, ClientError> {
        SpotAccountTradeClient::cancel_order(self, symbol, None, Some(client_order_id)).await
    }
}

/// A submitted order being watched until it fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAttempt {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub target: OrderStatus,
}

impl OrderAttempt {
    pub fn new(client_order_id: impl Into<String>, symbol: impl Into<String>, side: Side) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            symbol: symbol.into(),
            side,
            target: OrderStatus::Filled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The exchange confirmed the order as CANCELED.
    Canceled,
    /// The cancel request was answered, but not with CANCELED. The order
    /// may still be live.
    Ambiguous(Option<OrderStatus>),
    /// No definitive answer within the cancel retry ceiling.
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Filled,
    Failed {
        /// Last status the exchange reported, if any poll succeeded.
        last_status: Option<OrderStatus>,
        /// Present when the tracker had to cancel the order.
        cancel: Option<CancelOutcome>,
    },
}

impl FillOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, FillOutcome::Filled)
    }
}

/// Polls a submitted order until it fills or the poll ceiling is reached,
/// then cancels it.
///
/// Every poll counts toward the ceiling, including polls that failed in
/// transport or came back with an error status, so the loop always ends.
pub struct OrderCompletionTracker<'a> {
    api: &'a dyn OrderStatusApi,
    config: TrackerConfig,
}

impl<'a> OrderCompletionTracker<'a> {
    pub fn new(api: &'a dyn OrderStatusApi, config: TrackerConfig) -> Self {
        Self { api, config }
    }

    pub async fn await_fill(&self, client_order_id: &str, symbol: &str, side: Side) -> FillOutcome {
        self.track(&OrderAttempt::new(client_order_id, symbol, side))
            .await
    }

    pub async fn track(&self, attempt: &OrderAttempt) -> FillOutcome {
        let mut last_status = None;

        for poll in 1..=self.config.max_attempts {
            match self
                .api
                .query_order(&attempt.symbol, &attempt.client_order_id)
                .await
            {
                Ok(resp) if resp.is_success() => match order_status(&resp.body) {
                    Some(status) if status == attempt.target => {
                        info!(
                            symbol = %attempt.symbol,
                            side = %attempt.side,
                            client_order_id = %attempt.client_order_id,
                            polls = poll,
                            "Order filled"
                        );
                        return FillOutcome::Filled;
                    }
                    Some(status) if status.is_terminal() => {
                        warn!(
                            symbol = %attempt.symbol,
                            client_order_id = %attempt.client_order_id,
                            status = %status,
                            "Order ended without filling"
                        );
                        return FillOutcome::Failed {
                            last_status: Some(status),
                            cancel: None,
                        };
                    }
                    Some(status) => {
                        debug!(poll, status = %status, "Order not filled yet");
                        last_status = Some(status);
                    }
                    None => warn!(poll, body = %resp.body, "Order status missing from response"),
                },
                Ok(resp) => warn!(poll, status = resp.status, body = %resp.body, "Order query rejected"),
                Err(e) => warn!(poll, error = %e, "Order query failed"),
            }

            if poll < self.config.max_attempts {
                tokio::time::sleep(self.config.poll_interval()).await;
            }
        }

        warn!(
            symbol = %attempt.symbol,
            client_order_id = %attempt.client_order_id,
            polls = self.config.max_attempts,
            "Order not filled in time, cancelling"
        );
        let cancel = self
            .cancel_order(&attempt.client_order_id, &attempt.symbol)
            .await;

        FillOutcome::Failed {
            last_status,
            cancel: Some(cancel),
        }
    }

    /// Cancel an order, retrying until the exchange answers with a
    /// success status or the cancel ceiling is reached.
    pub async fn cancel_order(&self, client_order_id: &str, symbol: &str) -> CancelOutcome {
        for attempt in 1..=self.config.max_cancel_attempts {
            match self.api.cancel_order(symbol, client_order_id).await {
                Ok(resp) if resp.is_success() => {
                    let status = order_status(&resp.body);
                    if status == Some(OrderStatus::Canceled) {
                        info!(symbol, client_order_id, "Order cancelled");
                        return CancelOutcome::Canceled;
                    }
                    error!(
                        symbol,
                        client_order_id,
                        status = ?status,
                        "Cancel answered without CANCELED status; order may still be live"
                    );
                    return CancelOutcome::Ambiguous(status);
                }
                Ok(resp) => warn!(attempt, status = resp.status, body = %resp.body, "Cancel rejected"),
                Err(e) => warn!(attempt, error = %e, "Cancel failed"),
            }

            if attempt < self.config.max_cancel_attempts {
                tokio::time::sleep(self.config.poll_interval()).await;
            }
        }

        error!(
            symbol,
            client_order_id,
            attempts = self.config.max_cancel_attempts,
            "Could not cancel order; it may still be live"
        );
        CancelOutcome::Unresolved
    }
}
