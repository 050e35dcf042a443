//! Binance spot exchange client.
//!
//! REST calls go through one [`RestGateway`] per endpoint group, all
//! sharing a single rate governor. Trade streams run on a
//! [`StreamClient`]; submitted orders are followed to completion by an
//! [`OrderCompletionTracker`].

pub mod clients;
pub mod config;
pub mod endpoints;
pub mod forge;
pub mod gateway;
pub mod models;
pub mod stream;
pub mod tracker;

pub use clients::{
    BinanceClient, MarketDataClient, SpotAccountTradeClient, UserDataStreamClient, WalletClient,
};
pub use config::{BinanceConfig, Credentials, TrackerConfig};
pub use endpoints::{ClientGroup, Endpoint, EndpointDescriptor, SecurityPolicy, SecurityType};
pub use forge::RequestForge;
pub use gateway::RestGateway;
pub use stream::{StreamClient, StreamError};
pub use tracker::{CancelOutcome, FillOutcome, OrderAttempt, OrderCompletionTracker, OrderStatusApi};
