//! Bitfinex REST client.
//!
//! Public market data is served from `api-pub`; account endpoints are
//! signed POSTs against the authenticated host.

pub mod client;
pub mod error;
pub mod models;

pub use client::{BitfinexClient, BitfinexConfig, BitfinexCredentials, CandleSection};
pub use error::BitfinexError;
pub use models::{Candle, PlatformStatus, Ticker, Trade, Wallet};
