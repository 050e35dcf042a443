//! The trading bot: collaborators that turn trade streams into forecasts,
//! forecasts into decisions and decisions into orders, plus the loop that
//! schedules them.

pub mod bot;
pub mod config;
pub mod decisions;
pub mod error;
pub mod orders;
pub mod predictions;
pub mod report;
pub mod streams;
pub mod wallet;

pub use bot::Bot;
pub use config::BotConfig;
pub use decisions::DecisionsManager;
pub use error::EngineError;
pub use orders::{LegOutcome, LegStatus, OrdersManager};
pub use predictions::PredictionsManager;
pub use report::{DiscordNotifier, LogNotifier, ReportManager};
pub use streams::{StreamsManager, Target};
pub use wallet::{WalletManager, WalletRecord};
