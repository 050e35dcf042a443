use cryptobot_brokers_binance::StreamError;
use cryptobot_brokers_common::ClientError;
use cryptobot_core::NotifyError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
    #[error("Wallet history error: {0}")]
    History(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}
