use cryptobot_brokers_common::ClientError;

#[derive(Debug, thiserror::Error)]
pub enum BitfinexError {
    #[error(transparent)]
    Client(#[from] ClientError),
    /// The exchange answered with a non-2xx status.
    #[error("Bitfinex API error {status}: {body}")]
    Api { status: u16, body: String },
    /// A row did not have the expected fields.
    #[error("Unexpected response shape: {0}")]
    Shape(String),
}
