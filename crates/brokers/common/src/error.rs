/// Errors surfaced by exchange clients.
///
/// Rate limiting is absent on purpose: 429/418 responses are absorbed by
/// the back-off loop and never reach the caller as a failure.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Unknown endpoint, bad path template, inconsistent registry.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The request never produced an HTTP response (connect, timeout, TLS).
    #[error("Transport error: {0}")]
    Transport(String),
    /// A response body could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Missing credentials: {0}")]
    MissingCredentials(&'static str),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}
