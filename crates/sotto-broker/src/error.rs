use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker key is malformed; expected name:secret")]
    BadKey,

    #[error("Broker connection closed")]
    Closed,

    #[error("Broker transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
