use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("Transcript not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] sotto_store::StoreError),

    #[error(transparent)]
    Broker(#[from] sotto_broker::BrokerError),
}

pub type Result<T> = std::result::Result<T, TranscribeError>;
