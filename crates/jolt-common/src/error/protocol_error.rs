use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Shocker id is not numeric: {0:?}")]
    InvalidShockerId(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
