use replica_core::error::ReplicaError;
use replica_remote::CallFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] ReplicaError),

    #[error("remote call failed: {0}")]
    Remote(#[from] CallFailure),

    #[error("worker task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Join(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
