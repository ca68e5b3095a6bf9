use storyboard_core::capability::CapabilityError;
use storyboard_core::error::{BudgetExceeded, CoreError};

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] CapabilityError),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MemoryError {
    /// The capability error behind this failure, if any.
    pub fn capability_error(&self) -> Option<&CapabilityError> {
        match self {
            MemoryError::Embedding(e) => Some(e),
            _ => None,
        }
    }
}
