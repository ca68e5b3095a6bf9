pub mod error;
pub mod service;
pub mod similarity;
pub mod store;

pub use error::MemoryError;
pub use service::{MemoryService, Recalled, Remembered};
pub use store::{ScoredEntry, VisualMemory};
