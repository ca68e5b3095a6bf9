use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Encoded image bytes plus their SHA-256 digest.
///
/// Only the digest is serialized; reports reference images, they never embed them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagePayload {
    pub digest: String,
    #[serde(skip)]
    bytes: Arc<Vec<u8>>,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        let digest = format!("{:x}", Sha256::digest(&bytes));
        Self {
            digest,
            bytes: Arc::new(bytes),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// First 12 hex characters of the digest, for logs.
    pub fn short_digest(&self) -> &str {
        &self.digest[..12.min(self.digest.len())]
    }
}

impl PartialEq for ImagePayload {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}
