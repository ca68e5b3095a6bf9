use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::CandidateId;
use super::image::ImagePayload;
use super::shot::ShotId;

/// Embedding plus metadata for an accepted frame. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Insertion sequence number, assigned by the memory on insert.
    pub seq: u64,
    pub shot_id: ShotId,
    pub candidate_id: CandidateId,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub entity_tags: Vec<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImagePayload>,
    pub inserted_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(
        shot_id: ShotId,
        candidate_id: CandidateId,
        embedding: Vec<f32>,
        entity_tags: Vec<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            shot_id,
            candidate_id,
            embedding,
            entity_tags,
            description: description.into(),
            image: None,
            inserted_at: Utc::now(),
        }
    }

    pub fn with_image(mut self, image: ImagePayload) -> Self {
        self.image = Some(image);
        self
    }

    /// Whether any tag is in `filter`. An empty filter matches everything.
    pub fn matches_entities(&self, filter: &[String]) -> bool {
        filter.is_empty() || self.entity_tags.iter().any(|t| filter.contains(t))
    }
}
