use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::image::ImagePayload;
use super::shot::ShotId;

/// Generated as UUID v4 hex (no dashes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateId(pub String);

impl CandidateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().as_simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl Default for CandidateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CandidateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Conditioning actually used for one render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub framing: String,
    pub reference_weight: f32,
    pub seed: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditioning_digests: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory_entries: Vec<u64>,
    /// SHA-256 over the request's conditioning; distinct per request of a shot.
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FastQaReport {
    pub score: f64,
    pub width: u32,
    pub height: u32,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionQaReport {
    pub score: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    #[default]
    Pending,
    Pass,
    Fail,
}

/// One rendered image for one variation of one attempt of a shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub shot_id: ShotId,
    pub attempt: u32,
    pub variation_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImagePayload>,
    pub params: RenderParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_qa: Option<FastQaReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_qa: Option<VisionQaReport>,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Candidate {
    pub fn rendered(
        shot_id: ShotId,
        attempt: u32,
        variation_index: usize,
        image: ImagePayload,
        params: RenderParams,
    ) -> Self {
        Self {
            id: CandidateId::new(),
            shot_id,
            attempt,
            variation_index,
            image: Some(image),
            params,
            fast_qa: None,
            vision_qa: None,
            verdict: Verdict::Pending,
            failure: None,
        }
    }

    /// A render that never produced a usable image. Final verdict is `Fail`.
    pub fn failed(
        shot_id: ShotId,
        attempt: u32,
        variation_index: usize,
        params: RenderParams,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: CandidateId::new(),
            shot_id,
            attempt,
            variation_index,
            image: None,
            params,
            fast_qa: None,
            vision_qa: None,
            verdict: Verdict::Fail,
            failure: Some(reason.into()),
        }
    }

    /// Vision-QA score when present, else Fast-QA score, else 0.
    pub fn combined_score(&self) -> f64 {
        self.vision_qa
            .as_ref()
            .map(|v| v.score)
            .or_else(|| self.fast_qa.as_ref().map(|f| f.score))
            .unwrap_or(0.0)
    }

    pub fn fast_score(&self) -> Option<f64> {
        self.fast_qa.as_ref().map(|f| f.score)
    }

    pub fn passed_fast_qa(&self) -> bool {
        self.fast_qa.as_ref().is_some_and(|f| f.passed)
    }

    pub fn has_image(&self) -> bool {
        self.image.as_ref().is_some_and(|i| !i.is_empty())
    }
}
