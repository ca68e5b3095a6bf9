use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::candidate::CandidateId;
use crate::error::PipelineError;
use crate::events::TransitionEvent;

/// Identity of a shot: scene id plus position within the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShotId {
    pub scene_id: u32,
    pub index: u32,
}

impl ShotId {
    pub fn new(scene_id: u32, index: u32) -> Self {
        Self { scene_id, index }
    }

    /// Parse the `s<scene>-<index>` display form.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix('s')?;
        let (scene, index) = rest.split_once('-')?;
        Some(Self {
            scene_id: scene.parse().ok()?,
            index: index.parse().ok()?,
        })
    }
}

impl std::fmt::Display for ShotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}-{}", self.scene_id, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Camera {
    #[serde(default = "default_camera_kind")]
    pub kind: String,
    pub angle: String,
    pub distance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<String>,
}

fn default_camera_kind() -> String {
    "static".to_string()
}

impl Camera {
    pub fn new(angle: &str, distance: &str) -> Self {
        Self {
            kind: default_camera_kind(),
            angle: angle.to_string(),
            distance: distance.to_string(),
            movement: None,
        }
    }

    /// Short framing label, e.g. "low-angle wide".
    pub fn framing(&self) -> String {
        format!("{} {}", self.angle, self.distance)
    }
}

impl std::fmt::Display for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} shot, {} angle, {} camera", self.distance, self.angle, self.kind)?;
        if let Some(movement) = &self.movement {
            write!(f, ", {movement} movement")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShotState {
    Planned,
    VariationsRendered,
    Evaluated,
    Accepted,
    Retrying,
    Abandoned,
}

impl ShotState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ShotState::Accepted | ShotState::Abandoned)
    }

    pub fn can_transition_to(self, next: ShotState) -> bool {
        use ShotState::*;
        matches!(
            (self, next),
            (Planned, VariationsRendered)
                | (Planned, Abandoned)
                | (VariationsRendered, Evaluated)
                | (VariationsRendered, Abandoned)
                | (Evaluated, Accepted)
                | (Evaluated, Retrying)
                | (Evaluated, Abandoned)
                | (Retrying, VariationsRendered)
                | (Retrying, Abandoned)
        )
    }
}

impl std::fmt::Display for ShotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ShotState::Planned => "PLANNED",
            ShotState::VariationsRendered => "VARIATIONS_RENDERED",
            ShotState::Evaluated => "EVALUATED",
            ShotState::Accepted => "ACCEPTED",
            ShotState::Retrying => "RETRYING",
            ShotState::Abandoned => "ABANDONED",
        };
        f.write_str(s)
    }
}

/// One planned moment of the storyboard.
///
/// The planning fields are public; lifecycle fields (state, retry count,
/// selected candidate) only change through [`Shot::transition`] and
/// [`Shot::record_result`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub id: ShotId,
    pub action: String,
    pub camera: Camera,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_notes: Option<String>,
    /// Render prompt lead set by plan review; `action` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    pub variation_count: usize,
    state: ShotState,
    retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected: Option<CandidateId>,
    #[serde(default)]
    degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl Shot {
    pub fn new(id: ShotId, action: impl Into<String>, camera: Camera) -> Self {
        Self {
            id,
            action: action.into(),
            camera,
            lighting: None,
            style_notes: None,
            image_prompt: None,
            negative_prompt: None,
            entities: Vec::new(),
            variation_count: 1,
            state: ShotState::Planned,
            retry_count: 0,
            selected: None,
            degraded: false,
            reason: None,
        }
    }

    pub fn state(&self) -> ShotState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn selected(&self) -> Option<&CandidateId> {
        self.selected.as_ref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Natural-language description used for prompts and memory.
    pub fn description(&self) -> String {
        let mut out = self.action.clone();
        out.push_str(&format!(". Camera: {}", self.camera));
        if let Some(lighting) = &self.lighting {
            out.push_str(&format!(". Lighting: {lighting}"));
        }
        out
    }

    /// Apply a state transition. Entering `RETRYING` increments the retry
    /// count; entering a terminal state records `reason`.
    pub fn transition(
        &mut self,
        to: ShotState,
        reason: impl Into<String>,
    ) -> Result<TransitionEvent, PipelineError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(PipelineError::IllegalTransition {
                shot: self.id,
                from,
                to,
            });
        }
        let reason = reason.into();
        if to == ShotState::Retrying {
            self.retry_count += 1;
        }
        if to.is_terminal() {
            self.reason = Some(reason.clone());
        }
        self.state = to;
        Ok(TransitionEvent {
            at: Utc::now(),
            shot_id: self.id,
            from,
            to,
            reason,
        })
    }

    /// Record the candidate chosen as this shot's result.
    pub fn record_result(&mut self, candidate: Option<CandidateId>, degraded: bool) {
        self.selected = candidate;
        self.degraded = degraded;
    }
}
