use thiserror::Error;

use crate::model::{BudgetCategory, ShotId, ShotState};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Run report not found: {0}")]
    ReportNotFound(String),
}

/// A reservation was refused because it would take a category below zero.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Budget exceeded for {category}: requested {requested:.4}, remaining {remaining:.4}")]
pub struct BudgetExceeded {
    pub category: BudgetCategory,
    pub requested: f64,
    pub remaining: f64,
}

/// Failure taxonomy of the shot production pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    BudgetExceeded(#[from] BudgetExceeded),

    #[error("Planning failed for scene {scene_id}: {reason}")]
    PlanningFailure { scene_id: u32, reason: String },

    #[error("Plan review failed for shot {shot}: {reason}")]
    ReviewFailure { shot: ShotId, reason: String },

    #[error("Render failed: {0}")]
    RenderFailure(String),

    #[error("Vision QA failed: {0}")]
    QaFailure(String),

    #[error("Capability {capability} unavailable after {consecutive} consecutive failures")]
    CapabilityUnavailable {
        capability: String,
        consecutive: u32,
    },

    #[error("Illegal transition for shot {shot}: {from} -> {to}")]
    IllegalTransition {
        shot: ShotId,
        from: ShotState,
        to: ShotState,
    },
}

impl PipelineError {
    /// Errors that stop the whole run rather than a single shot or scene.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, PipelineError::CapabilityUnavailable { .. })
    }
}
