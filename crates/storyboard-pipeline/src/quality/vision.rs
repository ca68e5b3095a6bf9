use std::sync::Arc;

use storyboard_core::capability::{CritiqueRequest, VisionCritic};
use storyboard_core::error::{BudgetExceeded, PipelineError};
use storyboard_core::ledger::BudgetLedger;
use storyboard_core::model::{BudgetCategory, Candidate, VisionQaReport};

use crate::health::CapabilityHealth;

/// What happened to one sampled candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum CritiqueOutcome {
    Scored(VisionQaReport),
    /// Not enough Vision-QA budget; no call was made.
    Skipped(BudgetExceeded),
    /// The critic failed; the candidate keeps its Fast-QA verdict.
    Failed(PipelineError),
    /// The critic failed and the health monitor tripped.
    Halted(PipelineError),
}

impl CritiqueOutcome {
    /// Whether a paid critique call was issued.
    pub fn called(&self) -> bool {
        matches!(
            self,
            CritiqueOutcome::Scored(_) | CritiqueOutcome::Failed(_) | CritiqueOutcome::Halted(_)
        )
    }
}

/// The expensive tier of the quality gate.
pub struct VisionQa {
    critic: Arc<dyn VisionCritic>,
    ledger: Arc<BudgetLedger>,
    health: Arc<CapabilityHealth>,
    threshold: f64,
}

impl VisionQa {
    pub fn new(
        critic: Arc<dyn VisionCritic>,
        ledger: Arc<BudgetLedger>,
        health: Arc<CapabilityHealth>,
        threshold: f64,
    ) -> Self {
        Self {
            critic,
            ledger,
            health,
            threshold,
        }
    }

    pub async fn critique(
        &self,
        candidate: &Candidate,
        description: &str,
        style: &str,
    ) -> CritiqueOutcome {
        let Some(image) = candidate.image.clone() else {
            return CritiqueOutcome::Failed(PipelineError::QaFailure(
                "candidate has no image".into(),
            ));
        };
        if let Some(halt) = self.health.halt_error() {
            return CritiqueOutcome::Halted(halt);
        }
        let request = CritiqueRequest {
            image,
            description: description.to_string(),
            style: style.to_string(),
        };
        let estimate = self.critic.estimate_cost(&request);
        let auth = match self.ledger.reserve(BudgetCategory::VisionQa, estimate) {
            Ok(auth) => auth,
            Err(e) => {
                tracing::debug!(
                    shot = %candidate.shot_id,
                    candidate = %candidate.id.short(),
                    "Vision QA skipped, budget exhausted"
                );
                return CritiqueOutcome::Skipped(e);
            }
        };

        match self.critic.critique(request).await {
            Ok(critique) => {
                self.ledger.settle(auth, critique.cost);
                self.health.record_success();
                let score = if critique.score.is_finite() {
                    critique.score.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                tracing::debug!(
                    shot = %candidate.shot_id,
                    candidate = %candidate.id.short(),
                    score,
                    issues = critique.issues.len(),
                    "Vision QA scored"
                );
                CritiqueOutcome::Scored(VisionQaReport {
                    score,
                    passed: score >= self.threshold,
                    issues: critique.issues,
                    guidance: critique.guidance,
                })
            }
            Err(e) => {
                self.ledger.settle(auth, 0.0);
                tracing::warn!(
                    shot = %candidate.shot_id,
                    candidate = %candidate.id.short(),
                    error = %e,
                    "Vision QA failed, falling back to Fast QA"
                );
                match self.health.record_failure(self.critic.name(), &e) {
                    Some(halt) => CritiqueOutcome::Halted(halt),
                    None => CritiqueOutcome::Failed(PipelineError::QaFailure(e.to_string())),
                }
            }
        }
    }
}
