//! Plan review: one budgeted text call per shot that checks the planned shot
//! against recalled prior frames and may rewrite its render prompt.

use std::sync::Arc;

use serde::Deserialize;
use storyboard_core::capability::{TextGenerator, TextRequest};
use storyboard_core::error::PipelineError;
use storyboard_core::ledger::BudgetLedger;
use storyboard_core::model::{BudgetCategory, EntityCatalog, MemoryEntry, Shot, StyleGuide};

use crate::health::CapabilityHealth;
use crate::planner::{extract_json, extract_json_fence, PlanParseError};

const SYSTEM_PROMPT: &str = "You are a senior storyboard director reviewing shot plans \
for consistency and quality. Answer with JSON only.";

const STYLE_EXCERPT_CHARS: usize = 500;
const FRAME_SUMMARY_CHARS: usize = 150;
/// Prior frames described to the reviewer.
const MAX_CONTEXT_FRAMES: usize = 3;

/// Adjustments proposed by the reviewer. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlanRevision {
    #[serde(alias = "approval")]
    pub approved: Option<bool>,
    pub consistency_score: Option<f64>,
    pub issues: Vec<String>,
    pub modified_prompt: Option<String>,
    #[serde(alias = "style_adjustments")]
    pub style_notes: Option<String>,
    pub negative_prompt: Option<String>,
}

impl PlanRevision {
    /// Write the non-blank adjustments into `shot`. Returns whether anything changed.
    pub fn apply(&self, shot: &mut Shot) -> bool {
        let mut changed = false;
        if let Some(prompt) = non_blank(&self.modified_prompt) {
            shot.image_prompt = Some(prompt);
            changed = true;
        }
        if let Some(notes) = non_blank(&self.style_notes) {
            shot.style_notes = Some(notes);
            changed = true;
        }
        if let Some(negative) = non_blank(&self.negative_prompt) {
            shot.negative_prompt = Some(negative);
            changed = true;
        }
        changed
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Reviews planned shots through the text capability, spending from the
/// planning budget.
pub struct PlanReviewer {
    text: Arc<dyn TextGenerator>,
    ledger: Arc<BudgetLedger>,
    health: Arc<CapabilityHealth>,
}

impl PlanReviewer {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        ledger: Arc<BudgetLedger>,
        health: Arc<CapabilityHealth>,
    ) -> Self {
        Self {
            text,
            ledger,
            health,
        }
    }

    /// Review one shot. The shot is not modified; callers apply the revision
    /// and keep the plan as it was on error.
    pub async fn review(
        &self,
        shot: &Shot,
        style: &StyleGuide,
        catalog: &EntityCatalog,
        memory_context: &[MemoryEntry],
    ) -> Result<PlanRevision, PipelineError> {
        let request = TextRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(shot, style, catalog, memory_context),
        };
        let estimate = self.text.estimate_cost(&request);
        let auth = self.ledger.reserve(BudgetCategory::Planning, estimate)?;

        let response = match self.text.generate(request).await {
            Ok(response) => {
                self.ledger.settle(auth, response.cost);
                self.health.record_success();
                response
            }
            Err(e) => {
                self.ledger.settle(auth, 0.0);
                if let Some(halt) = self.health.record_failure(self.text.name(), &e) {
                    return Err(halt);
                }
                return Err(PipelineError::ReviewFailure {
                    shot: shot.id,
                    reason: e.to_string(),
                });
            }
        };

        let revision = parse_review(&response.text).map_err(|e| PipelineError::ReviewFailure {
            shot: shot.id,
            reason: e.to_string(),
        })?;
        tracing::debug!(
            shot = %shot.id,
            approved = ?revision.approved,
            issues = revision.issues.len(),
            "Plan reviewed"
        );
        Ok(revision)
    }
}

pub fn build_prompt(
    shot: &Shot,
    style: &StyleGuide,
    catalog: &EntityCatalog,
    memory_context: &[MemoryEntry],
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Review this storyboard shot plan for visual consistency and quality.\n\n");
    prompt.push_str(&format!("Shot {}:\n{}\n", shot.id, shot.description()));
    if let Some(notes) = &shot.style_notes {
        prompt.push_str(&format!("Style notes: {notes}\n"));
    }

    prompt.push_str("\nStyle Guide:\n");
    prompt.push_str(&style.excerpt(STYLE_EXCERPT_CHARS));
    prompt.push_str("\n\nEntities:\n");
    let mut listed = 0;
    for profile in shot.entities.iter().filter_map(|name| catalog.get(name)) {
        prompt.push_str(&format!("- {}: {}\n", profile.name, profile.description));
        listed += 1;
    }
    if listed == 0 {
        prompt.push_str("- none listed\n");
    }

    prompt.push_str("\nVisual context from previous frames:\n");
    if memory_context.is_empty() {
        prompt.push_str("No previous frames\n");
    } else {
        for entry in memory_context.iter().take(MAX_CONTEXT_FRAMES) {
            let summary: String = entry.description.chars().take(FRAME_SUMMARY_CHARS).collect();
            prompt.push_str(&format!("- Shot {}: {}\n", entry.shot_id, summary));
        }
    }

    prompt.push_str(
        r#"
Check consistency with the previous frames, adherence to the style guide and
entity consistency. Return JSON with this structure:
{"approval": true, "consistency_score": 0.0, "issues": ["..."], "modified_prompt": "improved image prompt, if needed", "style_adjustments": "...", "negative_prompt": "things to avoid"}
"#,
    );
    prompt
}

/// Parse a reviewer response, optionally wrapped in prose or a fenced block.
pub fn parse_review(text: &str) -> Result<PlanRevision, PlanParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PlanParseError::Empty);
    }
    let json = extract_json_fence(trimmed)
        .or_else(|| extract_json(trimmed))
        .ok_or(PlanParseError::NoJson)?;
    let value: serde_json::Value =
        serde_json::from_str(&json).map_err(|_| PlanParseError::NoJson)?;
    if !value.is_object() {
        return Err(PlanParseError::Schema("expected an object".into()));
    }
    serde_json::from_value(value).map_err(|e| PlanParseError::Schema(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use storyboard_core::capability::{CapabilityError, TextResponse};
    use storyboard_core::config::BudgetLimits;
    use storyboard_core::model::{Camera, CandidateId, EntityKind, EntityProfile, ShotId};

    struct ScriptedText {
        reply: Result<String, CapabilityError>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedText {
        fn new(reply: Result<String, CapabilityError>) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedText {
        fn estimate_cost(&self, _request: &TextRequest) -> f64 {
            0.02
        }

        async fn generate(&self, request: TextRequest) -> Result<TextResponse, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt);
            self.reply.clone().map(|text| TextResponse { text, cost: 0.015 })
        }
    }

    fn reviewer(text: Arc<ScriptedText>, planning: f64) -> (PlanReviewer, Arc<BudgetLedger>) {
        let ledger = Arc::new(BudgetLedger::new(&BudgetLimits {
            planning,
            ..BudgetLimits::default()
        }));
        let reviewer = PlanReviewer::new(text, ledger.clone(), Arc::new(CapabilityHealth::new(3)));
        (reviewer, ledger)
    }

    fn shot() -> Shot {
        let mut shot = Shot::new(ShotId::new(1, 2), "Mara climbs the stairs", Camera::new("low", "wide"));
        shot.entities = vec!["mara".into()];
        shot
    }

    fn prior() -> MemoryEntry {
        MemoryEntry::new(
            ShotId::new(1, 1),
            CandidateId::from("c1"),
            vec![1.0],
            vec!["mara".into()],
            "Mara at the lighthouse door, red coat",
        )
    }

    const REVIEW: &str = r#"```json
{"approval": false, "consistency_score": 0.6, "issues": ["coat colour drifts"],
 "modified_prompt": "Mara in her red coat climbs the spiral stairs",
 "style_adjustments": "heavier ink on the shadows",
 "negative_prompt": "blue coat, modern clothing"}
```"#;

    #[tokio::test]
    async fn test_review_revises_plan_with_memory_context() {
        let text = Arc::new(ScriptedText::new(Ok(REVIEW.into())));
        let (reviewer, ledger) = reviewer(text.clone(), 1.0);
        let catalog = EntityCatalog::new([EntityProfile::new("mara", EntityKind::Character, "red coat")]);
        let mut s = shot();

        let revision = reviewer
            .review(&s, &StyleGuide::new("ink wash"), &catalog, &[prior()])
            .await
            .unwrap();
        assert_eq!(revision.approved, Some(false));
        assert_eq!(revision.issues, vec!["coat colour drifts"]);
        assert!(revision.apply(&mut s));
        assert_eq!(s.image_prompt.as_deref(), Some("Mara in her red coat climbs the spiral stairs"));
        assert_eq!(s.style_notes.as_deref(), Some("heavier ink on the shadows"));
        assert_eq!(s.negative_prompt.as_deref(), Some("blue coat, modern clothing"));
        assert_eq!(s.action, "Mara climbs the stairs");

        let prompts = text.prompts.lock().unwrap();
        assert!(prompts[0].contains("Mara at the lighthouse door"));
        assert!(prompts[0].contains("- mara: red coat"));
        let snap = ledger.snapshot();
        assert!((snap.spent(BudgetCategory::Planning) - 0.015).abs() < 1e-9);
        assert_eq!(snap.operations(BudgetCategory::Planning), 1);
    }

    #[tokio::test]
    async fn test_review_budget_denied_makes_no_call() {
        let text = Arc::new(ScriptedText::new(Ok(REVIEW.into())));
        let (reviewer, _) = reviewer(text.clone(), 0.01);
        let err = reviewer
            .review(&shot(), &StyleGuide::default(), &EntityCatalog::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::BudgetExceeded(_)));
        assert_eq!(text.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_review_failures_keep_plan() {
        let text = Arc::new(ScriptedText::new(Err(CapabilityError::Rejected("content policy".into()))));
        let (reviewer, _) = reviewer(text, 1.0);
        let err = reviewer
            .review(&shot(), &StyleGuide::default(), &EntityCatalog::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ReviewFailure { .. }));

        let text = Arc::new(ScriptedText::new(Ok("looks fine to me".into())));
        let (reviewer, _) = self::reviewer(text, 1.0);
        let err = reviewer
            .review(&shot(), &StyleGuide::default(), &EntityCatalog::default(), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no JSON"));
    }

    #[test]
    fn test_blank_revision_changes_nothing() {
        let revision = parse_review(r#"{"approval": true, "modified_prompt": "  ", "issues": []}"#).unwrap();
        let mut s = shot();
        assert!(!revision.apply(&mut s));
        assert_eq!(s, shot());
        assert!(matches!(parse_review("[1, 2]"), Err(PlanParseError::Schema(_))));
    }
}
