use std::sync::Arc;

use serde::Deserialize;
use storyboard_core::capability::{TextGenerator, TextRequest};
use storyboard_core::config::PipelineConfig;
use storyboard_core::error::PipelineError;
use storyboard_core::ledger::BudgetLedger;
use storyboard_core::model::{
    BudgetCategory, Camera, EntityCatalog, MemoryEntry, Scene, Shot, ShotId, StyleGuide,
};

use crate::health::CapabilityHealth;

const SYSTEM_PROMPT: &str = "You are a professional storyboard artist and cinematographer. \
Break scenes into shots and answer with JSON only.";

/// Characters of the style guide included in planning prompts.
const STYLE_EXCERPT_CHARS: usize = 500;
/// Characters of each prior frame description included in planning prompts.
const FRAME_SUMMARY_CHARS: usize = 100;

/// Why a planner response could not be turned into shots.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanParseError {
    #[error("empty response")]
    Empty,

    #[error("no JSON found in response")]
    NoJson,

    #[error("schema violation: {0}")]
    Schema(String),

    #[error("plan contains no shots")]
    NoShots,
}

#[derive(Debug, Deserialize)]
struct RawCamera {
    #[serde(default, rename = "type", alias = "kind")]
    kind: Option<String>,
    angle: String,
    distance: String,
    #[serde(default)]
    movement: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawShot {
    action: String,
    camera: RawCamera,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    lighting: Option<String>,
    #[serde(default)]
    style_notes: Option<String>,
    #[serde(default)]
    variations: Option<usize>,
}

/// One validated shot of a plan, before it is bound to a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedShot {
    pub action: String,
    pub camera: Camera,
    pub entities: Vec<String>,
    pub lighting: Option<String>,
    pub style_notes: Option<String>,
    pub variations: Option<usize>,
}

/// Turns scene text into shot specifications through the text capability.
pub struct ShotPlanner {
    text: Arc<dyn TextGenerator>,
    ledger: Arc<BudgetLedger>,
    health: Arc<CapabilityHealth>,
    config: Arc<PipelineConfig>,
}

impl ShotPlanner {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        ledger: Arc<BudgetLedger>,
        health: Arc<CapabilityHealth>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            text,
            ledger,
            health,
            config,
        }
    }

    /// Plan the shots of one scene.
    ///
    /// Exactly one text-generation call is made, and only after the planning
    /// budget has been reserved.
    pub async fn plan_scene(
        &self,
        scene: &Scene,
        style: &StyleGuide,
        entities: &EntityCatalog,
        memory_context: &[MemoryEntry],
    ) -> Result<Vec<Shot>, PipelineError> {
        let request = TextRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(scene, style, entities, memory_context),
        };
        let estimate = self.text.estimate_cost(&request);
        let auth = self.ledger.reserve(BudgetCategory::Planning, estimate)?;

        tracing::debug!(
            scene = scene.id,
            prompt_len = request.prompt.len(),
            context_frames = memory_context.len(),
            "Planning scene"
        );

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
                return Err(PipelineError::PlanningFailure {
                    scene_id: scene.id,
                    reason: e.to_string(),
                });
            }
        };

        let planned = parse_plan(&response.text).map_err(|e| {
            tracing::warn!(
                scene = scene.id,
                error = %e,
                response_len = response.text.len(),
                "Planner response rejected"
            );
            PipelineError::PlanningFailure {
                scene_id: scene.id,
                reason: e.to_string(),
            }
        })?;

        let shots: Vec<Shot> = planned
            .into_iter()
            .enumerate()
            .map(|(i, p)| self.bind(scene, i, p))
            .collect();
        tracing::info!(scene = scene.id, shots = shots.len(), "Scene planned");
        Ok(shots)
    }

    fn bind(&self, scene: &Scene, position: usize, planned: PlannedShot) -> Shot {
        let index = u32::try_from(position + 1).unwrap_or(u32::MAX);
        let mut shot = Shot::new(ShotId::new(scene.id, index), planned.action, planned.camera);
        shot.lighting = planned.lighting;
        shot.style_notes = planned.style_notes;
        shot.entities = if planned.entities.is_empty() {
            scene.entities.clone()
        } else {
            planned.entities
        };
        shot.variation_count = self.config.variations_for(planned.variations);
        shot
    }
}

pub fn build_prompt(
    scene: &Scene,
    style: &StyleGuide,
    entities: &EntityCatalog,
    memory_context: &[MemoryEntry],
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Plan the shots for this storyboard scene.\n\n");
    prompt.push_str(&format!("Scene {}:\n{}\n\n", scene.id, scene.text.trim()));

    prompt.push_str("Style Guide:\n");
    prompt.push_str(&style.excerpt(STYLE_EXCERPT_CHARS));
    prompt.push_str("\n\n");

    prompt.push_str("Entities:\n");
    let mut listed = 0;
    for name in &scene.entities {
        if let Some(profile) = entities.get(name) {
            prompt.push_str(&format!("- {} ({:?}): {}\n", profile.name, profile.kind, profile.description));
            listed += 1;
        }
    }
    if listed == 0 {
        prompt.push_str("- none listed\n");
    }

    prompt.push_str("\nPrevious frames:\n");
    if memory_context.is_empty() {
        prompt.push_str("No previous frames\n");
    } else {
        for entry in memory_context {
            let summary: String = entry.description.chars().take(FRAME_SUMMARY_CHARS).collect();
            prompt.push_str(&format!("- Shot {}: {}\n", entry.shot_id, summary));
        }
    }

    prompt.push_str(
        r#"
Return JSON with this structure:
{"shots": [{"action": "what happens", "camera": {"type": "static", "angle": "eye-level", "distance": "medium", "movement": null}, "entities": ["name"], "lighting": "...", "style_notes": "...", "variations": 3}]}
"#,
    );
    prompt
}

/// Parse a planner response into validated shots.
///
/// Accepts `{"shots": [...]}` or a bare array, optionally wrapped in prose or
/// a fenced code block.
pub fn parse_plan(text: &str) -> Result<Vec<PlannedShot>, PlanParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PlanParseError::Empty);
    }
    let json = extract_json_fence(trimmed)
        .or_else(|| extract_json(trimmed))
        .ok_or(PlanParseError::NoJson)?;
    let value: serde_json::Value =
        serde_json::from_str(&json).map_err(|_| PlanParseError::NoJson)?;

    let shots_value = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut map) => map
            .remove("shots")
            .ok_or_else(|| PlanParseError::Schema("missing \"shots\" field".into()))?,
        _ => return Err(PlanParseError::Schema("expected an object or array".into())),
    };
    let raw: Vec<RawShot> =
        serde_json::from_value(shots_value).map_err(|e| PlanParseError::Schema(e.to_string()))?;
    if raw.is_empty() {
        return Err(PlanParseError::NoShots);
    }

    raw.into_iter()
        .enumerate()
        .map(|(i, shot)| validate(i, shot))
        .collect()
}

fn validate(position: usize, raw: RawShot) -> Result<PlannedShot, PlanParseError> {
    let action = raw.action.trim().to_string();
    if action.is_empty() {
        return Err(PlanParseError::Schema(format!("shot {} has an empty action", position + 1)));
    }
    let angle = raw.camera.angle.trim();
    let distance = raw.camera.distance.trim();
    if angle.is_empty() || distance.is_empty() {
        return Err(PlanParseError::Schema(format!(
            "shot {} camera needs angle and distance",
            position + 1
        )));
    }
    let mut camera = Camera::new(angle, distance);
    if let Some(kind) = raw.camera.kind.filter(|k| !k.trim().is_empty()) {
        camera.kind = kind;
    }
    camera.movement = raw.camera.movement.filter(|m| !m.trim().is_empty());
    Ok(PlannedShot {
        action,
        camera,
        entities: raw.entities,
        lighting: raw.lighting.filter(|l| !l.trim().is_empty()),
        style_notes: raw.style_notes.filter(|s| !s.trim().is_empty()),
        variations: raw.variations,
    })
}

pub(crate) fn extract_json_fence(raw: &str) -> Option<String> {
    let start = raw.find("```")?;
    let after_start = &raw[start + 3..];
    let body = &after_start[after_start.find('\n')? + 1..];
    let end = body.rfind("```")?;
    let candidate = body[..end].trim();
    if candidate.starts_with('{') || candidate.starts_with('[') {
        Some(candidate.to_string())
    } else {
        None
    }
}

/// Outermost `{..}` or `[..]` span, whichever opens first.
pub(crate) fn extract_json(text: &str) -> Option<String> {
    let object = text.find('{');
    let array = text.find('[');
    let (start, close) = match (object, array) {
        (Some(o), Some(a)) if a < o => (a, ']'),
        (Some(o), _) => (o, '}'),
        (None, Some(a)) => (a, ']'),
        (None, None) => return None,
    };
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use storyboard_core::capability::{CapabilityError, TextResponse};
    use storyboard_core::config::BudgetLimits;
    use storyboard_core::model::{EntityKind, EntityProfile};

    struct ScriptedText {
        reply: Result<String, CapabilityError>,
        calls: AtomicUsize,
    }

    impl ScriptedText {
        fn ok(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedText {
        fn estimate_cost(&self, _request: &TextRequest) -> f64 {
            0.05
        }

        async fn generate(
            &self,
            _request: TextRequest,
        ) -> Result<TextResponse, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map(|text| TextResponse { text, cost: 0.04 })
        }
    }

    fn scene() -> Scene {
        Scene {
            id: 2,
            text: "Storm night. Mara climbs the lighthouse.".into(),
            entities: vec!["mara".into()],
        }
    }

    fn planner(text: Arc<ScriptedText>, planning_budget: f64) -> (ShotPlanner, Arc<BudgetLedger>) {
        let ledger = Arc::new(BudgetLedger::new(&BudgetLimits {
            planning: planning_budget,
            ..BudgetLimits::default()
        }));
        let planner = ShotPlanner::new(
            text,
            ledger.clone(),
            Arc::new(CapabilityHealth::new(3)),
            Arc::new(PipelineConfig::default()),
        );
        (planner, ledger)
    }

    const PLAN: &str = r#"Here is the plan:
```json
{"shots": [
  {"action": "Mara grips the railing", "camera": {"type": "handheld", "angle": "low", "distance": "wide"}, "lighting": "lightning flashes", "variations": 9},
  {"action": "Close on Mara's face", "camera": {"angle": "eye-level", "distance": "close-up"}, "entities": ["mara"]}
]}
```"#;

    #[tokio::test]
    async fn test_plan_scene() {
        let text = Arc::new(ScriptedText::ok(PLAN));
        let (planner, ledger) = planner(text.clone(), 1.0);
        let catalog = EntityCatalog::new([EntityProfile::new(
            "mara",
            EntityKind::Character,
            "keeper in a red coat",
        )]);

        let shots = planner
            .plan_scene(&scene(), &StyleGuide::new("ink wash"), &catalog, &[])
            .await
            .unwrap();
        assert_eq!(shots.len(), 2);
        assert_eq!(shots[0].id, ShotId::new(2, 1));
        assert_eq!(shots[0].camera.kind, "handheld");
        assert_eq!(shots[0].variation_count, 3);
        assert_eq!(shots[0].entities, vec!["mara"]);
        assert_eq!(shots[1].camera.framing(), "eye-level close-up");
        assert_eq!(text.calls.load(Ordering::SeqCst), 1);

        let snap = ledger.snapshot();
        assert!((snap.spent(BudgetCategory::Planning) - 0.04).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_planning_budget_exhausted_makes_no_call() {
        let text = Arc::new(ScriptedText::ok(PLAN));
        let (planner, _) = planner(text.clone(), 0.01);
        let err = planner
            .plan_scene(&scene(), &StyleGuide::default(), &EntityCatalog::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::BudgetExceeded(ref e) if e.category == BudgetCategory::Planning
        ));
        assert_eq!(text.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_response_is_planning_failure() {
        let text = Arc::new(ScriptedText::ok("I cannot plan this scene."));
        let (planner, ledger) = planner(text, 1.0);
        let err = planner
            .plan_scene(&scene(), &StyleGuide::default(), &EntityCatalog::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PlanningFailure { scene_id: 2, .. }));
        assert_eq!(ledger.snapshot().operations(BudgetCategory::Planning), 1);
    }

    #[tokio::test]
    async fn test_unavailable_text_is_planning_failure_until_tripped() {
        let text = Arc::new(ScriptedText {
            reply: Err(CapabilityError::Unavailable("down".into())),
            calls: AtomicUsize::new(0),
        });
        let (planner, ledger) = planner(text, 1.0);
        let err = planner
            .plan_scene(&scene(), &StyleGuide::default(), &EntityCatalog::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PlanningFailure { .. }));
        assert_eq!(ledger.snapshot().spent(BudgetCategory::Planning), 0.0);
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(parse_plan("   "), Err(PlanParseError::Empty));
        assert_eq!(parse_plan("no json here"), Err(PlanParseError::NoJson));
        assert_eq!(parse_plan(r#"{"shots": []}"#), Err(PlanParseError::NoShots));
        assert!(matches!(parse_plan(r#"{"scenes": []}"#), Err(PlanParseError::Schema(_))));
        assert!(matches!(
            parse_plan(r#"[{"action": "", "camera": {"angle": "low", "distance": "wide"}}]"#),
            Err(PlanParseError::Schema(_))
        ));
        assert!(matches!(
            parse_plan(r#"[{"action": "run", "camera": {"angle": "low"}}]"#),
            Err(PlanParseError::Schema(_))
        ));
    }

    #[test]
    fn test_parse_bare_array() {
        let shots = parse_plan(
            r#"Sure! [{"action": "Door creaks open", "camera": {"angle": "high", "distance": "medium", "movement": "dolly in"}}]"#,
        )
        .unwrap();
        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].camera.movement.as_deref(), Some("dolly in"));
        assert_eq!(shots[0].camera.kind, "static");
    }

    #[test]
    fn test_prompt_includes_context() {
        let catalog = EntityCatalog::new([EntityProfile::new(
            "mara",
            EntityKind::Character,
            "keeper in a red coat",
        )]);
        let entry = MemoryEntry::new(
            ShotId::new(1, 3),
            "c1".into(),
            vec![],
            vec!["mara".into()],
            "Mara lights the lamp",
        );
        let prompt = build_prompt(&scene(), &StyleGuide::new("ink wash"), &catalog, &[entry]);
        assert!(prompt.contains("keeper in a red coat"));
        assert!(prompt.contains("ink wash"));
        assert!(prompt.contains("Shot s1-3: Mara lights the lamp"));

        let empty = build_prompt(&scene(), &StyleGuide::default(), &catalog, &[]);
        assert!(empty.contains("No previous frames"));
    }
}
