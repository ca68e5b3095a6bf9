use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use storyboard_core::model::{
    Camera, Candidate, EntityCatalog, ImagePayload, MemoryEntry, RenderParams, Shot, ShotId,
    StyleGuide,
};

/// Characters of the style guide carried in each render prompt.
const STYLE_PROMPT_CHARS: usize = 200;
/// Upper bound on negative notes carried into a retry.
const MAX_NEGATIVE_NOTES: usize = 6;

/// Cinematographic framings tried after the planned camera, in rotation order.
const FRAMING_PRESETS: &[(&str, &str)] = &[
    ("eye-level", "medium"),
    ("low", "wide"),
    ("high", "wide"),
    ("eye-level", "close-up"),
    ("over-the-shoulder", "medium"),
    ("dutch", "medium"),
    ("bird's-eye", "extreme wide"),
];

/// Fixed inputs shared by every variation of a shot.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub style: StyleGuide,
    /// `(name, description)` of the entities present in the shot.
    pub entity_notes: Vec<(String, String)>,
    pub reference_images: Vec<ImagePayload>,
    /// Retrieved prior frames, most similar first.
    pub memory: Vec<MemoryEntry>,
}

impl RenderContext {
    pub fn for_shot(
        shot: &Shot,
        style: &StyleGuide,
        catalog: &EntityCatalog,
        memory: Vec<MemoryEntry>,
    ) -> Self {
        let entity_notes = shot
            .entities
            .iter()
            .filter_map(|name| catalog.get(name))
            .map(|p| (p.name.clone(), p.description.clone()))
            .collect();
        Self {
            style: style.clone(),
            entity_notes,
            reference_images: catalog.reference_images(&shot.entities),
            memory,
        }
    }
}

/// Every earlier attempt of one shot, oldest first.
#[derive(Debug, Clone, Default)]
pub struct AttemptHistory {
    attempts: Vec<Vec<Candidate>>,
}

impl AttemptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidates: Vec<Candidate>) {
        self.attempts.push(candidates);
    }

    /// Number of attempts recorded so far, which is also the next attempt number.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn attempts(&self) -> &[Vec<Candidate>] {
        &self.attempts
    }

    pub fn last(&self) -> Option<&[Candidate]> {
        self.attempts.last().map(Vec::as_slice)
    }

    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.attempts.iter().flatten()
    }

    pub fn fingerprints(&self) -> HashSet<String> {
        self.candidates()
            .map(|c| c.params.fingerprint.clone())
            .collect()
    }
}

/// How one variation is conditioned, before prompts are assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditioning {
    pub camera: Camera,
    pub reference_weight: f32,
    pub negative_notes: Vec<String>,
    pub guidance: Vec<String>,
}

/// Chooses framing and conditioning for the variations of an attempt.
pub trait ConditioningStrategy: Send + Sync {
    fn conditioning(&self, shot: &Shot, history: &AttemptHistory, count: usize) -> Vec<Conditioning>;
}

/// Planned camera first, then the preset rotation. Each retry drops the
/// weakest framing of the previous attempt, raises reference weight, and
/// turns critique into negative notes and guidance.
#[derive(Debug, Clone)]
pub struct RotatingConditioning {
    pub base_reference_weight: f32,
    pub weight_step: f32,
}

impl Default for RotatingConditioning {
    fn default() -> Self {
        Self {
            base_reference_weight: 0.5,
            weight_step: 0.15,
        }
    }
}

impl RotatingConditioning {
    fn framings(&self, shot: &Shot, history: &AttemptHistory, count: usize) -> Vec<Camera> {
        let retry = history.len();
        let excluded = history.last().and_then(weakest_framing);

        let mut presets: Vec<Camera> = FRAMING_PRESETS
            .iter()
            .map(|(angle, distance)| Camera::new(angle, distance))
            .collect();
        presets.rotate_left(retry % FRAMING_PRESETS.len());

        let mut seen = HashSet::new();
        let mut framings: Vec<Camera> = std::iter::once(shot.camera.clone())
            .chain(presets)
            .filter(|c| excluded.as_deref() != Some(c.framing().as_str()))
            .filter(|c| seen.insert(c.framing()))
            .take(count)
            .collect();

        // More variations than distinct framings: cycle; seeds keep requests apart.
        let distinct = framings.len().max(1);
        let mut i = 0;
        while framings.len() < count {
            let camera = framings
                .get(i % distinct)
                .cloned()
                .unwrap_or_else(|| shot.camera.clone());
            framings.push(camera);
            i += 1;
        }
        framings
    }
}

impl ConditioningStrategy for RotatingConditioning {
    fn conditioning(&self, shot: &Shot, history: &AttemptHistory, count: usize) -> Vec<Conditioning> {
        let retry = history.len() as f32;
        let reference_weight = (self.base_reference_weight + self.weight_step * retry).min(1.0);

        let mut negative_notes: Vec<String> = Vec::new();
        let mut guidance: Vec<String> = Vec::new();
        for candidate in history.candidates() {
            let issues = candidate
                .vision_qa
                .iter()
                .flat_map(|v| v.issues.iter())
                .chain(candidate.fast_qa.iter().flat_map(|f| f.issues.iter()));
            for issue in issues {
                if negative_notes.len() < MAX_NEGATIVE_NOTES && !negative_notes.contains(issue) {
                    negative_notes.push(issue.clone());
                }
            }
            if let Some(g) = candidate.vision_qa.as_ref().and_then(|v| v.guidance.as_ref()) {
                if !guidance.contains(g) {
                    guidance.push(g.clone());
                }
            }
        }

        self.framings(shot, history, count)
            .into_iter()
            .map(|camera| Conditioning {
                camera,
                reference_weight,
                negative_notes: negative_notes.clone(),
                guidance: guidance.clone(),
            })
            .collect()
    }
}

/// Framing of the lowest-scoring candidate; ties go to the later variation.
fn weakest_framing(candidates: &[Candidate]) -> Option<String> {
    candidates
        .iter()
        .min_by(|a, b| {
            a.combined_score()
                .total_cmp(&b.combined_score())
                .then_with(|| b.variation_index.cmp(&a.variation_index))
        })
        .map(|c| c.params.framing.clone())
}

/// A fully specified image-synthesis request for one variation.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub shot_id: ShotId,
    pub attempt: u32,
    pub variation_index: usize,
    pub camera: Camera,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub style: String,
    pub reference_weight: f32,
    pub seed: u64,
    pub conditioning: Vec<ImagePayload>,
    pub memory_entries: Vec<u64>,
    pub fingerprint: String,
}

impl RenderRequest {
    pub fn params(&self) -> RenderParams {
        RenderParams {
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            framing: self.camera.framing(),
            reference_weight: self.reference_weight,
            seed: self.seed,
            conditioning_digests: self.conditioning.iter().map(|i| i.digest.clone()).collect(),
            memory_entries: self.memory_entries.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }

    fn compute_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prompt.as_bytes());
        hasher.update([0]);
        hasher.update(self.negative_prompt.as_deref().unwrap_or("").as_bytes());
        hasher.update([0]);
        hasher.update(self.camera.framing().as_bytes());
        hasher.update(self.reference_weight.to_le_bytes());
        hasher.update(self.seed.to_le_bytes());
        for image in &self.conditioning {
            hasher.update(image.digest.as_bytes());
        }
        for seq in &self.memory_entries {
            hasher.update(seq.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Expands a shot into its render requests for the next attempt.
pub struct VariationManager {
    strategy: Arc<dyn ConditioningStrategy>,
    max_variations: usize,
}

impl VariationManager {
    pub fn new(strategy: Arc<dyn ConditioningStrategy>, max_variations: usize) -> Self {
        Self {
            strategy,
            max_variations: max_variations.max(1),
        }
    }

    pub fn with_default_strategy(max_variations: usize) -> Self {
        Self::new(Arc::new(RotatingConditioning::default()), max_variations)
    }

    /// One request per variation, none of which repeats an earlier request of the shot.
    pub fn expand(
        &self,
        shot: &Shot,
        context: &RenderContext,
        history: &AttemptHistory,
    ) -> Vec<RenderRequest> {
        let count = shot.variation_count.clamp(1, self.max_variations);
        let attempt = u32::try_from(history.len()).unwrap_or(u32::MAX);
        let mut used = history.fingerprints();
        let memory_images: Vec<ImagePayload> = context
            .memory
            .iter()
            .filter_map(|e| e.image.clone())
            .filter(|i| !i.is_empty())
            .collect();
        let memory_entries: Vec<u64> = context.memory.iter().map(|e| e.seq).collect();
        let base_seed = stable_seed(shot.id);

        self.strategy
            .conditioning(shot, history, count)
            .into_iter()
            .take(count)
            .enumerate()
            .map(|(variation_index, conditioning)| {
                let mut request = RenderRequest {
                    shot_id: shot.id,
                    attempt,
                    variation_index,
                    prompt: build_prompt(shot, context, &conditioning),
                    negative_prompt: negative_prompt(shot, &conditioning),
                    style: context.style.excerpt(STYLE_PROMPT_CHARS),
                    reference_weight: conditioning.reference_weight,
                    seed: base_seed.wrapping_add(variation_index as u64),
                    conditioning: context
                        .reference_images
                        .iter()
                        .chain(memory_images.iter())
                        .cloned()
                        .collect(),
                    memory_entries: memory_entries.clone(),
                    camera: conditioning.camera,
                    fingerprint: String::new(),
                };
                request.fingerprint = request.compute_fingerprint();
                while used.contains(&request.fingerprint) {
                    request.seed = request.seed.wrapping_add(1);
                    request.fingerprint = request.compute_fingerprint();
                }
                used.insert(request.fingerprint.clone());
                request
            })
            .collect()
    }
}

fn build_prompt(shot: &Shot, context: &RenderContext, conditioning: &Conditioning) -> String {
    let lead = shot.image_prompt.as_deref().unwrap_or(&shot.action);
    let mut parts = vec![lead.to_string()];
    let mut camera = conditioning.camera.clone();
    if camera.framing() == shot.camera.framing() {
        camera.kind = shot.camera.kind.clone();
        camera.movement = shot.camera.movement.clone();
    }
    parts.push(format!("Camera: {camera}"));
    if let Some(lighting) = &shot.lighting {
        parts.push(format!("Lighting: {lighting}"));
    }
    let style = context.style.excerpt(STYLE_PROMPT_CHARS);
    if !style.is_empty() {
        parts.push(format!("Style: {style}"));
    }
    if let Some(notes) = &shot.style_notes {
        parts.push(notes.clone());
    }
    if !context.entity_notes.is_empty() {
        let entities: Vec<String> = context
            .entity_notes
            .iter()
            .map(|(name, description)| format!("{name}: {description}"))
            .collect();
        parts.push(format!("Characters: {}", entities.join("; ")));
    }
    if !context.memory.is_empty() {
        let prior: Vec<&str> = context.memory.iter().map(|e| e.description.as_str()).collect();
        parts.push(format!("Continuity with: {}", prior.join("; ")));
    }
    if !conditioning.guidance.is_empty() {
        parts.push(format!("Guidance: {}", conditioning.guidance.join("; ")));
    }
    parts.join(" | ")
}

fn negative_prompt(shot: &Shot, conditioning: &Conditioning) -> Option<String> {
    let planned = shot.negative_prompt.as_deref().filter(|n| !n.trim().is_empty());
    let learned = (!conditioning.negative_notes.is_empty())
        .then(|| format!("Avoid: {}", conditioning.negative_notes.join(", ")));
    match (planned, learned) {
        (Some(planned), Some(learned)) => Some(format!("{planned}. {learned}")),
        (Some(planned), None) => Some(planned.to_string()),
        (None, learned) => learned,
    }
}

fn stable_seed(id: ShotId) -> u64 {
    let digest = Sha256::digest(id.to_string().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
