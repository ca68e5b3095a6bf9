//! Deterministic stand-ins for the four capabilities.
//!
//! They need no network and give the same answer for the same request, so a
//! whole run can be exercised end to end from the CLI or in tests.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use storyboard_core::capability::{
    Capabilities, CapabilityError, Critique, CritiqueRequest, EmbedInput, Embedder, Embedding,
    ImageSynthesizer, Synthesis, SynthesisRequest, TextGenerator, TextRequest, TextResponse,
    VisionCritic,
};

use crate::quality::fast::luma_stats;

pub const TEXT_COST: f64 = 0.002;
pub const EMBED_COST: f64 = 0.0001;
pub const RENDER_COST: f64 = 0.02;
pub const CRITIQUE_COST: f64 = 0.01;

pub const EMBEDDING_DIMS: usize = 64;
const MAX_SHOTS_PER_SCENE: usize = 4;
const REVIEW_NEGATIVE_PROMPT: &str = "blurry, distorted anatomy, text overlays";
const CAMERAS: [(&str, &str); 4] = [
    ("eye-level", "wide"),
    ("low", "medium"),
    ("high", "close-up"),
    ("over-the-shoulder", "medium"),
];

/// The full offline capability set.
pub fn offline_capabilities() -> Capabilities {
    Capabilities {
        text: Arc::new(TemplatePlanner),
        embedder: Arc::new(HashedEmbedder::default()),
        synthesizer: Arc::new(GradientSynthesizer::default()),
        critic: Arc::new(StatisticsCritic),
    }
}

fn digest_u64(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Emits one shot per sentence of the scene text found in the planning prompt,
/// and answers plan reviews with a fixed negative prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplatePlanner;

impl TemplatePlanner {
    fn plan(prompt: &str) -> Option<serde_json::Value> {
        let scene_text = section_after(prompt, "Scene ")?;
        let entities: Vec<String> = section_after(prompt, "Entities:")
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().strip_prefix("- "))
            .filter_map(|line| line.split_once(" (").map(|(name, _)| name.to_string()))
            .collect();

        let shots: Vec<serde_json::Value> = scene_text
            .split(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(MAX_SHOTS_PER_SCENE)
            .enumerate()
            .map(|(i, sentence)| {
                let (angle, distance) = CAMERAS[i % CAMERAS.len()];
                let mentioned: Vec<&String> = entities
                    .iter()
                    .filter(|e| sentence.to_lowercase().contains(&e.to_lowercase()))
                    .collect();
                json!({
                    "action": sentence,
                    "camera": {"type": "static", "angle": angle, "distance": distance},
                    "entities": mentioned,
                })
            })
            .collect();
        if shots.is_empty() {
            return None;
        }
        Some(json!({ "shots": shots }))
    }

    fn review(prompt: &str) -> Option<serde_json::Value> {
        let frames = section_after(prompt, "Visual context from previous frames:")?;
        let prior = frames.lines().filter(|l| l.starts_with("- ")).count();
        let issues: Vec<String> = if prior > 0 {
            vec![format!("keep continuity with {prior} previous frames")]
        } else {
            Vec::new()
        };
        Some(json!({
            "approval": true,
            "issues": issues,
            "negative_prompt": REVIEW_NEGATIVE_PROMPT,
        }))
    }
}

/// Body of the prompt section whose header line starts with `header`, up to
/// the next blank line. The header line itself is dropped.
fn section_after(prompt: &str, header: &str) -> Option<String> {
    let start = prompt.lines().position(|l| l.starts_with(header))?;
    let body: Vec<&str> = prompt
        .lines()
        .skip(start + 1)
        .take_while(|l| !l.trim().is_empty())
        .collect();
    Some(body.join("\n"))
}

#[async_trait]
impl TextGenerator for TemplatePlanner {
    fn name(&self) -> &str {
        "offline-text"
    }

    fn estimate_cost(&self, _request: &TextRequest) -> f64 {
        TEXT_COST
    }

    async fn generate(&self, request: TextRequest) -> Result<TextResponse, CapabilityError> {
        let answer = Self::review(&request.prompt)
            .or_else(|| Self::plan(&request.prompt))
            .ok_or_else(|| CapabilityError::Rejected("prompt carries no scene text".into()))?;
        Ok(TextResponse {
            text: answer.to_string(),
            cost: TEXT_COST,
        })
    }
}

/// Hashed bag-of-words embedding, L2-normalized.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dims: usize,
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self {
            dims: EMBEDDING_DIMS,
        }
    }
}

impl HashedEmbedder {
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
        {
            let token = token.to_lowercase();
            let bucket = digest_u64(&[token.as_bytes()]) % self.dims as u64;
            vector[bucket as usize] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn name(&self) -> &str {
        "offline-embedder"
    }

    fn estimate_cost(&self, _input: &EmbedInput) -> f64 {
        EMBED_COST
    }

    async fn embed(&self, input: EmbedInput) -> Result<Embedding, CapabilityError> {
        Ok(Embedding {
            vector: self.vector(input.text()),
            cost: EMBED_COST,
        })
    }
}

/// Renders a tinted gradient PNG whose contrast is derived from the request.
///
/// Low-contrast outputs are common enough that retries get exercised.
#[derive(Debug, Clone)]
pub struct GradientSynthesizer {
    width: u32,
    height: u32,
}

impl Default for GradientSynthesizer {
    fn default() -> Self {
        Self::new(512, 512)
    }
}

impl GradientSynthesizer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn render(&self, request: &SynthesisRequest) -> Result<Vec<u8>, CapabilityError> {
        let hash = digest_u64(&[request.prompt.as_bytes(), &request.seed.to_le_bytes()]);
        let amplitude = 0.35 + 0.65 * ((hash % 1000) as f64 / 999.0);
        let tint = [(hash >> 16) as u8 % 32, (hash >> 24) as u8 % 32, (hash >> 32) as u8 % 32];
        let diagonal = hash & 1 == 1;
        let (width, height) = (self.width, self.height);
        let span = if diagonal { width + height } else { width };

        let img = image::RgbImage::from_fn(width, height, |x, y| {
            let position = if diagonal { x + y } else { x };
            let t = f64::from(position) / f64::from(span.max(2) - 1) - 0.5;
            let level = (128.0 + 254.0 * amplitude * t).clamp(0.0, 255.0) as u8;
            image::Rgb([
                level.saturating_sub(tint[0]),
                level.saturating_sub(tint[1]),
                level.saturating_sub(tint[2]),
            ])
        });
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| CapabilityError::Transient(format!("PNG encoding failed: {e}")))?;
        Ok(buf)
    }
}

#[async_trait]
impl ImageSynthesizer for GradientSynthesizer {
    fn name(&self) -> &str {
        "offline-synthesizer"
    }

    fn estimate_cost(&self, _request: &SynthesisRequest) -> f64 {
        RENDER_COST
    }

    async fn synthesize(&self, request: SynthesisRequest) -> Result<Synthesis, CapabilityError> {
        Ok(Synthesis {
            image: self.render(&request)?,
            cost: RENDER_COST,
        })
    }
}

/// Scores an image from its luma contrast and exposure.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatisticsCritic;

#[async_trait]
impl VisionCritic for StatisticsCritic {
    fn name(&self) -> &str {
        "offline-critic"
    }

    fn estimate_cost(&self, _request: &CritiqueRequest) -> f64 {
        CRITIQUE_COST
    }

    async fn critique(&self, request: CritiqueRequest) -> Result<Critique, CapabilityError> {
        let img = image::load_from_memory(request.image.bytes())
            .map_err(|e| CapabilityError::Malformed(format!("cannot decode image: {e}")))?;
        let stats = luma_stats(&img.to_luma8());
        let contrast = (stats.std_dev / 64.0).min(1.0);
        let exposure = (1.0 - (stats.mean - 128.0).abs() / 128.0).clamp(0.0, 1.0);
        let score = 0.7 * contrast + 0.3 * exposure;

        let mut issues = Vec::new();
        let mut guidance = Vec::new();
        if contrast < 0.6 {
            issues.push("flat, low-contrast lighting".to_string());
            guidance.push("stronger key light and deeper shadows");
        }
        if exposure < 0.6 {
            issues.push("poor exposure".to_string());
            guidance.push("balance the exposure");
        }
        Ok(Critique {
            score,
            issues,
            guidance: (!guidance.is_empty()).then(|| guidance.join(", ")),
            cost: CRITIQUE_COST,
        })
    }
}
