//! Interfaces to the external ML capabilities.
//!
//! The pipeline never talks to a model directly: it reaches text generation,
//! embeddings, image synthesis and vision critique through these traits.
//! Every request can be priced up front with `estimate_cost` so the caller
//! can reserve budget before the call, and every response reports what the
//! call actually cost.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ImagePayload;

/// How a capability call failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    /// The service cannot be reached or refuses all work.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A failure that may succeed on retry (timeouts, rate limits).
    #[error("transient failure: {0}")]
    Transient(String),

    /// The request itself was refused (content policy, bad input).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The service answered with something that cannot be used.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CapabilityError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CapabilityError::Unavailable(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CapabilityError::Transient(_) | CapabilityError::Malformed(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRequest {
    pub system: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmbedInput {
    Text(String),
    /// An accepted frame: its image plus the textual description of the shot.
    Frame {
        image: ImagePayload,
        description: String,
    },
}

impl EmbedInput {
    pub fn text(&self) -> &str {
        match self {
            EmbedInput::Text(text) => text,
            EmbedInput::Frame { description, .. } => description,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub conditioning: Vec<ImagePayload>,
    pub reference_weight: f32,
    pub style: String,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub image: Vec<u8>,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CritiqueRequest {
    pub image: ImagePayload,
    pub description: String,
    pub style: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Critique {
    /// Quality in `[0, 1]`.
    pub score: f64,
    pub issues: Vec<String>,
    pub guidance: Option<String>,
    pub cost: f64,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str {
        "text"
    }

    fn estimate_cost(&self, request: &TextRequest) -> f64;

    async fn generate(&self, request: TextRequest) -> Result<TextResponse, CapabilityError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str {
        "embedder"
    }

    fn estimate_cost(&self, input: &EmbedInput) -> f64;

    async fn embed(&self, input: EmbedInput) -> Result<Embedding, CapabilityError>;
}

#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    fn name(&self) -> &str {
        "synthesizer"
    }

    fn estimate_cost(&self, request: &SynthesisRequest) -> f64;

    async fn synthesize(&self, request: SynthesisRequest) -> Result<Synthesis, CapabilityError>;
}

#[async_trait]
pub trait VisionCritic: Send + Sync {
    fn name(&self) -> &str {
        "critic"
    }

    fn estimate_cost(&self, request: &CritiqueRequest) -> f64;

    async fn critique(&self, request: CritiqueRequest) -> Result<Critique, CapabilityError>;
}

/// The four capabilities a run needs.
#[derive(Clone)]
pub struct Capabilities {
    pub text: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn Embedder>,
    pub synthesizer: Arc<dyn ImageSynthesizer>,
    pub critic: Arc<dyn VisionCritic>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("text", &self.text.name())
            .field("embedder", &self.embedder.name())
            .field("synthesizer", &self.synthesizer.name())
            .field("critic", &self.critic.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoText;

    #[async_trait]
    impl TextGenerator for EchoText {
        fn estimate_cost(&self, request: &TextRequest) -> f64 {
            request.prompt.len() as f64 * 1e-6
        }

        async fn generate(&self, request: TextRequest) -> Result<TextResponse, CapabilityError> {
            if request.prompt.is_empty() {
                return Err(CapabilityError::Rejected("empty prompt".into()));
            }
            Ok(TextResponse {
                text: request.prompt,
                cost: 0.001,
            })
        }
    }

    #[tokio::test]
    async fn test_trait_object_dispatch() {
        let text: Arc<dyn TextGenerator> = Arc::new(EchoText);
        let request = TextRequest {
            system: "planner".into(),
            prompt: "storm".into(),
        };
        assert!(text.estimate_cost(&request) > 0.0);
        assert_eq!(text.name(), "text");
        let response = text.generate(request).await.unwrap();
        assert_eq!(response.text, "storm");

        let err = text
            .generate(TextRequest {
                system: String::new(),
                prompt: String::new(),
            })
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_embed_input_text() {
        let frame = EmbedInput::Frame {
            image: ImagePayload::new(vec![1]),
            description: "Mara at the door".into(),
        };
        assert_eq!(frame.text(), "Mara at the door");
        assert_eq!(EmbedInput::Text("q".into()).text(), "q");
    }
}
