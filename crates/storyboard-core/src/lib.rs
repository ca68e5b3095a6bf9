//! Core data model, budget ledger and capability interfaces for the
//! storyboard shot production pipeline.

pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod model;
pub mod storage;

pub use capability::{
    Capabilities, CapabilityError, Critique, CritiqueRequest, EmbedInput, Embedder, Embedding,
    ImageSynthesizer, Synthesis, SynthesisRequest, TextGenerator, TextRequest, TextResponse,
    VisionCritic,
};
pub use config::{BudgetLimits, FastQaConfig, PipelineConfig};
pub use error::{BudgetExceeded, CoreError, PipelineError};
pub use events::{EventLog, TransitionEvent};
pub use ledger::{Authorization, BudgetLedger};
pub use storage::{RunReport, RunStats, RunStatus};
