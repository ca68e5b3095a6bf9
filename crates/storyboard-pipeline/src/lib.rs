//! Shot production pipeline.
//!
//! A [`Pipeline`] plans each scene into shots, reviews each plan, then drives
//! every shot through render, quality gate and retry policy until it is
//! accepted or abandoned, spending only what the budget ledger grants.

pub mod health;
pub mod offline;
pub mod planner;
pub mod policy;
pub mod quality;
pub mod renderer;
pub mod review;
pub mod runner;
pub mod variation;

pub use health::CapabilityHealth;
pub use offline::offline_capabilities;
pub use planner::{PlanParseError, ShotPlanner};
pub use policy::{Decision, PolicyEngine};
pub use quality::{QualityGate, VisionQa};
pub use renderer::RendererAdapter;
pub use review::{PlanReviewer, PlanRevision};
pub use runner::Pipeline;
pub use variation::{ConditioningStrategy, RotatingConditioning, VariationManager};
