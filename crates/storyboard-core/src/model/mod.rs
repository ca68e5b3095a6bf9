pub mod budget;
pub mod candidate;
pub mod image;
pub mod memory;
pub mod scene;
pub mod shot;

pub use budget::{BudgetCategory, BudgetSnapshot, CategorySnapshot};
pub use candidate::{Candidate, CandidateId, FastQaReport, RenderParams, Verdict, VisionQaReport};
pub use image::ImagePayload;
pub use memory::MemoryEntry;
pub use scene::{EntityCatalog, EntityKind, EntityProfile, Scene, ScriptInput, StyleGuide};
pub use shot::{Camera, Shot, ShotId, ShotState};
