pub mod settings;

pub use settings::{BudgetLimits, FastQaConfig, PipelineConfig};
