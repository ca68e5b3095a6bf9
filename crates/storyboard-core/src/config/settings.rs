use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::BudgetCategory;

/// Spend limits in USD. The defaults add up to a 35 USD run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetLimits {
    pub planning: f64,
    pub embedding: f64,
    pub render: f64,
    pub vision_qa: f64,
    /// Optional run-wide ceiling across all categories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            planning: 2.0,
            embedding: 1.0,
            render: 25.0,
            vision_qa: 7.0,
            total: None,
        }
    }
}

impl BudgetLimits {
    pub fn limit(&self, category: BudgetCategory) -> f64 {
        match category {
            BudgetCategory::Planning => self.planning,
            BudgetCategory::Embedding => self.embedding,
            BudgetCategory::Render => self.render,
            BudgetCategory::VisionQa => self.vision_qa,
        }
    }

    /// Same limit for every category, no total.
    pub fn uniform(limit: f64) -> Self {
        Self {
            planning: limit,
            embedding: limit,
            render: limit,
            vision_qa: limit,
            total: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastQaConfig {
    pub min_width: u32,
    pub min_height: u32,
    /// Expected width / height ratio. Unchecked when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_aspect: Option<f64>,
    /// Allowed relative deviation from `expected_aspect`.
    pub aspect_tolerance: f64,
    /// Pixel count at which resolution coverage saturates.
    pub target_pixels: u64,
    pub min_score: f64,
}

impl Default for FastQaConfig {
    fn default() -> Self {
        Self {
            min_width: 256,
            min_height: 256,
            expected_aspect: None,
            aspect_tolerance: 0.05,
            target_pixels: 1_048_576,
            min_score: 0.4,
        }
    }
}

/// Tunables for one pipeline run, read from a JSON file. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_variations: usize,
    pub variations_per_shot: usize,
    pub max_retries: u32,
    pub quality_threshold: f64,
    /// After a retry, give up early when the best score is still below this. 0 disables.
    pub give_up_below: f64,
    /// Review each planned shot against prior frames before rendering.
    pub review_plans: bool,
    pub vision_qa_sample_rate: f64,
    pub max_vision_qa_per_shot: usize,
    pub budget: BudgetLimits,
    pub concurrency: usize,
    pub memory_top_k: usize,
    pub transient_render_retries: u32,
    pub render_backoff_ms: u64,
    pub unavailable_halt_after: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_seed: Option<u64>,
    pub fast_qa: FastQaConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_variations: 3,
            variations_per_shot: 3,
            max_retries: 2,
            quality_threshold: 0.7,
            give_up_below: 0.3,
            review_plans: true,
            vision_qa_sample_rate: 0.1,
            max_vision_qa_per_shot: 2,
            budget: BudgetLimits::default(),
            concurrency: 1,
            memory_top_k: 3,
            transient_render_retries: 2,
            render_backoff_ms: 250,
            unavailable_halt_after: 3,
            sampling_seed: None,
            fast_qa: FastQaConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(data)
            .map_err(|e| CoreError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_variations == 0 {
            return Err(CoreError::Config("max_variations must be at least 1".into()));
        }
        if self.variations_per_shot == 0 {
            return Err(CoreError::Config(
                "variations_per_shot must be at least 1".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(CoreError::Config("concurrency must be at least 1".into()));
        }
        if self.unavailable_halt_after == 0 {
            return Err(CoreError::Config(
                "unavailable_halt_after must be at least 1".into(),
            ));
        }
        check_unit("quality_threshold", self.quality_threshold)?;
        check_unit("give_up_below", self.give_up_below)?;
        check_unit("vision_qa_sample_rate", self.vision_qa_sample_rate)?;
        check_unit("fast_qa.min_score", self.fast_qa.min_score)?;
        if self.fast_qa.aspect_tolerance.is_nan() || self.fast_qa.aspect_tolerance < 0.0 {
            return Err(CoreError::Config(
                "fast_qa.aspect_tolerance must be non-negative".into(),
            ));
        }
        if let Some(aspect) = self.fast_qa.expected_aspect {
            if aspect.is_nan() || aspect <= 0.0 {
                return Err(CoreError::Config(
                    "fast_qa.expected_aspect must be positive".into(),
                ));
            }
        }
        for category in BudgetCategory::ALL {
            let limit = self.budget.limit(category);
            if !limit.is_finite() || limit < 0.0 {
                return Err(CoreError::Config(format!(
                    "budget.{category} must be a non-negative number, got {limit}"
                )));
            }
        }
        if let Some(total) = self.budget.total {
            if !total.is_finite() || total < 0.0 {
                return Err(CoreError::Config(format!(
                    "budget.total must be a non-negative number, got {total}"
                )));
            }
        }
        Ok(())
    }

    /// Variations for a shot: the requested count, or the default, clamped to the maximum.
    pub fn variations_for(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.variations_per_shot)
            .clamp(1, self.max_variations)
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), CoreError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::Config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_variations, 3);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.quality_threshold, 0.7);
        assert_eq!(config.give_up_below, 0.3);
        assert!(config.review_plans);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.fast_qa.min_width, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = PipelineConfig::from_json(
            r#"{"max_retries": 0, "budget": {"render": 1.5}, "fast_qa": {"expected_aspect": 1.5}}"#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.budget.render, 1.5);
        assert_eq!(config.budget.planning, 2.0);
        assert_eq!(config.fast_qa.expected_aspect, Some(1.5));
        assert_eq!(config.fast_qa.min_score, 0.4);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        for json in [
            r#"{"quality_threshold": 1.2}"#,
            r#"{"give_up_below": 2}"#,
            r#"{"vision_qa_sample_rate": -0.1}"#,
            r#"{"max_variations": 0}"#,
            r#"{"concurrency": 0}"#,
            r#"{"budget": {"render": -1}}"#,
            r#"{"fast_qa": {"expected_aspect": 0}}"#,
        ] {
            let err = PipelineConfig::from_json(json).unwrap_err();
            assert!(matches!(err, CoreError::Config(_)), "{json}");
        }
        assert!(matches!(
            PipelineConfig::from_json("{not json").unwrap_err(),
            CoreError::Config(_)
        ));
    }

    #[test]
    fn test_variations_clamped() {
        let config = PipelineConfig {
            max_variations: 4,
            variations_per_shot: 2,
            ..Default::default()
        };
        assert_eq!(config.variations_for(None), 2);
        assert_eq!(config.variations_for(Some(9)), 4);
        assert_eq!(config.variations_for(Some(0)), 1);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pipeline.json");
        std::fs::write(&path, r#"{"memory_top_k": 5, "sampling_seed": 7}"#).unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.memory_top_k, 5);
        assert_eq!(config.sampling_seed, Some(7));
    }
}
