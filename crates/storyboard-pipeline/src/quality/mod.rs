//! Two-tier quality gate: Fast QA on every candidate, then sampled Vision QA.

pub mod fast;
pub mod sampling;
pub mod vision;

pub use fast::FastQa;
pub use sampling::VisionSampler;
pub use vision::{CritiqueOutcome, VisionQa};

use futures_util::future::join_all;
use storyboard_core::config::PipelineConfig;
use storyboard_core::error::PipelineError;
use storyboard_core::model::{Candidate, Shot, Verdict};

/// Summary of one gate pass over an attempt's candidates.
#[derive(Debug, Default)]
pub struct GateReport {
    pub vision_calls: usize,
    /// Set when a critic failure tripped the health monitor.
    pub halted: Option<PipelineError>,
}

pub struct QualityGate {
    fast: FastQa,
    vision: VisionQa,
    sampler: VisionSampler,
    threshold: f64,
    max_vision_per_shot: usize,
}

impl QualityGate {
    pub fn new(config: &PipelineConfig, vision: VisionQa) -> Self {
        Self {
            fast: FastQa::new(config.fast_qa.clone()),
            vision,
            sampler: VisionSampler::new(config.vision_qa_sample_rate, config.sampling_seed),
            threshold: config.quality_threshold,
            max_vision_per_shot: config.max_vision_qa_per_shot,
        }
    }

    /// Score every candidate of an attempt and finalize its verdict.
    ///
    /// `vision_used` counts Vision-QA calls already spent on this shot and is
    /// advanced by the calls made here.
    pub async fn evaluate(
        &self,
        shot: &Shot,
        style: &str,
        candidates: &mut [Candidate],
        vision_used: &mut usize,
    ) -> GateReport {
        for candidate in candidates.iter_mut() {
            if candidate.verdict != Verdict::Pending {
                continue;
            }
            let Some(image) = &candidate.image else {
                candidate.verdict = Verdict::Fail;
                continue;
            };
            let report = self.fast.evaluate(image.bytes());
            if !report.passed {
                tracing::debug!(
                    shot = %shot.id,
                    variation = candidate.variation_index,
                    score = report.score,
                    issues = ?report.issues,
                    "Fast QA rejected candidate"
                );
                candidate.verdict = Verdict::Fail;
            }
            candidate.fast_qa = Some(report);
        }

        let mut report = GateReport::default();
        let quota = self.max_vision_per_shot.saturating_sub(*vision_used);
        let selected = if self.sampler.is_disabled() || quota == 0 {
            Vec::new()
        } else {
            let attempt = candidates.first().map(|c| c.attempt).unwrap_or(0);
            let mut rng = self.sampler.rng_for(shot.id, attempt);
            self.sampler.select(candidates, quota, &mut rng)
        };

        if !selected.is_empty() {
            let description = shot.description();
            let batch: &[Candidate] = candidates;
            let outcomes = join_all(
                selected
                    .iter()
                    .map(|&i| self.vision.critique(&batch[i], &description, style)),
            )
            .await;
            for (index, outcome) in selected.into_iter().zip(outcomes) {
                if outcome.called() {
                    report.vision_calls += 1;
                }
                match outcome {
                    CritiqueOutcome::Scored(vision) => candidates[index].vision_qa = Some(vision),
                    CritiqueOutcome::Skipped(_) | CritiqueOutcome::Failed(_) => {}
                    CritiqueOutcome::Halted(e) => report.halted = Some(e),
                }
            }
            *vision_used += report.vision_calls;
        }

        for candidate in candidates.iter_mut() {
            if candidate.verdict != Verdict::Pending {
                continue;
            }
            let passed = match &candidate.vision_qa {
                Some(vision) => vision.passed,
                None => candidate.fast_score().unwrap_or(0.0) >= self.threshold,
            };
            candidate.verdict = if passed { Verdict::Pass } else { Verdict::Fail };
        }
        report
    }
}
