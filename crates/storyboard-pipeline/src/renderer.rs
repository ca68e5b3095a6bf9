use std::sync::Arc;
use std::time::Duration;

use storyboard_core::capability::{CapabilityError, ImageSynthesizer, SynthesisRequest};
use storyboard_core::error::PipelineError;
use storyboard_core::ledger::BudgetLedger;
use storyboard_core::model::{BudgetCategory, Candidate, ImagePayload};

use crate::health::CapabilityHealth;
use crate::variation::RenderRequest;

const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Issues image-synthesis calls for render requests.
///
/// Failed calls are retried locally with exponential backoff. These retries
/// never count against the shot's retry budget.
pub struct RendererAdapter {
    synthesizer: Arc<dyn ImageSynthesizer>,
    ledger: Arc<BudgetLedger>,
    health: Arc<CapabilityHealth>,
    transient_retries: u32,
    backoff_base: Duration,
}

impl RendererAdapter {
    pub fn new(
        synthesizer: Arc<dyn ImageSynthesizer>,
        ledger: Arc<BudgetLedger>,
        health: Arc<CapabilityHealth>,
        transient_retries: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            synthesizer,
            ledger,
            health,
            transient_retries,
            backoff_base,
        }
    }

    /// Estimated cost of one synthesis call for `request`.
    pub fn estimate(&self, request: &RenderRequest) -> f64 {
        self.synthesizer.estimate_cost(&synthesis_request(request))
    }

    /// Render one variation.
    ///
    /// Returns a candidate carrying an image, or a failed candidate once the
    /// local retries are used up. Budget denial and a tripped health monitor
    /// are returned as errors; no call is made in either case.
    pub async fn render(&self, request: &RenderRequest) -> Result<Candidate, PipelineError> {
        let synthesis = synthesis_request(request);
        let estimate = self.synthesizer.estimate_cost(&synthesis);
        let mut last_failure = String::from("no render attempted");

        for retry in 0..=self.transient_retries {
            if let Some(halt) = self.health.halt_error() {
                return Err(halt);
            }
            if retry > 0 {
                let delay = self.compute_retry_backoff(retry - 1);
                tracing::debug!(
                    shot = %request.shot_id,
                    variation = request.variation_index,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying render"
                );
                tokio::time::sleep(delay).await;
            }

            let auth = self.ledger.reserve(BudgetCategory::Render, estimate)?;
            match self.synthesizer.synthesize(synthesis.clone()).await {
                Ok(output) if !output.image.is_empty() => {
                    self.ledger.settle(auth, output.cost);
                    self.health.record_success();
                    let image = ImagePayload::new(output.image);
                    tracing::debug!(
                        shot = %request.shot_id,
                        variation = request.variation_index,
                        digest = %image.short_digest(),
                        bytes = image.len(),
                        "Variation rendered"
                    );
                    return Ok(Candidate::rendered(
                        request.shot_id,
                        request.attempt,
                        request.variation_index,
                        image,
                        request.params(),
                    ));
                }
                Ok(output) => {
                    self.ledger.settle(auth, output.cost);
                    self.health.record_success();
                    last_failure =
                        PipelineError::RenderFailure("empty image payload".into()).to_string();
                }
                Err(e) => {
                    self.ledger.settle(auth, 0.0);
                    if let Some(halt) = self.health.record_failure(self.synthesizer.name(), &e) {
                        return Err(halt);
                    }
                    last_failure = PipelineError::RenderFailure(e.to_string()).to_string();
                    tracing::warn!(
                        shot = %request.shot_id,
                        variation = request.variation_index,
                        retry,
                        error = %e,
                        "Render call failed"
                    );
                    if matches!(e, CapabilityError::Rejected(_)) {
                        break;
                    }
                }
            }
        }

        Ok(Candidate::failed(
            request.shot_id,
            request.attempt,
            request.variation_index,
            request.params(),
            last_failure,
        ))
    }

    fn compute_retry_backoff(&self, retries_used: u32) -> Duration {
        let base_ms = self.backoff_base.as_millis();
        if base_ms == 0 {
            return Duration::from_millis(0);
        }
        let max_ms = MAX_BACKOFF.as_millis().max(base_ms);
        let shift = retries_used.min(20);
        let backoff_ms = base_ms.saturating_mul(1u128 << shift).min(max_ms);
        Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
    }
}

fn synthesis_request(request: &RenderRequest) -> SynthesisRequest {
    SynthesisRequest {
        prompt: request.prompt.clone(),
        negative_prompt: request.negative_prompt.clone(),
        conditioning: request.conditioning.clone(),
        reference_weight: request.reference_weight,
        style: request.style.clone(),
        seed: request.seed,
    }
}
