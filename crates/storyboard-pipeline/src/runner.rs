//! Run orchestration: scenes in script order, shots under a concurrency
//! limit, each shot driven through the state machine to a terminal state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use storyboard_core::capability::Capabilities;
use storyboard_core::config::PipelineConfig;
use storyboard_core::error::PipelineError;
use storyboard_core::events::EventLog;
use storyboard_core::ledger::BudgetLedger;
use storyboard_core::model::{
    BudgetCategory, Candidate, EntityCatalog, MemoryEntry, Scene, ScriptInput, Shot, ShotState,
    StyleGuide,
};
use storyboard_core::storage::{
    AttemptScores, CandidateScore, RunReport, RunStatus, SceneOutcome, SceneStatus, ShotOutcome,
};
use storyboard_memory::{MemoryError, MemoryService, VisualMemory};
use tokio_util::sync::CancellationToken;

use crate::health::CapabilityHealth;
use crate::planner::ShotPlanner;
use crate::policy::{
    Decision, PolicyEngine, REASON_CANCELLED, REASON_RENDER_BUDGET, REASON_UNAVAILABLE,
};
use crate::quality::{QualityGate, VisionQa};
use crate::renderer::RendererAdapter;
use crate::review::PlanReviewer;
use crate::variation::{AttemptHistory, ConditioningStrategy, RenderContext, RenderRequest, VariationManager};

/// One storyboard run: owns the ledger, memory, event log and health monitor
/// shared by every component.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    ledger: Arc<BudgetLedger>,
    events: Arc<EventLog>,
    health: Arc<CapabilityHealth>,
    memory: MemoryService,
    embedder_name: String,
    planner: ShotPlanner,
    reviewer: PlanReviewer,
    variations: VariationManager,
    renderer: RendererAdapter,
    gate: QualityGate,
    policy: PolicyEngine,
    cancel: CancellationToken,
    render_exhausted: AtomicBool,
}

/// Per-shot working state carried across attempts.
#[derive(Default)]
struct ShotProgress {
    history: AttemptHistory,
    vision_calls: usize,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, capabilities: Capabilities) -> Self {
        Self::with_memory(config, capabilities, Arc::new(VisualMemory::new()))
    }

    /// Build a pipeline that continues from an existing memory, e.g. a
    /// snapshot of an earlier run.
    pub fn with_memory(
        config: PipelineConfig,
        capabilities: Capabilities,
        store: Arc<VisualMemory>,
    ) -> Self {
        let config = Arc::new(config);
        let ledger = Arc::new(BudgetLedger::new(&config.budget));
        let events = Arc::new(EventLog::new());
        let health = Arc::new(CapabilityHealth::new(config.unavailable_halt_after));

        let embedder_name = capabilities.embedder.name().to_string();
        let memory = MemoryService::new(store, capabilities.embedder, ledger.clone());
        let reviewer = PlanReviewer::new(capabilities.text.clone(), ledger.clone(), health.clone());
        let planner = ShotPlanner::new(
            capabilities.text,
            ledger.clone(),
            health.clone(),
            config.clone(),
        );
        let renderer = RendererAdapter::new(
            capabilities.synthesizer,
            ledger.clone(),
            health.clone(),
            config.transient_render_retries,
            Duration::from_millis(config.render_backoff_ms),
        );
        let vision = VisionQa::new(
            capabilities.critic,
            ledger.clone(),
            health.clone(),
            config.quality_threshold,
        );
        let gate = QualityGate::new(&config, vision);
        let policy = PolicyEngine::new(config.quality_threshold, config.max_retries, events.clone())
            .with_give_up_below(config.give_up_below);
        let cancel = CancellationToken::new();
        ledger.bind_cancellation(cancel.clone());

        Self {
            variations: VariationManager::with_default_strategy(config.max_variations),
            config,
            ledger,
            events,
            health,
            memory,
            embedder_name,
            planner,
            reviewer,
            renderer,
            gate,
            policy,
            cancel,
            render_exhausted: AtomicBool::new(false),
        }
    }

    /// Replace the retry conditioning strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn ConditioningStrategy>) -> Self {
        self.variations = VariationManager::new(strategy, self.config.max_variations);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ledger.bind_cancellation(token.clone());
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    pub fn memory(&self) -> &Arc<VisualMemory> {
        self.memory.store()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Produce the storyboard for `input`.
    ///
    /// Never fails: every planned shot ends ACCEPTED or ABANDONED and the
    /// report says why the run stopped.
    pub async fn run(&self, input: &ScriptInput) -> RunReport {
        let mut report = RunReport::new(Utc::now());
        let catalog = input.catalog();
        tracing::info!(
            run = %report.short_id(),
            scenes = input.scenes.len(),
            entities = catalog.len(),
            concurrency = self.config.concurrency,
            "Run started"
        );

        for scene in &input.scenes {
            if let Some(reason) = self.stop_reason() {
                report.scenes.push(SceneOutcome {
                    scene_id: scene.id,
                    status: SceneStatus::Skipped,
                    shot_count: 0,
                    reason: Some(reason.to_string()),
                });
                continue;
            }

            let shots = match self.plan(scene, &input.style, &catalog).await {
                Ok(shots) => shots,
                Err(e) => {
                    tracing::warn!(scene = scene.id, error = %e, "Scene unplannable, skipping");
                    report.scenes.push(SceneOutcome {
                        scene_id: scene.id,
                        status: SceneStatus::Unplannable,
                        shot_count: 0,
                        reason: Some(e.to_string()),
                    });
                    continue;
                }
            };
            report.scenes.push(SceneOutcome {
                scene_id: scene.id,
                status: SceneStatus::Planned,
                shot_count: shots.len(),
                reason: None,
            });

            let mut outcomes: Vec<ShotOutcome> = stream::iter(shots)
                .map(|shot| self.produce_shot(shot, &input.style, &catalog))
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;
            outcomes.sort_by_key(ShotOutcome::id);
            report.shots.extend(outcomes);
        }

        report.status = self.final_status();
        report.finished_at = Utc::now();
        report.budget = self.ledger.snapshot();
        report.events = self.events.snapshot();
        report.memory_entries = self.memory.store().len();

        let stats = report.stats();
        tracing::info!(
            run = %report.short_id(),
            status = %report.status,
            shots = stats.shots,
            accepted = stats.accepted,
            abandoned = stats.abandoned,
            spent = stats.total_spent,
            "Run finished"
        );
        report
    }

    async fn plan(
        &self,
        scene: &Scene,
        style: &StyleGuide,
        catalog: &EntityCatalog,
    ) -> Result<Vec<Shot>, PipelineError> {
        let context = self.recall(&scene.text, &scene.entities).await;
        self.planner.plan_scene(scene, style, catalog, &context).await
    }

    async fn produce_shot(&self, mut shot: Shot, style: &StyleGuide, catalog: &EntityCatalog) -> ShotOutcome {
        let mut progress = ShotProgress::default();
        if let Err(e) = self.drive(&mut shot, &mut progress, style, catalog).await {
            tracing::error!(shot = %shot.id, error = %e, "Shot production failed");
            if !shot.state().is_terminal() {
                let reason = e.to_string();
                if let Err(e) = self.policy.abandon(&mut shot, &reason, progress.history.candidates()) {
                    tracing::error!(shot = %shot.id, error = %e, "Could not abandon shot");
                }
            }
        }

        let attempts = progress
            .history
            .attempts()
            .iter()
            .enumerate()
            .map(|(attempt, candidates)| AttemptScores {
                attempt: u32::try_from(attempt).unwrap_or(u32::MAX),
                candidates: candidates.iter().map(CandidateScore::from).collect(),
            })
            .collect();
        ShotOutcome {
            shot,
            attempts,
            vision_qa_calls: progress.vision_calls,
        }
    }

    /// Attempt loop for one shot. Bounded by `max_retries + 1` evaluations.
    async fn drive(
        &self,
        shot: &mut Shot,
        progress: &mut ShotProgress,
        style: &StyleGuide,
        catalog: &EntityCatalog,
    ) -> Result<(), PipelineError> {
        let memory = self.recall(&shot.description(), &shot.entities).await;
        if self.config.review_plans && self.stop_reason().is_none() {
            self.review_plan(shot, style, catalog, &memory).await;
        }
        let context = RenderContext::for_shot(shot, style, catalog, memory);

        loop {
            if let Some(reason) = self.stop_reason() {
                return self.policy.abandon(shot, reason, progress.history.candidates());
            }

            let requests = self.variations.expand(shot, &context, &progress.history);
            let render_estimate = requests
                .first()
                .map(|r| self.renderer.estimate(r))
                .unwrap_or(0.0);
            let mut candidates = self.render_all(&requests).await;
            let rendered = candidates.iter().filter(|c| c.has_image()).count();
            self.policy.advance(
                shot,
                ShotState::VariationsRendered,
                format!("{rendered}/{} variations rendered", candidates.len()),
            )?;

            if let Some(reason) = self.interruption() {
                progress.history.push(candidates);
                return self.policy.abandon(shot, reason, progress.history.candidates());
            }

            let gate = self
                .gate
                .evaluate(shot, &context.style.text, &mut candidates, &mut progress.vision_calls)
                .await;
            let best = candidates
                .iter()
                .map(Candidate::combined_score)
                .fold(0.0_f64, f64::max);
            self.policy.advance(
                shot,
                ShotState::Evaluated,
                format!("best {best:.2}, {} vision calls", gate.vision_calls),
            )?;

            if let Some(halt) = &gate.halted {
                tracing::warn!(shot = %shot.id, error = %halt, "Vision critic halted the run");
            }
            let interrupted = self
                .interruption()
                .or(gate.halted.as_ref().map(|_| REASON_UNAVAILABLE));
            if let Some(reason) = interrupted {
                progress.history.push(candidates);
                return self.policy.abandon(shot, reason, progress.history.candidates());
            }

            let can_afford = !self.render_exhausted.load(Ordering::SeqCst)
                && self.ledger.can_afford(BudgetCategory::Render, render_estimate);
            let decision = self.policy.decide(shot, &candidates, can_afford);
            progress.history.push(candidates);

            match decision {
                Decision::Accept { candidate, score } => {
                    self.policy.accept(shot, &candidate, score)?;
                    if let Some(accepted) = progress.history.candidates().find(|c| c.id == candidate) {
                        let remembered = self.memory.remember(shot, accepted).await;
                        match &remembered.embed_error {
                            Some(e) => self.note_memory_error(e),
                            None => self.health.record_success(),
                        }
                        tracing::debug!(shot = %shot.id, seq = remembered.seq, "Frame remembered");
                    }
                    return Ok(());
                }
                Decision::Retry { reason } => {
                    self.policy.advance(shot, ShotState::Retrying, reason)?;
                }
                Decision::Abandon { reason } => {
                    let reason = if self.cancel.is_cancelled() {
                        REASON_CANCELLED.to_string()
                    } else {
                        if reason == REASON_RENDER_BUDGET {
                            self.render_exhausted.store(true, Ordering::SeqCst);
                        }
                        reason
                    };
                    return self.policy.abandon(shot, &reason, progress.history.candidates());
                }
            }
        }
    }

    /// Let the reviewer adjust the plan. A failed review keeps the plan as planned.
    async fn review_plan(
        &self,
        shot: &mut Shot,
        style: &StyleGuide,
        catalog: &EntityCatalog,
        memory: &[MemoryEntry],
    ) {
        match self.reviewer.review(shot, style, catalog, memory).await {
            Ok(revision) => {
                if revision.apply(shot) {
                    tracing::info!(
                        shot = %shot.id,
                        issues = revision.issues.len(),
                        "Plan revised by review"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(shot = %shot.id, error = %e, "Plan review failed, keeping the plan");
            }
        }
    }

    /// Render every variation of an attempt concurrently and wait for all of them.
    async fn render_all(&self, requests: &[RenderRequest]) -> Vec<Candidate> {
        let results = join_all(requests.iter().map(|r| self.renderer.render(r))).await;
        requests
            .iter()
            .zip(results)
            .map(|(request, result)| match result {
                Ok(candidate) => candidate,
                Err(e) => {
                    if matches!(e, PipelineError::BudgetExceeded(_)) && !self.cancel.is_cancelled() {
                        tracing::warn!(
                            shot = %request.shot_id,
                            variation = request.variation_index,
                            error = %e,
                            "Render budget exhausted"
                        );
                        self.render_exhausted.store(true, Ordering::SeqCst);
                    }
                    Candidate::failed(
                        request.shot_id,
                        request.attempt,
                        request.variation_index,
                        request.params(),
                        e.to_string(),
                    )
                }
            })
            .collect()
    }

    /// Prior frames for `description`. Memory failures only cost context.
    async fn recall(&self, description: &str, entities: &[String]) -> Vec<MemoryEntry> {
        match self
            .memory
            .recall(description, entities, self.config.memory_top_k)
            .await
        {
            Ok(recalled) => {
                if recalled.embedded {
                    self.health.record_success();
                }
                recalled.hits.into_iter().map(|hit| hit.entry).collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Memory recall failed, continuing without context");
                self.note_memory_error(&e);
                Vec::new()
            }
        }
    }

    fn note_memory_error(&self, error: &MemoryError) {
        if let Some(cause) = error.capability_error() {
            self.health.record_failure(&self.embedder_name, cause);
        }
    }

    /// Stops that end the attempt in progress: cancellation and a halt.
    fn interruption(&self) -> Option<&'static str> {
        if self.cancel.is_cancelled() {
            self.ledger.close();
            return Some(REASON_CANCELLED);
        }
        if self.health.is_tripped() {
            return Some(REASON_UNAVAILABLE);
        }
        None
    }

    /// Why no new attempt may start, if anything stops it.
    fn stop_reason(&self) -> Option<&'static str> {
        if let Some(reason) = self.interruption() {
            return Some(reason);
        }
        if self.render_exhausted.load(Ordering::SeqCst) {
            return Some(REASON_RENDER_BUDGET);
        }
        None
    }

    fn final_status(&self) -> RunStatus {
        if self.cancel.is_cancelled() {
            RunStatus::Cancelled
        } else if let Some(halt) = self.health.halt_error() {
            RunStatus::Halted {
                reason: halt.to_string(),
            }
        } else if self.render_exhausted.load(Ordering::SeqCst) {
            RunStatus::Halted {
                reason: REASON_RENDER_BUDGET.to_string(),
            }
        } else {
            RunStatus::Completed
        }
    }
}
