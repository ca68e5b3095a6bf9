use std::cmp::Ordering;
use std::sync::Arc;

use storyboard_core::error::PipelineError;
use storyboard_core::events::EventLog;
use storyboard_core::model::{Candidate, CandidateId, Shot, ShotState, Verdict};

pub const REASON_RETRIES_EXHAUSTED: &str = "retries exhausted";
pub const REASON_RENDER_BUDGET: &str = "render budget exhausted";
pub const REASON_NO_USABLE_RENDER: &str = "no usable render";
pub const REASON_CANCELLED: &str = "run cancelled";
pub const REASON_UNAVAILABLE: &str = "capability unavailable";
pub const REASON_LOW_QUALITY: &str = "quality too low to recover";

/// Outcome of evaluating one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept { candidate: CandidateId, score: f64 },
    Retry { reason: String },
    Abandon { reason: String },
}

/// Maps an evaluated attempt to accept, retry or abandon, and applies the
/// resulting shot transitions.
pub struct PolicyEngine {
    threshold: f64,
    max_retries: u32,
    give_up_below: f64,
    events: Arc<EventLog>,
}

impl PolicyEngine {
    pub fn new(threshold: f64, max_retries: u32, events: Arc<EventLog>) -> Self {
        Self {
            threshold,
            max_retries,
            give_up_below: 0.0,
            events,
        }
    }

    /// Abandon a shot whose retried attempt still scores below `floor`.
    pub fn with_give_up_below(mut self, floor: f64) -> Self {
        self.give_up_below = floor;
        self
    }

    /// Pure decision rule for an evaluated attempt.
    ///
    /// `can_afford_render` says whether the ledger could pay for at least
    /// one more render call.
    pub fn decide(&self, shot: &Shot, attempt: &[Candidate], can_afford_render: bool) -> Decision {
        if let Some(best) = best_acceptable(attempt) {
            let score = best.combined_score();
            if score >= self.threshold {
                return Decision::Accept {
                    candidate: best.id.clone(),
                    score,
                };
            }
        }
        let best_score = best_candidate(attempt)
            .map(Candidate::combined_score)
            .unwrap_or(0.0);
        if shot.retry_count() >= self.max_retries {
            return Decision::Abandon {
                reason: REASON_RETRIES_EXHAUSTED.to_string(),
            };
        }
        if shot.retry_count() > 0 && best_score < self.give_up_below {
            return Decision::Abandon {
                reason: REASON_LOW_QUALITY.to_string(),
            };
        }
        if !can_afford_render {
            return Decision::Abandon {
                reason: REASON_RENDER_BUDGET.to_string(),
            };
        }
        Decision::Retry {
            reason: format!("best score {best_score:.2} below {:.2}", self.threshold),
        }
    }

    /// Apply a transition and record it in the event log.
    pub fn advance(
        &self,
        shot: &mut Shot,
        to: ShotState,
        reason: impl Into<String>,
    ) -> Result<(), PipelineError> {
        let event = shot.transition(to, reason)?;
        self.events.record(event);
        Ok(())
    }

    /// Mark `shot` abandoned, keeping the best candidate of any attempt as a
    /// degraded result.
    pub fn abandon<'a>(
        &self,
        shot: &mut Shot,
        reason: &str,
        candidates: impl IntoIterator<Item = &'a Candidate>,
    ) -> Result<(), PipelineError> {
        let fallback = degraded_pick(candidates);
        let reason = match fallback {
            None if reason == REASON_RETRIES_EXHAUSTED => REASON_NO_USABLE_RENDER,
            _ => reason,
        };
        self.advance(shot, ShotState::Abandoned, reason)?;
        shot.record_result(fallback.map(|c| c.id.clone()), fallback.is_some());
        Ok(())
    }

    pub fn accept(&self, shot: &mut Shot, candidate: &CandidateId, score: f64) -> Result<(), PipelineError> {
        self.advance(shot, ShotState::Accepted, format!("score {score:.2}"))?;
        shot.record_result(Some(candidate.clone()), false);
        Ok(())
    }
}

/// Highest combined score; ties go to the lowest variation index.
pub fn best_candidate(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().max_by(|a, b| rank(a, b))
}

/// Highest-ranked candidate whose verdict is not `Fail`.
pub fn best_acceptable(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .filter(|c| c.verdict != Verdict::Fail)
        .max_by(|a, b| rank(a, b))
}

fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    a.combined_score()
        .total_cmp(&b.combined_score())
        .then_with(|| b.variation_index.cmp(&a.variation_index))
}

/// Best candidate across attempts for a degraded result. Only candidates with
/// an image qualify; earlier attempts win ties.
pub fn degraded_pick<'a>(candidates: impl IntoIterator<Item = &'a Candidate>) -> Option<&'a Candidate> {
    candidates
        .into_iter()
        .filter(|c| c.has_image())
        .fold(None, |best: Option<&Candidate>, c| match best {
            Some(b) if b.combined_score() >= c.combined_score() => Some(b),
            _ => Some(c),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyboard_core::model::{Camera, FastQaReport, ImagePayload, RenderParams, ShotId};

    fn candidate(variation: usize, score: f64, verdict: Verdict) -> Candidate {
        let mut c = Candidate::rendered(
            ShotId::new(1, 1),
            0,
            variation,
            ImagePayload::new(vec![variation as u8]),
            RenderParams::default(),
        );
        c.fast_qa = Some(FastQaReport {
            score,
            passed: true,
            ..Default::default()
        });
        c.verdict = verdict;
        c
    }

    fn evaluated_shot(retries: u32) -> Shot {
        let mut shot = Shot::new(ShotId::new(1, 1), "Mara", Camera::new("low", "wide"));
        for _ in 0..retries {
            shot.transition(ShotState::VariationsRendered, "").unwrap();
            shot.transition(ShotState::Evaluated, "").unwrap();
            shot.transition(ShotState::Retrying, "").unwrap();
        }
        shot.transition(ShotState::VariationsRendered, "").unwrap();
        shot.transition(ShotState::Evaluated, "").unwrap();
        shot
    }

    fn engine(max_retries: u32) -> PolicyEngine {
        PolicyEngine::new(0.7, max_retries, Arc::new(EventLog::new()))
    }

    #[test]
    fn test_accepts_best_above_threshold() {
        let attempt = vec![
            candidate(0, 0.75, Verdict::Pass),
            candidate(1, 0.9, Verdict::Pass),
            candidate(2, 0.9, Verdict::Pass),
        ];
        let decision = engine(2).decide(&evaluated_shot(0), &attempt, true);
        assert_eq!(
            decision,
            Decision::Accept {
                candidate: attempt[1].id.clone(),
                score: 0.9
            }
        );
    }

    #[test]
    fn test_failed_verdict_blocks_acceptance() {
        let attempt = vec![candidate(0, 0.95, Verdict::Fail)];
        let decision = engine(2).decide(&evaluated_shot(0), &attempt, true);
        assert!(matches!(decision, Decision::Retry { .. }));
    }

    #[test]
    fn test_failed_top_scorer_does_not_hide_passing_candidate() {
        let engine = PolicyEngine::new(0.3, 2, Arc::new(EventLog::new()));
        let attempt = vec![
            candidate(0, 0.35, Verdict::Fail),
            candidate(1, 0.32, Verdict::Pass),
            candidate(2, 0.9, Verdict::Fail),
        ];
        assert_eq!(
            engine.decide(&evaluated_shot(0), &attempt, true),
            Decision::Accept {
                candidate: attempt[1].id.clone(),
                score: 0.32
            }
        );
    }

    #[test]
    fn test_low_quality_after_retry_gives_up() {
        let engine = engine(3).with_give_up_below(0.3);
        let attempt = vec![candidate(0, 0.2, Verdict::Fail)];
        assert!(matches!(
            engine.decide(&evaluated_shot(0), &attempt, true),
            Decision::Retry { .. }
        ));
        assert_eq!(
            engine.decide(&evaluated_shot(1), &attempt, true),
            Decision::Abandon {
                reason: REASON_LOW_QUALITY.into()
            }
        );
        let recoverable = vec![candidate(0, 0.5, Verdict::Fail)];
        assert!(matches!(
            engine.decide(&evaluated_shot(1), &recoverable, true),
            Decision::Retry { .. }
        ));
    }

    #[test]
    fn test_retry_then_abandon() {
        let attempt = vec![candidate(0, 0.5, Verdict::Fail)];
        assert!(matches!(
            engine(1).decide(&evaluated_shot(0), &attempt, true),
            Decision::Retry { .. }
        ));
        assert_eq!(
            engine(1).decide(&evaluated_shot(1), &attempt, true),
            Decision::Abandon {
                reason: REASON_RETRIES_EXHAUSTED.into()
            }
        );
        assert_eq!(
            engine(0).decide(&evaluated_shot(0), &attempt, true),
            Decision::Abandon {
                reason: REASON_RETRIES_EXHAUSTED.into()
            }
        );
    }

    #[test]
    fn test_unaffordable_retry_abandons() {
        let attempt = vec![candidate(0, 0.5, Verdict::Fail)];
        assert_eq!(
            engine(2).decide(&evaluated_shot(0), &attempt, false),
            Decision::Abandon {
                reason: REASON_RENDER_BUDGET.into()
            }
        );
    }

    #[test]
    fn test_decision_is_deterministic() {
        let attempt = vec![
            candidate(0, 0.6, Verdict::Fail),
            candidate(1, 0.6, Verdict::Fail),
        ];
        let shot = evaluated_shot(0);
        let engine = engine(2);
        let first = engine.decide(&shot, &attempt, true);
        for _ in 0..10 {
            assert_eq!(engine.decide(&shot, &attempt, true), first);
        }
        assert_eq!(best_candidate(&attempt).unwrap().variation_index, 0);
    }

    #[test]
    fn test_abandon_records_degraded_best() {
        let events = Arc::new(EventLog::new());
        let engine = PolicyEngine::new(0.7, 0, events.clone());
        let mut shot = evaluated_shot(0);
        let failed = Candidate::failed(ShotId::new(1, 1), 0, 0, RenderParams::default(), "timeout");
        let weak = candidate(1, 0.3, Verdict::Fail);
        let better = candidate(2, 0.6, Verdict::Fail);

        engine
            .abandon(&mut shot, REASON_RETRIES_EXHAUSTED, [&failed, &weak, &better])
            .unwrap();
        assert_eq!(shot.state(), ShotState::Abandoned);
        assert_eq!(shot.selected(), Some(&better.id));
        assert!(shot.is_degraded());
        assert_eq!(shot.reason(), Some(REASON_RETRIES_EXHAUSTED));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_abandon_without_images() {
        let engine = engine(0);
        let mut shot = evaluated_shot(0);
        let failed = Candidate::failed(ShotId::new(1, 1), 0, 0, RenderParams::default(), "timeout");
        engine
            .abandon(&mut shot, REASON_RETRIES_EXHAUSTED, [&failed])
            .unwrap();
        assert_eq!(shot.reason(), Some(REASON_NO_USABLE_RENDER));
        assert!(shot.selected().is_none());
        assert!(!shot.is_degraded());
    }

    #[test]
    fn test_illegal_transition_not_recorded() {
        let events = Arc::new(EventLog::new());
        let engine = PolicyEngine::new(0.7, 2, events.clone());
        let mut shot = Shot::new(ShotId::new(1, 1), "Mara", Camera::new("low", "wide"));
        assert!(engine.advance(&mut shot, ShotState::Evaluated, "").is_err());
        assert!(events.is_empty());
        assert_eq!(shot.state(), ShotState::Planned);
    }
}
