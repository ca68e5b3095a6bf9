use std::collections::BTreeMap;
use std::fs;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::events::TransitionEvent;
use crate::model::{
    BudgetCategory, BudgetSnapshot, Candidate, CandidateId, Shot, ShotId, ShotState, Verdict,
};

pub const REPORT_FILE: &str = "run.json";
pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Halted { reason: String },
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::Cancelled => f.write_str("cancelled"),
            RunStatus::Halted { reason } => write!(f, "halted ({reason})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    Planned,
    Unplannable,
    /// Never reached because the run was cancelled or halted first.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneOutcome {
    pub scene_id: u32,
    pub status: SceneStatus,
    pub shot_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Score summary of one candidate, as kept in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub candidate_id: CandidateId,
    pub variation_index: usize,
    pub framing: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_score: Option<f64>,
    pub combined_score: f64,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl From<&Candidate> for CandidateScore {
    fn from(c: &Candidate) -> Self {
        let mut issues: Vec<String> = c
            .fast_qa
            .as_ref()
            .map(|f| f.issues.clone())
            .unwrap_or_default();
        if let Some(vision) = &c.vision_qa {
            issues.extend(vision.issues.iter().cloned());
        }
        Self {
            candidate_id: c.id.clone(),
            variation_index: c.variation_index,
            framing: c.params.framing.clone(),
            fast_score: c.fast_score(),
            vision_score: c.vision_qa.as_ref().map(|v| v.score),
            combined_score: c.combined_score(),
            verdict: c.verdict,
            image_digest: c.image.as_ref().map(|i| i.digest.clone()),
            issues,
            failure: c.failure.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptScores {
    pub attempt: u32,
    pub candidates: Vec<CandidateScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotOutcome {
    pub shot: Shot,
    pub attempts: Vec<AttemptScores>,
    #[serde(default)]
    pub vision_qa_calls: usize,
}

impl ShotOutcome {
    pub fn id(&self) -> ShotId {
        self.shot.id
    }

    pub fn state(&self) -> ShotState {
        self.shot.state()
    }

    /// Score of the selected candidate, if any.
    pub fn selected_score(&self) -> Option<f64> {
        let selected = self.shot.selected()?;
        self.attempts
            .iter()
            .flat_map(|a| a.candidates.iter())
            .find(|c| &c.candidate_id == selected)
            .map(|c| c.combined_score)
    }

    pub fn candidate_count(&self) -> usize {
        self.attempts.iter().map(|a| a.candidates.len()).sum()
    }
}

/// Aggregate metrics over a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub scenes: usize,
    pub scenes_unplannable: usize,
    pub shots: usize,
    pub accepted: usize,
    pub abandoned: usize,
    pub degraded: usize,
    pub accept_rate: f64,
    pub total_retries: u32,
    pub avg_retries: f64,
    pub candidates: usize,
    pub render_failures: usize,
    pub vision_qa_calls: usize,
    pub memory_entries: usize,
    pub spend: BTreeMap<BudgetCategory, f64>,
    pub total_spent: f64,
    pub utilization: f64,
}

/// Everything a finished (or stopped) run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub scenes: Vec<SceneOutcome>,
    pub shots: Vec<ShotOutcome>,
    pub budget: BudgetSnapshot,
    pub events: Vec<TransitionEvent>,
    pub memory_entries: usize,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4().as_simple().to_string(),
            started_at,
            finished_at: started_at,
            status: RunStatus::Completed,
            scenes: Vec::new(),
            shots: Vec::new(),
            budget: BudgetSnapshot::default(),
            events: Vec::new(),
            memory_entries: 0,
        }
    }

    pub fn short_id(&self) -> &str {
        &self.run_id[..8.min(self.run_id.len())]
    }

    pub fn shot(&self, id: ShotId) -> Option<&ShotOutcome> {
        self.shots.iter().find(|s| s.id() == id)
    }

    pub fn events_for(&self, id: ShotId) -> impl Iterator<Item = &TransitionEvent> {
        self.events.iter().filter(move |e| e.shot_id == id)
    }

    pub fn stats(&self) -> RunStats {
        let shots = self.shots.len();
        let accepted = self
            .shots
            .iter()
            .filter(|s| s.state() == ShotState::Accepted)
            .count();
        let abandoned = self
            .shots
            .iter()
            .filter(|s| s.state() == ShotState::Abandoned)
            .count();
        let degraded = self.shots.iter().filter(|s| s.shot.is_degraded()).count();
        let total_retries: u32 = self.shots.iter().map(|s| s.shot.retry_count()).sum();
        let candidates: usize = self.shots.iter().map(ShotOutcome::candidate_count).sum();
        let render_failures = self
            .shots
            .iter()
            .flat_map(|s| s.attempts.iter())
            .flat_map(|a| a.candidates.iter())
            .filter(|c| c.failure.is_some())
            .count();
        let spend = BudgetCategory::ALL
            .into_iter()
            .map(|c| (c, self.budget.spent(c)))
            .collect();

        RunStats {
            scenes: self.scenes.len(),
            scenes_unplannable: self
                .scenes
                .iter()
                .filter(|s| s.status == SceneStatus::Unplannable)
                .count(),
            shots,
            accepted,
            abandoned,
            degraded,
            accept_rate: ratio(accepted as f64, shots as f64),
            total_retries,
            avg_retries: ratio(total_retries as f64, shots as f64),
            candidates,
            render_failures,
            vision_qa_calls: self.shots.iter().map(|s| s.vision_qa_calls).sum(),
            memory_entries: self.memory_entries,
            spend,
            total_spent: self.budget.total_spent(),
            utilization: self.budget.utilization(),
        }
    }

    /// Write `run.json` and `events.jsonl` into `dir`, each under an exclusive lock.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, CoreError> {
        fs::create_dir_all(dir)?;
        let report_path = dir.join(REPORT_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("Failed to serialize run report: {e}")))?;
        write_locked(&report_path, json.as_bytes())?;

        let mut lines = String::new();
        for event in &self.events {
            lines.push_str(&serde_json::to_string(event)?);
            lines.push('\n');
        }
        write_locked(&dir.join(EVENTS_FILE), lines.as_bytes())?;

        tracing::info!(
            run = %self.short_id(),
            path = %report_path.display(),
            "Run report saved"
        );
        Ok(report_path)
    }

    /// Read a report from a `run.json` path or the directory containing it.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let path = if path.is_dir() {
            path.join(REPORT_FILE)
        } else {
            path.to_path_buf()
        };
        let file = fs::OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|_| CoreError::ReportNotFound(path.display().to_string()))?;
        fs2::FileExt::lock_shared(&file).map_err(CoreError::Io)?;
        let mut data = String::new();
        let read = (&file).read_to_string(&mut data);
        fs2::FileExt::unlock(&file).map_err(CoreError::Io)?;
        read?;
        Ok(serde_json::from_str(&data)?)
    }
}

fn write_locked(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    fs2::FileExt::lock_exclusive(&file).map_err(CoreError::Io)?;
    (&file).write_all(bytes)?;
    fs2::FileExt::unlock(&file).map_err(CoreError::Io)?;
    Ok(())
}

fn ratio(n: f64, d: f64) -> f64 {
    if d == 0.0 {
        0.0
    } else {
        n / d
    }
}
