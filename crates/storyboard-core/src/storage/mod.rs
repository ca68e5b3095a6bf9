pub mod report;

pub use report::{
    AttemptScores, CandidateScore, RunReport, RunStats, RunStatus, SceneOutcome, SceneStatus,
    ShotOutcome, EVENTS_FILE, REPORT_FILE,
};
