use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ShotId, ShotState};

/// One applied shot state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub at: DateTime<Utc>,
    pub shot_id: ShotId,
    pub from: ShotState,
    pub to: ShotState,
    pub reason: String,
}

/// Append-only, chronological log of transitions shared by every shot of a run.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<TransitionEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: TransitionEvent) {
        tracing::info!(
            shot = %event.shot_id,
            from = %event.from,
            to = %event.to,
            reason = %event.reason,
            "Shot transition"
        );
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every event so far, oldest first.
    pub fn snapshot(&self) -> Vec<TransitionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn for_shot(&self, shot_id: ShotId) -> Vec<TransitionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.shot_id == shot_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Camera, Shot};

    #[test]
    fn test_log_keeps_order_per_shot() {
        let log = EventLog::new();
        let mut a = Shot::new(ShotId::new(1, 1), "a", Camera::new("high", "wide"));
        let mut b = Shot::new(ShotId::new(1, 2), "b", Camera::new("low", "close-up"));

        log.record(a.transition(ShotState::VariationsRendered, "").unwrap());
        log.record(b.transition(ShotState::Abandoned, "run cancelled").unwrap());
        log.record(a.transition(ShotState::Evaluated, "").unwrap());

        assert_eq!(log.len(), 3);
        let a_events = log.for_shot(a.id);
        assert_eq!(a_events.len(), 2);
        assert_eq!(a_events[0].to, ShotState::VariationsRendered);
        assert_eq!(a_events[1].to, ShotState::Evaluated);
        assert_eq!(log.snapshot()[1].reason, "run cancelled");
    }
}
