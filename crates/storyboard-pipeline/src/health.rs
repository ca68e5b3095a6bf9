use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use storyboard_core::capability::CapabilityError;
use storyboard_core::error::PipelineError;

/// Counts consecutive `Unavailable` failures across all capabilities.
///
/// Any successful call resets the streak. Once the streak reaches the
/// threshold the monitor trips and stays tripped for the rest of the run.
#[derive(Debug)]
pub struct CapabilityHealth {
    threshold: u32,
    consecutive: AtomicU32,
    tripped: AtomicBool,
    last_capability: Mutex<Option<String>>,
}

impl CapabilityHealth {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: AtomicU32::new(0),
            tripped: AtomicBool::new(false),
            last_capability: Mutex::new(None),
        }
    }

    pub fn record_success(&self) {
        if !self.is_tripped() {
            self.consecutive.store(0, Ordering::SeqCst);
        }
    }

    /// Record a failed call. Returns the run-fatal error once the monitor trips.
    pub fn record_failure(&self, capability: &str, error: &CapabilityError) -> Option<PipelineError> {
        if !error.is_unavailable() {
            return self.halt_error();
        }
        *self
            .last_capability
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(capability.to_string());
        let consecutive = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            capability,
            consecutive,
            threshold = self.threshold,
            error = %error,
            "Capability unavailable"
        );
        if consecutive >= self.threshold && !self.tripped.swap(true, Ordering::SeqCst) {
            tracing::error!(capability, consecutive, "Capability health tripped, halting run");
        }
        self.halt_error()
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// `CapabilityUnavailable` describing the trip, if tripped.
    pub fn halt_error(&self) -> Option<PipelineError> {
        if !self.is_tripped() {
            return None;
        }
        let capability = self
            .last_capability
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        Some(PipelineError::CapabilityUnavailable {
            capability,
            consecutive: self.consecutive.load(Ordering::SeqCst),
        })
    }
}
