//! Reload lifecycle events

use std::path::PathBuf;
use std::time::Duration;

/// Events broadcast by a reload coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReloadEvent {
    /// The scanner reported changed files
    ChangesDetected {
        service: String,
        paths: Vec<PathBuf>,
    },
    /// A reload attempt began
    ReloadStarted { service: String, forced: bool },
    /// A new implementation was swapped in
    ReloadCompleted {
        service: String,
        version: u64,
        duration: Duration,
    },
    /// A reload attempt failed before the swap
    ReloadFailed { service: String, error: String },
    /// Rollback was triggered after a failed attempt
    RollbackTriggered { service: String, reason: String },
    /// Rollback finished; `version` is whatever is serving afterwards
    RollbackCompleted {
        service: String,
        version: Option<u64>,
        success: bool,
    },
}

impl ReloadEvent {
    /// Service the event belongs to
    pub fn service(&self) -> &str {
        match self {
            ReloadEvent::ChangesDetected { service, .. }
            | ReloadEvent::ReloadStarted { service, .. }
            | ReloadEvent::ReloadCompleted { service, .. }
            | ReloadEvent::ReloadFailed { service, .. }
            | ReloadEvent::RollbackTriggered { service, .. }
            | ReloadEvent::RollbackCompleted { service, .. } => service,
        }
    }
}
