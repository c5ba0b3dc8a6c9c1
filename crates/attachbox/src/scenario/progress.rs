//! Progress callback for reporting run progress.

use crate::model::{NodeKind, NodeStatus, RunId};

/// Event emitted during scenario execution for progress tracking.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Run has started.
    RunStarted {
        /// Unique run identifier.
        run_id: RunId,
        /// Scenario name.
        scenario: String,
    },
    /// The node process is running.
    InstanceStarted {
        pid: u32,
    },
    /// A session is attached and ready for the script.
    SessionOpened {
        endpoint: String,
        /// Number of script nodes about to run.
        total_nodes: usize,
    },
    /// A script node completed.
    NodeCompleted {
        /// 1-based position.
        node_index: usize,
        total_nodes: usize,
        kind: NodeKind,
        status: NodeStatus,
        duration_ms: u64,
    },
    /// Run has completed.
    RunCompleted {
        /// Unique run identifier.
        run_id: RunId,
        /// Whether the run passed.
        success: bool,
        /// Total duration in milliseconds.
        duration_ms: u64,
    },
}

/// Trait for receiving progress events during execution.
///
/// Implementors can use this to display progress, log events, or collect metrics.
pub trait ProgressCallback: Send + Sync {
    /// Called for each progress event.
    fn on_progress(&self, event: &ProgressEvent);
}

/// A no-op progress callback that discards all events.
pub struct NoopProgress;

impl ProgressCallback for NoopProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// A progress callback that collects events for testing.
#[cfg(test)]
#[derive(Default)]
pub struct CollectingProgress {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl CollectingProgress {
    /// Get collected events.
    #[allow(clippy::expect_used)]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .expect("progress mutex poisoned")
            .clone()
    }
}

#[cfg(test)]
impl ProgressCallback for CollectingProgress {
    #[allow(clippy::expect_used)]
    fn on_progress(&self, event: &ProgressEvent) {
        self.events
            .lock()
            .expect("progress mutex poisoned")
            .push(event.clone());
    }
}
