//! The task on whose behalf notifications are processed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use xavyo_sync_core::TaskId;

use crate::shadow::ShadowKind;
use crate::statistics::{NoopStatisticsSink, SynchronizationStatisticsSink};

/// Invoking task.
///
/// Carries the task-level switches (channel, dry run, kind/intent
/// restriction, error tolerance), the cooperative stop flag polled between
/// batch items and the statistics sink.
#[derive(Clone)]
pub struct Task {
    pub id: TaskId,
    /// Channel of the task; used for situation descriptions in dry-run mode.
    pub channel: Option<String>,
    /// Classify and record only.
    pub dry_run: bool,
    /// Only policies of this kind apply.
    pub kind: Option<ShadowKind>,
    /// Only policies of this intent apply.
    pub intent: Option<String>,
    /// Failed actions and batch items are recorded as partial errors.
    pub continue_on_error: bool,
    running: Arc<AtomicBool>,
    statistics: Arc<dyn SynchronizationStatisticsSink>,
}

impl Task {
    /// Create a running task without restrictions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: TaskId::new(),
            channel: None,
            dry_run: false,
            kind: None,
            intent: None,
            continue_on_error: false,
            running: Arc::new(AtomicBool::new(true)),
            statistics: Arc::new(NoopStatisticsSink),
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ShadowKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    #[must_use]
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    #[must_use]
    pub fn with_statistics(mut self, sink: Arc<dyn SynchronizationStatisticsSink>) -> Self {
        self.statistics = sink;
        self
    }

    /// Statistics sink of the task.
    #[must_use]
    pub fn statistics(&self) -> &dyn SynchronizationStatisticsSink {
        self.statistics.as_ref()
    }

    /// Whether the task may continue.
    #[must_use]
    pub fn can_run(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the task to stop at the next item boundary.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Handle for stopping the task from another thread.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("dry_run", &self.dry_run)
            .field("kind", &self.kind)
            .field("intent", &self.intent)
            .field("continue_on_error", &self.continue_on_error)
            .field("running", &self.can_run())
            .finish_non_exhaustive()
    }
}
