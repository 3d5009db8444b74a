//! Synchronization statistics.
//!
//! Each processed notification emits exactly one
//! `record_synchronization_operation_start`/`_end` pair to the task's
//! [`SynchronizationStatisticsSink`]. The end record carries two sets of
//! counters: one for the situation the shadow was in when the change arrived
//! and one for the situation it was left in.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use xavyo_sync_core::ShadowId;

use crate::notification::channel;
use crate::shadow::{ChangeType, Shadow, SyncSituation};

/// Identification of the object a statistics record is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsObject {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub oid: Option<ShadowId>,
}

impl StatisticsObject {
    /// Describe a shadow (or an unknown object when absent).
    #[must_use]
    pub fn from_shadow(shadow: Option<&Shadow>) -> Self {
        match shadow {
            Some(shadow) => Self {
                name: shadow.name.clone(),
                display_name: shadow
                    .name
                    .as_ref()
                    .map(|name| format!("{} ({})", name, shadow.object_class)),
                oid: Some(shadow.id),
            },
            None => Self::default(),
        }
    }
}

/// Per-category counters of one synchronization state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SituationCounts {
    #[serde(default)]
    pub protected: u32,
    #[serde(default)]
    pub no_synchronization_policy: u32,
    #[serde(default)]
    pub synchronization_disabled: u32,
    #[serde(default)]
    pub not_applicable_for_task: u32,
    #[serde(default)]
    pub linked: u32,
    #[serde(default)]
    pub unlinked: u32,
    #[serde(default)]
    pub deleted: u32,
    #[serde(default)]
    pub disputed: u32,
    #[serde(default)]
    pub unmatched: u32,
}

impl SituationCounts {
    /// Counter increment for a single situation.
    #[must_use]
    pub fn for_situation(situation: Option<SyncSituation>) -> Self {
        let mut counts = Self::default();
        match situation {
            Some(SyncSituation::Linked) => counts.linked = 1,
            Some(SyncSituation::Unlinked) => counts.unlinked = 1,
            Some(SyncSituation::Deleted) => counts.deleted = 1,
            Some(SyncSituation::Disputed) => counts.disputed = 1,
            Some(SyncSituation::Unmatched) => counts.unmatched = 1,
            None => {}
        }
        counts
    }

    /// Count for a situation.
    #[must_use]
    pub fn situation(&self, situation: SyncSituation) -> u32 {
        match situation {
            SyncSituation::Linked => self.linked,
            SyncSituation::Unlinked => self.unlinked,
            SyncSituation::Deleted => self.deleted,
            SyncSituation::Disputed => self.disputed,
            SyncSituation::Unmatched => self.unmatched,
        }
    }

    /// Add another record to this one.
    pub fn merge(&mut self, other: &SituationCounts) {
        self.protected += other.protected;
        self.no_synchronization_policy += other.no_synchronization_policy;
        self.synchronization_disabled += other.synchronization_disabled;
        self.not_applicable_for_task += other.not_applicable_for_task;
        self.linked += other.linked;
        self.unlinked += other.unlinked;
        self.deleted += other.deleted;
        self.disputed += other.disputed;
        self.unmatched += other.unmatched;
    }

    /// Sum of all counters.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.protected
            + self.no_synchronization_policy
            + self.synchronization_disabled
            + self.not_applicable_for_task
            + self.linked
            + self.unlinked
            + self.deleted
            + self.disputed
            + self.unmatched
    }
}

/// Receiver of synchronization statistics, usually owned by the task.
pub trait SynchronizationStatisticsSink: Send + Sync {
    /// A notification started processing.
    fn record_synchronization_operation_start(&self, object: &StatisticsObject);

    /// A notification finished processing (successfully or not).
    fn record_synchronization_operation_end(
        &self,
        object: &StatisticsObject,
        duration: Duration,
        error: Option<&str>,
        original: &SituationCounts,
        new: &SituationCounts,
    );

    /// An iterative (per-item) operation started.
    fn record_iterative_operation_start(&self, _object: &StatisticsObject) {}

    /// An iterative (per-item) operation ended.
    fn record_iterative_operation_end(
        &self,
        _object: &StatisticsObject,
        _duration: Duration,
        _error: Option<&str>,
    ) {
    }

    /// An object was modified on behalf of the task.
    fn record_object_action_executed(
        &self,
        _object: &StatisticsObject,
        _change_type: ChangeType,
        _error: Option<&str>,
    ) {
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatisticsSink;

impl SynchronizationStatisticsSink for NoopStatisticsSink {
    fn record_synchronization_operation_start(&self, _object: &StatisticsObject) {}

    fn record_synchronization_operation_end(
        &self,
        _object: &StatisticsObject,
        _duration: Duration,
        _error: Option<&str>,
        _original: &SituationCounts,
        _new: &SituationCounts,
    ) {
    }
}

/// Statistics accumulated for one notification.
///
/// Created when processing starts and consumed by [`finish`](Self::finish),
/// so the end record can be emitted only once.
#[derive(Debug)]
pub struct SynchronizationEvent {
    object: StatisticsObject,
    iterative: bool,
    started: Instant,
    error: Option<String>,
    original: SituationCounts,
    new: SituationCounts,
}

impl SynchronizationEvent {
    /// Start an event and emit the start record(s).
    pub fn start(
        shadow: Option<&Shadow>,
        source_channel: Option<&str>,
        sink: &dyn SynchronizationStatisticsSink,
    ) -> Self {
        let object = StatisticsObject::from_shadow(shadow);
        let iterative = source_channel == Some(channel::LIVE_SYNC);
        sink.record_synchronization_operation_start(&object);
        if iterative {
            sink.record_iterative_operation_start(&object);
        }
        Self {
            object,
            iterative,
            started: Instant::now(),
            error: None,
            original: SituationCounts::default(),
            new: SituationCounts::default(),
        }
    }

    pub fn set_protected(&mut self) {
        self.original.protected = 1;
        self.new.protected = 1;
    }

    pub fn set_no_synchronization_policy(&mut self) {
        self.original.no_synchronization_policy = 1;
        self.new.no_synchronization_policy = 1;
    }

    pub fn set_synchronization_disabled(&mut self) {
        self.original.synchronization_disabled = 1;
        self.new.synchronization_disabled = 1;
    }

    pub fn set_not_applicable_for_task(&mut self) {
        self.original.not_applicable_for_task = 1;
        self.new.not_applicable_for_task = 1;
    }

    /// Count the situation the shadow arrived in.
    pub fn set_original_situation(&mut self, situation: Option<SyncSituation>) {
        self.original.merge(&SituationCounts::for_situation(situation));
    }

    /// Count the situation the shadow was left in.
    pub fn set_new_situation(&mut self, situation: Option<SyncSituation>) {
        self.new.merge(&SituationCounts::for_situation(situation));
    }

    /// Escape hatch: discard everything counted for the new state so far and
    /// count only `situation`.
    ///
    /// Used after a reaction ran, where the final situation supersedes the
    /// classified one.
    pub fn replace_new_situation(&mut self, situation: Option<SyncSituation>) {
        self.new = SituationCounts::for_situation(situation);
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    #[must_use]
    pub fn object(&self) -> &StatisticsObject {
        &self.object
    }

    /// Emit the end record(s).
    pub fn finish(self, sink: &dyn SynchronizationStatisticsSink) {
        let duration = self.started.elapsed();
        sink.record_synchronization_operation_end(
            &self.object,
            duration,
            self.error.as_deref(),
            &self.original,
            &self.new,
        );
        if self.iterative {
            sink.record_iterative_operation_end(&self.object, duration, self.error.as_deref());
        }
    }
}

/// Snapshot of [`SynchronizationStatistics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizationInformation {
    #[serde(default)]
    pub operations_started: u32,
    #[serde(default)]
    pub operations_ended: u32,
    #[serde(default)]
    pub operations_failed: u32,
    #[serde(default)]
    pub iterative_operations_started: u32,
    #[serde(default)]
    pub iterative_operations_ended: u32,
    #[serde(default)]
    pub object_actions_executed: u32,
    #[serde(default)]
    pub object_actions_failed: u32,
    #[serde(default)]
    pub total_duration_ms: u64,
    #[serde(default)]
    pub original: SituationCounts,
    #[serde(default)]
    pub new: SituationCounts,
}

/// Thread-safe in-memory statistics sink.
pub struct SynchronizationStatistics {
    operations_started: AtomicU32,
    operations_ended: AtomicU32,
    operations_failed: AtomicU32,
    iterative_started: AtomicU32,
    iterative_ended: AtomicU32,
    object_actions_executed: AtomicU32,
    object_actions_failed: AtomicU32,
    total_duration_ms: AtomicU64,
    original: RwLock<SituationCounts>,
    new: RwLock<SituationCounts>,
}

impl SynchronizationStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            operations_started: AtomicU32::new(0),
            operations_ended: AtomicU32::new(0),
            operations_failed: AtomicU32::new(0),
            iterative_started: AtomicU32::new(0),
            iterative_ended: AtomicU32::new(0),
            object_actions_executed: AtomicU32::new(0),
            object_actions_failed: AtomicU32::new(0),
            total_duration_ms: AtomicU64::new(0),
            original: RwLock::new(SituationCounts::default()),
            new: RwLock::new(SituationCounts::default()),
        }
    }

    /// Snapshot current statistics.
    pub fn snapshot(&self) -> SynchronizationInformation {
        SynchronizationInformation {
            operations_started: self.operations_started.load(Ordering::SeqCst),
            operations_ended: self.operations_ended.load(Ordering::SeqCst),
            operations_failed: self.operations_failed.load(Ordering::SeqCst),
            iterative_operations_started: self.iterative_started.load(Ordering::SeqCst),
            iterative_operations_ended: self.iterative_ended.load(Ordering::SeqCst),
            object_actions_executed: self.object_actions_executed.load(Ordering::SeqCst),
            object_actions_failed: self.object_actions_failed.load(Ordering::SeqCst),
            total_duration_ms: self.total_duration_ms.load(Ordering::SeqCst),
            original: self.original.read().map(|c| *c).unwrap_or_default(),
            new: self.new.read().map(|c| *c).unwrap_or_default(),
        }
    }
}

impl Default for SynchronizationStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl SynchronizationStatisticsSink for SynchronizationStatistics {
    fn record_synchronization_operation_start(&self, _object: &StatisticsObject) {
        self.operations_started.fetch_add(1, Ordering::SeqCst);
    }

    fn record_synchronization_operation_end(
        &self,
        _object: &StatisticsObject,
        duration: Duration,
        error: Option<&str>,
        original: &SituationCounts,
        new: &SituationCounts,
    ) {
        self.operations_ended.fetch_add(1, Ordering::SeqCst);
        if error.is_some() {
            self.operations_failed.fetch_add(1, Ordering::SeqCst);
        }
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.total_duration_ms.fetch_add(millis, Ordering::SeqCst);
        if let Ok(mut counts) = self.original.write() {
            counts.merge(original);
        }
        if let Ok(mut counts) = self.new.write() {
            counts.merge(new);
        }
    }

    fn record_iterative_operation_start(&self, _object: &StatisticsObject) {
        self.iterative_started.fetch_add(1, Ordering::SeqCst);
    }

    fn record_iterative_operation_end(
        &self,
        _object: &StatisticsObject,
        _duration: Duration,
        _error: Option<&str>,
    ) {
        self.iterative_ended.fetch_add(1, Ordering::SeqCst);
    }

    fn record_object_action_executed(
        &self,
        _object: &StatisticsObject,
        _change_type: ChangeType,
        error: Option<&str>,
    ) {
        self.object_actions_executed.fetch_add(1, Ordering::SeqCst);
        if error.is_some() {
            self.object_actions_failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_records_start_and_end() {
        let stats = SynchronizationStatistics::new();
        let shadow = Shadow::new("inetOrgPerson").with_name("jdoe");

        let mut event = SynchronizationEvent::start(Some(&shadow), Some(channel::RECONCILIATION), &stats);
        assert_eq!(event.object().oid, Some(shadow.id));
        event.set_original_situation(Some(SyncSituation::Unmatched));
        event.set_new_situation(Some(SyncSituation::Unmatched));
        event.finish(&stats);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.operations_started, 1);
        assert_eq!(snapshot.operations_ended, 1);
        assert_eq!(snapshot.operations_failed, 0);
        assert_eq!(snapshot.iterative_operations_started, 0);
        assert_eq!(snapshot.original.unmatched, 1);
        assert_eq!(snapshot.new.unmatched, 1);
    }

    #[test]
    fn test_livesync_records_iterative_operation() {
        let stats = SynchronizationStatistics::new();
        let mut event = SynchronizationEvent::start(None, Some(channel::LIVE_SYNC), &stats);
        event.set_error("boom");
        event.finish(&stats);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.iterative_operations_started, 1);
        assert_eq!(snapshot.iterative_operations_ended, 1);
        assert_eq!(snapshot.operations_failed, 1);
    }

    #[test]
    fn test_replace_new_situation_discards_previous_counts() {
        let stats = SynchronizationStatistics::new();
        let mut event = SynchronizationEvent::start(None, None, &stats);
        event.set_original_situation(Some(SyncSituation::Unmatched));
        event.set_new_situation(Some(SyncSituation::Unmatched));
        event.replace_new_situation(Some(SyncSituation::Linked));
        event.finish(&stats);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.original.unmatched, 1);
        assert_eq!(snapshot.new.unmatched, 0);
        assert_eq!(snapshot.new.linked, 1);
        assert_eq!(snapshot.new.total(), 1);
    }

    #[test]
    fn test_not_applicable_counters_apply_to_both_states() {
        let stats = SynchronizationStatistics::new();
        let mut event = SynchronizationEvent::start(None, None, &stats);
        event.set_protected();
        event.finish(&stats);

        let mut event = SynchronizationEvent::start(None, None, &stats);
        event.set_no_synchronization_policy();
        event.finish(&stats);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.original.protected, 1);
        assert_eq!(snapshot.new.protected, 1);
        assert_eq!(snapshot.original.no_synchronization_policy, 1);
        assert_eq!(snapshot.operations_ended, 2);
    }

    #[test]
    fn test_object_action_counters() {
        let stats = SynchronizationStatistics::new();
        let object = StatisticsObject::default();
        stats.record_object_action_executed(&object, ChangeType::Modify, None);
        stats.record_object_action_executed(&object, ChangeType::Modify, Some("not found"));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.object_actions_executed, 2);
        assert_eq!(snapshot.object_actions_failed, 1);
    }
}
