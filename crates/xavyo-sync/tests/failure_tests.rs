//! Integration tests for failure handling.
//!
//! Every failing notification must leave exactly one statistics record and a
//! fatal (or handled) result behind.

mod common;

use std::sync::Arc;

use xavyo_sync::action::{URI_LINK, URI_SYNCHRONIZE};
use xavyo_sync::notification::channel;
use xavyo_sync::{
    ActionDefinition, ChangeNotification, InMemoryRepository, OperationResult, OperationStatus,
    Reaction, RepositoryError, SyncError, SyncSituation,
};

use common::{account_policy, reaction, user, RecordingClockwork, TestContext};

// ============================================================================
// FAIL-001: Invalid notifications
// ============================================================================

#[tokio::test]
async fn test_fail_001_empty_notification_is_invalid_argument() {
    let ctx = TestContext::new(account_policy());
    let task = ctx.task();
    let mut result = OperationResult::new("test");

    let notification = ChangeNotification::builder(ctx.resource.clone())
        .channel(channel::LIVE_SYNC)
        .build();
    let err = ctx
        .service
        .notify_change(notification, &task, &mut result)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidArgument { .. }));
    assert_eq!(
        result.find("notify_change").map(OperationResult::status),
        Some(OperationStatus::FatalError)
    );
    let stats = ctx.statistics.snapshot();
    assert_eq!(stats.operations_started, 1);
    assert_eq!(stats.operations_ended, 1);
    assert_eq!(stats.operations_failed, 1);
}

#[tokio::test]
async fn test_fail_001_both_shadows_are_rejected() {
    let ctx = TestContext::new(account_policy());
    let shadow = ctx.stored_account("jdoe");
    let task = ctx.task();
    let mut result = OperationResult::new("test");

    let notification = ChangeNotification::builder(ctx.resource.clone())
        .current_shadow(shadow.clone())
        .old_shadow(shadow)
        .build();
    let err = ctx
        .service
        .notify_change(notification, &task, &mut result)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidArgument { .. }));
    assert_eq!(ctx.flaky.owner_lookups(), 0);
}

// ============================================================================
// FAIL-002: Metadata write failures
// ============================================================================

/// Given a shadow that was deleted concurrently
/// When its change is processed
/// Then the failed metadata write is a handled error and the reaction still runs.
#[tokio::test]
async fn test_fail_002_missing_shadow_is_handled() {
    let ctx = TestContext::new(account_policy().with_reaction(reaction(SyncSituation::Unlinked, URI_LINK)));
    ctx.stored_focus(user("jdoe"));
    let shadow = ctx.stored_account("jdoe");
    let removed = ctx.repository.remove_shadow(shadow.id).expect("repository writable");
    assert!(removed.is_some());
    let task = ctx.task();
    let mut result = OperationResult::new("test");

    ctx.service
        .notify_change(ctx.notification(shadow, channel::LIVE_SYNC), &task, &mut result)
        .await
        .expect("missing shadow does not fail the notification");

    assert_eq!(
        result.find("save_sync_metadata").map(OperationResult::status),
        Some(OperationStatus::HandledError)
    );
    assert_eq!(
        result.find("notify_change").map(OperationResult::status),
        Some(OperationStatus::HandledError)
    );
    assert_eq!(ctx.clockwork.runs(), 1);

    let stats = ctx.statistics.snapshot();
    assert_eq!(stats.operations_failed, 0);
    assert_eq!(stats.object_actions_executed, 1);
    assert_eq!(stats.object_actions_failed, 1);
}

/// Given another writer that changed the shadow since it was read
/// When the metadata write loses the race
/// Then the failure is handled and the reaction still runs.
#[tokio::test]
async fn test_fail_002_concurrent_modification_is_handled() {
    let ctx = TestContext::new(account_policy().with_reaction(reaction(SyncSituation::Unlinked, URI_LINK)));
    ctx.stored_focus(user("jdoe"));
    let shadow = ctx.stored_account("jdoe");
    ctx.flaky
        .fail_modifications_with(RepositoryError::concurrent_modification("Shadow", shadow.id));
    let task = ctx.task();
    let mut result = OperationResult::new("test");

    ctx.service
        .notify_change(ctx.notification(shadow, channel::LIVE_SYNC), &task, &mut result)
        .await
        .expect("lost race does not fail the notification");

    assert_eq!(ctx.flaky.modify_calls(), 1);
    assert_eq!(
        result.find("save_sync_metadata").map(OperationResult::status),
        Some(OperationStatus::HandledError)
    );
    assert_eq!(
        result.find("notify_change").map(OperationResult::status),
        Some(OperationStatus::HandledError)
    );
    assert_eq!(ctx.clockwork.runs(), 1);

    let stats = ctx.statistics.snapshot();
    assert_eq!(stats.operations_failed, 0);
    assert_eq!(stats.object_actions_failed, 1);
}

/// The repository being down is not a lost race and stays fatal.
#[tokio::test]
async fn test_fail_002_unavailable_repository_is_fatal() {
    let ctx = TestContext::new(account_policy().with_reaction(reaction(SyncSituation::Unlinked, URI_LINK)));
    ctx.stored_focus(user("jdoe"));
    let shadow = ctx.stored_account("jdoe");
    ctx.flaky.fail_modifications_with(RepositoryError::Unavailable {
        message: "connection refused".to_string(),
    });
    let task = ctx.task();
    let mut result = OperationResult::new("test");

    let err = ctx
        .service
        .notify_change(ctx.notification(shadow, channel::LIVE_SYNC), &task, &mut result)
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), SyncError::Unavailable { .. }));
    assert_eq!(ctx.clockwork.runs(), 0);
}

/// A schema violation while saving metadata fails the notification before
/// any reaction runs.
#[tokio::test]
async fn test_fail_002_schema_violation_is_fatal() {
    let ctx = TestContext::new(account_policy().with_reaction(reaction(SyncSituation::Unlinked, URI_LINK)));
    ctx.stored_focus(user("jdoe"));
    let shadow = ctx.stored_account("jdoe");
    ctx.flaky
        .fail_modifications_with(RepositoryError::schema("synchronizationSituation is read-only"));
    let task = ctx.task();
    let mut result = OperationResult::new("test");

    let err = ctx
        .service
        .notify_change(ctx.notification(shadow.clone(), channel::LIVE_SYNC), &task, &mut result)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::System { .. }));
    assert!(matches!(err.root_cause(), SyncError::Schema { .. }));
    assert_eq!(ctx.clockwork.runs(), 0);
    assert_eq!(ctx.shadow(shadow.id).synchronization_situation, None);
    assert_eq!(
        result.find("notify_change").map(OperationResult::status),
        Some(OperationStatus::FatalError)
    );

    let stats = ctx.statistics.snapshot();
    assert_eq!(stats.operations_started, 1);
    assert_eq!(stats.operations_ended, 1);
    assert_eq!(stats.operations_failed, 1);
    assert_eq!(stats.object_actions_failed, 1);
}

#[tokio::test]
async fn test_fail_002_preview_write_failure_is_swallowed() {
    let ctx = TestContext::new(account_policy());
    let shadow = ctx.stored_account("jdoe");
    ctx.flaky
        .fail_modifications_with(RepositoryError::schema("read-only"));
    let task = ctx.task().with_dry_run(true);
    let mut result = OperationResult::new("test");

    ctx.service
        .notify_change(ctx.notification(shadow, channel::LIVE_SYNC), &task, &mut result)
        .await
        .expect("preview failures are not returned");

    assert_eq!(
        result.find("save_situation_preview").map(OperationResult::status),
        Some(OperationStatus::FatalError)
    );
    assert_eq!(ctx.statistics.snapshot().operations_failed, 0);
}

// ============================================================================
// FAIL-003: Reaction failures
// ============================================================================

#[tokio::test]
async fn test_fail_003_clockwork_failure_is_wrapped() {
    let repository = Arc::new(InMemoryRepository::new());
    let ctx = TestContext::with_clockwork(
        repository,
        account_policy().with_reaction(reaction(SyncSituation::Unlinked, URI_LINK)),
        RecordingClockwork::new().failing("projector exploded"),
    );
    ctx.stored_focus(user("jdoe"));
    let shadow = ctx.stored_account("jdoe");
    let task = ctx.task();
    let mut result = OperationResult::new("test");

    let err = ctx
        .service
        .notify_change(ctx.notification(shadow.clone(), channel::LIVE_SYNC), &task, &mut result)
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), SyncError::Clockwork { .. }));
    assert_eq!(
        result.find("clockwork").map(OperationResult::status),
        Some(OperationStatus::FatalError)
    );
    // Metadata is saved before the reaction and stays.
    assert_eq!(
        ctx.shadow(shadow.id).synchronization_situation,
        Some(SyncSituation::Unlinked)
    );
    assert_eq!(ctx.statistics.snapshot().operations_failed, 1);
}

#[tokio::test]
async fn test_fail_003_unknown_handler_is_configuration_error() {
    let ctx = TestContext::new(account_policy().with_reaction(reaction(
        SyncSituation::Unlinked,
        "urn:xavyo:sync:action:teleport",
    )));
    ctx.stored_focus(user("jdoe"));
    let shadow = ctx.stored_account("jdoe");
    let task = ctx.task();
    let mut result = OperationResult::new("test");

    let err = ctx
        .service
        .notify_change(ctx.notification(shadow, channel::LIVE_SYNC), &task, &mut result)
        .await
        .unwrap_err();

    assert!(err.root_cause().is_configuration());
    assert_eq!(ctx.clockwork.runs(), 0);
}

#[tokio::test]
async fn test_fail_003_reaction_without_situation_is_configuration_error() {
    let broken = Reaction {
        situation: None,
        ..reaction(SyncSituation::Unlinked, URI_LINK)
    };
    let ctx = TestContext::new(account_policy().with_reaction(broken));
    ctx.stored_focus(user("jdoe"));
    let shadow = ctx.stored_account("jdoe");
    let task = ctx.task();
    let mut result = OperationResult::new("test");

    let err = ctx
        .service
        .notify_change(ctx.notification(shadow, channel::LIVE_SYNC), &task, &mut result)
        .await
        .unwrap_err();

    assert!(err.root_cause().is_configuration());
}

/// Linking an unmatched shadow has no owner to link to. The task decides
/// whether that stops the reaction.
#[tokio::test]
async fn test_fail_003_action_failure_respects_continue_on_error() {
    let policy = account_policy().with_reaction(
        Reaction::new(SyncSituation::Unmatched)
            .with_action(ActionDefinition::new(URI_LINK))
            .with_action(ActionDefinition::new(URI_SYNCHRONIZE)),
    );
    let ctx = TestContext::new(policy);
    let shadow = ctx.stored_account("stranger");
    let mut result = OperationResult::new("test");

    let err = ctx
        .service
        .notify_change(ctx.notification(shadow.clone(), channel::LIVE_SYNC), &ctx.task(), &mut result)
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), SyncError::Action { .. }));
    assert_eq!(ctx.clockwork.runs(), 0);

    let tolerant = ctx.task().with_continue_on_error(true);
    let mut result = OperationResult::new("test");
    ctx.service
        .notify_change(ctx.notification(shadow, channel::LIVE_SYNC), &tolerant, &mut result)
        .await
        .expect("action failure tolerated");
    assert_eq!(ctx.clockwork.runs(), 1);
    assert_eq!(
        result.find("action").map(OperationResult::status),
        Some(OperationStatus::PartialError)
    );
    assert_eq!(
        result.find("notify_change").map(OperationResult::status),
        Some(OperationStatus::PartialError)
    );
}
