//! Synchronization service.
//!
//! Entry point for change notifications. A call runs strictly in sequence:
//! prepare and validate, protected check, policy selection, enablement and task
//! constraint checks, classification, then either the dry-run preview or
//! metadata save plus reaction. Statistics are recorded exactly once per call
//! whatever the outcome.
//!
//! The service holds no mutable state between calls and can be shared across
//! tasks processing different shadows.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::action::ActionRegistry;
use crate::clockwork::Clockwork;
use crate::config::SynchronizationServiceConfig;
use crate::error::{Decision, NotApplicableReason, SyncError, SyncResult};
use crate::executor::ReactionExecutor;
use crate::expression::{ExpressionEvaluator, RhaiExpressionEvaluator};
use crate::focus::{Focus, FocusType};
use crate::notification::{channel, ChangeNotification};
use crate::policy::SynchronizationPolicy;
use crate::repository::RepositoryService;
use crate::resource::Resource;
use crate::result::OperationResult;
use crate::selector::{check_policy_applicability, PolicySelector};
use crate::shadow::{Shadow, ShadowModification};
use crate::situation::SituationClassifier;
use crate::statistics::SynchronizationEvent;
use crate::task::Task;

const NOTIFY_CHANGE: &str = "notify_change";
const NOTIFY_CHANGES: &str = "notify_changes";

/// Outcome counts of [`SynchronizationService::notify_changes`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    /// Notifications not processed because the task was stopped.
    pub skipped: usize,
    pub stopped: bool,
}

/// Synchronization decision engine.
#[derive(Clone)]
pub struct SynchronizationService {
    repository: Arc<dyn RepositoryService>,
    selector: PolicySelector,
    classifier: SituationClassifier,
    executor: ReactionExecutor,
    config: SynchronizationServiceConfig,
}

impl SynchronizationService {
    #[must_use]
    pub fn builder() -> SynchronizationServiceBuilder {
        SynchronizationServiceBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &SynchronizationServiceConfig {
        &self.config
    }

    /// Process one change notification.
    ///
    /// Validation failures are returned as they are; any later failure is
    /// recorded and returned wrapped in [`SyncError::System`].
    #[instrument(skip_all, fields(channel = %notification.channel_str(), resource = %notification.resource))]
    pub async fn notify_change(
        &self,
        mut notification: ChangeNotification,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<()> {
        notification.prepare();
        let log_debug = notification.source_channel.as_deref() != Some(channel::RECONCILIATION);
        if log_debug {
            debug!(
                shadow = ?notification.applicable_shadow().map(|s| s.id),
                change_type = %notification.modification_type(),
                "Received change notification"
            );
        } else {
            trace!(
                shadow = ?notification.applicable_shadow().map(|s| s.id),
                change_type = %notification.modification_type(),
                "Received change notification"
            );
        }

        let subresult = result.create_subresult(NOTIFY_CHANGE);
        subresult.add_param("channel", notification.channel_str());
        if let Ok(oid) = notification.shadow_oid() {
            subresult.add_param("shadow_id", oid);
        }

        let sink = task.statistics();
        let mut event = SynchronizationEvent::start(
            notification.applicable_shadow(),
            notification.source_channel.as_deref(),
            sink,
        );

        if let Err(error) = notification.validate(self.config.consistency_checks) {
            event.set_error(error.to_string());
            event.finish(sink);
            subresult.record_fatal_error(&error);
            return Err(error);
        }

        match self
            .process(&mut notification, &mut event, log_debug, task, subresult)
            .await
        {
            Ok(()) => {
                event.finish(sink);
                if log_debug {
                    debug!(status = %subresult.status(), "Synchronization done");
                } else {
                    trace!(status = %subresult.status(), "Synchronization done");
                }
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "Synchronization failed");
                event.set_error(error.to_string());
                event.finish(sink);
                subresult.record_fatal_error(&error);
                Err(SyncError::system(error))
            }
        }
    }

    async fn process(
        &self,
        notification: &mut ChangeNotification,
        event: &mut SynchronizationEvent,
        log_debug: bool,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<()> {
        if self.clear_protected_situation(notification).await? {
            trace!("Skipping protected shadow");
            result.record_not_applicable("Skipped because it is protected");
            event.set_protected();
            return Ok(());
        }

        let configuration = self.repository.get_system_configuration().await?;
        let resource = Arc::clone(&notification.resource);

        let policy = match self.selector.select_policy(
            &resource,
            notification.applicable_shadow(),
            configuration.as_ref(),
            task,
            result,
        )? {
            Decision::Applicable(policy) => policy,
            Decision::NotApplicable(_) => {
                let message = format!(
                    "No matching synchronization policy for {resource}, ignoring change from channel {}",
                    notification.channel_str()
                );
                debug!("{message}");
                result.record_not_applicable(message);
                event.set_no_synchronization_policy();
                return Ok(());
            }
        };
        trace!(policy = %policy.display_name(), "Synchronization policy determined");

        if let Decision::NotApplicable(reason) = check_policy_applicability(policy, task) {
            let message = match reason {
                NotApplicableReason::SynchronizationDisabled => {
                    event.set_synchronization_disabled();
                    format!(
                        "Synchronization is not enabled for {resource}, ignoring change from channel {}",
                        notification.channel_str()
                    )
                }
                _ => {
                    event.set_not_applicable_for_task();
                    "Skipped because it does not match kind/intent of the task".to_string()
                }
            };
            debug!(reason = %reason, "{message}");
            result.record_not_applicable(message);
            return Ok(());
        }

        let focus_type = self.determine_focus_type(policy)?;
        let situation = self
            .classifier
            .classify(focus_type, notification, policy, configuration.as_ref(), task, result)
            .await?;
        if log_debug {
            debug!(
                situation = %situation.situation(),
                current_owner = ?situation.current_owner().map(|f| &f.name),
                correlated_owner = ?situation.correlated_owner().map(|f| &f.name),
                "Situation determined"
            );
        } else {
            trace!(
                situation = %situation.situation(),
                current_owner = ?situation.current_owner().map(|f| &f.name),
                correlated_owner = ?situation.correlated_owner().map(|f| &f.name),
                "Situation determined"
            );
        }
        event.set_original_situation(Some(situation.situation()));
        event.set_new_situation(Some(situation.situation()));

        if notification.unrelated_change || notification.dry_run || task.dry_run {
            self.executor
                .save_situation_preview(notification, policy, situation.situation(), task, result)
                .await;
            result.record_success();
            debug!(situation = %situation.situation(), "Synchronization done (dry run)");
            return Ok(());
        }

        let new_situation = self
            .executor
            .execute(focus_type, notification, policy, &situation, configuration.as_ref(), task, result)
            .await?;
        // The final situation supersedes the classified one counted above.
        event.replace_new_situation(Some(new_situation));
        result.compute_status();
        Ok(())
    }

    /// Clear a stale situation from a protected current shadow.
    ///
    /// Returns whether the shadow is protected.
    async fn clear_protected_situation(&self, notification: &mut ChangeNotification) -> SyncResult<bool> {
        let Some(shadow) = notification.current_shadow.as_mut() else {
            return Ok(false);
        };
        if !shadow.protected_object {
            return Ok(false);
        }
        if shadow.synchronization_situation.is_some() {
            let modifications = [ShadowModification::ReplaceSituation(None)];
            self.repository.modify_shadow(shadow.id, &modifications).await?;
            shadow.apply_modifications(&modifications);
        }
        Ok(true)
    }

    fn determine_focus_type(&self, policy: &SynchronizationPolicy) -> SyncResult<FocusType> {
        match policy.focus_type.as_deref() {
            None => Ok(self.config.default_focus_type),
            name => FocusType::resolve(name),
        }
    }

    /// Process notifications in order.
    ///
    /// The task's stop flag is checked before each notification. With
    /// `continue_on_error` failed notifications are counted and processing
    /// goes on; otherwise the first failure is returned.
    pub async fn notify_changes(
        &self,
        notifications: Vec<ChangeNotification>,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<BatchSummary> {
        let total = notifications.len();
        let batch = result.create_subresult(NOTIFY_CHANGES);
        batch.add_param("count", total);

        let mut summary = BatchSummary::default();
        for (index, notification) in notifications.into_iter().enumerate() {
            if !task.can_run() {
                summary.stopped = true;
                summary.skipped = total - index;
                info!(processed = index, skipped = summary.skipped, "Task stopped, batch interrupted");
                break;
            }
            match self.notify_change(notification, task, batch).await {
                Ok(()) => summary.processed += 1,
                Err(error) if task.continue_on_error => {
                    summary.failed += 1;
                    warn!(index, error = %error, "Notification failed, continuing");
                }
                Err(error) => {
                    batch.compute_status();
                    return Err(error);
                }
            }
        }

        if summary.failed > 0 {
            batch.record_partial_error(&SyncError::System {
                message: format!("{} of {total} notifications failed", summary.failed),
                source: None,
            });
        } else {
            batch.compute_status();
        }
        Ok(summary)
    }

    /// Check whether `focus` satisfies the correlation rule of the policy
    /// that applies to `shadow`.
    ///
    /// Without an applicable policy there is no rule to satisfy.
    pub async fn match_focus_correlation_rule(
        &self,
        shadow: &Shadow,
        focus: &Focus,
        resource: &Resource,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<bool> {
        let configuration = self.repository.get_system_configuration().await?;
        let Some(policy) = self
            .selector
            .select_policy(resource, Some(shadow), configuration.as_ref(), task, result)?
            .applicable()
        else {
            return Ok(false);
        };

        if self.determine_focus_type(policy)? != focus.focus_type {
            return Ok(false);
        }
        self.classifier.correlation().matches_correlation_rule(
            focus,
            shadow,
            policy.correlation.as_ref(),
            resource,
            configuration.as_ref(),
            task,
            result,
        )
    }
}

/// Builder for [`SynchronizationService`].
#[derive(Default)]
pub struct SynchronizationServiceBuilder {
    repository: Option<Arc<dyn RepositoryService>>,
    clockwork: Option<Arc<dyn Clockwork>>,
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    actions: Option<ActionRegistry>,
    config: SynchronizationServiceConfig,
}

impl SynchronizationServiceBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn repository(mut self, repository: Arc<dyn RepositoryService>) -> Self {
        self.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn clockwork(mut self, clockwork: Arc<dyn Clockwork>) -> Self {
        self.clockwork = Some(clockwork);
        self
    }

    /// Expression evaluator; defaults to the Rhai sandbox.
    #[must_use]
    pub fn evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Action registry; defaults to the built-in actions.
    #[must_use]
    pub fn actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = Some(actions);
        self
    }

    #[must_use]
    pub fn config(mut self, config: SynchronizationServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the service; repository and clockwork are required.
    pub fn build(self) -> SyncResult<SynchronizationService> {
        self.config.validate()?;
        let repository = self
            .repository
            .ok_or_else(|| SyncError::configuration("Synchronization service needs a repository"))?;
        let clockwork = self
            .clockwork
            .ok_or_else(|| SyncError::configuration("Synchronization service needs a clockwork"))?;
        let evaluator = self.evaluator.unwrap_or_else(|| {
            Arc::new(RhaiExpressionEvaluator::with_config(self.config.evaluator_config()))
        });
        let actions = Arc::new(self.actions.unwrap_or_else(ActionRegistry::with_builtin_actions));

        Ok(SynchronizationService {
            selector: PolicySelector::new(evaluator.clone(), self.config.condition_precedence),
            classifier: SituationClassifier::new(repository.clone(), evaluator),
            executor: ReactionExecutor::new(
                repository.clone(),
                clockwork,
                actions,
                self.config.default_intent.clone(),
            ),
            repository,
            config: self.config,
        })
    }
}
