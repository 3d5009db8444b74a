//! Reaction execution.
//!
//! Persists the classified situation on the shadow, computes the execution
//! options for the selected reaction, builds the [`SyncContext`] and runs the
//! reaction's actions around the clockwork.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, trace, warn};

use crate::action::ActionRegistry;
use crate::clockwork::Clockwork;
use crate::context::{ExecuteOptions, FocusContext, ProjectionContext, ShadowDiscriminator, SyncContext};
use crate::error::{Decision, SyncError, SyncResult};
use crate::focus::FocusType;
use crate::notification::{channel, ChangeNotification};
use crate::policy::{ActionOrder, Reaction, SynchronizationPolicy};
use crate::reaction::ReactionSelector;
use crate::repository::RepositoryService;
use crate::resource::SystemConfiguration;
use crate::result::OperationResult;
use crate::shadow::{ChangeType, Shadow, ShadowKind, ShadowModification, SituationDescription, SyncSituation};
use crate::situation::SynchronizationSituation;
use crate::statistics::StatisticsObject;
use crate::task::Task;

/// Runs reactions for classified situations.
#[derive(Clone)]
pub struct ReactionExecutor {
    repository: Arc<dyn RepositoryService>,
    clockwork: Arc<dyn Clockwork>,
    actions: Arc<ActionRegistry>,
    default_intent: String,
}

impl ReactionExecutor {
    pub fn new(
        repository: Arc<dyn RepositoryService>,
        clockwork: Arc<dyn Clockwork>,
        actions: Arc<ActionRegistry>,
        default_intent: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            clockwork,
            actions,
            default_intent: default_intent.into(),
        }
    }

    /// Save the situation on the shadow, then select and run the reaction.
    ///
    /// Returns the final situation.
    #[instrument(skip_all, fields(situation = %situation.situation(), channel = %notification.channel_str()))]
    pub async fn execute(
        &self,
        focus_type: FocusType,
        notification: &mut ChangeNotification,
        policy: &SynchronizationPolicy,
        situation: &SynchronizationSituation,
        configuration: Option<&SystemConfiguration>,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<SyncSituation> {
        self.save_sync_metadata(notification, policy, situation.situation(), task, result)
            .await?;

        let reaction = match ReactionSelector::select(
            policy,
            situation.situation(),
            notification.source_channel.as_deref(),
            &notification.resource,
        )? {
            Decision::Applicable(reaction) => reaction,
            Decision::NotApplicable(reason) => {
                trace!(
                    situation = %situation.situation(),
                    resource = %notification.resource,
                    reason = %reason,
                    "No reaction defined"
                );
                return Ok(situation.situation());
            }
        };

        self.react(focus_type, notification, policy, reaction, situation, configuration, task, result)
            .await
    }

    /// Run a selected reaction and return the final situation.
    #[allow(clippy::too_many_arguments)]
    pub async fn react(
        &self,
        focus_type: FocusType,
        notification: &ChangeNotification,
        policy: &SynchronizationPolicy,
        reaction: &Reaction,
        situation: &SynchronizationSituation,
        configuration: Option<&SystemConfiguration>,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<SyncSituation> {
        let options = ExecuteOptions {
            reconcile: Self::determine_reconciliation(notification, policy, reaction),
            limit_propagation: Self::determine_propagation_limit(notification, policy, reaction),
        };

        if !reaction.is_synchronize() {
            trace!(
                resource = %notification.resource,
                situation = %situation.situation(),
                "Skipping clockwork run, synchronize is off"
            );
            return Ok(situation.situation());
        }

        let mut context = self
            .build_context(focus_type, notification, policy, reaction, situation, options, configuration)
            .await?;
        trace!(?context, "Synchronization context before action execution");

        let log_debug = notification.source_channel.as_deref() != Some(channel::RECONCILIATION);
        self.execute_actions(reaction, &mut context, situation, ActionOrder::Before, log_debug, task, result)
            .await?;

        let subresult = result.create_subresult("clockwork");
        match self.clockwork.run(&mut context, task, subresult).await {
            Ok(()) => subresult.record_success_if_unknown(),
            Err(error) => {
                subresult.record_fatal_error(&error);
                return Err(error);
            }
        }

        self.execute_actions(reaction, &mut context, situation, ActionOrder::After, log_debug, task, result)
            .await?;

        Ok(context
            .synchronization_situation_resolved()
            .unwrap_or(situation.situation()))
    }

    /// Reaction override, else policy override, else reconcile when the
    /// notification is a full-shadow snapshot without a delta.
    fn determine_reconciliation(
        notification: &ChangeNotification,
        policy: &SynchronizationPolicy,
        reaction: &Reaction,
    ) -> bool {
        reaction
            .reconcile
            .or(policy.reconcile)
            .unwrap_or(notification.object_delta.is_none())
    }

    /// Discovery changes never propagate beyond the triggering resource,
    /// except deletions.
    fn determine_propagation_limit(
        notification: &ChangeNotification,
        policy: &SynchronizationPolicy,
        reaction: &Reaction,
    ) -> bool {
        if notification.source_channel.as_deref() == Some(channel::DISCOVERY)
            && reaction.situation != Some(SyncSituation::Deleted)
        {
            return true;
        }
        reaction
            .limit_propagation
            .or(policy.limit_propagation)
            .unwrap_or(false)
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_context(
        &self,
        focus_type: FocusType,
        notification: &ChangeNotification,
        policy: &SynchronizationPolicy,
        reaction: &Reaction,
        situation: &SynchronizationSituation,
        options: ExecuteOptions,
        configuration: Option<&SystemConfiguration>,
    ) -> SyncResult<SyncContext> {
        let resource = &notification.resource;
        let mut context = SyncContext::new(focus_type, notification.source_channel.clone(), options);
        context.system_configuration = configuration.cloned();
        if options.limit_propagation {
            context.triggered_resource = Some(resource.id);
        }

        let shadow = notification.applicable_shadow();
        let tombstone = notification.is_tombstone();
        let discriminator = ShadowDiscriminator {
            resource_id: resource.id,
            kind: shadow
                .and_then(|s| s.kind)
                .or(policy.kind)
                .unwrap_or(ShadowKind::Account),
            intent: shadow
                .and_then(|s| s.intent.clone())
                .or_else(|| policy.intent.clone()),
            tombstone,
        };

        let mut projection = ProjectionContext::new(discriminator);
        projection.oid = notification.shadow_oid().ok();
        projection.synchronization_situation_detected = Some(situation.situation());
        match &notification.object_delta {
            Some(delta) => projection.sync_delta = Some(delta.clone()),
            None => projection.sync_absolute_trigger = true,
        }
        if let Some(shadow) = shadow {
            projection.object_current = Some(shadow.clone());
            projection.full_shadow = !tombstone;
            projection.fresh = true;
        }
        projection.exists = !notification
            .object_delta
            .as_ref()
            .is_some_and(|d| d.is_delete());
        projection.do_reconciliation = options.reconcile;
        context.add_projection(projection);

        if let Some(owner) = situation.current_owner() {
            context.focus_context = Some(FocusContext::loaded(owner.clone()));
        }

        if let Some(template_id) = reaction.object_template.or(policy.object_template) {
            context.focus_template = Some(self.repository.get_object_template(template_id).await?);
        }

        Ok(context)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_actions(
        &self,
        reaction: &Reaction,
        context: &mut SyncContext,
        situation: &SynchronizationSituation,
        order: ActionOrder,
        log_debug: bool,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<()> {
        for definition in reaction
            .actions
            .iter()
            .filter(|a| a.effective_order() == order)
        {
            let handler_uri = definition.effective_handler_uri().ok_or_else(|| {
                SyncError::configuration("Action definition does not contain a handler URI")
            })?;
            let action = self.actions.get_action_instance(handler_uri)?;

            if log_debug {
                debug!(handler_uri = %handler_uri, order = %order, "Executing action");
            } else {
                trace!(handler_uri = %handler_uri, order = %order, "Executing action");
            }

            let subresult = result.create_subresult("action");
            subresult.add_param("handler_uri", handler_uri);
            match action
                .handle(context, situation, &definition.parameters, task, subresult)
                .await
            {
                Ok(()) => subresult.record_success_if_unknown(),
                Err(error) if task.continue_on_error => {
                    warn!(handler_uri = %handler_uri, error = %error, "Action failed, continuing");
                    subresult.record_partial_error(&error);
                }
                Err(error) => {
                    subresult.record_fatal_error(&error);
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Write situation, description, timestamps and missing kind/intent to
    /// the shadow before any reaction runs.
    ///
    /// The current shadow is used, else the old one; without either nothing
    /// is written. A shadow that no longer exists is a handled outcome. The
    /// in-memory shadow of the notification is updated on success.
    pub async fn save_sync_metadata(
        &self,
        notification: &mut ChangeNotification,
        policy: &SynchronizationPolicy,
        situation: SyncSituation,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<()> {
        let channel = notification.source_channel.clone();
        let Some(shadow) = notification
            .current_shadow
            .as_mut()
            .or(notification.old_shadow.as_mut())
        else {
            return Ok(());
        };

        let now = Utc::now();
        let mut modifications = vec![
            ShadowModification::ReplaceSituation(Some(situation)),
            ShadowModification::AddSituationDescription(SituationDescription {
                situation: Some(situation),
                channel,
                timestamp: now,
                full: true,
            }),
            ShadowModification::ReplaceSynchronizationTimestamp(now),
            ShadowModification::ReplaceFullSynchronizationTimestamp(now),
        ];
        if shadow.kind.is_none() {
            modifications.push(ShadowModification::ReplaceKind(
                policy.kind.unwrap_or(ShadowKind::Account),
            ));
        }
        if shadow.intent.is_none() {
            let intent = policy
                .intent
                .as_deref()
                .filter(|i| !i.trim().is_empty())
                .unwrap_or(&self.default_intent);
            modifications.push(ShadowModification::ReplaceIntent(intent.to_string()));
        }

        let subresult = result.create_subresult("save_sync_metadata");
        subresult.add_param("shadow_id", shadow.id);
        self.write_modifications(shadow, &modifications, task, subresult).await
    }

    /// Dry-run and unrelated-change variant: situation, a non-full
    /// description with the task channel and the policy intent.
    ///
    /// Write failures are recorded but never returned.
    pub async fn save_situation_preview(
        &self,
        notification: &mut ChangeNotification,
        policy: &SynchronizationPolicy,
        situation: SyncSituation,
        task: &Task,
        result: &mut OperationResult,
    ) {
        let Some(shadow) = notification
            .current_shadow
            .as_mut()
            .or(notification.old_shadow.as_mut())
        else {
            return;
        };

        let now = Utc::now();
        let mut modifications = vec![
            ShadowModification::ReplaceSituation(Some(situation)),
            ShadowModification::AddSituationDescription(SituationDescription {
                situation: Some(situation),
                channel: task.channel.clone(),
                timestamp: now,
                full: false,
            }),
            ShadowModification::ReplaceSynchronizationTimestamp(now),
        ];
        if let Some(intent) = policy.intent.as_deref().filter(|i| !i.trim().is_empty()) {
            modifications.push(ShadowModification::ReplaceIntent(intent.to_string()));
        }

        let subresult = result.create_subresult("save_situation_preview");
        subresult.add_param("shadow_id", shadow.id);
        if let Err(error) = self.write_modifications(shadow, &modifications, task, subresult).await {
            debug!(shadow_id = %shadow.id, error = %error, "Situation preview not saved");
        }
    }

    async fn write_modifications(
        &self,
        shadow: &mut Shadow,
        modifications: &[ShadowModification],
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<()> {
        let sink = task.statistics();
        match self.repository.modify_shadow(shadow.id, modifications).await {
            Ok(()) => {
                shadow.apply_modifications(modifications);
                sink.record_object_action_executed(
                    &StatisticsObject::from_shadow(Some(shadow)),
                    ChangeType::Modify,
                    None,
                );
                result.record_success();
                Ok(())
            }
            Err(error) if error.is_benign_race() => {
                let message = error.to_string();
                sink.record_object_action_executed(
                    &StatisticsObject::from_shadow(Some(shadow)),
                    ChangeType::Modify,
                    Some(&message),
                );
                if error.is_not_found() {
                    debug!(
                        shadow_id = %shadow.id,
                        "Could not update situation, shadow does not exist any more"
                    );
                } else {
                    debug!(
                        shadow_id = %shadow.id,
                        "Could not update situation, shadow was modified concurrently"
                    );
                }
                result.record_handled_error(message);
                Ok(())
            }
            Err(error) => {
                let error = SyncError::from(error);
                let message = error.to_string();
                sink.record_object_action_executed(
                    &StatisticsObject::from_shadow(Some(shadow)),
                    ChangeType::Modify,
                    Some(&message),
                );
                warn!(
                    shadow_id = %shadow.id,
                    error = %message,
                    "Save of synchronization situation failed"
                );
                result.record_fatal_error(&error);
                Err(error)
            }
        }
    }
}
