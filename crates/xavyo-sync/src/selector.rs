//! Policy selection.
//!
//! Picks the synchronization policy of a resource that applies to a shadow,
//! then checks whether that policy is enabled and allowed by the invoking
//! task.

use std::sync::Arc;

use tracing::trace;

pub use crate::config::ConditionPrecedence;
use crate::error::{Decision, NotApplicableReason, SyncError, SyncResult};
use crate::expression::{ExpressionEvaluator, ExpressionVariables};
use crate::policy::SynchronizationPolicy;
use crate::resource::{Resource, SystemConfiguration};
use crate::result::OperationResult;
use crate::shadow::{Shadow, ShadowKind};
use crate::task::Task;

/// Selects the applicable synchronization policy.
#[derive(Clone)]
pub struct PolicySelector {
    evaluator: Arc<dyn ExpressionEvaluator>,
    precedence: ConditionPrecedence,
}

impl PolicySelector {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>, precedence: ConditionPrecedence) -> Self {
        Self {
            evaluator,
            precedence,
        }
    }

    #[must_use]
    pub fn precedence(&self) -> ConditionPrecedence {
        self.precedence
    }

    /// First policy of the resource, in declaration order, that applies to
    /// the shadow.
    pub fn select_policy<'a>(
        &self,
        resource: &'a Resource,
        shadow: Option<&Shadow>,
        configuration: Option<&SystemConfiguration>,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<Decision<&'a SynchronizationPolicy>> {
        let shadow = shadow.ok_or_else(|| {
            SyncError::invalid_argument("No shadow to select a synchronization policy for")
        })?;
        for policy in &resource.synchronization {
            if self.is_policy_applicable(policy, shadow, resource, configuration, task, result)? {
                trace!(
                    policy = %policy.display_name(),
                    shadow_id = %shadow.id,
                    "Synchronization policy selected"
                );
                return Ok(Decision::Applicable(policy));
            }
        }
        Ok(Decision::NotApplicable(NotApplicableReason::NoPolicy))
    }

    /// Check whether a single policy applies to the shadow.
    pub fn is_policy_applicable(
        &self,
        policy: &SynchronizationPolicy,
        shadow: &Shadow,
        resource: &Resource,
        configuration: Option<&SystemConfiguration>,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<bool> {
        if shadow.object_class.trim().is_empty() {
            return Err(SyncError::invalid_argument(format!(
                "No objectClass in shadow {}",
                shadow.id
            )));
        }

        let Some(condition) = &policy.condition else {
            return Ok(Self::matches_predicates(policy, shadow));
        };

        if self.precedence == ConditionPrecedence::AfterPredicates
            && !Self::matches_predicates(policy, shadow)
        {
            return Ok(false);
        }

        let description = format!(
            "condition in synchronization policy {}",
            policy.display_name()
        );
        let variables =
            ExpressionVariables::default_variables(None, Some(shadow), Some(resource), configuration)?;
        self.evaluator
            .evaluate_condition(condition, &variables, &description, task, result)
    }

    /// objectClass, kind and intent predicates.
    fn matches_predicates(policy: &SynchronizationPolicy, shadow: &Shadow) -> bool {
        if !policy.object_classes.is_empty() && !policy.object_classes.contains(&shadow.object_class)
        {
            return false;
        }
        if let (Some(policy_kind), Some(shadow_kind)) = (policy.kind, shadow.kind) {
            if policy_kind != shadow_kind {
                return false;
            }
        }
        if let (Some(policy_intent), Some(shadow_intent)) = (&policy.intent, &shadow.intent) {
            if policy_intent != shadow_intent {
                return false;
            }
        }
        true
    }
}

/// Enablement and task-constraint checks of a selected policy.
///
/// A policy without an explicit `enabled` flag is disabled. A task kind
/// restriction treats a policy without a kind as [`ShadowKind::Account`]; a
/// task intent restriction requires the policy to declare the same intent.
#[must_use]
pub fn check_policy_applicability(policy: &SynchronizationPolicy, task: &Task) -> Decision<()> {
    if !policy.is_enabled() {
        return Decision::NotApplicable(NotApplicableReason::SynchronizationDisabled);
    }
    if !satisfies_task_constraints(policy, task) {
        return Decision::NotApplicable(NotApplicableReason::TaskConstraintMismatch);
    }
    Decision::Applicable(())
}

fn satisfies_task_constraints(policy: &SynchronizationPolicy, task: &Task) -> bool {
    if let Some(task_kind) = task.kind {
        if policy.kind.unwrap_or(ShadowKind::Account) != task_kind {
            return false;
        }
    }
    if let Some(task_intent) = task.intent.as_deref().filter(|i| !i.is_empty()) {
        match policy.intent.as_deref() {
            Some(policy_intent) if !policy_intent.is_empty() => {
                if policy_intent != task_intent {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}
