//! Situation classification.
//!
//! Decides which [`SyncSituation`] a changed shadow is in, and which focus
//! currently owns it or is proposed to own it.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::correlation::CorrelationEngine;
use crate::error::{SyncError, SyncResult};
use crate::expression::ExpressionEvaluator;
use crate::focus::{Focus, FocusType};
use crate::notification::ChangeNotification;
use crate::policy::SynchronizationPolicy;
use crate::repository::RepositoryService;
use crate::resource::SystemConfiguration;
use crate::result::OperationResult;
use crate::shadow::SyncSituation;
use crate::task::Task;

/// Classified situation of a shadow.
///
/// At most one of `current_owner` and `correlated_owner` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct SynchronizationSituation {
    situation: SyncSituation,
    current_owner: Option<Focus>,
    correlated_owner: Option<Focus>,
}

impl SynchronizationSituation {
    /// The shadow is linked to (or was deleted from) `owner`.
    #[must_use]
    pub fn owned(situation: SyncSituation, owner: Focus) -> Self {
        Self {
            situation,
            current_owner: Some(owner),
            correlated_owner: None,
        }
    }

    /// The shadow has no owner; correlation proposed `candidate`, if any.
    #[must_use]
    pub fn correlated(situation: SyncSituation, candidate: Option<Focus>) -> Self {
        Self {
            situation,
            current_owner: None,
            correlated_owner: candidate,
        }
    }

    /// No owner and no candidate.
    #[must_use]
    pub fn unowned(situation: SyncSituation) -> Self {
        Self::correlated(situation, None)
    }

    #[must_use]
    pub fn situation(&self) -> SyncSituation {
        self.situation
    }

    #[must_use]
    pub fn current_owner(&self) -> Option<&Focus> {
        self.current_owner.as_ref()
    }

    #[must_use]
    pub fn correlated_owner(&self) -> Option<&Focus> {
        self.correlated_owner.as_ref()
    }

    /// Current owner, else the correlated one.
    #[must_use]
    pub fn owner(&self) -> Option<&Focus> {
        self.current_owner.as_ref().or(self.correlated_owner.as_ref())
    }
}

/// Determines the situation of changed shadows.
#[derive(Clone)]
pub struct SituationClassifier {
    repository: Arc<dyn RepositoryService>,
    correlation: CorrelationEngine,
}

impl SituationClassifier {
    pub fn new(repository: Arc<dyn RepositoryService>, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self {
            correlation: CorrelationEngine::new(repository.clone(), evaluator),
            repository,
        }
    }

    /// Correlation engine used for unowned shadows.
    #[must_use]
    pub fn correlation(&self) -> &CorrelationEngine {
        &self.correlation
    }

    /// Classify the shadow of a notification.
    ///
    /// May update the notification: the object of an ADD delta becomes the
    /// current shadow and a shadow without a resource reference receives the
    /// notification's resource.
    #[instrument(skip_all, fields(channel = %notification.channel_str()))]
    pub async fn classify(
        &self,
        focus_type: FocusType,
        notification: &mut ChangeNotification,
        policy: &SynchronizationPolicy,
        configuration: Option<&SystemConfiguration>,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<SynchronizationSituation> {
        let subresult = result.create_subresult("classify");
        match self
            .classify_inner(focus_type, notification, policy, configuration, task, subresult)
            .await
        {
            Ok(situation) => {
                subresult.add_param("situation", situation.situation());
                subresult.record_success();
                Ok(situation)
            }
            Err(error) => {
                subresult.record_fatal_error(&error);
                Err(error)
            }
        }
    }

    async fn classify_inner(
        &self,
        focus_type: FocusType,
        notification: &mut ChangeNotification,
        policy: &SynchronizationPolicy,
        configuration: Option<&SystemConfiguration>,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<SynchronizationSituation> {
        let shadow_id = notification.shadow_oid()?;
        let deleted = notification.is_delete();

        if let Some(owner) = self.repository.search_shadow_owner(shadow_id, true).await? {
            let situation = if deleted {
                SyncSituation::Deleted
            } else {
                SyncSituation::Linked
            };
            debug!(
                shadow_id = %shadow_id,
                owner = %owner.name,
                situation = %situation,
                "Shadow has an owner"
            );
            return Ok(SynchronizationSituation::owned(situation, owner));
        }

        if deleted {
            debug!(shadow_id = %shadow_id, "Unowned shadow was deleted");
            return Ok(SynchronizationSituation::unowned(SyncSituation::Deleted));
        }

        notification.prepare();
        let shadow = notification.applicable_shadow().ok_or_else(|| {
            SyncError::invalid_argument(format!(
                "No shadow available to correlate for {shadow_id}"
            ))
        })?;

        let mut candidates = self
            .correlation
            .find_candidates(
                focus_type,
                shadow,
                policy.correlation.as_ref(),
                policy.confirmation.as_ref(),
                &notification.resource,
                configuration,
                task,
                result,
            )
            .await?;

        let count = candidates.len();
        let classified = match count {
            0 => SynchronizationSituation::unowned(SyncSituation::Unmatched),
            1 => SynchronizationSituation::correlated(SyncSituation::Unlinked, candidates.pop()),
            _ => SynchronizationSituation::unowned(SyncSituation::Disputed),
        };
        debug!(
            shadow_id = %shadow_id,
            candidates = count,
            situation = %classified.situation(),
            "Shadow correlated"
        );
        Ok(classified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::RhaiExpressionEvaluator;
    use crate::memory::InMemoryRepository;
    use crate::policy::{CorrelationFilter, CorrelationRule, Expression};
    use crate::resource::Resource;
    use crate::result::OperationStatus;
    use crate::shadow::{Shadow, ShadowDelta};
    use serde_json::json;
    use xavyo_sync_core::ShadowId;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        classifier: SituationClassifier,
        resource: Arc<Resource>,
        policy: SynchronizationPolicy,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let classifier = SituationClassifier::new(repo.clone(), Arc::new(RhaiExpressionEvaluator::new()));
        let policy = SynchronizationPolicy::new("inetOrgPerson").with_correlation(CorrelationRule::new(
            vec![CorrelationFilter::equality(
                "email",
                Expression::path("shadow.attributes.mail"),
            )],
        ));
        Fixture {
            repo,
            classifier,
            resource: Arc::new(Resource::new("ldap")),
            policy,
        }
    }

    fn account(mail: &str) -> Shadow {
        Shadow::new("inetOrgPerson").with_attributes(json!({ "mail": mail }))
    }

    async fn classify(f: &Fixture, notification: &mut ChangeNotification) -> SyncResult<SynchronizationSituation> {
        let mut result = OperationResult::new("test");
        f.classifier
            .classify(FocusType::User, notification, &f.policy, None, &Task::new(), &mut result)
            .await
    }

    #[tokio::test]
    async fn test_owned_shadow_is_linked() {
        let f = fixture();
        let shadow = account("jdoe@example.com");
        let owner = Focus::user("jdoe").with_link(shadow.id);
        f.repo.add_shadow(shadow.clone()).unwrap();
        f.repo.add_focus(owner.clone()).unwrap();

        let mut notification = ChangeNotification::builder(f.resource.clone())
            .current_shadow(shadow)
            .build();
        let situation = classify(&f, &mut notification).await.unwrap();
        assert_eq!(situation.situation(), SyncSituation::Linked);
        assert_eq!(situation.current_owner().map(|o| o.id), Some(owner.id));
        assert!(situation.correlated_owner().is_none());
    }

    #[tokio::test]
    async fn test_owned_shadow_deleted() {
        let f = fixture();
        let shadow = account("jdoe@example.com");
        f.repo.add_focus(Focus::user("jdoe").with_link(shadow.id)).unwrap();

        let mut notification = ChangeNotification::builder(f.resource.clone())
            .old_shadow(shadow.clone())
            .delta(ShadowDelta::delete(shadow.id))
            .build();
        let situation = classify(&f, &mut notification).await.unwrap();
        assert_eq!(situation.situation(), SyncSituation::Deleted);
        assert!(situation.current_owner().is_some());
    }

    #[tokio::test]
    async fn test_unowned_delete_skips_correlation() {
        let f = fixture();
        f.repo.add_focus(Focus::user("jdoe").with_attributes(json!({"email": "jdoe@example.com"})))
            .unwrap();

        let mut notification = ChangeNotification::builder(f.resource.clone())
            .delta(ShadowDelta::delete(ShadowId::new()))
            .build();
        let situation = classify(&f, &mut notification).await.unwrap();
        assert_eq!(situation, SynchronizationSituation::unowned(SyncSituation::Deleted));
    }

    #[tokio::test]
    async fn test_correlation_counts_decide_situation() {
        let f = fixture();
        f.repo.add_focus(Focus::user("jdoe").with_attributes(json!({"email": "jdoe@example.com"})))
            .unwrap();
        f.repo.add_focus(Focus::user("a1").with_attributes(json!({"email": "shared@example.com"})))
            .unwrap();
        f.repo.add_focus(Focus::user("a2").with_attributes(json!({"email": "shared@example.com"})))
            .unwrap();

        let mut unmatched = ChangeNotification::builder(f.resource.clone())
            .current_shadow(account("nobody@example.com"))
            .build();
        assert_eq!(
            classify(&f, &mut unmatched).await.unwrap().situation(),
            SyncSituation::Unmatched
        );

        let mut unlinked = ChangeNotification::builder(f.resource.clone())
            .current_shadow(account("jdoe@example.com"))
            .build();
        let situation = classify(&f, &mut unlinked).await.unwrap();
        assert_eq!(situation.situation(), SyncSituation::Unlinked);
        assert_eq!(situation.correlated_owner().map(|o| o.name.as_str()), Some("jdoe"));

        let mut disputed = ChangeNotification::builder(f.resource.clone())
            .current_shadow(account("shared@example.com"))
            .build();
        let situation = classify(&f, &mut disputed).await.unwrap();
        assert_eq!(situation.situation(), SyncSituation::Disputed);
        assert!(situation.owner().is_none());
    }

    #[tokio::test]
    async fn test_add_delta_becomes_current_shadow() {
        let f = fixture();
        let shadow = account("nobody@example.com");
        let mut notification = ChangeNotification::builder(f.resource.clone())
            .delta(ShadowDelta::add(shadow.clone()))
            .build();

        let situation = classify(&f, &mut notification).await.unwrap();
        assert_eq!(situation.situation(), SyncSituation::Unmatched);
        let current = notification.current_shadow.unwrap();
        assert_eq!(current.id, shadow.id);
        assert_eq!(current.resource_id, Some(f.resource.id));
    }

    #[tokio::test]
    async fn test_failure_recorded_in_subresult() {
        let f = fixture();
        let mut notification = ChangeNotification::builder(f.resource.clone())
            .current_shadow(account("x@example.com"))
            .build();
        let policy = SynchronizationPolicy::new("inetOrgPerson").with_correlation(CorrelationRule::new(
            vec![CorrelationFilter::equality("email", Expression::script("let = ;"))],
        ));

        let mut result = OperationResult::new("test");
        let err = f
            .classifier
            .classify(FocusType::User, &mut notification, &policy, None, &Task::new(), &mut result)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ExpressionEvaluation { .. }));
        assert_eq!(result.find("classify").unwrap().status(), OperationStatus::FatalError);
    }
}
