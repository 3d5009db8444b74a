//! Correlation and confirmation.
//!
//! Finds the focus objects that may own an unlinked shadow. Correlation is
//! a pure read: it queries the repository and evaluates expressions but never
//! modifies anything.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, trace};
use xavyo_sync_core::FocusId;

use crate::error::SyncResult;
use crate::expression::{ExpressionEvaluator, ExpressionVariables};
use crate::focus::{Focus, FocusType};
use crate::policy::{CorrelationFilter, CorrelationRule, Expression};
use crate::repository::{ObjectQuery, RepositoryService};
use crate::resource::{Resource, SystemConfiguration};
use crate::result::OperationResult;
use crate::shadow::Shadow;
use crate::task::Task;

/// Correlation engine.
#[derive(Clone)]
pub struct CorrelationEngine {
    repository: Arc<dyn RepositoryService>,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl CorrelationEngine {
    pub fn new(repository: Arc<dyn RepositoryService>, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self {
            repository,
            evaluator,
        }
    }

    /// Candidate owners matching any filter of the rule.
    ///
    /// Candidates are de-duplicated, keeping the first-seen order. No rule
    /// means no candidates.
    #[instrument(skip_all, fields(shadow_id = %shadow.id, focus_type = %focus_type))]
    pub async fn correlate(
        &self,
        focus_type: FocusType,
        shadow: &Shadow,
        rule: Option<&CorrelationRule>,
        resource: &Resource,
        configuration: Option<&SystemConfiguration>,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<Vec<Focus>> {
        let Some(rule) = rule else {
            trace!("No correlation rule, no candidates");
            return Ok(Vec::new());
        };

        let variables =
            ExpressionVariables::default_variables(None, Some(shadow), Some(resource), configuration)?;

        let mut seen: HashSet<FocusId> = HashSet::new();
        let mut candidates = Vec::new();
        for (index, filter) in rule.filters.iter().enumerate() {
            let Some(query) = self.build_query(filter, index, &variables, task, result)? else {
                continue;
            };
            let found = self.repository.search_objects(focus_type, &query).await?;
            trace!(filter = index, found = found.len(), "Correlation filter evaluated");
            for focus in found {
                if seen.insert(focus.id) {
                    candidates.push(focus);
                }
            }
        }

        debug!(candidates = candidates.len(), "Correlation finished");
        Ok(candidates)
    }

    /// Keep only the candidates the confirmation expression accepts.
    pub fn confirm(
        &self,
        candidates: Vec<Focus>,
        shadow: &Shadow,
        confirmation: &Expression,
        resource: &Resource,
        configuration: Option<&SystemConfiguration>,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<Vec<Focus>> {
        let mut confirmed = Vec::new();
        for candidate in candidates {
            let variables = ExpressionVariables::default_variables(
                Some(&candidate),
                Some(shadow),
                Some(resource),
                configuration,
            )?;
            let description = format!("confirmation of focus {}", candidate.name);
            if self
                .evaluator
                .evaluate_condition(confirmation, &variables, &description, task, result)?
            {
                confirmed.push(candidate);
            }
        }
        debug!(confirmed = confirmed.len(), "Confirmation finished");
        Ok(confirmed)
    }

    /// Correlate, then confirm when more than one candidate was found.
    #[allow(clippy::too_many_arguments)]
    pub async fn find_candidates(
        &self,
        focus_type: FocusType,
        shadow: &Shadow,
        correlation: Option<&CorrelationRule>,
        confirmation: Option<&Expression>,
        resource: &Resource,
        configuration: Option<&SystemConfiguration>,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<Vec<Focus>> {
        let candidates = self
            .correlate(focus_type, shadow, correlation, resource, configuration, task, result)
            .await?;
        if candidates.len() <= 1 {
            return Ok(candidates);
        }
        match confirmation {
            Some(confirmation) => {
                self.confirm(candidates, shadow, confirmation, resource, configuration, task, result)
            }
            None => {
                trace!("No confirmation rule defined");
                Ok(candidates)
            }
        }
    }

    /// Check whether a given focus satisfies the correlation rule for the shadow.
    pub fn matches_correlation_rule(
        &self,
        focus: &Focus,
        shadow: &Shadow,
        rule: Option<&CorrelationRule>,
        resource: &Resource,
        configuration: Option<&SystemConfiguration>,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<bool> {
        let Some(rule) = rule else {
            return Ok(false);
        };
        let variables =
            ExpressionVariables::default_variables(None, Some(shadow), Some(resource), configuration)?;
        for (index, filter) in rule.filters.iter().enumerate() {
            if let Some(query) = self.build_query(filter, index, &variables, task, result)? {
                if query.matches(focus) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Evaluate the filter items into a query.
    ///
    /// Returns `None` for a filter that has no items or whose items all
    /// evaluate to null; such a filter would match everything.
    fn build_query(
        &self,
        filter: &CorrelationFilter,
        index: usize,
        variables: &ExpressionVariables,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<Option<ObjectQuery>> {
        let mut query = ObjectQuery::new();
        let mut has_value = false;
        for item in &filter.items {
            let description = format!("correlation filter {index} item {}", item.focus_attribute);
            let value = self
                .evaluator
                .evaluate(&item.expression, variables, &description, task, result)?;
            has_value |= !value.is_null();
            query = query.and_equal(item.focus_attribute.clone(), value);
        }
        if !has_value {
            trace!(filter = index, "Skipping correlation filter without values");
            return Ok(None);
        }
        Ok(Some(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::RhaiExpressionEvaluator;
    use crate::memory::InMemoryRepository;
    use crate::policy::CorrelationItem;
    use serde_json::json;

    struct Fixture {
        engine: CorrelationEngine,
        resource: Resource,
        jdoe: Focus,
        jdoe2: Focus,
    }

    fn fixture() -> Fixture {
        let repo = InMemoryRepository::new();
        let jdoe = Focus::user("jdoe").with_attributes(json!({"email": "jdoe@example.com", "dept": "it"}));
        let jdoe2 = Focus::user("jdoe2").with_attributes(json!({"email": "jdoe@example.com", "dept": "hr"}));
        repo.add_focus(jdoe.clone()).unwrap();
        repo.add_focus(jdoe2.clone()).unwrap();
        repo.add_focus(Focus::user("other").with_attributes(json!({"email": "o@example.com"})))
            .unwrap();

        Fixture {
            engine: CorrelationEngine::new(Arc::new(repo), Arc::new(RhaiExpressionEvaluator::new())),
            resource: Resource::new("ldap"),
            jdoe,
            jdoe2,
        }
    }

    fn shadow() -> Shadow {
        Shadow::new("inetOrgPerson").with_attributes(json!({
            "uid": "jdoe",
            "mail": "jdoe@example.com",
            "ou": "it"
        }))
    }

    fn by_name() -> CorrelationFilter {
        CorrelationFilter::equality("name", Expression::path("shadow.attributes.uid"))
    }

    fn by_email() -> CorrelationFilter {
        CorrelationFilter::equality("email", Expression::path("shadow.attributes.mail"))
    }

    #[tokio::test]
    async fn test_no_rule_no_candidates() {
        let f = fixture();
        let mut result = OperationResult::new("test");
        let found = f
            .engine
            .correlate(FocusType::User, &shadow(), None, &f.resource, None, &Task::new(), &mut result)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_filters_are_unioned_and_deduplicated() {
        let f = fixture();
        let rule = CorrelationRule::new(vec![by_name(), by_email()]);
        let mut result = OperationResult::new("test");
        let found = f
            .engine
            .correlate(FocusType::User, &shadow(), Some(&rule), &f.resource, None, &Task::new(), &mut result)
            .await
            .unwrap();

        let names: Vec<&str> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["jdoe", "jdoe2"]);
    }

    #[tokio::test]
    async fn test_filter_items_are_conjunctive() {
        let f = fixture();
        let rule = CorrelationRule::new(vec![CorrelationFilter::new(vec![
            CorrelationItem::new("email", Expression::path("shadow.attributes.mail")),
            CorrelationItem::new("dept", Expression::path("shadow.attributes.ou")),
        ])]);
        let mut result = OperationResult::new("test");
        let found = f
            .engine
            .correlate(FocusType::User, &shadow(), Some(&rule), &f.resource, None, &Task::new(), &mut result)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, f.jdoe.id);
    }

    #[tokio::test]
    async fn test_null_only_filter_is_skipped() {
        let f = fixture();
        let rule = CorrelationRule::new(vec![CorrelationFilter::equality(
            "email",
            Expression::path("shadow.attributes.missing"),
        )]);
        let mut result = OperationResult::new("test");
        let found = f
            .engine
            .correlate(FocusType::User, &shadow(), Some(&rule), &f.resource, None, &Task::new(), &mut result)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_narrows_candidates() {
        let f = fixture();
        let rule = CorrelationRule::new(vec![by_email()]);
        let confirmation = Expression::script("focus.attributes.dept == shadow.attributes.ou");
        let mut result = OperationResult::new("test");
        let found = f
            .engine
            .find_candidates(
                FocusType::User,
                &shadow(),
                Some(&rule),
                Some(&confirmation),
                &f.resource,
                None,
                &Task::new(),
                &mut result,
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, f.jdoe.id);
    }

    #[tokio::test]
    async fn test_confirmation_skipped_for_single_candidate() {
        let f = fixture();
        let rule = CorrelationRule::new(vec![by_name()]);
        let reject_all = Expression::literal(json!(false));
        let mut result = OperationResult::new("test");
        let found = f
            .engine
            .find_candidates(
                FocusType::User,
                &shadow(),
                Some(&rule),
                Some(&reject_all),
                &f.resource,
                None,
                &Task::new(),
                &mut result,
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_matches_correlation_rule() {
        let f = fixture();
        let rule = CorrelationRule::new(vec![by_name()]);
        let mut result = OperationResult::new("test");
        let task = Task::new();

        assert!(f
            .engine
            .matches_correlation_rule(&f.jdoe, &shadow(), Some(&rule), &f.resource, None, &task, &mut result)
            .unwrap());
        assert!(!f
            .engine
            .matches_correlation_rule(&f.jdoe2, &shadow(), Some(&rule), &f.resource, None, &task, &mut result)
            .unwrap());
        assert!(!f
            .engine
            .matches_correlation_rule(&f.jdoe, &shadow(), None, &f.resource, None, &task, &mut result)
            .unwrap());
    }
}
