//! Common test utilities for xavyo-sync integration tests.
//!
//! All tests run against the in-memory repository with recording mocks for
//! the clockwork and the repository write path.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use serde_json::json;
use xavyo_sync::{
    ActionDefinition, ChangeNotification, Clockwork, CorrelationFilter, CorrelationRule,
    Expression, Focus, FocusType, InMemoryRepository, ObjectQuery, ObjectRef, OperationResult,
    Reaction, RepositoryError, RepositoryObject, RepositoryResult, RepositoryService, Resource,
    Shadow, ShadowId, ShadowModification, SyncContext, SyncError, SyncResult, SyncSituation,
    SynchronizationPolicy, SynchronizationService, SynchronizationStatistics, SystemConfiguration,
    Task,
};

static INIT: Once = Once::new();

/// Install a tracing subscriber once when `RUST_LOG` is set.
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        }
    });
}

// ============================================================================
// Clockwork
// ============================================================================

/// Clockwork mock that counts runs and keeps a copy of each context.
///
/// When built with a repository it also captures the situation stored on the
/// primary shadow at the moment it runs.
#[derive(Default)]
pub struct RecordingClockwork {
    runs: AtomicUsize,
    contexts: Mutex<Vec<SyncContext>>,
    stored_situations: Mutex<Vec<Option<SyncSituation>>>,
    resolved: Option<SyncSituation>,
    failure: Option<String>,
    repository: Option<Arc<InMemoryRepository>>,
}

impl RecordingClockwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe shadows in this repository while running.
    pub fn observing(repository: Arc<InMemoryRepository>) -> Self {
        Self {
            repository: Some(repository),
            ..Self::default()
        }
    }

    /// Report this situation as resolved on the primary projection.
    pub fn resolving(mut self, situation: SyncSituation) -> Self {
        self.resolved = Some(situation);
        self
    }

    /// Fail every run.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn last_context(&self) -> Option<SyncContext> {
        self.contexts.lock().unwrap().last().cloned()
    }

    pub fn stored_situations(&self) -> Vec<Option<SyncSituation>> {
        self.stored_situations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clockwork for RecordingClockwork {
    async fn run(
        &self,
        context: &mut SyncContext,
        _task: &Task,
        _result: &mut OperationResult,
    ) -> SyncResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        if let Some(repository) = &self.repository {
            let oid = context.primary_projection().and_then(|p| p.oid);
            let stored = oid
                .and_then(|oid| repository.shadow(oid).ok().flatten())
                .and_then(|shadow| shadow.synchronization_situation);
            self.stored_situations.lock().unwrap().push(stored);
        }

        if let Some(message) = &self.failure {
            return Err(SyncError::clockwork(message.clone()));
        }

        if let Some(situation) = self.resolved {
            if let Some(projection) = context.primary_projection_mut() {
                projection.synchronization_situation_resolved = Some(situation);
            }
        }
        self.contexts.lock().unwrap().push(context.clone());
        Ok(())
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Repository wrapper that counts calls and can fail shadow modifications.
pub struct FlakyRepository {
    inner: Arc<InMemoryRepository>,
    modify_failure: Mutex<Option<RepositoryError>>,
    modify_calls: AtomicUsize,
    owner_lookups: AtomicUsize,
    searches: AtomicUsize,
}

impl FlakyRepository {
    pub fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self {
            inner,
            modify_failure: Mutex::new(None),
            modify_calls: AtomicUsize::new(0),
            owner_lookups: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
        }
    }

    /// Fail every subsequent `modify_shadow` with this error.
    pub fn fail_modifications_with(&self, error: RepositoryError) {
        *self.modify_failure.lock().unwrap() = Some(error);
    }

    pub fn modify_calls(&self) -> usize {
        self.modify_calls.load(Ordering::SeqCst)
    }

    pub fn owner_lookups(&self) -> usize {
        self.owner_lookups.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryService for FlakyRepository {
    async fn search_shadow_owner(
        &self,
        shadow_id: ShadowId,
        allow_not_found: bool,
    ) -> RepositoryResult<Option<Focus>> {
        self.owner_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.search_shadow_owner(shadow_id, allow_not_found).await
    }

    async fn modify_shadow(
        &self,
        shadow_id: ShadowId,
        modifications: &[ShadowModification],
    ) -> RepositoryResult<()> {
        self.modify_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.modify_failure.lock().unwrap().clone();
        match failure {
            Some(error) => Err(error),
            None => self.inner.modify_shadow(shadow_id, modifications).await,
        }
    }

    async fn get_object(&self, reference: ObjectRef) -> RepositoryResult<RepositoryObject> {
        self.inner.get_object(reference).await
    }

    async fn search_objects(
        &self,
        focus_type: FocusType,
        query: &ObjectQuery,
    ) -> RepositoryResult<Vec<Focus>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search_objects(focus_type, query).await
    }

    async fn get_system_configuration(&self) -> RepositoryResult<Option<SystemConfiguration>> {
        self.inner.get_system_configuration().await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Object class used by every fixture shadow.
pub const ACCOUNT_CLASS: &str = "inetOrgPerson";

/// Account policy correlating on `email == shadow.attributes.mail`.
pub fn account_policy() -> SynchronizationPolicy {
    SynchronizationPolicy::new(ACCOUNT_CLASS)
        .with_name("accounts")
        .with_intent("default")
        .with_correlation(CorrelationRule::new(vec![CorrelationFilter::equality(
            "email",
            Expression::path("shadow.attributes.mail"),
        )]))
}

/// Reaction running a single action.
pub fn reaction(situation: SyncSituation, handler_uri: &str) -> Reaction {
    Reaction::new(situation).with_action(ActionDefinition::new(handler_uri))
}

/// Account shadow on `resource` with a uid and a mail attribute.
pub fn account(resource: &Resource, uid: &str) -> Shadow {
    Shadow::new(ACCOUNT_CLASS)
        .with_name(uid)
        .with_resource(resource.id)
        .with_attributes(json!({ "uid": uid, "mail": format!("{uid}@example.com") }))
}

/// User whose email correlates with [`account`] of the same uid.
pub fn user(uid: &str) -> Focus {
    Focus::user(uid).with_attributes(json!({ "email": format!("{uid}@example.com") }))
}

/// Everything a test needs: repository, mocks, resource and service.
pub struct TestContext {
    pub repository: Arc<InMemoryRepository>,
    pub flaky: Arc<FlakyRepository>,
    pub clockwork: Arc<RecordingClockwork>,
    pub statistics: Arc<SynchronizationStatistics>,
    pub resource: Arc<Resource>,
    pub service: SynchronizationService,
}

impl TestContext {
    /// Context for a resource with the given policy and an observing clockwork.
    pub fn new(policy: SynchronizationPolicy) -> Self {
        let repository = Arc::new(InMemoryRepository::new());
        let clockwork = RecordingClockwork::observing(repository.clone());
        Self::with_clockwork(repository, policy, clockwork)
    }

    /// Context for a resource without any synchronization policy.
    pub fn without_policy() -> Self {
        let repository = Arc::new(InMemoryRepository::new());
        let clockwork = RecordingClockwork::observing(repository.clone());
        Self::build(repository, Resource::new("ldap"), clockwork)
    }

    pub fn with_clockwork(
        repository: Arc<InMemoryRepository>,
        policy: SynchronizationPolicy,
        clockwork: RecordingClockwork,
    ) -> Self {
        Self::build(repository, Resource::new("ldap").with_policy(policy), clockwork)
    }

    fn build(
        repository: Arc<InMemoryRepository>,
        resource: Resource,
        clockwork: RecordingClockwork,
    ) -> Self {
        init_test_logging();
        repository
            .add_resource(resource.clone())
            .expect("resource stored");
        let flaky = Arc::new(FlakyRepository::new(repository.clone()));
        let clockwork = Arc::new(clockwork);
        let service = SynchronizationService::builder()
            .repository(flaky.clone())
            .clockwork(clockwork.clone())
            .build()
            .expect("service builds");
        Self {
            repository,
            flaky,
            clockwork,
            statistics: Arc::new(SynchronizationStatistics::new()),
            resource: Arc::new(resource),
            service,
        }
    }

    /// Task reporting into this context's statistics.
    pub fn task(&self) -> Task {
        Task::new().with_statistics(self.statistics.clone())
    }

    /// Store an account shadow and return it.
    pub fn stored_account(&self, uid: &str) -> Shadow {
        let shadow = account(&self.resource, uid);
        self.repository
            .add_shadow(shadow.clone())
            .expect("shadow stored");
        shadow
    }

    /// Store a focus and return it.
    pub fn stored_focus(&self, focus: Focus) -> Focus {
        self.repository
            .add_focus(focus.clone())
            .expect("focus stored");
        focus
    }

    /// Notification carrying the current shadow on a channel.
    pub fn notification(&self, shadow: Shadow, channel: &str) -> ChangeNotification {
        ChangeNotification::builder(self.resource.clone())
            .current_shadow(shadow)
            .channel(channel)
            .build()
    }

    /// Stored copy of a shadow.
    pub fn shadow(&self, id: ShadowId) -> Shadow {
        self.repository
            .shadow(id)
            .expect("repository readable")
            .expect("shadow exists")
    }
}
