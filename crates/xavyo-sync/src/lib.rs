//! # Synchronization Engine
//!
//! Decision engine that reacts to changes detected on resource objects
//! (shadows) and decides what to do about the focus objects that own them.
//!
//! This crate provides:
//! - Synchronization policy selection per resource, kind, intent and channel
//! - Correlation of unowned shadows with candidate focus objects
//! - Situation classification (linked, unlinked, unmatched, disputed, deleted)
//! - Reaction selection and action execution around a change-application run
//! - Synchronization metadata and statistics bookkeeping
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌────────────────┐     ┌────────────────────┐
//! │ Change           │────►│ Policy         │────►│ Situation          │
//! │ Notification     │     │ Selector       │     │ Classifier         │
//! └──────────────────┘     └────────────────┘     └─────────┬──────────┘
//!                                                           │
//!                                                           ▼
//!                          ┌────────────────┐     ┌────────────────────┐
//!                          │ Clockwork      │◄────│ Reaction           │
//!                          │ (downstream)   │     │ Executor           │
//!                          └────────────────┘     └────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use xavyo_sync::{InMemoryRepository, OperationResult, SynchronizationService, Task};
//!
//! let service = SynchronizationService::builder()
//!     .repository(Arc::new(InMemoryRepository::new()))
//!     .clockwork(Arc::new(my_clockwork))
//!     .build()?;
//!
//! let mut result = OperationResult::new("livesync");
//! service.notify_change(notification, &Task::new(), &mut result).await?;
//! ```

pub mod action;
pub mod clockwork;
pub mod config;
pub mod context;
pub mod correlation;
pub mod error;
pub mod executor;
pub mod expression;
pub mod focus;
pub mod memory;
pub mod notification;
pub mod policy;
pub mod reaction;
pub mod repository;
pub mod resource;
pub mod result;
pub mod selector;
pub mod service;
pub mod shadow;
pub mod situation;
pub mod statistics;
pub mod task;

pub use action::{Action, ActionFactory, ActionParameters, ActionRegistry};
pub use clockwork::Clockwork;
pub use config::{ConditionPrecedence, SynchronizationServiceConfig};
pub use context::{
    ExecuteOptions, FocusContext, FocusDelta, ProjectionContext, ShadowDiscriminator, SyncContext,
    SynchronizationIntent,
};
pub use correlation::CorrelationEngine;
pub use error::{
    Decision, NotApplicableReason, RepositoryError, RepositoryResult, SyncError, SyncResult,
};
pub use executor::ReactionExecutor;
pub use expression::{
    ExpressionEvaluator, ExpressionVariables, RhaiEvaluatorConfig, RhaiExpressionEvaluator,
};
pub use focus::{ActivationStatus, Focus, FocusType};
pub use memory::InMemoryRepository;
pub use notification::{ChangeNotification, ChangeNotificationBuilder};
pub use policy::{
    ActionDefinition, ActionOrder, ChannelMatch, CorrelationFilter, CorrelationItem,
    CorrelationRule, Expression, Reaction, SynchronizationPolicy,
};
pub use reaction::ReactionSelector;
pub use repository::{ObjectQuery, ObjectRef, RepositoryObject, RepositoryService};
pub use resource::{ObjectTemplate, Resource, SystemConfiguration};
pub use result::{OperationResult, OperationStatus};
pub use selector::{check_policy_applicability, PolicySelector};
pub use service::{BatchSummary, SynchronizationService, SynchronizationServiceBuilder};
pub use shadow::{
    ChangeType, Shadow, ShadowDelta, ShadowKind, ShadowModification, SituationDescription,
    SyncSituation,
};
pub use situation::{SituationClassifier, SynchronizationSituation};
pub use statistics::{
    NoopStatisticsSink, SituationCounts, StatisticsObject, SynchronizationEvent,
    SynchronizationInformation,
    SynchronizationStatistics, SynchronizationStatisticsSink,
};
pub use task::Task;
pub use xavyo_sync_core::*;
