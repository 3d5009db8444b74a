//! Synchronization context handed to actions and the clockwork.
//!
//! Binds the owning focus (when known) and the changed shadow's projection
//! together with the execution options computed for the reaction. Actions
//! only record intents here; the clockwork turns them into changes.

use serde::{Deserialize, Serialize};
use xavyo_sync_core::{FocusId, ResourceId, ShadowId};

use crate::focus::{Focus, FocusType};
use crate::resource::{ObjectTemplate, SystemConfiguration};
use crate::shadow::{Shadow, ShadowDelta, ShadowKind, SyncSituation};

/// Options for the change-application run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    /// Recompute the projection from the focus instead of applying only the delta.
    pub reconcile: bool,
    /// Do not propagate the change to resources other than the triggering one.
    pub limit_propagation: bool,
}

/// Identifies a projection: resource, kind, intent and whether it is gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShadowDiscriminator {
    pub resource_id: ResourceId,
    pub kind: ShadowKind,
    pub intent: Option<String>,
    pub tombstone: bool,
}

/// What should happen to a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynchronizationIntent {
    /// Link the shadow to the focus.
    Link,
    /// Remove the link, keep the resource object.
    Unlink,
    /// Delete the resource object.
    Delete,
    /// Keep the projection as it is.
    Keep,
    /// Recompute the projection from the focus.
    Synchronize,
}

impl SynchronizationIntent {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SynchronizationIntent::Link => "link",
            SynchronizationIntent::Unlink => "unlink",
            SynchronizationIntent::Delete => "delete",
            SynchronizationIntent::Keep => "keep",
            SynchronizationIntent::Synchronize => "synchronize",
        }
    }
}

impl std::fmt::Display for SynchronizationIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requested change of the focus itself.
#[derive(Debug, Clone, PartialEq)]
pub enum FocusDelta {
    /// Create the focus.
    Add(Box<Focus>),
    /// Delete the focus.
    Delete(FocusId),
    /// Disable the focus.
    Disable(FocusId),
}

/// Focus side of the context.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusContext {
    pub focus_type: FocusType,
    /// Focus as loaded from the repository.
    pub object_old: Option<Focus>,
    /// Change requested by actions.
    pub primary_delta: Option<FocusDelta>,
}

impl FocusContext {
    #[must_use]
    pub fn new(focus_type: FocusType) -> Self {
        Self {
            focus_type,
            object_old: None,
            primary_delta: None,
        }
    }

    #[must_use]
    pub fn loaded(focus: Focus) -> Self {
        Self {
            focus_type: focus.focus_type,
            object_old: Some(focus),
            primary_delta: None,
        }
    }

    /// OID of the loaded focus, or of the focus requested for creation.
    #[must_use]
    pub fn focus_id(&self) -> Option<FocusId> {
        match (&self.object_old, &self.primary_delta) {
            (Some(focus), _) => Some(focus.id),
            (None, Some(FocusDelta::Add(focus))) => Some(focus.id),
            _ => None,
        }
    }
}

/// Projection side of the context: one shadow on one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionContext {
    pub discriminator: ShadowDiscriminator,
    pub oid: Option<ShadowId>,
    pub synchronization_situation_detected: Option<SyncSituation>,
    /// Situation after the clockwork and the actions ran.
    pub synchronization_situation_resolved: Option<SyncSituation>,
    pub synchronization_intent: Option<SynchronizationIntent>,
    pub sync_delta: Option<ShadowDelta>,
    /// The change is an absolute state (no delta).
    pub sync_absolute_trigger: bool,
    pub object_current: Option<Shadow>,
    pub full_shadow: bool,
    pub fresh: bool,
    pub exists: bool,
    pub do_reconciliation: bool,
    /// Requested activation of the resource object; `Some(false)` disables it.
    pub enable_projection: Option<bool>,
}

impl ProjectionContext {
    #[must_use]
    pub fn new(discriminator: ShadowDiscriminator) -> Self {
        Self {
            discriminator,
            oid: None,
            synchronization_situation_detected: None,
            synchronization_situation_resolved: None,
            synchronization_intent: None,
            sync_delta: None,
            sync_absolute_trigger: false,
            object_current: None,
            full_shadow: false,
            fresh: false,
            exists: true,
            do_reconciliation: false,
            enable_projection: None,
        }
    }
}

/// Context of one synchronization run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncContext {
    pub focus_type: FocusType,
    pub channel: Option<String>,
    pub options: ExecuteOptions,
    pub focus_context: Option<FocusContext>,
    projections: Vec<ProjectionContext>,
    /// Resource that triggered the run; set when propagation is limited.
    pub triggered_resource: Option<ResourceId>,
    pub focus_template: Option<ObjectTemplate>,
    pub system_configuration: Option<SystemConfiguration>,
}

impl SyncContext {
    #[must_use]
    pub fn new(focus_type: FocusType, channel: Option<String>, options: ExecuteOptions) -> Self {
        Self {
            focus_type,
            channel,
            options,
            focus_context: None,
            projections: Vec::new(),
            triggered_resource: None,
            focus_template: None,
            system_configuration: None,
        }
    }

    pub fn add_projection(&mut self, projection: ProjectionContext) {
        self.projections.push(projection);
    }

    pub fn projections(&self) -> impl Iterator<Item = &ProjectionContext> {
        self.projections.iter()
    }

    pub fn projections_mut(&mut self) -> impl Iterator<Item = &mut ProjectionContext> {
        self.projections.iter_mut()
    }

    /// The projection of the changed shadow.
    #[must_use]
    pub fn primary_projection(&self) -> Option<&ProjectionContext> {
        self.projections.first()
    }

    pub fn primary_projection_mut(&mut self) -> Option<&mut ProjectionContext> {
        self.projections.first_mut()
    }

    /// Focus context, created empty when absent.
    pub fn focus_context_or_create(&mut self) -> &mut FocusContext {
        let focus_type = self.focus_type;
        self.focus_context
            .get_or_insert_with(|| FocusContext::new(focus_type))
    }

    /// Resolved situation of the primary projection.
    #[must_use]
    pub fn synchronization_situation_resolved(&self) -> Option<SyncSituation> {
        self.primary_projection()
            .and_then(|p| p.synchronization_situation_resolved)
    }
}
