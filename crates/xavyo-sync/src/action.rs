//! Reaction actions.
//!
//! Actions are looked up by handler URI in an [`ActionRegistry`] and run
//! before or after the clockwork. They only adjust the [`SyncContext`];
//! nothing is written to the repository here.
//!
//! # Example
//!
//! ```
//! use xavyo_sync::action::{ActionRegistry, URI_LINK};
//!
//! let registry = ActionRegistry::with_builtin_actions();
//! assert!(registry.contains(URI_LINK));
//! assert!(registry.get_action_instance("urn:unknown").is_err());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::context::{FocusContext, FocusDelta, SyncContext, SynchronizationIntent};
use crate::error::{SyncError, SyncResult};
use crate::focus::Focus;
use crate::result::OperationResult;
use crate::situation::SynchronizationSituation;
use crate::task::Task;

pub const URI_LINK: &str = "urn:xavyo:sync:action:link";
pub const URI_UNLINK: &str = "urn:xavyo:sync:action:unlink";
pub const URI_ADD_FOCUS: &str = "urn:xavyo:sync:action:add-focus";
pub const URI_DELETE_FOCUS: &str = "urn:xavyo:sync:action:delete-focus";
pub const URI_INACTIVATE_FOCUS: &str = "urn:xavyo:sync:action:inactivate-focus";
pub const URI_DELETE_SHADOW: &str = "urn:xavyo:sync:action:delete-shadow";
pub const URI_INACTIVATE_SHADOW: &str = "urn:xavyo:sync:action:inactivate-shadow";
pub const URI_SYNCHRONIZE: &str = "urn:xavyo:sync:action:synchronize";

/// Action parameters from the reaction configuration.
pub type ActionParameters = HashMap<String, serde_json::Value>;

/// A reaction action.
#[async_trait]
pub trait Action: Send + Sync {
    async fn handle(
        &self,
        context: &mut SyncContext,
        situation: &SynchronizationSituation,
        parameters: &ActionParameters,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<()>;
}

/// Creates a fresh action instance per invocation.
pub type ActionFactory = Arc<dyn Fn() -> Box<dyn Action> + Send + Sync>;

/// Handler URI to action factory mapping, filled at start-up.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    factories: HashMap<String, ActionFactory>,
}

impl ActionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in action.
    #[must_use]
    pub fn with_builtin_actions() -> Self {
        let mut registry = Self::new();
        registry.register(URI_LINK, || Box::new(LinkAction));
        registry.register(URI_UNLINK, || Box::new(UnlinkAction));
        registry.register(URI_ADD_FOCUS, || Box::new(AddFocusAction));
        registry.register(URI_DELETE_FOCUS, || Box::new(DeleteFocusAction));
        registry.register(URI_INACTIVATE_FOCUS, || Box::new(InactivateFocusAction));
        registry.register(URI_DELETE_SHADOW, || Box::new(DeleteShadowAction));
        registry.register(URI_INACTIVATE_SHADOW, || Box::new(InactivateShadowAction));
        registry.register(URI_SYNCHRONIZE, || Box::new(SynchronizeAction));
        registry
    }

    /// Register (or replace) the factory for a handler URI.
    pub fn register<F>(&mut self, handler_uri: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Action> + Send + Sync + 'static,
    {
        self.factories.insert(handler_uri.into(), Arc::new(factory));
    }

    #[must_use]
    pub fn contains(&self, handler_uri: &str) -> bool {
        self.factories.contains_key(handler_uri)
    }

    /// Registered handler URIs, sorted.
    #[must_use]
    pub fn handler_uris(&self) -> Vec<&str> {
        let mut uris: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        uris.sort_unstable();
        uris
    }

    /// Instantiate the action for a handler URI.
    ///
    /// Unknown URIs are a configuration error.
    pub fn get_action_instance(&self, handler_uri: &str) -> SyncResult<Box<dyn Action>> {
        if handler_uri.trim().is_empty() {
            return Err(SyncError::configuration("Action handler URI must not be empty"));
        }
        self.factories
            .get(handler_uri)
            .map(|factory| factory())
            .ok_or_else(|| {
                SyncError::configuration(format!("No action registered for handler URI {handler_uri}"))
            })
    }
}

/// Load `owner` into the focus context unless a focus is already there.
fn bind_owner(context: &mut SyncContext, owner: &Focus) {
    let focus_context = context.focus_context_or_create();
    if focus_context.object_old.is_none() && focus_context.primary_delta.is_none() {
        *focus_context = FocusContext::loaded(owner.clone());
    }
}

fn set_projection_intent(context: &mut SyncContext, intent: SynchronizationIntent) {
    if let Some(projection) = context.primary_projection_mut() {
        projection.synchronization_intent = Some(intent);
    }
}

/// Link the shadow to its current or correlated owner.
struct LinkAction;

#[async_trait]
impl Action for LinkAction {
    async fn handle(
        &self,
        context: &mut SyncContext,
        situation: &SynchronizationSituation,
        _parameters: &ActionParameters,
        _task: &Task,
        _result: &mut OperationResult,
    ) -> SyncResult<()> {
        let owner = situation.owner().ok_or_else(|| {
            SyncError::action(
                URI_LINK,
                format!("No owner to link to in situation {}", situation.situation()),
            )
        })?;
        debug!(owner = %owner.name, "Linking shadow");
        bind_owner(context, owner);
        set_projection_intent(context, SynchronizationIntent::Link);
        Ok(())
    }
}

struct UnlinkAction;

#[async_trait]
impl Action for UnlinkAction {
    async fn handle(
        &self,
        context: &mut SyncContext,
        situation: &SynchronizationSituation,
        _parameters: &ActionParameters,
        _task: &Task,
        _result: &mut OperationResult,
    ) -> SyncResult<()> {
        if let Some(owner) = situation.current_owner() {
            bind_owner(context, owner);
        }
        set_projection_intent(context, SynchronizationIntent::Unlink);
        Ok(())
    }
}

/// Create a new focus for an unowned shadow.
///
/// The optional `name_attribute` parameter names the shadow attribute the new
/// focus is named after; otherwise the shadow name is used.
struct AddFocusAction;

impl AddFocusAction {
    fn focus_name(context: &SyncContext, parameters: &ActionParameters) -> Option<String> {
        let shadow = context.primary_projection()?.object_current.as_ref()?;
        let from_attribute = parameters
            .get("name_attribute")
            .and_then(serde_json::Value::as_str)
            .and_then(|attribute| shadow.attribute(attribute))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        from_attribute.or_else(|| shadow.name.clone())
    }
}

#[async_trait]
impl Action for AddFocusAction {
    async fn handle(
        &self,
        context: &mut SyncContext,
        situation: &SynchronizationSituation,
        parameters: &ActionParameters,
        _task: &Task,
        _result: &mut OperationResult,
    ) -> SyncResult<()> {
        if situation.owner().is_some() {
            trace!("Shadow already has an owner, not adding a focus");
            return Ok(());
        }
        let name = Self::focus_name(context, parameters).ok_or_else(|| {
            SyncError::action(URI_ADD_FOCUS, "Cannot determine a name for the new focus")
        })?;
        let focus = Focus::new(context.focus_type, name);
        debug!(focus_type = %focus.focus_type, name = %focus.name, "Adding focus");
        context.focus_context_or_create().primary_delta = Some(FocusDelta::Add(Box::new(focus)));
        Ok(())
    }
}

struct DeleteFocusAction;

#[async_trait]
impl Action for DeleteFocusAction {
    async fn handle(
        &self,
        context: &mut SyncContext,
        situation: &SynchronizationSituation,
        _parameters: &ActionParameters,
        _task: &Task,
        _result: &mut OperationResult,
    ) -> SyncResult<()> {
        let Some(owner) = situation.current_owner() else {
            trace!("No owner, nothing to delete");
            return Ok(());
        };
        bind_owner(context, owner);
        context.focus_context_or_create().primary_delta = Some(FocusDelta::Delete(owner.id));
        Ok(())
    }
}

struct InactivateFocusAction;

#[async_trait]
impl Action for InactivateFocusAction {
    async fn handle(
        &self,
        context: &mut SyncContext,
        situation: &SynchronizationSituation,
        _parameters: &ActionParameters,
        _task: &Task,
        _result: &mut OperationResult,
    ) -> SyncResult<()> {
        let Some(owner) = situation.current_owner() else {
            trace!("No owner, nothing to inactivate");
            return Ok(());
        };
        bind_owner(context, owner);
        context.focus_context_or_create().primary_delta = Some(FocusDelta::Disable(owner.id));
        Ok(())
    }
}

struct DeleteShadowAction;

#[async_trait]
impl Action for DeleteShadowAction {
    async fn handle(
        &self,
        context: &mut SyncContext,
        _situation: &SynchronizationSituation,
        _parameters: &ActionParameters,
        _task: &Task,
        _result: &mut OperationResult,
    ) -> SyncResult<()> {
        set_projection_intent(context, SynchronizationIntent::Delete);
        Ok(())
    }
}

struct InactivateShadowAction;

#[async_trait]
impl Action for InactivateShadowAction {
    async fn handle(
        &self,
        context: &mut SyncContext,
        _situation: &SynchronizationSituation,
        _parameters: &ActionParameters,
        _task: &Task,
        _result: &mut OperationResult,
    ) -> SyncResult<()> {
        if let Some(projection) = context.primary_projection_mut() {
            projection.enable_projection = Some(false);
        }
        Ok(())
    }
}

struct SynchronizeAction;

#[async_trait]
impl Action for SynchronizeAction {
    async fn handle(
        &self,
        context: &mut SyncContext,
        situation: &SynchronizationSituation,
        _parameters: &ActionParameters,
        _task: &Task,
        _result: &mut OperationResult,
    ) -> SyncResult<()> {
        if let Some(owner) = situation.current_owner() {
            bind_owner(context, owner);
        }
        set_projection_intent(context, SynchronizationIntent::Synchronize);
        Ok(())
    }
}
