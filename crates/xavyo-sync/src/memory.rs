//! In-memory repository.
//!
//! Reference [`RepositoryService`] implementation for simulations, dry runs
//! and tests. All state sits behind `RwLock`s; modifications are applied
//! replace-style, so concurrent writers for the same shadow simply
//! overwrite each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;
use xavyo_sync_core::{FocusId, ObjectTemplateId, ResourceId, ShadowId};

use crate::error::{RepositoryError, RepositoryResult};
use crate::focus::{Focus, FocusType};
use crate::repository::{ObjectQuery, ObjectRef, RepositoryObject, RepositoryService};
use crate::resource::{ObjectTemplate, Resource, SystemConfiguration};
use crate::shadow::{Shadow, ShadowModification};

fn poisoned() -> RepositoryError {
    RepositoryError::Unavailable {
        message: "repository lock poisoned".to_string(),
    }
}

/// Repository keeping every object in memory.
#[derive(Default)]
pub struct InMemoryRepository {
    shadows: RwLock<HashMap<ShadowId, Shadow>>,
    focuses: RwLock<HashMap<FocusId, Focus>>,
    resources: RwLock<HashMap<ResourceId, Resource>>,
    templates: RwLock<HashMap<ObjectTemplateId, ObjectTemplate>>,
    system_configuration: RwLock<Option<SystemConfiguration>>,
    modifications: AtomicUsize,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(lock: &RwLock<T>) -> RepositoryResult<RwLockReadGuard<'_, T>> {
        lock.read().map_err(|_| poisoned())
    }

    fn write<T>(lock: &RwLock<T>) -> RepositoryResult<RwLockWriteGuard<'_, T>> {
        lock.write().map_err(|_| poisoned())
    }

    /// Store (or replace) a shadow.
    pub fn add_shadow(&self, shadow: Shadow) -> RepositoryResult<()> {
        Self::write(&self.shadows)?.insert(shadow.id, shadow);
        Ok(())
    }

    /// Store (or replace) a focus.
    pub fn add_focus(&self, focus: Focus) -> RepositoryResult<()> {
        Self::write(&self.focuses)?.insert(focus.id, focus);
        Ok(())
    }

    /// Store (or replace) a resource.
    pub fn add_resource(&self, resource: Resource) -> RepositoryResult<()> {
        Self::write(&self.resources)?.insert(resource.id, resource);
        Ok(())
    }

    /// Store (or replace) an object template.
    pub fn add_object_template(&self, template: ObjectTemplate) -> RepositoryResult<()> {
        Self::write(&self.templates)?.insert(template.id, template);
        Ok(())
    }

    /// Set the system configuration.
    pub fn set_system_configuration(&self, configuration: SystemConfiguration) -> RepositoryResult<()> {
        *Self::write(&self.system_configuration)? = Some(configuration);
        Ok(())
    }

    /// Remove a shadow, as a concurrent deletion would.
    pub fn remove_shadow(&self, shadow_id: ShadowId) -> RepositoryResult<Option<Shadow>> {
        Ok(Self::write(&self.shadows)?.remove(&shadow_id))
    }

    /// Current copy of a shadow.
    pub fn shadow(&self, shadow_id: ShadowId) -> RepositoryResult<Option<Shadow>> {
        Ok(Self::read(&self.shadows)?.get(&shadow_id).cloned())
    }

    /// Number of successful `modify_shadow` calls.
    #[must_use]
    pub fn modification_count(&self) -> usize {
        self.modifications.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryService for InMemoryRepository {
    async fn search_shadow_owner(
        &self,
        shadow_id: ShadowId,
        allow_not_found: bool,
    ) -> RepositoryResult<Option<Focus>> {
        let owner = Self::read(&self.focuses)?
            .values()
            .find(|focus| focus.owns(shadow_id))
            .cloned();
        if owner.is_none() && !allow_not_found && !Self::read(&self.shadows)?.contains_key(&shadow_id) {
            return Err(RepositoryError::not_found("Shadow", shadow_id));
        }
        Ok(owner)
    }

    async fn modify_shadow(
        &self,
        shadow_id: ShadowId,
        modifications: &[ShadowModification],
    ) -> RepositoryResult<()> {
        let mut shadows = Self::write(&self.shadows)?;
        let shadow = shadows
            .get_mut(&shadow_id)
            .ok_or_else(|| RepositoryError::not_found("Shadow", shadow_id))?;
        shadow.apply_modifications(modifications);
        self.modifications.fetch_add(1, Ordering::SeqCst);
        debug!(shadow_id = %shadow_id, count = modifications.len(), "Shadow modified");
        Ok(())
    }

    async fn get_object(&self, reference: ObjectRef) -> RepositoryResult<RepositoryObject> {
        let found = match reference {
            ObjectRef::Shadow(id) => Self::read(&self.shadows)?
                .get(&id)
                .cloned()
                .map(RepositoryObject::Shadow),
            ObjectRef::Focus(id) => Self::read(&self.focuses)?
                .get(&id)
                .cloned()
                .map(RepositoryObject::Focus),
            ObjectRef::Resource(id) => Self::read(&self.resources)?
                .get(&id)
                .cloned()
                .map(RepositoryObject::Resource),
            ObjectRef::ObjectTemplate(id) => Self::read(&self.templates)?
                .get(&id)
                .cloned()
                .map(RepositoryObject::ObjectTemplate),
            ObjectRef::SystemConfiguration(id) => Self::read(&self.system_configuration)?
                .as_ref()
                .filter(|c| c.id == id)
                .cloned()
                .map(RepositoryObject::SystemConfiguration),
        };
        found.ok_or_else(|| RepositoryError::not_found(reference.type_name(), reference.oid()))
    }

    async fn search_objects(
        &self,
        focus_type: FocusType,
        query: &ObjectQuery,
    ) -> RepositoryResult<Vec<Focus>> {
        let mut found: Vec<Focus> = Self::read(&self.focuses)?
            .values()
            .filter(|focus| focus.focus_type == focus_type && query.matches(focus))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn get_system_configuration(&self) -> RepositoryResult<Option<SystemConfiguration>> {
        Ok(Self::read(&self.system_configuration)?.clone())
    }
}
