//! Repository collaborator interface.
//!
//! The engine reads focus objects, templates and the system configuration
//! through [`RepositoryService`] and writes only shadow synchronization
//! metadata. Persistence itself lives behind this trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use xavyo_sync_core::{FocusId, ObjectTemplateId, ResourceId, ShadowId, SystemConfigurationId};

use crate::error::{RepositoryError, RepositoryResult};
use crate::focus::{Focus, FocusType};
use crate::resource::{ObjectTemplate, Resource, SystemConfiguration};
use crate::shadow::{Shadow, ShadowModification};

/// Reference to a repository object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    Shadow(ShadowId),
    Focus(FocusId),
    Resource(ResourceId),
    ObjectTemplate(ObjectTemplateId),
    SystemConfiguration(SystemConfigurationId),
}

impl ObjectRef {
    /// Type name used in errors.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjectRef::Shadow(_) => "Shadow",
            ObjectRef::Focus(_) => "Focus",
            ObjectRef::Resource(_) => "Resource",
            ObjectRef::ObjectTemplate(_) => "ObjectTemplate",
            ObjectRef::SystemConfiguration(_) => "SystemConfiguration",
        }
    }

    /// OID as a string.
    #[must_use]
    pub fn oid(&self) -> String {
        match self {
            ObjectRef::Shadow(id) => id.to_string(),
            ObjectRef::Focus(id) => id.to_string(),
            ObjectRef::Resource(id) => id.to_string(),
            ObjectRef::ObjectTemplate(id) => id.to_string(),
            ObjectRef::SystemConfiguration(id) => id.to_string(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name(), self.oid())
    }
}

/// Object returned by [`RepositoryService::get_object`].
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryObject {
    Shadow(Shadow),
    Focus(Focus),
    Resource(Resource),
    ObjectTemplate(ObjectTemplate),
    SystemConfiguration(SystemConfiguration),
}

/// One `attribute == value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualityCondition {
    pub attribute: String,
    pub value: serde_json::Value,
}

/// Conjunction of equality conditions over focus properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectQuery {
    #[serde(default)]
    pub conditions: Vec<EqualityCondition>,
}

impl ObjectQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    #[must_use]
    pub fn and_equal(mut self, attribute: impl Into<String>, value: serde_json::Value) -> Self {
        self.conditions.push(EqualityCondition {
            attribute: attribute.into(),
            value,
        });
        self
    }

    /// Check whether a focus satisfies all conditions.
    ///
    /// A multi-valued property matches if any of its values is equal.
    #[must_use]
    pub fn matches(&self, focus: &Focus) -> bool {
        self.conditions.iter().all(|condition| {
            match focus.property(&condition.attribute) {
                Some(serde_json::Value::Array(values)) if !condition.value.is_array() => {
                    values.contains(&condition.value)
                }
                Some(value) => value == condition.value,
                None => false,
            }
        })
    }
}

/// Repository service used by the engine.
#[async_trait]
pub trait RepositoryService: Send + Sync {
    /// Find the focus that links the shadow.
    ///
    /// With `allow_not_found`, a missing shadow yields `Ok(None)` instead of
    /// [`RepositoryError::NotFound`].
    async fn search_shadow_owner(
        &self,
        shadow_id: ShadowId,
        allow_not_found: bool,
    ) -> RepositoryResult<Option<Focus>>;

    /// Apply metadata modifications to a shadow.
    ///
    /// Fails with `NotFound`, `AlreadyExists` or `Schema`.
    async fn modify_shadow(
        &self,
        shadow_id: ShadowId,
        modifications: &[ShadowModification],
    ) -> RepositoryResult<()>;

    /// Load an object by reference.
    async fn get_object(&self, reference: ObjectRef) -> RepositoryResult<RepositoryObject>;

    /// Search focus objects of a type.
    async fn search_objects(
        &self,
        focus_type: FocusType,
        query: &ObjectQuery,
    ) -> RepositoryResult<Vec<Focus>>;

    /// The system configuration, if one exists.
    async fn get_system_configuration(&self) -> RepositoryResult<Option<SystemConfiguration>>;

    /// Load an object template.
    async fn get_object_template(&self, id: ObjectTemplateId) -> RepositoryResult<ObjectTemplate> {
        match self.get_object(ObjectRef::ObjectTemplate(id)).await? {
            RepositoryObject::ObjectTemplate(template) => Ok(template),
            _ => Err(RepositoryError::schema(format!(
                "Object {id} is not an object template"
            ))),
        }
    }

    /// Load a focus.
    async fn get_focus(&self, id: FocusId) -> RepositoryResult<Focus> {
        match self.get_object(ObjectRef::Focus(id)).await? {
            RepositoryObject::Focus(focus) => Ok(focus),
            _ => Err(RepositoryError::schema(format!("Object {id} is not a focus"))),
        }
    }
}
