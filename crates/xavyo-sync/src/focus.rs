//! Focus objects: the central identities that own shadows.

use std::fmt;

use serde::{Deserialize, Serialize};
use xavyo_sync_core::{FocusId, ShadowId};

use crate::error::SyncError;

/// Type of focus object a policy synchronizes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusType {
    /// A person.
    #[default]
    User,
    /// A role.
    Role,
    /// An organizational unit.
    Org,
    /// A service or application identity.
    Service,
}

impl FocusType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FocusType::User => "user",
            FocusType::Role => "role",
            FocusType::Org => "org",
            FocusType::Service => "service",
        }
    }

    /// Resolve an optional configured focus type.
    ///
    /// Absent means [`FocusType::User`]; an unknown name is a configuration
    /// error.
    pub fn resolve(name: Option<&str>) -> Result<Self, SyncError> {
        match name {
            None => Ok(FocusType::User),
            Some(name) => name.parse().map_err(SyncError::configuration),
        }
    }
}

impl fmt::Display for FocusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FocusType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(FocusType::User),
            "role" => Ok(FocusType::Role),
            "org" => Ok(FocusType::Org),
            "service" => Ok(FocusType::Service),
            _ => Err(format!("Unknown focus type: {s}")),
        }
    }
}

/// Administrative status of a focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    #[default]
    Enabled,
    Disabled,
}

/// A focus object (user, role, org, service).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Focus {
    /// Focus OID.
    pub id: FocusId,

    /// Focus type.
    #[serde(default)]
    pub focus_type: FocusType,

    /// Unique name.
    pub name: String,

    /// Focus properties, matched by correlation rules.
    #[serde(default)]
    pub attributes: serde_json::Value,

    /// Shadows linked to this focus.
    #[serde(default)]
    pub link_refs: Vec<ShadowId>,

    /// Administrative status.
    #[serde(default)]
    pub activation: ActivationStatus,
}

impl Focus {
    /// Create an enabled focus with no links.
    pub fn new(focus_type: FocusType, name: impl Into<String>) -> Self {
        Self {
            id: FocusId::new(),
            focus_type,
            name: name.into(),
            attributes: serde_json::Value::Object(serde_json::Map::new()),
            link_refs: Vec::new(),
            activation: ActivationStatus::Enabled,
        }
    }

    /// Create a user.
    pub fn user(name: impl Into<String>) -> Self {
        Self::new(FocusType::User, name)
    }

    #[must_use]
    pub fn with_id(mut self, id: FocusId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn with_link(mut self, shadow_id: ShadowId) -> Self {
        self.link_refs.push(shadow_id);
        self
    }

    /// Look up a property. `name` is matched against attributes first.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<serde_json::Value> {
        if let Some(value) = self.attributes.get(name) {
            return Some(value.clone());
        }
        match name {
            "name" => Some(serde_json::Value::String(self.name.clone())),
            "oid" | "id" => Some(serde_json::Value::String(self.id.to_string())),
            _ => None,
        }
    }

    /// Check whether the focus links the given shadow.
    #[must_use]
    pub fn owns(&self, shadow_id: ShadowId) -> bool {
        self.link_refs.contains(&shadow_id)
    }
}
