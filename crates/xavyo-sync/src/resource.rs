//! Resources, system configuration and object templates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use xavyo_sync_core::{ObjectTemplateId, ResourceId, SystemConfigurationId};

use crate::policy::SynchronizationPolicy;

/// An external resource and its synchronization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource OID.
    pub id: ResourceId,
    /// Display name.
    pub name: String,
    /// Policies in declaration order.
    #[serde(default)]
    pub synchronization: Vec<SynchronizationPolicy>,
}

impl Resource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            synchronization: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: ResourceId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SynchronizationPolicy) -> Self {
        self.synchronization.push(policy);
        self
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "resource:{}({})", self.id, self.name)
    }
}

/// Global system configuration, exposed to expressions as `configuration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfiguration {
    pub id: SystemConfigurationId,
    pub name: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl SystemConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: SystemConfigurationId::new(),
            name: name.into(),
            properties: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// Template applied to a focus by the clockwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectTemplate {
    pub id: ObjectTemplateId,
    pub name: String,
    /// Template mappings, opaque to the decision engine.
    #[serde(default)]
    pub mappings: serde_json::Value,
}

impl ObjectTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ObjectTemplateId::new(),
            name: name.into(),
            mappings: serde_json::Value::Null,
        }
    }
}
