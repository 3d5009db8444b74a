//! Shadow Objects
//!
//! Shadows are the repository-side projections of objects on external
//! resources. The synchronization engine reads them to classify changes and
//! writes synchronization metadata (situation, descriptions, timestamps) back
//! onto them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xavyo_sync_core::{ResourceId, ShadowId};

use crate::error::{SyncError, SyncResult};

/// Synchronization situation - describes the relationship between
/// a shadow and its owning focus object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSituation {
    /// Shadow is properly linked to its owner.
    Linked,

    /// An owner was found by correlation but is not linked yet.
    Unlinked,

    /// No owner could be found.
    Unmatched,

    /// Several candidate owners match this shadow.
    Disputed,

    /// The resource object has been deleted.
    Deleted,
}

impl SyncSituation {
    /// All situations, in a stable order.
    pub const ALL: [SyncSituation; 5] = [
        SyncSituation::Linked,
        SyncSituation::Unlinked,
        SyncSituation::Unmatched,
        SyncSituation::Disputed,
        SyncSituation::Deleted,
    ];

    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSituation::Linked => "linked",
            SyncSituation::Unlinked => "unlinked",
            SyncSituation::Unmatched => "unmatched",
            SyncSituation::Disputed => "disputed",
            SyncSituation::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SyncSituation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SyncSituation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linked" => Ok(SyncSituation::Linked),
            "unlinked" => Ok(SyncSituation::Unlinked),
            "unmatched" => Ok(SyncSituation::Unmatched),
            "disputed" => Ok(SyncSituation::Disputed),
            "deleted" => Ok(SyncSituation::Deleted),
            _ => Err(format!("Unknown sync situation: {s}")),
        }
    }
}

/// Kind of resource object a shadow represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowKind {
    /// An account.
    Account,
    /// A group, role or other entitlement.
    Entitlement,
    /// Any other object.
    Generic,
    /// Not classified yet.
    Unknown,
}

impl ShadowKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowKind::Account => "account",
            ShadowKind::Entitlement => "entitlement",
            ShadowKind::Generic => "generic",
            ShadowKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ShadowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ShadowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "account" => Ok(ShadowKind::Account),
            "entitlement" => Ok(ShadowKind::Entitlement),
            "generic" => Ok(ShadowKind::Generic),
            "unknown" => Ok(ShadowKind::Unknown),
            _ => Err(format!("Unknown shadow kind: {s}")),
        }
    }
}

/// One entry of the situation history kept on a shadow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SituationDescription {
    /// Situation recorded (None when the situation was cleared).
    pub situation: Option<SyncSituation>,
    /// Channel that produced the change.
    pub channel: Option<String>,
    /// When the situation was recorded.
    pub timestamp: DateTime<Utc>,
    /// Whether this was a full synchronization (reaction executed).
    pub full: bool,
}

/// A shadow object representing an object on an external resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shadow {
    /// Shadow OID.
    pub id: ShadowId,

    /// Display name (usually the resource-side naming attribute).
    #[serde(default)]
    pub name: Option<String>,

    /// Resource the object lives on.
    #[serde(default)]
    pub resource_id: Option<ResourceId>,

    /// Object class on the resource.
    pub object_class: String,

    /// Object kind.
    #[serde(default)]
    pub kind: Option<ShadowKind>,

    /// Object intent within the kind.
    #[serde(default)]
    pub intent: Option<String>,

    /// Protected objects are never synchronized.
    #[serde(default)]
    pub protected_object: bool,

    /// The resource object no longer exists.
    #[serde(default)]
    pub dead: bool,

    /// Resource attributes.
    #[serde(default)]
    pub attributes: serde_json::Value,

    /// Last recorded synchronization situation.
    #[serde(default)]
    pub synchronization_situation: Option<SyncSituation>,

    /// Situation history, one entry per channel.
    #[serde(default)]
    pub synchronization_situation_descriptions: Vec<SituationDescription>,

    /// Last synchronization of any kind.
    #[serde(default)]
    pub synchronization_timestamp: Option<DateTime<Utc>>,

    /// Last full synchronization.
    #[serde(default)]
    pub full_synchronization_timestamp: Option<DateTime<Utc>>,
}

impl Shadow {
    /// Create a new shadow of the given object class.
    pub fn new(object_class: impl Into<String>) -> Self {
        Self {
            id: ShadowId::new(),
            name: None,
            resource_id: None,
            object_class: object_class.into(),
            kind: None,
            intent: None,
            protected_object: false,
            dead: false,
            attributes: serde_json::Value::Object(serde_json::Map::new()),
            synchronization_situation: None,
            synchronization_situation_descriptions: Vec::new(),
            synchronization_timestamp: None,
            full_synchronization_timestamp: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: ShadowId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource_id: ResourceId) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ShadowKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn with_situation(mut self, situation: SyncSituation) -> Self {
        self.synchronization_situation = Some(situation);
        self
    }

    #[must_use]
    pub fn protected(mut self) -> Self {
        self.protected_object = true;
        self
    }

    #[must_use]
    pub fn dead(mut self) -> Self {
        self.dead = true;
        self
    }

    /// Look up a resource attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    /// Latest situation description recorded for a channel.
    #[must_use]
    pub fn situation_description(&self, channel: Option<&str>) -> Option<&SituationDescription> {
        self.synchronization_situation_descriptions
            .iter()
            .find(|d| d.channel.as_deref() == channel)
    }

    /// Apply metadata modifications in order.
    pub fn apply_modifications(&mut self, modifications: &[ShadowModification]) {
        for modification in modifications {
            match modification {
                ShadowModification::ReplaceSituation(situation) => {
                    self.synchronization_situation = *situation;
                }
                ShadowModification::AddSituationDescription(description) => {
                    self.synchronization_situation_descriptions
                        .retain(|d| d.channel != description.channel);
                    self.synchronization_situation_descriptions
                        .push(description.clone());
                }
                ShadowModification::ReplaceSynchronizationTimestamp(ts) => {
                    self.synchronization_timestamp = Some(*ts);
                }
                ShadowModification::ReplaceFullSynchronizationTimestamp(ts) => {
                    self.full_synchronization_timestamp = Some(*ts);
                }
                ShadowModification::ReplaceKind(kind) => {
                    self.kind = Some(*kind);
                }
                ShadowModification::ReplaceIntent(intent) => {
                    self.intent = Some(intent.clone());
                }
            }
        }
    }

    /// Structural sanity checks.
    pub fn check_consistence(&self) -> SyncResult<()> {
        if self.object_class.trim().is_empty() {
            return Err(SyncError::invalid_argument(format!(
                "Shadow {} has no object class",
                self.id
            )));
        }
        if self.intent.as_deref().is_some_and(|i| i.trim().is_empty()) {
            return Err(SyncError::invalid_argument(format!(
                "Shadow {} has a blank intent",
                self.id
            )));
        }
        Ok(())
    }
}

/// Metadata modification applied to a shadow by the engine.
///
/// These are replace-style modifications so that concurrent writers for the
/// same shadow merge without conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ShadowModification {
    /// Replace (or clear) the synchronization situation.
    ReplaceSituation(Option<SyncSituation>),
    /// Add a situation description, replacing the one from the same channel.
    AddSituationDescription(SituationDescription),
    /// Replace the synchronization timestamp.
    ReplaceSynchronizationTimestamp(DateTime<Utc>),
    /// Replace the full synchronization timestamp.
    ReplaceFullSynchronizationTimestamp(DateTime<Utc>),
    /// Set the object kind.
    ReplaceKind(ShadowKind),
    /// Set the object intent.
    ReplaceIntent(String),
}

/// Kind of change a delta describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Object created.
    Add,
    /// Object modified.
    Modify,
    /// Object deleted.
    Delete,
}

impl ChangeType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Add => "add",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Detected change of a resource object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowDelta {
    /// Kind of change.
    pub change_type: ChangeType,

    /// OID of the changed shadow, when known.
    #[serde(default)]
    pub oid: Option<ShadowId>,

    /// For ADD deltas: the object that was created.
    #[serde(default)]
    pub object_to_add: Option<Box<Shadow>>,

    /// For MODIFY deltas: changed attributes and their new values.
    #[serde(default)]
    pub attribute_changes: serde_json::Map<String, serde_json::Value>,
}

impl ShadowDelta {
    /// Create an ADD delta carrying the new object.
    #[must_use]
    pub fn add(shadow: Shadow) -> Self {
        Self {
            change_type: ChangeType::Add,
            oid: Some(shadow.id),
            object_to_add: Some(Box::new(shadow)),
            attribute_changes: serde_json::Map::new(),
        }
    }

    /// Create a MODIFY delta.
    #[must_use]
    pub fn modify(oid: ShadowId) -> Self {
        Self {
            change_type: ChangeType::Modify,
            oid: Some(oid),
            object_to_add: None,
            attribute_changes: serde_json::Map::new(),
        }
    }

    /// Create a DELETE delta.
    #[must_use]
    pub fn delete(oid: ShadowId) -> Self {
        Self {
            change_type: ChangeType::Delete,
            oid: Some(oid),
            object_to_add: None,
            attribute_changes: serde_json::Map::new(),
        }
    }

    /// Record a changed attribute value.
    #[must_use]
    pub fn with_attribute_change(
        mut self,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.attribute_changes.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn is_add(&self) -> bool {
        self.change_type == ChangeType::Add
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.change_type == ChangeType::Delete
    }

    /// Structural sanity checks.
    pub fn check_consistence(&self) -> SyncResult<()> {
        match (self.change_type, &self.object_to_add) {
            (ChangeType::Add, None) => {
                return Err(SyncError::invalid_argument(
                    "ADD delta does not carry the object to add",
                ));
            }
            (ChangeType::Modify | ChangeType::Delete, Some(_)) => {
                return Err(SyncError::invalid_argument(format!(
                    "{} delta must not carry an object to add",
                    self.change_type
                )));
            }
            _ => {}
        }
        if let (Some(oid), Some(object)) = (self.oid, &self.object_to_add) {
            if object.id != oid {
                return Err(SyncError::invalid_argument(format!(
                    "ADD delta oid {oid} does not match object oid {}",
                    object.id
                )));
            }
            object.check_consistence()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sync_situation_roundtrip_str() {
        for situation in SyncSituation::ALL {
            let parsed: SyncSituation = situation.as_str().parse().unwrap();
            assert_eq!(parsed, situation);
        }
        assert!("collision".parse::<SyncSituation>().is_err());
    }

    #[test]
    fn test_situation_serializes_snake_case() {
        let json = serde_json::to_string(&SyncSituation::Unmatched).unwrap();
        assert_eq!(json, "\"unmatched\"");
    }

    #[test]
    fn test_shadow_deserializes_with_defaults() {
        let shadow: Shadow = serde_json::from_value(json!({
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "object_class": "inetOrgPerson",
            "kind": "account",
            "intent": "default"
        }))
        .unwrap();

        assert_eq!(shadow.kind, Some(ShadowKind::Account));
        assert!(!shadow.protected_object);
        assert!(shadow.synchronization_situation.is_none());
        assert!(shadow.synchronization_situation_descriptions.is_empty());
    }

    #[test]
    fn test_situation_description_replaces_same_channel() {
        let mut shadow = Shadow::new("inetOrgPerson");
        let now = Utc::now();

        let first = SituationDescription {
            situation: Some(SyncSituation::Unmatched),
            channel: Some("livesync".to_string()),
            timestamp: now,
            full: true,
        };
        let second = SituationDescription {
            situation: Some(SyncSituation::Linked),
            channel: Some("livesync".to_string()),
            timestamp: now,
            full: true,
        };
        let other = SituationDescription {
            situation: Some(SyncSituation::Linked),
            channel: Some("reconciliation".to_string()),
            timestamp: now,
            full: false,
        };

        shadow.apply_modifications(&[
            ShadowModification::AddSituationDescription(first),
            ShadowModification::AddSituationDescription(other),
            ShadowModification::AddSituationDescription(second.clone()),
            ShadowModification::ReplaceSituation(Some(SyncSituation::Linked)),
            ShadowModification::ReplaceSynchronizationTimestamp(now),
        ]);

        assert_eq!(shadow.synchronization_situation_descriptions.len(), 2);
        assert_eq!(shadow.situation_description(Some("livesync")), Some(&second));
        assert_eq!(shadow.synchronization_situation, Some(SyncSituation::Linked));
        assert_eq!(shadow.synchronization_timestamp, Some(now));
        assert!(shadow.full_synchronization_timestamp.is_none());
    }

    #[test]
    fn test_shadow_consistence() {
        assert!(Shadow::new("inetOrgPerson").check_consistence().is_ok());
        assert!(Shadow::new(" ").check_consistence().is_err());
        assert!(Shadow::new("inetOrgPerson")
            .with_intent("")
            .check_consistence()
            .is_err());
    }

    #[test]
    fn test_delta_consistence() {
        let shadow = Shadow::new("inetOrgPerson");
        assert!(ShadowDelta::add(shadow.clone()).check_consistence().is_ok());
        assert!(ShadowDelta::delete(shadow.id).check_consistence().is_ok());

        let mut mismatched = ShadowDelta::add(shadow);
        mismatched.oid = Some(ShadowId::new());
        assert!(mismatched.check_consistence().is_err());

        let mut empty_add = ShadowDelta::modify(ShadowId::new());
        empty_add.change_type = ChangeType::Add;
        assert!(empty_add.check_consistence().is_err());
    }

    #[test]
    fn test_attribute_lookup() {
        let shadow = Shadow::new("inetOrgPerson").with_attributes(json!({"uid": "jdoe"}));
        assert_eq!(shadow.attribute("uid"), Some(&json!("jdoe")));
        assert!(shadow.attribute("mail").is_none());
    }
}
