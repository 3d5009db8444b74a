//! Synchronization policy configuration.
//!
//! A [`SynchronizationPolicy`] is scoped to a resource and says which shadows
//! it applies to, how their owners are found and how the engine reacts to
//! each situation. All types deserialize from JSON configuration.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use xavyo_sync_core::ObjectTemplateId;

use crate::shadow::{ShadowKind, SyncSituation};

/// Channel entry that makes a reaction the default for its situation.
pub const WILDCARD_CHANNEL: &str = "*";

/// A configured expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expression {
    /// Constant value.
    Literal { value: serde_json::Value },
    /// Dot-separated path into the expression variables, e.g. `shadow.attributes.uid`.
    Path { path: String },
    /// Rhai script; the value of the last expression is the result.
    Script { code: String },
}

impl Expression {
    pub fn literal(value: serde_json::Value) -> Self {
        Self::Literal { value }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self::Path { path: path.into() }
    }

    pub fn script(code: impl Into<String>) -> Self {
        Self::Script { code: code.into() }
    }
}

/// One `focus_attribute == expression` clause of a correlation filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationItem {
    /// Focus property to compare.
    pub focus_attribute: String,
    /// Value derived from the shadow.
    pub expression: Expression,
}

impl CorrelationItem {
    pub fn new(focus_attribute: impl Into<String>, expression: Expression) -> Self {
        Self {
            focus_attribute: focus_attribute.into(),
            expression,
        }
    }
}

/// Conjunction of correlation items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationFilter {
    #[serde(default)]
    pub items: Vec<CorrelationItem>,
}

impl CorrelationFilter {
    #[must_use]
    pub fn new(items: Vec<CorrelationItem>) -> Self {
        Self { items }
    }

    /// Filter on a single attribute.
    pub fn equality(focus_attribute: impl Into<String>, expression: Expression) -> Self {
        Self::new(vec![CorrelationItem::new(focus_attribute, expression)])
    }
}

/// Correlation rule: candidates matching any of the filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRule {
    #[serde(default)]
    pub filters: Vec<CorrelationFilter>,
}

impl CorrelationRule {
    #[must_use]
    pub fn new(filters: Vec<CorrelationFilter>) -> Self {
        Self { filters }
    }
}

/// When an action runs relative to the clockwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOrder {
    #[default]
    Before,
    After,
}

impl ActionOrder {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOrder::Before => "before",
            ActionOrder::After => "after",
        }
    }
}

impl fmt::Display for ActionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Action attached to a reaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// Handler URI looked up in the action registry.
    #[serde(default)]
    pub handler_uri: Option<String>,
    /// Legacy handler reference, used when `handler_uri` is absent.
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    /// Absent means [`ActionOrder::Before`].
    #[serde(default)]
    pub order: Option<ActionOrder>,
    /// Handler parameters.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl ActionDefinition {
    pub fn new(handler_uri: impl Into<String>) -> Self {
        Self {
            handler_uri: Some(handler_uri.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_order(mut self, order: ActionOrder) -> Self {
        self.order = Some(order);
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Effective order.
    #[must_use]
    pub fn effective_order(&self) -> ActionOrder {
        self.order.unwrap_or_default()
    }

    /// Handler URI, falling back to the legacy reference.
    #[must_use]
    pub fn effective_handler_uri(&self) -> Option<&str> {
        self.handler_uri
            .as_deref()
            .or(self.reference.as_deref())
            .filter(|uri| !uri.trim().is_empty())
    }
}

/// How a reaction's channel list relates to a notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMatch {
    /// The channel is listed explicitly.
    Explicit,
    /// Not listed, but the reaction is a default (empty list or wildcard entry).
    Default,
    /// Neither.
    None,
}

/// Policy-configured response to a situation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    /// Situation the reaction applies to. Required; absence is a configuration error.
    #[serde(default)]
    pub situation: Option<SyncSituation>,
    /// Channels the reaction applies to. Empty, or an entry that is null, empty
    /// or `*`, makes the reaction a default.
    #[serde(default)]
    pub channels: Vec<Option<String>>,
    /// Reconciliation override.
    #[serde(default)]
    pub reconcile: Option<bool>,
    /// Propagation-limit override.
    #[serde(default)]
    pub limit_propagation: Option<bool>,
    /// Object template override.
    #[serde(default)]
    pub object_template: Option<ObjectTemplateId>,
    /// Absent means "true if there are actions".
    #[serde(default)]
    pub synchronize: Option<bool>,
    /// Actions in configuration order.
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

impl Reaction {
    /// Create a default reaction for the situation.
    #[must_use]
    pub fn new(situation: SyncSituation) -> Self {
        Self {
            situation: Some(situation),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(Some(channel.into()));
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: ActionDefinition) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn with_synchronize(mut self, synchronize: bool) -> Self {
        self.synchronize = Some(synchronize);
        self
    }

    #[must_use]
    pub fn with_reconcile(mut self, reconcile: bool) -> Self {
        self.reconcile = Some(reconcile);
        self
    }

    #[must_use]
    pub fn with_limit_propagation(mut self, limit: bool) -> Self {
        self.limit_propagation = Some(limit);
        self
    }

    #[must_use]
    pub fn with_object_template(mut self, template: ObjectTemplateId) -> Self {
        self.object_template = Some(template);
        self
    }

    /// Classify the reaction's channel list against a notification channel.
    ///
    /// An explicit listing wins over a wildcard entry in the same list.
    #[must_use]
    pub fn channel_match(&self, channel: Option<&str>) -> ChannelMatch {
        if self.channels.is_empty() {
            return ChannelMatch::Default;
        }
        if let Some(channel) = channel {
            if self.channels.iter().any(|c| c.as_deref() == Some(channel)) {
                return ChannelMatch::Explicit;
            }
        }
        let has_wildcard = self.channels.iter().any(|c| match c.as_deref() {
            None => true,
            Some(c) => c.is_empty() || c == WILDCARD_CHANNEL,
        });
        if has_wildcard {
            ChannelMatch::Default
        } else {
            ChannelMatch::None
        }
    }

    /// Effective synchronize flag.
    #[must_use]
    pub fn is_synchronize(&self) -> bool {
        self.synchronize.unwrap_or(!self.actions.is_empty())
    }
}

/// Synchronization policy of a resource object type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynchronizationPolicy {
    /// Name used in logs and results.
    #[serde(default)]
    pub name: Option<String>,
    /// Object classes the policy applies to; empty matches all.
    #[serde(default)]
    pub object_classes: Vec<String>,
    /// Kind the policy applies to.
    #[serde(default)]
    pub kind: Option<ShadowKind>,
    /// Intent the policy applies to.
    #[serde(default)]
    pub intent: Option<String>,
    /// Focus type name; absent means `user`.
    #[serde(default)]
    pub focus_type: Option<String>,
    /// Absent means disabled.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Boolean applicability condition.
    #[serde(default)]
    pub condition: Option<Expression>,
    /// Rule finding candidate owners.
    #[serde(default)]
    pub correlation: Option<CorrelationRule>,
    /// Boolean rule narrowing several candidates.
    #[serde(default)]
    pub confirmation: Option<Expression>,
    /// Template applied to the focus.
    #[serde(default)]
    pub object_template: Option<ObjectTemplateId>,
    /// Reconciliation override.
    #[serde(default)]
    pub reconcile: Option<bool>,
    /// Propagation-limit override.
    #[serde(default)]
    pub limit_propagation: Option<bool>,
    /// Reactions in configuration order.
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl SynchronizationPolicy {
    /// Create an enabled policy for the given object class.
    pub fn new(object_class: impl Into<String>) -> Self {
        Self {
            object_classes: vec![object_class.into()],
            enabled: Some(true),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
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
    pub fn with_focus_type(mut self, focus_type: impl Into<String>) -> Self {
        self.focus_type = Some(focus_type.into());
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Expression) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn with_correlation(mut self, correlation: CorrelationRule) -> Self {
        self.correlation = Some(correlation);
        self
    }

    #[must_use]
    pub fn with_confirmation(mut self, confirmation: Expression) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    #[must_use]
    pub fn with_object_template(mut self, template: ObjectTemplateId) -> Self {
        self.object_template = Some(template);
        self
    }

    #[must_use]
    pub fn with_reconcile(mut self, reconcile: bool) -> Self {
        self.reconcile = Some(reconcile);
        self
    }

    #[must_use]
    pub fn with_limit_propagation(mut self, limit: bool) -> Self {
        self.limit_propagation = Some(limit);
        self
    }

    #[must_use]
    pub fn with_reaction(mut self, reaction: Reaction) -> Self {
        self.reactions.push(reaction);
        self
    }

    /// Whether synchronization is enabled. Absent means disabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    /// Name for logs: configured name, else object classes.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None if self.object_classes.is_empty() => "(any object class)".to_string(),
            None => self.object_classes.join(","),
        }
    }
}
