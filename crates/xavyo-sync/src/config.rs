//! Synchronization service configuration.

use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::expression::RhaiEvaluatorConfig;
use crate::focus::FocusType;

/// How a policy condition combines with the objectClass/kind/intent predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionPrecedence {
    /// A present condition alone decides; the predicates are not consulted.
    #[default]
    Authoritative,
    /// The predicates must match first; the condition then decides.
    AfterPredicates,
}

impl ConditionPrecedence {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionPrecedence::Authoritative => "authoritative",
            ConditionPrecedence::AfterPredicates => "after_predicates",
        }
    }
}

impl fmt::Display for ConditionPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConditionPrecedence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "authoritative" => Ok(ConditionPrecedence::Authoritative),
            "after_predicates" => Ok(ConditionPrecedence::AfterPredicates),
            _ => Err(format!("Unknown condition precedence: {s}")),
        }
    }
}

fn default_consistency_checks() -> bool {
    false
}

fn default_intent() -> String {
    "default".to_string()
}

fn default_expression_max_operations() -> u64 {
    100_000
}

/// Configuration of the synchronization service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizationServiceConfig {
    /// Policy condition precedence.
    #[serde(default)]
    pub condition_precedence: ConditionPrecedence,

    /// Structural checks of incoming shadows and deltas.
    #[serde(default = "default_consistency_checks")]
    pub consistency_checks: bool,

    /// Intent written to shadows when neither shadow nor policy has one.
    #[serde(default = "default_intent")]
    pub default_intent: String,

    /// Focus type of policies that do not name one.
    #[serde(default)]
    pub default_focus_type: FocusType,

    /// Operation budget of a single expression evaluation.
    #[serde(default = "default_expression_max_operations")]
    pub expression_max_operations: u64,
}

impl Default for SynchronizationServiceConfig {
    fn default() -> Self {
        Self {
            condition_precedence: ConditionPrecedence::default(),
            consistency_checks: default_consistency_checks(),
            default_intent: default_intent(),
            default_focus_type: FocusType::default(),
            expression_max_operations: default_expression_max_operations(),
        }
    }
}

impl SynchronizationServiceConfig {
    /// Parse configuration from environment variables.
    ///
    /// Reads:
    /// - `SYNC_CONDITION_PRECEDENCE` (`authoritative` | `after_predicates`)
    /// - `SYNC_CONSISTENCY_CHECKS` (`true` | `false`)
    /// - `SYNC_DEFAULT_INTENT`
    /// - `SYNC_DEFAULT_FOCUS_TYPE` (`user` | `role` | `org` | `service`)
    /// - `SYNC_EXPRESSION_MAX_OPERATIONS`
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration using a variable lookup function.
    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("SYNC_CONDITION_PRECEDENCE").filter(|s| !s.is_empty()) {
            config.condition_precedence = value.parse().map_err(SyncError::configuration)?;
        }

        if let Some(value) = lookup("SYNC_CONSISTENCY_CHECKS").filter(|s| !s.is_empty()) {
            config.consistency_checks = match value.to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => {
                    return Err(SyncError::configuration(format!(
                        "Invalid SYNC_CONSISTENCY_CHECKS value '{other}'"
                    )));
                }
            };
        }

        if let Some(value) = lookup("SYNC_DEFAULT_INTENT").filter(|s| !s.is_empty()) {
            config.default_intent = value;
        }

        if let Some(value) = lookup("SYNC_DEFAULT_FOCUS_TYPE").filter(|s| !s.is_empty()) {
            config.default_focus_type = value.parse().map_err(SyncError::configuration)?;
        }

        if let Some(value) = lookup("SYNC_EXPRESSION_MAX_OPERATIONS").filter(|s| !s.is_empty()) {
            config.expression_max_operations = value.parse::<u64>().map_err(|e| {
                SyncError::configuration(format!(
                    "Invalid SYNC_EXPRESSION_MAX_OPERATIONS value '{value}': {e}"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.default_intent.trim().is_empty() {
            return Err(SyncError::configuration("default_intent must not be blank"));
        }
        if self.expression_max_operations == 0 {
            return Err(SyncError::configuration(
                "expression_max_operations must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Sandbox limits for the expression evaluator.
    #[must_use]
    pub fn evaluator_config(&self) -> RhaiEvaluatorConfig {
        RhaiEvaluatorConfig {
            max_operations: self.expression_max_operations,
            ..RhaiEvaluatorConfig::default()
        }
    }
}
