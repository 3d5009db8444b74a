//! Expression evaluation.
//!
//! Policy conditions, correlation items and confirmation rules are
//! [`Expression`]s evaluated against a fixed set of variables (`focus`,
//! `shadow`, `resource`, `configuration`, with the aliases `user` and
//! `account`). Scripts run in a sandboxed Rhai engine, created fresh for each
//! evaluation, with bounded operations, call depth and data sizes.

use std::collections::BTreeMap;

use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{SyncError, SyncResult};
use crate::focus::Focus;
use crate::policy::Expression;
use crate::resource::{Resource, SystemConfiguration};
use crate::result::OperationResult;
use crate::shadow::Shadow;
use crate::task::Task;

/// Variable holding the focus.
pub const VAR_FOCUS: &str = "focus";
/// Alias of [`VAR_FOCUS`].
pub const VAR_USER: &str = "user";
/// Variable holding the shadow.
pub const VAR_SHADOW: &str = "shadow";
/// Alias of [`VAR_SHADOW`].
pub const VAR_ACCOUNT: &str = "account";
/// Variable holding the resource.
pub const VAR_RESOURCE: &str = "resource";
/// Variable holding the system configuration.
pub const VAR_CONFIGURATION: &str = "configuration";

const BUILTIN_VARIABLES: [&str; 6] = [
    VAR_FOCUS,
    VAR_USER,
    VAR_SHADOW,
    VAR_ACCOUNT,
    VAR_RESOURCE,
    VAR_CONFIGURATION,
];

/// Variables visible to an expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionVariables {
    values: BTreeMap<String, serde_json::Value>,
}

impl ExpressionVariables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The default variable set. Absent objects are left unset.
    pub fn default_variables(
        focus: Option<&Focus>,
        shadow: Option<&Shadow>,
        resource: Option<&Resource>,
        configuration: Option<&SystemConfiguration>,
    ) -> SyncResult<Self> {
        let mut variables = Self::new();
        if let Some(focus) = focus {
            let value = serde_json::to_value(focus)?;
            variables.insert(VAR_USER, value.clone());
            variables.insert(VAR_FOCUS, value);
        }
        if let Some(shadow) = shadow {
            let value = serde_json::to_value(shadow)?;
            variables.insert(VAR_ACCOUNT, value.clone());
            variables.insert(VAR_SHADOW, value);
        }
        if let Some(resource) = resource {
            variables.insert_serialized(VAR_RESOURCE, resource)?;
        }
        if let Some(configuration) = configuration {
            variables.insert_serialized(VAR_CONFIGURATION, configuration)?;
        }
        Ok(variables)
    }

    /// Set a variable.
    pub fn insert(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.values.insert(name.into(), value);
    }

    /// Set a variable from any serializable value.
    pub fn insert_serialized<T: Serialize>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> SyncResult<()> {
        self.values.insert(name.into(), serde_json::to_value(value)?);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name)
    }

    /// Resolve a dot-separated path. Missing segments resolve to `None`.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> Option<&serde_json::Value> {
        let mut segments = path.split('.').filter(|s| !s.is_empty());
        let mut current = self.values.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                serde_json::Value::Object(map) => map.get(segment)?,
                serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.values.iter()
    }
}

/// Evaluates configured expressions.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate an expression to a value.
    ///
    /// `description` names the expression for error messages, e.g.
    /// "condition in synchronization policy accounts".
    fn evaluate(
        &self,
        expression: &Expression,
        variables: &ExpressionVariables,
        description: &str,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<serde_json::Value>;

    /// Evaluate a boolean expression.
    ///
    /// `null` counts as `false`; any other non-boolean value is an error.
    fn evaluate_condition(
        &self,
        expression: &Expression,
        variables: &ExpressionVariables,
        description: &str,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<bool> {
        match self.evaluate(expression, variables, description, task, result)? {
            serde_json::Value::Bool(value) => Ok(value),
            serde_json::Value::Null => Ok(false),
            other => Err(SyncError::expression(
                description,
                format!("expected a boolean, got {other}"),
            )),
        }
    }
}

/// Default maximum number of operations in the Rhai engine.
const DEFAULT_MAX_OPERATIONS: u64 = 100_000;

/// Default maximum call stack depth.
const DEFAULT_MAX_CALL_LEVELS: usize = 64;

/// Default maximum string size in bytes.
const DEFAULT_MAX_STRING_SIZE: usize = 65536;

/// Default maximum array size.
const DEFAULT_MAX_ARRAY_SIZE: usize = 10_000;

/// Default maximum map size.
const DEFAULT_MAX_MAP_SIZE: usize = 10_000;

/// Sandbox limits of [`RhaiExpressionEvaluator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RhaiEvaluatorConfig {
    /// Maximum number of operations before termination.
    pub max_operations: u64,
    /// Maximum call stack depth.
    pub max_call_levels: usize,
    /// Maximum string size in bytes.
    pub max_string_size: usize,
    /// Maximum array size.
    pub max_array_size: usize,
    /// Maximum map size.
    pub max_map_size: usize,
}

impl Default for RhaiEvaluatorConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_call_levels: DEFAULT_MAX_CALL_LEVELS,
            max_string_size: DEFAULT_MAX_STRING_SIZE,
            max_array_size: DEFAULT_MAX_ARRAY_SIZE,
            max_map_size: DEFAULT_MAX_MAP_SIZE,
        }
    }
}

/// Syntax error found by [`RhaiExpressionEvaluator::validate_script`].
#[derive(Debug, Clone, Serialize)]
pub struct ScriptValidationError {
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub message: String,
}

/// Rhai-based expression evaluator.
#[derive(Debug, Clone, Default)]
pub struct RhaiExpressionEvaluator {
    config: RhaiEvaluatorConfig,
}

impl RhaiExpressionEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: RhaiEvaluatorConfig) -> Self {
        Self { config }
    }

    fn create_engine(&self) -> Engine {
        let mut engine = Engine::new();

        engine.set_max_operations(self.config.max_operations);
        engine.set_max_call_levels(self.config.max_call_levels);
        engine.set_max_string_size(self.config.max_string_size);
        engine.set_max_array_size(self.config.max_array_size);
        engine.set_max_map_size(self.config.max_map_size);
        engine.set_strict_variables(true);

        engine.register_fn("log_debug", |msg: &str| {
            debug!(script_log = %msg, "Expression log");
        });

        engine
    }

    /// Check a script for syntax errors.
    #[must_use]
    pub fn validate_script(&self, code: &str) -> Vec<ScriptValidationError> {
        let engine = self.create_engine();
        let scope = Self::build_scope(&ExpressionVariables::new());
        match engine.compile_with_scope(&scope, code) {
            Ok(_) => vec![],
            Err(e) => vec![ScriptValidationError {
                line: e.position().line(),
                column: e.position().position(),
                message: e.to_string(),
            }],
        }
    }

    /// Every built-in variable is declared, set to `()` when absent, so that
    /// strict-variable compilation accepts scripts referring to them.
    fn build_scope(variables: &ExpressionVariables) -> Scope<'static> {
        let mut scope = Scope::new();
        for name in BUILTIN_VARIABLES {
            if variables.get(name).is_none() {
                scope.push_constant_dynamic(name, Dynamic::UNIT);
            }
        }
        for (name, value) in variables.iter() {
            match rhai::serde::to_dynamic(value) {
                Ok(dynamic) => {
                    scope.push_constant_dynamic(name.clone(), dynamic);
                }
                Err(e) => {
                    warn!(variable = %name, error = %e, "Unable to expose variable to script");
                    scope.push_constant_dynamic(name.clone(), Dynamic::UNIT);
                }
            }
        }
        scope
    }

    fn evaluate_script(
        &self,
        code: &str,
        variables: &ExpressionVariables,
        description: &str,
    ) -> SyncResult<serde_json::Value> {
        let engine = self.create_engine();
        let mut scope = Self::build_scope(variables);

        let ast = engine
            .compile_with_scope(&scope, code)
            .map_err(|e| SyncError::expression(description, format!("Compilation error: {e}")))?;

        let value = engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| Self::map_eval_error(*e, description))?;

        rhai::serde::from_dynamic::<serde_json::Value>(&value)
            .map_err(|e| SyncError::expression(description, format!("Unsupported result: {e}")))
    }

    fn map_eval_error(err: EvalAltResult, description: &str) -> SyncError {
        match err {
            EvalAltResult::ErrorTooManyOperations(..)
            | EvalAltResult::ErrorDataTooLarge(..)
            | EvalAltResult::ErrorStackOverflow(..) => {
                SyncError::security(description, err.to_string())
            }
            other => SyncError::expression(description, format!("Runtime error: {other}")),
        }
    }
}

impl ExpressionEvaluator for RhaiExpressionEvaluator {
    fn evaluate(
        &self,
        expression: &Expression,
        variables: &ExpressionVariables,
        description: &str,
        task: &Task,
        _result: &mut OperationResult,
    ) -> SyncResult<serde_json::Value> {
        let value = match expression {
            Expression::Literal { value } => value.clone(),
            Expression::Path { path } => variables
                .resolve_path(path)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            Expression::Script { code } => self.evaluate_script(code, variables, description)?,
        };
        trace!(task_id = %task.id, expression = %description, value = %value, "Expression evaluated");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluate(expression: &Expression, variables: &ExpressionVariables) -> SyncResult<serde_json::Value> {
        let evaluator = RhaiExpressionEvaluator::new();
        let mut result = OperationResult::new("test");
        evaluator.evaluate(expression, variables, "test expression", &Task::new(), &mut result)
    }

    fn shadow_variables() -> ExpressionVariables {
        let shadow = Shadow::new("inetOrgPerson")
            .with_intent("default")
            .with_attributes(json!({"uid": "jdoe", "groups": ["staff", "dev"]}));
        ExpressionVariables::default_variables(None, Some(&shadow), None, None).unwrap()
    }

    #[test]
    fn test_literal_and_path() {
        let variables = shadow_variables();
        assert_eq!(evaluate(&Expression::literal(json!(42)), &variables).unwrap(), json!(42));
        assert_eq!(
            evaluate(&Expression::path("shadow.attributes.uid"), &variables).unwrap(),
            json!("jdoe")
        );
        assert_eq!(
            evaluate(&Expression::path("account.attributes.groups.1"), &variables).unwrap(),
            json!("dev")
        );
        assert_eq!(
            evaluate(&Expression::path("shadow.attributes.mail"), &variables).unwrap(),
            json!(null)
        );
        assert_eq!(evaluate(&Expression::path("focus.name"), &variables).unwrap(), json!(null));
    }

    #[test]
    fn test_script_reads_variables() {
        let variables = shadow_variables();
        let value = evaluate(
            &Expression::script(r#"shadow.attributes.uid + "@example.com""#),
            &variables,
        )
        .unwrap();
        assert_eq!(value, json!("jdoe@example.com"));
    }

    #[test]
    fn test_script_with_absent_focus() {
        let variables = shadow_variables();
        let value = evaluate(&Expression::script("focus == ()"), &variables).unwrap();
        assert_eq!(value, json!(true));
    }

    #[test]
    fn test_unknown_variable_is_evaluation_error() {
        let err = evaluate(&Expression::script("nobody.name"), &shadow_variables()).unwrap_err();
        assert!(matches!(err, SyncError::ExpressionEvaluation { .. }));
    }

    #[test]
    fn test_runaway_script_is_security_error() {
        let evaluator = RhaiExpressionEvaluator::with_config(RhaiEvaluatorConfig {
            max_operations: 1_000,
            ..RhaiEvaluatorConfig::default()
        });
        let mut result = OperationResult::new("test");
        let err = evaluator
            .evaluate(
                &Expression::script("let x = 0; loop { x += 1; }"),
                &ExpressionVariables::new(),
                "runaway",
                &Task::new(),
                &mut result,
            )
            .unwrap_err();
        assert!(matches!(err, SyncError::Security { .. }));
    }

    #[test]
    fn test_condition_requires_boolean() {
        let evaluator = RhaiExpressionEvaluator::new();
        let task = Task::new();
        let mut result = OperationResult::new("test");
        let variables = shadow_variables();

        assert!(evaluator
            .evaluate_condition(
                &Expression::script(r#"shadow.intent == "default""#),
                &variables,
                "condition",
                &task,
                &mut result
            )
            .unwrap());
        assert!(!evaluator
            .evaluate_condition(&Expression::literal(json!(null)), &variables, "condition", &task, &mut result)
            .unwrap());
        assert!(evaluator
            .evaluate_condition(&Expression::literal(json!("yes")), &variables, "condition", &task, &mut result)
            .is_err());
    }

    #[test]
    fn test_validate_script() {
        let evaluator = RhaiExpressionEvaluator::new();
        assert!(evaluator.validate_script("shadow.attributes.uid").is_empty());
        assert!(!evaluator.validate_script("let x = ;").is_empty());
    }
}
