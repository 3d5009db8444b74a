//! Hierarchical operation outcome.
//!
//! Every `notify_change` call produces an [`OperationResult`] tree that is
//! attached to the invoking task's audit trail. Each phase of the pipeline
//! records itself as a subresult, so a reader can see which step decided the
//! outcome.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Status of an operation (or one of its phases).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Not yet decided; computed from subresults.
    #[default]
    Unknown,
    /// Operation still running.
    InProgress,
    /// Completed successfully.
    Success,
    /// Completed, with something worth noting.
    Warning,
    /// An error occurred and was handled; the operation effectively succeeded.
    HandledError,
    /// Some parts failed, the rest completed.
    PartialError,
    /// The operation failed.
    FatalError,
    /// The operation did not apply.
    NotApplicable,
}

impl OperationStatus {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Unknown => "unknown",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Success => "success",
            OperationStatus::Warning => "warning",
            OperationStatus::HandledError => "handled_error",
            OperationStatus::PartialError => "partial_error",
            OperationStatus::FatalError => "fatal_error",
            OperationStatus::NotApplicable => "not_applicable",
        }
    }

    /// Whether the status is final (not computed from children).
    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(self, OperationStatus::Unknown | OperationStatus::InProgress)
    }

    /// Whether the status represents an error that was not handled.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            OperationStatus::FatalError | OperationStatus::PartialError
        )
    }

    fn severity(self) -> u8 {
        match self {
            OperationStatus::FatalError => 6,
            OperationStatus::PartialError => 5,
            OperationStatus::Warning => 4,
            OperationStatus::HandledError => 3,
            OperationStatus::Success => 2,
            OperationStatus::NotApplicable => 1,
            OperationStatus::Unknown | OperationStatus::InProgress => 0,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One node of the outcome tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    operation: String,
    status: OperationStatus,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    params: BTreeMap<String, String>,
    #[serde(default)]
    subresults: Vec<OperationResult>,
}

impl OperationResult {
    /// Create a new result for the named operation.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status: OperationStatus::Unknown,
            message: None,
            params: BTreeMap::new(),
            subresults: Vec::new(),
        }
    }

    /// Create a child result and return it for recording.
    pub fn create_subresult(&mut self, operation: impl Into<String>) -> &mut OperationResult {
        self.subresults.push(OperationResult::new(operation));
        let last = self.subresults.len() - 1;
        &mut self.subresults[last]
    }

    /// Attach a parameter (shadow oid, channel, ...).
    pub fn add_param(&mut self, name: impl Into<String>, value: impl ToString) {
        self.params.insert(name.into(), value.to_string());
    }

    /// Mark the operation as successful.
    pub fn record_success(&mut self) {
        self.status = OperationStatus::Success;
    }

    /// Mark the operation as successful unless a status was already recorded.
    pub fn record_success_if_unknown(&mut self) {
        if !self.status.is_final() {
            self.status = OperationStatus::Success;
        }
    }

    /// Mark the operation as not applicable.
    pub fn record_not_applicable(&mut self, message: impl Into<String>) {
        self.status = OperationStatus::NotApplicable;
        self.message = Some(message.into());
    }

    /// Record a warning.
    pub fn record_warning(&mut self, message: impl Into<String>) {
        self.status = OperationStatus::Warning;
        self.message = Some(message.into());
    }

    /// Record an error that was handled.
    pub fn record_handled_error(&mut self, message: impl Into<String>) {
        self.status = OperationStatus::HandledError;
        self.message = Some(message.into());
    }

    /// Record a partial failure.
    pub fn record_partial_error(&mut self, error: &SyncError) {
        self.status = OperationStatus::PartialError;
        self.message = Some(error.to_string());
    }

    /// Record a fatal failure.
    pub fn record_fatal_error(&mut self, error: &SyncError) {
        self.status = OperationStatus::FatalError;
        self.message = Some(error.to_string());
    }

    /// Derive the status from subresults if it was not recorded explicitly.
    ///
    /// The most severe child status wins. A result without children and
    /// without an explicit status is a success.
    pub fn compute_status(&mut self) {
        for sub in &mut self.subresults {
            sub.compute_status();
        }
        if self.status.is_final() {
            return;
        }
        self.status = self
            .subresults
            .iter()
            .map(|sub| sub.status)
            .max_by_key(|status| status.severity())
            .filter(|status| status.is_final())
            .unwrap_or(OperationStatus::Success);
        if self.message.is_none() && self.status.is_error() {
            self.message = self
                .subresults
                .iter()
                .find(|sub| sub.status == self.status)
                .and_then(|sub| sub.message.clone());
        }
    }

    /// Name of the operation.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// Message recorded with the status.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Parameter value by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Child results in creation order.
    #[must_use]
    pub fn subresults(&self) -> &[OperationResult] {
        &self.subresults
    }

    /// Depth-first search for a result with the given operation name.
    #[must_use]
    pub fn find(&self, operation: &str) -> Option<&OperationResult> {
        if self.operation == operation {
            return Some(self);
        }
        self.subresults.iter().find_map(|sub| sub.find(operation))
    }

    /// Check if the status is success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }

    /// Check if the status is not applicable.
    #[must_use]
    pub fn is_not_applicable(&self) -> bool {
        self.status == OperationStatus::NotApplicable
    }
}
