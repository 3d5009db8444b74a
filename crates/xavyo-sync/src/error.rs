//! Synchronization error types.

use std::fmt;

use thiserror::Error;

/// Errors raised by the repository collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    /// The object does not exist (or no longer exists).
    #[error("{object_type} not found: {oid}")]
    NotFound { object_type: String, oid: String },

    /// The modification would create a duplicate object or conflicting value.
    #[error("Object already exists: {message}")]
    AlreadyExists { message: String },

    /// The modification does not fit the object schema.
    #[error("Schema violation: {message}")]
    Schema { message: String },

    /// The repository could not be reached.
    #[error("Repository unavailable: {message}")]
    Unavailable { message: String },

    /// Another writer changed the object since it was read.
    #[error("{object_type} {oid} was modified concurrently")]
    ConcurrentModification { object_type: String, oid: String },
}

impl RepositoryError {
    /// Create a not found error.
    pub fn not_found(object_type: impl Into<String>, oid: impl ToString) -> Self {
        Self::NotFound {
            object_type: object_type.into(),
            oid: oid.to_string(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a concurrent modification error.
    pub fn concurrent_modification(object_type: impl Into<String>, oid: impl ToString) -> Self {
        Self::ConcurrentModification {
            object_type: object_type.into(),
            oid: oid.to_string(),
        }
    }

    /// Check if the object was not found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }

    /// Check if the write lost a race with another writer: the object was
    /// deleted or modified in the meantime.
    #[must_use]
    pub fn is_benign_race(&self) -> bool {
        matches!(
            self,
            RepositoryError::NotFound { .. } | RepositoryError::ConcurrentModification { .. }
        )
    }
}

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors that can occur while processing a change notification.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The notification or one of its parts violates the call contract.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Synchronization configuration is broken.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Object data does not fit the expected schema.
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// A referenced object does not exist.
    #[error("{object_type} not found: {oid}")]
    ObjectNotFound { object_type: String, oid: String },

    /// An object with the same identity already exists.
    #[error("Object already exists: {message}")]
    ObjectAlreadyExists { message: String },

    /// Expression evaluation failed.
    #[error("Expression evaluation failed in {context}: {message}")]
    ExpressionEvaluation { context: String, message: String },

    /// Expression was stopped by the sandbox.
    #[error("Security violation in {context}: {message}")]
    Security { context: String, message: String },

    /// A synchronization action failed.
    #[error("Action '{handler_uri}' failed: {message}")]
    Action {
        handler_uri: String,
        message: String,
    },

    /// The change-application engine failed.
    #[error("Clockwork failed: {message}")]
    Clockwork { message: String },

    /// The repository could not be reached.
    #[error("Repository unavailable: {message}")]
    Unavailable { message: String },

    /// The object was changed by another writer.
    #[error("{object_type} {oid} was modified concurrently")]
    ConcurrentModification { object_type: String, oid: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unclassified failure wrapped at the service boundary.
    #[error("System error: {message}")]
    System {
        message: String,
        #[source]
        source: Option<Box<SyncError>>,
    },
}

impl SyncError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create an expression evaluation error.
    pub fn expression(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExpressionEvaluation {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a security error.
    pub fn security(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Security {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create an action error.
    pub fn action(handler_uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Action {
            handler_uri: handler_uri.into(),
            message: message.into(),
        }
    }

    /// Create a clockwork error.
    pub fn clockwork(message: impl Into<String>) -> Self {
        Self::Clockwork {
            message: message.into(),
        }
    }

    /// Wrap an error as a system error, keeping it as the source.
    #[must_use]
    pub fn system(source: SyncError) -> Self {
        if matches!(source, SyncError::System { .. }) {
            return source;
        }
        Self::System {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if the error means the object is gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::ObjectNotFound { .. })
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, SyncError::Configuration { .. })
    }

    /// The innermost error below any `System` wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &SyncError {
        match self {
            SyncError::System {
                source: Some(inner),
                ..
            } => inner.root_cause(),
            other => other,
        }
    }
}

impl From<RepositoryError> for SyncError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { object_type, oid } => {
                SyncError::ObjectNotFound { object_type, oid }
            }
            RepositoryError::AlreadyExists { message } => SyncError::ObjectAlreadyExists { message },
            RepositoryError::Schema { message } => SyncError::Schema { message },
            RepositoryError::Unavailable { message } => SyncError::Unavailable { message },
            RepositoryError::ConcurrentModification { object_type, oid } => {
                SyncError::ConcurrentModification { object_type, oid }
            }
        }
    }
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Why a notification (or one of its phases) does not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotApplicableReason {
    /// The shadow is a protected object.
    Protected,
    /// No synchronization policy matches the shadow.
    NoPolicy,
    /// The matching policy is not enabled.
    SynchronizationDisabled,
    /// The policy does not match the kind/intent the task is restricted to.
    TaskConstraintMismatch,
    /// No reaction is configured for the situation and channel.
    NoReaction,
}

impl NotApplicableReason {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NotApplicableReason::Protected => "protected",
            NotApplicableReason::NoPolicy => "no_policy",
            NotApplicableReason::SynchronizationDisabled => "synchronization_disabled",
            NotApplicableReason::TaskConstraintMismatch => "task_constraint_mismatch",
            NotApplicableReason::NoReaction => "no_reaction",
        }
    }
}

impl fmt::Display for NotApplicableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a selection step that may legitimately find nothing.
///
/// Together with [`SyncResult`] this gives the three-way
/// `Ok(value) | NotApplicable | Error` shape used by the policy and reaction
/// selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<T> {
    /// The step applies and produced a value.
    Applicable(T),
    /// The step does not apply.
    NotApplicable(NotApplicableReason),
}

impl<T> Decision<T> {
    /// Returns the value if applicable.
    pub fn applicable(self) -> Option<T> {
        match self {
            Decision::Applicable(value) => Some(value),
            Decision::NotApplicable(_) => None,
        }
    }

    /// Check if the step is not applicable.
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, Decision::NotApplicable(_))
    }

    /// Map the applicable value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decision<U> {
        match self {
            Decision::Applicable(value) => Decision::Applicable(f(value)),
            Decision::NotApplicable(reason) => Decision::NotApplicable(reason),
        }
    }
}
