//! xavyo Synchronization Core
//!
//! Shared identifier types for the synchronization engine.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed object identifiers (ShadowId, FocusId, ResourceId, ...)

pub mod ids;

pub use ids::{
    FocusId, ObjectTemplateId, ParseIdError, ResourceId, ShadowId, SystemConfigurationId, TaskId,
};
