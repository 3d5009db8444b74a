//! Strongly Typed Identifiers
//!
//! Object identifiers (OIDs) used by the synchronization engine. Each kind of
//! repository object gets its own newtype so a shadow OID can never be handed
//! to an API that expects a focus OID.
//!
//! # Example
//!
//! ```
//! use xavyo_sync_core::{FocusId, ShadowId};
//!
//! let shadow = ShadowId::new();
//! let owner = FocusId::new();
//!
//! fn lookup_owner(shadow: ShadowId) -> String {
//!     shadow.to_string()
//! }
//!
//! let _ = lookup_owner(shadow);
//! // lookup_owner(owner); // This would not compile!
//! # let _ = owner;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying UUID parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to define a strongly-typed object identifier
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random OID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an OID from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Consumes the OID, returning the underlying UUID.
            #[must_use]
            pub fn into_uuid(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }
    };
}

define_id!(
    /// OID of a shadow, the repository-side projection of a resource object.
    ShadowId
);

define_id!(
    /// OID of a focus object (user, role, org, service) that owns shadows.
    FocusId
);

define_id!(
    /// OID of a resource (directory, HR system, cloud application).
    ResourceId
);

define_id!(
    /// OID of an object template applied to a focus during synchronization.
    ObjectTemplateId
);

define_id!(
    /// OID of the system configuration object.
    SystemConfigurationId
);

define_id!(
    /// Identifier of the task on whose behalf a notification is processed.
    TaskId
);
