//! Change notifications.
//!
//! A [`ChangeNotification`] describes one observed resource-side event. It
//! is built by the provisioning layer, handed to
//! [`SynchronizationService::notify_change`](crate::service::SynchronizationService::notify_change)
//! and consumed by that single call.

use std::sync::Arc;

use xavyo_sync_core::ShadowId;

use crate::error::{SyncError, SyncResult};
use crate::resource::Resource;
use crate::shadow::{ChangeType, Shadow, ShadowDelta};

/// Well-known source channel identifiers.
pub mod channel {
    /// Live synchronization (incremental change detection).
    pub const LIVE_SYNC: &str = "livesync";
    /// Full reconciliation of a resource.
    pub const RECONCILIATION: &str = "reconciliation";
    /// Inconsistency discovered during provisioning.
    pub const DISCOVERY: &str = "discovery";
    /// Asynchronous update messages from the resource.
    pub const ASYNC_UPDATE: &str = "async-update";
    /// Bulk import.
    pub const IMPORT: &str = "import";
}

/// Observed change of a resource object.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    /// Shadow as it is now; absent on delete.
    pub current_shadow: Option<Shadow>,
    /// Shadow as it was before the change.
    pub old_shadow: Option<Shadow>,
    /// The detected change.
    pub object_delta: Option<ShadowDelta>,
    /// Resource the change happened on.
    pub resource: Arc<Resource>,
    /// Origin of the change.
    pub source_channel: Option<String>,
    /// The change does not affect synchronization-relevant data.
    pub unrelated_change: bool,
    /// Preview only: classify and record, never react.
    pub dry_run: bool,
}

impl ChangeNotification {
    /// Start building a notification for a resource.
    pub fn builder(resource: Arc<Resource>) -> ChangeNotificationBuilder {
        ChangeNotificationBuilder::new(resource)
    }

    /// Shadow the change applies to: current, else old.
    #[must_use]
    pub fn applicable_shadow(&self) -> Option<&Shadow> {
        self.current_shadow.as_ref().or(self.old_shadow.as_ref())
    }

    /// OID of the affected shadow: current shadow, old shadow, then delta.
    pub fn shadow_oid(&self) -> SyncResult<ShadowId> {
        self.current_shadow
            .as_ref()
            .map(|s| s.id)
            .or_else(|| self.old_shadow.as_ref().map(|s| s.id))
            .or_else(|| self.object_delta.as_ref().and_then(|d| d.oid))
            .ok_or_else(|| {
                SyncError::invalid_argument(
                    "Unable to determine OID from change description: no shadow and no delta OID",
                )
            })
    }

    /// Kind of change; a notification without a delta counts as ADD.
    #[must_use]
    pub fn modification_type(&self) -> ChangeType {
        self.object_delta
            .as_ref()
            .map_or(ChangeType::Add, |d| d.change_type)
    }

    /// Check if the change is a deletion.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.modification_type() == ChangeType::Delete
    }

    /// The shadow is gone: dead flag on the old (then current) shadow, else
    /// a DELETE delta.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        if let Some(old) = &self.old_shadow {
            if old.dead {
                return true;
            }
        }
        if let Some(current) = &self.current_shadow {
            if current.dead {
                return true;
            }
        }
        self.object_delta.as_ref().is_some_and(ShadowDelta::is_delete)
    }

    /// Channel, or an empty string for logging.
    #[must_use]
    pub fn channel_str(&self) -> &str {
        self.source_channel.as_deref().unwrap_or("")
    }

    /// Check the call contract.
    ///
    /// Expects [`prepare`](Self::prepare) to have run, so the object of an
    /// ADD delta already counts as the current shadow. With `consistency_checks` enabled the shadow and delta are also checked
    /// structurally.
    pub fn validate(&self, consistency_checks: bool) -> SyncResult<()> {
        if self.current_shadow.is_none() && self.object_delta.is_none() {
            return Err(SyncError::invalid_argument(
                "Object delta and current shadow are null. At least one must be provided.",
            ));
        }
        if self.current_shadow.is_some() && self.old_shadow.is_some() {
            return Err(SyncError::invalid_argument(
                "Both current and old shadow are set. At most one may be provided.",
            ));
        }
        if self.applicable_shadow().is_none() {
            return Err(SyncError::invalid_argument(
                "Neither current nor old shadow is set and the delta carries no object to add.",
            ));
        }

        if consistency_checks {
            if let Some(shadow) = &self.current_shadow {
                shadow.check_consistence()?;
            }
            if let Some(delta) = &self.object_delta {
                delta.check_consistence()?;
                if let (Some(oid), Some(shadow)) = (delta.oid, self.applicable_shadow()) {
                    if oid != shadow.id {
                        return Err(SyncError::invalid_argument(format!(
                            "Delta OID {oid} does not match shadow OID {}",
                            shadow.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Complete the notification before validation: adopt the shadow of an
    /// ADD delta and fill in missing resource references.
    pub fn prepare(&mut self) {
        self.adopt_shadow_from_add_delta();
        self.fill_resource_reference();
    }

    /// Promote the object of an ADD delta to the current shadow when no
    /// shadow was supplied.
    ///
    /// Returns `true` if the current shadow was set.
    pub fn adopt_shadow_from_add_delta(&mut self) -> bool {
        if self.current_shadow.is_some() || self.old_shadow.is_some() {
            return false;
        }
        let Some(delta) = &self.object_delta else {
            return false;
        };
        if !delta.is_add() {
            return false;
        }
        match &delta.object_to_add {
            Some(object) => {
                self.current_shadow = Some(object.as_ref().clone());
                true
            }
            None => false,
        }
    }

    /// Give a shadow that lacks a resource reference the notification's resource.
    pub fn fill_resource_reference(&mut self) {
        let resource_id = self.resource.id;
        for shadow in [self.current_shadow.as_mut(), self.old_shadow.as_mut()]
            .into_iter()
            .flatten()
        {
            if shadow.resource_id.is_none() {
                shadow.resource_id = Some(resource_id);
            }
        }
    }
}

/// Builder for [`ChangeNotification`].
#[derive(Debug, Clone)]
pub struct ChangeNotificationBuilder {
    notification: ChangeNotification,
}

impl ChangeNotificationBuilder {
    #[must_use]
    pub fn new(resource: Arc<Resource>) -> Self {
        Self {
            notification: ChangeNotification {
                current_shadow: None,
                old_shadow: None,
                object_delta: None,
                resource,
                source_channel: None,
                unrelated_change: false,
                dry_run: false,
            },
        }
    }

    #[must_use]
    pub fn current_shadow(mut self, shadow: Shadow) -> Self {
        self.notification.current_shadow = Some(shadow);
        self
    }

    #[must_use]
    pub fn old_shadow(mut self, shadow: Shadow) -> Self {
        self.notification.old_shadow = Some(shadow);
        self
    }

    #[must_use]
    pub fn delta(mut self, delta: ShadowDelta) -> Self {
        self.notification.object_delta = Some(delta);
        self
    }

    #[must_use]
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.notification.source_channel = Some(channel.into());
        self
    }

    #[must_use]
    pub fn unrelated_change(mut self, unrelated: bool) -> Self {
        self.notification.unrelated_change = unrelated;
        self
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.notification.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn build(self) -> ChangeNotification {
        self.notification
    }
}
