//! Change-application engine interface.

use async_trait::async_trait;

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::result::OperationResult;
use crate::task::Task;

/// Downstream engine that computes and applies the changes a
/// [`SyncContext`] asks for.
///
/// Implementations set `synchronization_situation_resolved` on the
/// projections they handled.
#[async_trait]
pub trait Clockwork: Send + Sync {
    async fn run(
        &self,
        context: &mut SyncContext,
        task: &Task,
        result: &mut OperationResult,
    ) -> SyncResult<()>;
}
