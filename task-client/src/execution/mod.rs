//! Behavior bound to each task variant.
//!
//! Every variant payload implements [`Execute`]. [`ExecuteTask`] dispatches a
//! whole [`TaskDefinition`] to its variant, handing the shared bookkeeping
//! along so executions can keep per-run nonces in it.
//!
//! Executions resolve to `Ok(())` or a [`TaskError`]; what happens next
//! (retry, wait for reconnect, complete) is the manager's decision, driven
//! by [`TaskError::disposition`](crate::TaskError::disposition).

mod outgoing;
mod receive;
mod reflected;
mod transaction;

use async_trait::async_trait;
use task_core::{TaskDefinition, TaskKind, TaskMeta};

use crate::context::TaskContext;
use crate::error::TaskError;

/// Execution of one task variant.
#[async_trait]
pub trait Execute: Send {
    /// Run the task. `meta` is the bookkeeping of the enclosing definition.
    async fn execute(&mut self, meta: &mut TaskMeta, ctx: &TaskContext) -> Result<(), TaskError>;
}

/// Execution of a whole definition.
#[async_trait]
pub trait ExecuteTask {
    /// Run the variant of this definition.
    async fn execute(&mut self, ctx: &TaskContext) -> Result<(), TaskError>;
}

#[async_trait]
impl ExecuteTask for TaskDefinition {
    async fn execute(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        let TaskDefinition { meta, kind } = self;
        match kind {
            TaskKind::SendMessage(task) => task.execute(meta, ctx).await,
            TaskKind::SendBallotVote(task) => task.execute(meta, ctx).await,
            TaskKind::SendDeliveryReceipts(task) => task.execute(meta, ctx).await,
            TaskKind::GroupControl(task) => task.execute(meta, ctx).await,
            TaskKind::ReceiveMessage(task) => task.execute(meta, ctx).await,
            TaskKind::ReceiveReflected(task) => task.execute(meta, ctx).await,
            TaskKind::ReflectIncomingUpdate(task) => task.execute(meta, ctx).await,
            TaskKind::ProfileSync(task) => task.execute(meta, ctx).await,
            TaskKind::SettingsSync(task) => task.execute(meta, ctx).await,
            TaskKind::UpdateContactSync(task) => task.execute(meta, ctx).await,
            TaskKind::DeleteContactSync(task) => task.execute(meta, ctx).await,
        }
    }
}

/// Current Unix time in milliseconds.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
