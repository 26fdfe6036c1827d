//! Envelopes reflected by sibling devices.

use async_trait::async_trait;
use task_core::{ReceiveReflectedTask, TaskMeta};

use super::Execute;
use crate::context::{ReflectedOutcome, TaskContext};
use crate::error::TaskError;

#[async_trait]
impl Execute for ReceiveReflectedTask {
    async fn execute(&mut self, _meta: &mut TaskMeta, ctx: &TaskContext) -> Result<(), TaskError> {
        if !ctx.mediator.is_connected() {
            return Err(TaskError::NotConnected);
        }

        match ctx
            .processor
            .process_reflected(&self.envelope, self.timestamp)
            .await
        {
            Ok(ReflectedOutcome::Processed) => {}
            Ok(ReflectedOutcome::DoNotAck) => return Err(TaskError::Dropped),
            // The mediator would redeliver forever; discard instead.
            Err(e) => tracing::warn!(
                "Discarding reflected {} ({}): {}",
                self.reflect_id,
                self.envelope.name(),
                e
            ),
        }

        ctx.mediator.ack_reflected(self.reflect_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessError;
    use crate::execution::testing::{identity, Harness};
    use task_types::{ReflectEnvelope, ReflectId};

    fn reflected(id: u32) -> ReceiveReflectedTask {
        ReceiveReflectedTask {
            reflect_id: ReflectId::new(id),
            timestamp: 1_705_000_000_000,
            envelope: ReflectEnvelope::ContactSyncDelete {
                identity: identity("AAAAAAAA"),
            },
        }
    }

    #[tokio::test]
    async fn processed_envelope_is_acked() {
        let harness = Harness::multi_device();
        reflected(7)
            .execute(&mut TaskMeta::new(), &harness.ctx)
            .await
            .unwrap();
        assert_eq!(harness.mediator.reflected_acks(), vec![ReflectId::new(7)]);
        assert_eq!(harness.processor.reflected_processed().len(), 1);
    }

    #[tokio::test]
    async fn failed_envelope_is_acked_and_discarded() {
        let harness = Harness::multi_device();
        harness
            .processor
            .next_reflected(Err(ProcessError::Failed("unknown contact".into())));

        reflected(8)
            .execute(&mut TaskMeta::new(), &harness.ctx)
            .await
            .unwrap();
        assert_eq!(harness.mediator.reflected_acks(), vec![ReflectId::new(8)]);
    }

    #[tokio::test]
    async fn refused_envelope_is_not_acked() {
        let harness = Harness::multi_device();
        harness
            .processor
            .next_reflected(Ok(ReflectedOutcome::DoNotAck));

        let result = reflected(9).execute(&mut TaskMeta::new(), &harness.ctx).await;
        assert!(matches!(result, Err(TaskError::Dropped)));
        assert!(harness.mediator.reflected_acks().is_empty());
    }

    #[tokio::test]
    async fn disconnected_mediator_is_a_precondition() {
        let harness = Harness::multi_device();
        harness.mediator.set_connected(false);

        let result = reflected(1).execute(&mut TaskMeta::new(), &harness.ctx).await;
        assert!(matches!(result, Err(TaskError::NotConnected)));
        assert!(harness.processor.reflected_processed().is_empty());
    }
}
