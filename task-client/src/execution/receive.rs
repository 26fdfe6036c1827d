//! Incoming messages from the chat relay, and read-state reflection.

use async_trait::async_trait;
use std::collections::BTreeMap;
use task_core::{
    ReceiptType, ReceiveMessageTask, ReflectIncomingUpdateTask, SendDeliveryReceiptsTask, TaskMeta,
};
use task_types::{MessageId, Receiver, ReflectEnvelope};

use super::{unix_millis, Execute};
use crate::context::{ProcessError, TaskContext};
use crate::error::TaskError;

#[async_trait]
impl Execute for ReceiveMessageTask {
    async fn execute(&mut self, _meta: &mut TaskMeta, ctx: &TaskContext) -> Result<(), TaskError> {
        let message = &self.message;
        let message_id = message.message_id;
        let sender = message.sender;

        if !ctx.chat.is_connected() {
            if let Err(e) = ctx.chat.processing_complete(message_id).await {
                tracing::debug!("Processing complete for {} not delivered: {}", message_id, e);
            }
            return Err(TaskError::ProcessingFailed { message_id });
        }

        let processed = match ctx.processor.process_incoming(message).await {
            Ok(processed) => processed,
            Err(ProcessError::Invalid(reason)) => {
                tracing::warn!("Discarding message {} from {}: {}", message_id, sender, reason);
                ctx.chat.ack_incoming(message_id, sender).await?;
                ctx.chat.processing_complete(message_id).await?;
                return Ok(());
            }
            Err(ProcessError::Failed(reason)) => {
                tracing::warn!("Processing message {} failed: {}", message_id, reason);
                return Err(TaskError::ProcessingFailed { message_id });
            }
        };

        if processed.is_voip {
            if processed.sender_blocked {
                return Err(TaskError::Dropped);
            }
            ctx.chat.ack_incoming(message_id, sender).await?;
            ctx.chat.processing_complete(message_id).await?;
            return Ok(());
        }

        if ctx.account.multi_device_enabled() {
            ctx.require_multi_device()?;
            ctx.mediator
                .reflect(ReflectEnvelope::IncomingMessage {
                    message_id,
                    sender,
                    message_type: message.message_type,
                    body: message.payload.clone(),
                    created_at: message.created_at,
                })
                .await?;
        }

        ctx.chat.ack_incoming(message_id, sender).await?;

        match processed.group {
            Some(group) => ctx.groups.periodic_sync_if_needed(&group),
            None if !processed.is_control && !sender.is_gateway() => {
                let mut receipt = SendDeliveryReceiptsTask {
                    message_id: MessageId::random(),
                    receipt_type: ReceiptType::Received,
                    receipt_message_ids: vec![message_id],
                    receiver: Receiver::Contact(sender),
                    to_members: Vec::new(),
                    created_at: unix_millis(),
                    message_already_sent_to: BTreeMap::new(),
                };
                // The message itself is safe at this point; a lost receipt is not worth
                // processing it twice.
                if let Err(e) = receipt.execute(&mut TaskMeta::new(), ctx).await {
                    tracing::warn!("Delivery receipt for {} not sent: {}", message_id, e);
                }
            }
            None => {}
        }

        ctx.chat.processing_complete(message_id).await?;
        Ok(())
    }
}

#[async_trait]
impl Execute for ReflectIncomingUpdateTask {
    async fn execute(&mut self, _meta: &mut TaskMeta, ctx: &TaskContext) -> Result<(), TaskError> {
        if !ctx.account.multi_device_enabled() {
            return Err(TaskError::Dropped);
        }
        ctx.require_multi_device()?;
        if !ctx.mediator.is_connected() {
            return Err(TaskError::NotConnected);
        }

        ctx.mediator
            .reflect(ReflectEnvelope::IncomingMessageUpdate {
                conversation: self.conversation,
                message_ids: self.message_ids.clone(),
                read_at: self.read_at,
            })
            .await?;
        Ok(())
    }
}
