//! Outgoing messages: plain messages, ballot votes, delivery receipts and
//! group control messages.
//!
//! All four share one pipeline. The variant only decides its receiver, its
//! message type and body, and which data must be present before sending.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use task_core::{
    fan_out, is_note_group, GroupAction, GroupControlTask, SendBallotVoteTask,
    SendDeliveryReceiptsTask, SendMessageTask, TaskMeta,
};
use task_types::{Identity, MessageId, Nonce, OutgoingMessage, Receiver, ReflectEnvelope};

use super::Execute;
use crate::context::{ContactStatus, TaskContext};
use crate::error::TaskError;

/// Variant-specific parts of an outgoing message.
trait Outgoing: Send + Sync {
    fn message_id(&self) -> MessageId;
    fn receiver(&self) -> Receiver;
    fn to_members(&self) -> &[Identity];
    fn created_at(&self) -> u64;
    /// Message type code and body.
    fn message(&self) -> Result<(u8, Vec<u8>), TaskError>;
    /// Data that must be present before anything is sent.
    fn check_data(&self) -> Result<(), TaskError> {
        Ok(())
    }
    fn already_sent(&self) -> &BTreeMap<Identity, Nonce>;
    fn already_sent_mut(&mut self) -> &mut BTreeMap<Identity, Nonce>;
}

impl Outgoing for SendMessageTask {
    fn message_id(&self) -> MessageId {
        self.message_id
    }

    fn receiver(&self) -> Receiver {
        self.receiver
    }

    fn to_members(&self) -> &[Identity] {
        &self.to_members
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn message(&self) -> Result<(u8, Vec<u8>), TaskError> {
        Ok((self.message_type, self.body.clone()))
    }

    fn check_data(&self) -> Result<(), TaskError> {
        if self.requires_blob && self.blob_id.is_none() {
            return Err(TaskError::MissingData("blob id"));
        }
        Ok(())
    }

    fn already_sent(&self) -> &BTreeMap<Identity, Nonce> {
        &self.message_already_sent_to
    }

    fn already_sent_mut(&mut self) -> &mut BTreeMap<Identity, Nonce> {
        &mut self.message_already_sent_to
    }
}

impl Outgoing for SendBallotVoteTask {
    fn message_id(&self) -> MessageId {
        self.message_id
    }

    fn receiver(&self) -> Receiver {
        self.receiver
    }

    fn to_members(&self) -> &[Identity] {
        &self.to_members
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn message(&self) -> Result<(u8, Vec<u8>), TaskError> {
        Ok(SendBallotVoteTask::message(self)?)
    }

    fn already_sent(&self) -> &BTreeMap<Identity, Nonce> {
        &self.message_already_sent_to
    }

    fn already_sent_mut(&mut self) -> &mut BTreeMap<Identity, Nonce> {
        &mut self.message_already_sent_to
    }
}

impl Outgoing for SendDeliveryReceiptsTask {
    fn message_id(&self) -> MessageId {
        self.message_id
    }

    fn receiver(&self) -> Receiver {
        self.receiver
    }

    fn to_members(&self) -> &[Identity] {
        &self.to_members
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn message(&self) -> Result<(u8, Vec<u8>), TaskError> {
        Ok(SendDeliveryReceiptsTask::message(self)?)
    }

    fn check_data(&self) -> Result<(), TaskError> {
        if self.receipt_message_ids.is_empty() {
            return Err(TaskError::MissingData("receipt message ids"));
        }
        Ok(())
    }

    fn already_sent(&self) -> &BTreeMap<Identity, Nonce> {
        &self.message_already_sent_to
    }

    fn already_sent_mut(&mut self) -> &mut BTreeMap<Identity, Nonce> {
        &mut self.message_already_sent_to
    }
}

impl Outgoing for GroupControlTask {
    fn message_id(&self) -> MessageId {
        self.message_id
    }

    fn receiver(&self) -> Receiver {
        Receiver::Group(self.group)
    }

    fn to_members(&self) -> &[Identity] {
        &self.to_members
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn message(&self) -> Result<(u8, Vec<u8>), TaskError> {
        Ok(GroupControlTask::message(self)?)
    }

    fn check_data(&self) -> Result<(), TaskError> {
        if let GroupAction::SetPhoto { blob_id: None, .. } = self.action {
            return Err(TaskError::MissingData("group photo blob id"));
        }
        Ok(())
    }

    fn already_sent(&self) -> &BTreeMap<Identity, Nonce> {
        &self.message_already_sent_to
    }

    fn already_sent_mut(&mut self) -> &mut BTreeMap<Identity, Nonce> {
        &mut self.message_already_sent_to
    }
}

macro_rules! execute_outgoing {
    ($($task:ty),*) => {
        $(
            #[async_trait]
            impl Execute for $task {
                async fn execute(
                    &mut self,
                    meta: &mut TaskMeta,
                    ctx: &TaskContext,
                ) -> Result<(), TaskError> {
                    send_outgoing(self, meta, ctx).await
                }
            }
        )*
    };
}

execute_outgoing!(
    SendMessageTask,
    SendBallotVoteTask,
    SendDeliveryReceiptsTask,
    GroupControlTask
);

async fn send_outgoing<T: Outgoing>(
    task: &mut T,
    meta: &mut TaskMeta,
    ctx: &TaskContext,
) -> Result<(), TaskError> {
    let me = ctx.account.my_identity();
    let message_id = task.message_id();
    let receiver = task.receiver();

    // A note group has nobody to send to; the blob is never uploaded either.
    if receiver.is_group() && is_note_group(task.to_members(), &me) {
        ctx.repository.mark_message_sent(&message_id, &receiver).await?;
        return Err(TaskError::Dropped);
    }

    task.check_data()?;

    if !ctx.chat.is_connected() {
        return Err(TaskError::NotConnected);
    }

    let multi_device = ctx.account.multi_device_enabled();
    let (message_type, body) = task.message()?;

    if multi_device {
        ctx.require_multi_device()?;
        if !ctx.mediator.is_connected() {
            return Err(TaskError::NotConnected);
        }
        ctx.mediator
            .reflect(ReflectEnvelope::OutgoingMessage {
                message_id,
                receiver,
                message_type,
                body: body.clone(),
                created_at: task.created_at(),
            })
            .await?;
    }

    let receivers = resolve_receivers(&*task, &me, ctx).await?;

    for identity in &receivers {
        let nonce = *meta.nonces.entry(*identity).or_insert_with(Nonce::random);
        ctx.chat
            .send_message(OutgoingMessage {
                message_id,
                sender: me,
                receiver: *identity,
                nonce,
                message_type,
                payload: body.clone(),
                created_at: task.created_at(),
            })
            .await?;
        task.already_sent_mut().insert(*identity, nonce);
    }

    if !receivers.is_empty() && multi_device {
        ctx.mediator
            .reflect(ReflectEnvelope::OutgoingMessageSent {
                message_id,
                receiver,
            })
            .await?;
    }

    ctx.repository.mark_message_sent(&message_id, &receiver).await?;
    meta.nonces.clear();
    task.already_sent_mut().clear();
    Ok(())
}

/// Receivers that still need the message, in member order.
async fn resolve_receivers<T: Outgoing>(
    task: &T,
    me: &Identity,
    ctx: &TaskContext,
) -> Result<Vec<Identity>, TaskError> {
    let settings = ctx.repository.settings().await?;
    let blocked: BTreeSet<Identity> = settings.blocked_identities.into_iter().collect();

    match task.receiver() {
        Receiver::Contact(identity) => {
            if identity == *me || blocked.contains(&identity) {
                return Err(TaskError::ReceiverBlockedOrUnknown { identity });
            }
            match ctx.repository.contact_status(&identity).await? {
                None => Err(TaskError::ReceiverBlockedOrUnknown { identity }),
                Some(ContactStatus::Invalid) => Err(TaskError::InvalidContact { identity }),
                Some(ContactStatus::Active) if task.already_sent().contains_key(&identity) => {
                    Ok(Vec::new())
                }
                Some(ContactStatus::Active) => Ok(vec![identity]),
            }
        }
        Receiver::Group(_) => {
            let candidates = fan_out(task.to_members(), me, &blocked, task.already_sent());
            let mut receivers = Vec::with_capacity(candidates.len());
            for identity in candidates {
                match ctx.repository.contact_status(&identity).await? {
                    Some(ContactStatus::Invalid) => {
                        tracing::debug!("Skipping invalid group member {}", identity);
                    }
                    _ => receivers.push(identity),
                }
            }
            Ok(receivers)
        }
    }
}
