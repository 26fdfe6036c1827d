//! Runtime context handed to every task execution.
//!
//! The entity store, the message decoder and the group bookkeeping live
//! outside this crate. Executions reach them through the traits below and
//! load everything they need explicitly at the start of a run.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use task_core::{ProfileSnapshot, SettingsSnapshot};
use task_types::{
    ContactDelta, GroupIdentity, Identity, IncomingMessage, MessageId, Receiver, ReflectEnvelope,
};

use crate::chat::ChatClient;
use crate::mediator::MediatorClient;

/// Error reported by the entity repository.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct RepositoryError(pub String);

/// Acceptance state of a stored contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactStatus {
    /// Messages may be sent.
    Active,
    /// The identity was revoked; never send.
    Invalid,
}

/// Identity-keyed access to contacts, profile, settings and messages.
///
/// Writes are atomic relative to a single task execution.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Status of a contact, `None` if unknown.
    async fn contact_status(&self, identity: &Identity)
        -> Result<Option<ContactStatus>, RepositoryError>;

    /// Record that an outgoing message reached all its receivers.
    async fn mark_message_sent(
        &self,
        message_id: &MessageId,
        receiver: &Receiver,
    ) -> Result<(), RepositoryError>;

    /// Current profile.
    async fn profile(&self) -> Result<ProfileSnapshot, RepositoryError>;

    /// Replace the profile.
    async fn set_profile(&self, profile: ProfileSnapshot) -> Result<(), RepositoryError>;

    /// Current settings.
    async fn settings(&self) -> Result<SettingsSnapshot, RepositoryError>;

    /// Replace the settings.
    async fn set_settings(&self, settings: SettingsSnapshot) -> Result<(), RepositoryError>;

    /// Stored contacts among `identities`.
    async fn contacts(
        &self,
        identities: &[Identity],
    ) -> Result<BTreeMap<Identity, ContactDelta>, RepositoryError>;

    /// Create or update contacts.
    async fn upsert_contacts(&self, deltas: &[ContactDelta]) -> Result<(), RepositoryError>;

    /// Delete contacts.
    async fn delete_contacts(&self, identities: &[Identity]) -> Result<(), RepositoryError>;
}

/// What the processor learned from a valid incoming message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedIncoming {
    /// Group the message belongs to.
    pub group: Option<GroupIdentity>,
    /// Control message (receipt, typing indicator, group setup, ...).
    pub is_control: bool,
    /// Call signalling message.
    pub is_voip: bool,
    /// The sender is on the block list.
    pub sender_blocked: bool,
}

/// Outcome of processing a reflected envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectedOutcome {
    /// Applied; acknowledge it.
    Processed,
    /// Must not be acknowledged (the mediator redelivers).
    DoNotAck,
}

/// Processor failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    /// The message can never be processed; discard it.
    #[error("invalid message: {0}")]
    Invalid(String),
    /// Processing failed this time.
    #[error("processing failed: {0}")]
    Failed(String),
}

/// Decrypts, decodes and stores incoming messages.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Process a message delivered by the chat relay.
    async fn process_incoming(
        &self,
        message: &IncomingMessage,
    ) -> Result<ProcessedIncoming, ProcessError>;

    /// Apply an envelope reflected by a sibling device.
    async fn process_reflected(
        &self,
        envelope: &ReflectEnvelope,
        timestamp: u64,
    ) -> Result<ReflectedOutcome, ProcessError>;
}

/// Group bookkeeping hooks.
pub trait GroupManager: Send + Sync {
    /// Schedule a group sync if the last one is too old. Fire-and-forget.
    fn periodic_sync_if_needed(&self, group: &GroupIdentity);
}

/// Facts about the local account.
pub trait AccountProvider: Send + Sync {
    /// The local identity.
    fn my_identity(&self) -> Identity;
    /// Whether multi-device is enabled.
    fn multi_device_enabled(&self) -> bool;
    /// Whether this device holds a device group key.
    fn multi_device_registered(&self) -> bool;
}

/// Everything an execution may touch.
#[derive(Clone)]
pub struct TaskContext {
    /// Chat relay client.
    pub chat: Arc<ChatClient>,
    /// Mediator client.
    pub mediator: Arc<MediatorClient>,
    /// Entity repository.
    pub repository: Arc<dyn EntityRepository>,
    /// Incoming message processor.
    pub processor: Arc<dyn MessageProcessor>,
    /// Group hooks.
    pub groups: Arc<dyn GroupManager>,
    /// Local account.
    pub account: Arc<dyn AccountProvider>,
}

impl TaskContext {
    /// Fails with the multi-device precondition error, if any.
    pub(crate) fn require_multi_device(&self) -> Result<(), crate::TaskError> {
        if !self.account.multi_device_enabled() || !self.account.multi_device_registered() {
            return Err(crate::TaskError::MultiDeviceNotRegistered);
        }
        Ok(())
    }
}
