//! Task definitions: serializable descriptions of one unit of work.
//!
//! A [`TaskDefinition`] pairs the bookkeeping every task shares ([`TaskMeta`])
//! with a variant payload ([`TaskKind`]). Definitions are what the queue
//! persists; the behavior bound to each variant lives in `task-client`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use task_types::{
    BlobId, ContactDelta, GroupIdentity, Identity, IncomingMessage, MessageId, Nonce, Receiver,
    ReflectEnvelope, ReflectId,
};
use uuid::Uuid;

use crate::codec::CodecError;
use crate::snapshot::{ProfileSnapshot, SettingsSnapshot};

/// Application message type codes used by the built-in outgoing tasks.
pub mod message_type {
    /// Text message.
    pub const TEXT: u8 = 0x01;
    /// File message.
    pub const FILE: u8 = 0x17;
    /// Ballot vote in a one-to-one conversation.
    pub const BALLOT_VOTE: u8 = 0x16;
    /// Ballot vote in a group.
    pub const GROUP_BALLOT_VOTE: u8 = 0x44;
    /// Group setup (member list; empty list dissolves the group).
    pub const GROUP_SETUP: u8 = 0x4a;
    /// Group rename.
    pub const GROUP_RENAME: u8 = 0x4b;
    /// Member leaves the group.
    pub const GROUP_LEAVE: u8 = 0x4c;
    /// Group photo set.
    pub const GROUP_SET_PHOTO: u8 = 0x50;
    /// Group photo removed.
    pub const GROUP_DELETE_PHOTO: u8 = 0x54;
    /// Delivery receipt in a one-to-one conversation.
    pub const DELIVERY_RECEIPT: u8 = 0x80;
    /// Delivery receipt in a group.
    pub const GROUP_DELIVERY_RECEIPT: u8 = 0x81;
}

/// Lifecycle state of a task definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting in the queue.
    Pending,
    /// Currently running.
    Executing,
    /// Was running when the queue stopped; runs again on the next spool.
    Interrupted,
    /// Completed.
    Done,
    /// Completed with an error.
    Failed,
}

/// Bookkeeping shared by every task variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Unique id, stable across restarts.
    pub id: Uuid,
    /// Survives a process restart while pending.
    pub is_persistent: bool,
    /// Eligible for automatic retry.
    pub retry: bool,
    /// Number of retries performed so far.
    pub retry_count: u32,
    /// Lifecycle state.
    pub state: TaskState,
    /// Nonces generated during the current execution, keyed by receiver.
    ///
    /// Working memory of a running execution. Never persisted, so a decoded
    /// definition always starts empty.
    #[serde(skip)]
    pub nonces: BTreeMap<Identity, Nonce>,
}

impl TaskMeta {
    /// Persistent, not retried, pending.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            is_persistent: true,
            retry: false,
            retry_count: 0,
            state: TaskState::Pending,
            nonces: BTreeMap::new(),
        }
    }
}

impl Default for TaskMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Send a message to a contact or fan it out to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageTask {
    /// Message id.
    pub message_id: MessageId,
    /// Conversation.
    pub receiver: Receiver,
    /// Group members at the time the message was created, in order.
    pub to_members: Vec<Identity>,
    /// Application message type code.
    pub message_type: u8,
    /// Opaque message body.
    pub body: Vec<u8>,
    /// Unix timestamp (milliseconds) of creation.
    pub created_at: u64,
    /// The body references uploaded content.
    pub requires_blob: bool,
    /// Uploaded content, `None` until the upload finished.
    pub blob_id: Option<BlobId>,
    /// Receivers the relay already accepted the message for.
    pub message_already_sent_to: BTreeMap<Identity, Nonce>,
}

/// One choice of a ballot vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotChoice {
    /// Choice id within the ballot.
    pub choice_id: u32,
    /// Whether the choice is selected.
    pub selected: bool,
}

/// Send a vote for a ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBallotVoteTask {
    /// Id of the vote message.
    pub message_id: MessageId,
    /// Creator of the ballot.
    pub ballot_creator: Identity,
    /// Ballot id.
    pub ballot_id: [u8; 8],
    /// Conversation.
    pub receiver: Receiver,
    /// Group members, in order.
    pub to_members: Vec<Identity>,
    /// The vote.
    pub choices: Vec<BallotChoice>,
    /// Unix timestamp (milliseconds) of creation.
    pub created_at: u64,
    /// Receivers the relay already accepted the vote for.
    pub message_already_sent_to: BTreeMap<Identity, Nonce>,
}

/// Kind of delivery receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptType {
    /// Message arrived.
    Received,
    /// Message was read.
    Read,
    /// User reacted with agreement.
    Acknowledged,
    /// User reacted with disagreement.
    Declined,
}

/// Send delivery receipts for received messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDeliveryReceiptsTask {
    /// Id of the receipt message.
    pub message_id: MessageId,
    /// Receipt kind.
    pub receipt_type: ReceiptType,
    /// Messages the receipt refers to, in order.
    pub receipt_message_ids: Vec<MessageId>,
    /// Conversation.
    pub receiver: Receiver,
    /// Group members, in order.
    pub to_members: Vec<Identity>,
    /// Unix timestamp (milliseconds) of creation.
    pub created_at: u64,
    /// Receivers the relay already accepted the receipt for.
    pub message_already_sent_to: BTreeMap<Identity, Nonce>,
}

/// Group control operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupAction {
    /// Creator dissolves the group.
    Dissolve,
    /// Member leaves the group.
    Leave,
    /// Creator renames the group.
    Rename {
        /// New name.
        name: String,
    },
    /// Creator sets the group photo.
    SetPhoto {
        /// Uploaded photo, `None` until the upload finished.
        blob_id: Option<BlobId>,
        /// Photo size in bytes.
        size: u32,
    },
    /// Creator removes the group photo.
    DeletePhoto,
}

impl GroupAction {
    fn discriminant(&self) -> &'static str {
        match self {
            GroupAction::Dissolve => "group_dissolve",
            GroupAction::Leave => "group_leave",
            GroupAction::Rename { .. } => "group_rename",
            GroupAction::SetPhoto { .. } => "group_set_photo",
            GroupAction::DeletePhoto => "group_delete_photo",
        }
    }
}

/// Send a group control message to the members of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupControlTask {
    /// Id of the control message.
    pub message_id: MessageId,
    /// Target group.
    pub group: GroupIdentity,
    /// Members to notify, in order.
    pub to_members: Vec<Identity>,
    /// Operation.
    pub action: GroupAction,
    /// Unix timestamp (milliseconds) of creation.
    pub created_at: u64,
    /// Receivers the relay already accepted the message for.
    pub message_already_sent_to: BTreeMap<Identity, Nonce>,
}

/// Process a message delivered by the chat relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveMessageTask {
    /// The delivered message.
    pub message: IncomingMessage,
}

/// Process an envelope reflected by a sibling device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveReflectedTask {
    /// Id to acknowledge to the mediator.
    pub reflect_id: ReflectId,
    /// Mediator timestamp (milliseconds).
    pub timestamp: u64,
    /// The reflected payload.
    pub envelope: ReflectEnvelope,
}

/// Tell sibling devices that incoming messages were read here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectIncomingUpdateTask {
    /// Conversation of the messages.
    pub conversation: Receiver,
    /// Messages marked as read, in order.
    pub message_ids: Vec<MessageId>,
    /// Unix timestamp (milliseconds) of reading.
    pub read_at: u64,
}

/// Synchronize the user profile to the desired snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSyncTask {
    /// Profile after the sync.
    pub profile: ProfileSnapshot,
}

/// Synchronize settings to the desired snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSyncTask {
    /// Settings after the sync.
    pub settings: SettingsSnapshot,
}

/// Reflect created or modified contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateContactSyncTask {
    /// Contact changes, in order.
    pub delta_sync_contacts: Vec<ContactDelta>,
}

/// Reflect deleted contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteContactSyncTask {
    /// Deleted contacts, in order.
    pub contacts: Vec<Identity>,
}

/// Variant payload of a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Send a message.
    SendMessage(SendMessageTask),
    /// Send a ballot vote.
    SendBallotVote(SendBallotVoteTask),
    /// Send delivery receipts.
    SendDeliveryReceipts(SendDeliveryReceiptsTask),
    /// Group control message (dissolve, leave, rename, photo).
    GroupControl(GroupControlTask),
    /// Receive a message from the chat relay.
    ReceiveMessage(ReceiveMessageTask),
    /// Receive a reflection from a sibling device.
    ReceiveReflected(ReceiveReflectedTask),
    /// Reflect read state of incoming messages.
    ReflectIncomingUpdate(ReflectIncomingUpdateTask),
    /// Profile sync transaction.
    ProfileSync(ProfileSyncTask),
    /// Settings sync transaction.
    SettingsSync(SettingsSyncTask),
    /// Contact update sync transaction.
    UpdateContactSync(UpdateContactSyncTask),
    /// Contact delete sync transaction.
    DeleteContactSync(DeleteContactSyncTask),
}

/// Every persisted discriminant, in declaration order.
pub const TASK_KINDS: &[&str] = &[
    "send_message",
    "send_ballot_vote",
    "send_delivery_receipts",
    "group_dissolve",
    "group_leave",
    "group_rename",
    "group_set_photo",
    "group_delete_photo",
    "receive_message",
    "receive_reflected_message",
    "reflect_incoming_message_update",
    "profile_sync",
    "settings_sync",
    "update_contact_sync",
    "delete_contact_sync",
];

impl TaskKind {
    /// Persisted discriminant of this variant.
    pub fn discriminant(&self) -> &'static str {
        match self {
            TaskKind::SendMessage(_) => "send_message",
            TaskKind::SendBallotVote(_) => "send_ballot_vote",
            TaskKind::SendDeliveryReceipts(_) => "send_delivery_receipts",
            TaskKind::GroupControl(task) => task.action.discriminant(),
            TaskKind::ReceiveMessage(_) => "receive_message",
            TaskKind::ReceiveReflected(_) => "receive_reflected_message",
            TaskKind::ReflectIncomingUpdate(_) => "reflect_incoming_message_update",
            TaskKind::ProfileSync(_) => "profile_sync",
            TaskKind::SettingsSync(_) => "settings_sync",
            TaskKind::UpdateContactSync(_) => "update_contact_sync",
            TaskKind::DeleteContactSync(_) => "delete_contact_sync",
        }
    }

    /// Work that originates from the relay or the mediator rather than the user.
    pub fn is_incoming(&self) -> bool {
        matches!(
            self,
            TaskKind::ReceiveMessage(_) | TaskKind::ReceiveReflected(_)
        )
    }

    /// The already-sent map of outgoing variants.
    pub fn message_already_sent_to(&self) -> Option<&BTreeMap<Identity, Nonce>> {
        match self {
            TaskKind::SendMessage(task) => Some(&task.message_already_sent_to),
            TaskKind::SendBallotVote(task) => Some(&task.message_already_sent_to),
            TaskKind::SendDeliveryReceipts(task) => Some(&task.message_already_sent_to),
            TaskKind::GroupControl(task) => Some(&task.message_already_sent_to),
            _ => None,
        }
    }
}

/// A unit of work waiting in the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Shared bookkeeping.
    pub meta: TaskMeta,
    /// Variant payload.
    pub kind: TaskKind,
}

impl TaskDefinition {
    /// Create a persistent, non-retried definition.
    pub fn new(kind: TaskKind) -> Self {
        Self {
            meta: TaskMeta::new(),
            kind,
        }
    }

    /// Set automatic-retry eligibility.
    pub fn with_retry(mut self, retry: bool) -> Self {
        self.meta.retry = retry;
        self
    }

    /// Mark as best-effort; lost on restart.
    pub fn non_persistent(mut self) -> Self {
        self.meta.is_persistent = false;
        self
    }

    /// Persisted discriminant.
    pub fn discriminant(&self) -> &'static str {
        self.kind.discriminant()
    }
}

impl fmt::Display for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.kind.discriminant(), self.meta.id)
    }
}

#[derive(Serialize)]
struct BallotVoteBody<'a> {
    creator: &'a Identity,
    ballot_id: &'a [u8; 8],
    choices: &'a [BallotChoice],
}

#[derive(Serialize)]
struct ReceiptBody<'a> {
    receipt_type: ReceiptType,
    message_ids: &'a [MessageId],
}

#[derive(Serialize)]
struct GroupControlBody<'a> {
    group: &'a GroupIdentity,
    action: &'a GroupAction,
    members: &'a [Identity],
}

fn encode_body<T: Serialize>(body: &T) -> Result<Vec<u8>, CodecError> {
    rmp_serde::to_vec(body).map_err(CodecError::Encode)
}

impl SendBallotVoteTask {
    /// Message type code and body of the vote message.
    pub fn message(&self) -> Result<(u8, Vec<u8>), CodecError> {
        let code = if self.receiver.is_group() {
            message_type::GROUP_BALLOT_VOTE
        } else {
            message_type::BALLOT_VOTE
        };
        let body = encode_body(&BallotVoteBody {
            creator: &self.ballot_creator,
            ballot_id: &self.ballot_id,
            choices: &self.choices,
        })?;
        Ok((code, body))
    }
}

impl SendDeliveryReceiptsTask {
    /// Message type code and body of the receipt message.
    pub fn message(&self) -> Result<(u8, Vec<u8>), CodecError> {
        let code = if self.receiver.is_group() {
            message_type::GROUP_DELIVERY_RECEIPT
        } else {
            message_type::DELIVERY_RECEIPT
        };
        let body = encode_body(&ReceiptBody {
            receipt_type: self.receipt_type,
            message_ids: &self.receipt_message_ids,
        })?;
        Ok((code, body))
    }
}

impl GroupControlTask {
    /// Message type code and body of the control message.
    ///
    /// A dissolve is a group setup with an empty member list.
    pub fn message(&self) -> Result<(u8, Vec<u8>), CodecError> {
        let code = match self.action {
            GroupAction::Dissolve => message_type::GROUP_SETUP,
            GroupAction::Leave => message_type::GROUP_LEAVE,
            GroupAction::Rename { .. } => message_type::GROUP_RENAME,
            GroupAction::SetPhoto { .. } => message_type::GROUP_SET_PHOTO,
            GroupAction::DeletePhoto => message_type::GROUP_DELETE_PHOTO,
        };
        let members: &[Identity] = match self.action {
            GroupAction::Dissolve => &[],
            _ => &self.to_members,
        };
        let body = encode_body(&GroupControlBody {
            group: &self.group,
            action: &self.action,
            members,
        })?;
        Ok((code, body))
    }
}
