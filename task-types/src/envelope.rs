//! Reflect envelopes - the payloads copied to sibling devices via the mediator.
//!
//! The mediator treats these as opaque. Each envelope describes either a
//! message the local device sent or received, or a change to state that all
//! linked devices share (profile, settings, contacts).

use serde::{Deserialize, Serialize};

use crate::{BlobId, Identity, MessageId, Receiver, WireError};

/// Named scope of a mediator transaction lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionScope {
    /// The user's own profile (nickname, picture, linked email/phone).
    UserProfileSync = 0,
    /// Contact list changes.
    ContactSync = 1,
    /// Group changes.
    GroupSync = 2,
    /// Distribution list changes.
    DistributionListSync = 3,
    /// Application settings.
    SettingsSync = 4,
    /// Managed device parameters.
    MdmParameterSync = 5,
    /// A new device joining the device group.
    NewDeviceSync = 6,
}

impl TryFrom<u8> for TransactionScope {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TransactionScope::UserProfileSync),
            1 => Ok(TransactionScope::ContactSync),
            2 => Ok(TransactionScope::GroupSync),
            3 => Ok(TransactionScope::DistributionListSync),
            4 => Ok(TransactionScope::SettingsSync),
            5 => Ok(TransactionScope::MdmParameterSync),
            6 => Ok(TransactionScope::NewDeviceSync),
            _ => Err(WireError::InvalidScope(value)),
        }
    }
}

impl std::fmt::Display for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionScope::UserProfileSync => "user_profile_sync",
            TransactionScope::ContactSync => "contact_sync",
            TransactionScope::GroupSync => "group_sync",
            TransactionScope::DistributionListSync => "distribution_list_sync",
            TransactionScope::SettingsSync => "settings_sync",
            TransactionScope::MdmParameterSync => "mdm_parameter_sync",
            TransactionScope::NewDeviceSync => "new_device_sync",
        };
        f.write_str(name)
    }
}

/// Update to the profile picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PictureUpdate {
    /// Replace with the uploaded blob.
    Set(BlobId),
    /// Remove the picture.
    Remove,
}

/// Fields of the user profile that changed. `None` means unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDelta {
    /// New nickname.
    pub nickname: Option<String>,
    /// New profile picture.
    pub profile_picture: Option<PictureUpdate>,
    /// New linked email; empty string unlinks.
    pub linked_email: Option<String>,
    /// New linked phone number; empty string unlinks.
    pub linked_phone: Option<String>,
}

impl ProfileDelta {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.nickname.is_none()
            && self.profile_picture.is_none()
            && self.linked_email.is_none()
            && self.linked_phone.is_none()
    }
}

/// Settings that changed. `None` means unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsDelta {
    /// Send read receipts.
    pub read_receipts: Option<bool>,
    /// Send typing indicators.
    pub typing_indicators: Option<bool>,
    /// Drop messages from unknown identities.
    pub block_unknown: Option<bool>,
    /// Synchronize the address book.
    pub sync_contacts: Option<bool>,
    /// Allow calls.
    pub allow_calls: Option<bool>,
    /// Full replacement of the block list.
    pub blocked_identities: Option<Vec<Identity>>,
    /// Full replacement of the list of identities excluded from sync.
    pub excluded_from_sync: Option<Vec<Identity>>,
}

impl SettingsDelta {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.read_receipts.is_none()
            && self.typing_indicators.is_none()
            && self.block_unknown.is_none()
            && self.sync_contacts.is_none()
            && self.allow_calls.is_none()
            && self.blocked_identities.is_none()
            && self.excluded_from_sync.is_none()
    }
}

/// A contact created or modified on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDelta {
    /// The contact.
    pub identity: Identity,
    /// Public key, present when the contact is new.
    pub public_key: Option<[u8; 32]>,
    /// First name.
    pub first_name: Option<String>,
    /// Last name.
    pub last_name: Option<String>,
    /// Nickname chosen by the contact.
    pub nickname: Option<String>,
    /// Verification level (0 = unverified, 2 = fully verified).
    pub verification_level: Option<u8>,
}

impl ContactDelta {
    /// A delta that touches nothing but names the contact.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            public_key: None,
            first_name: None,
            last_name: None,
            nickname: None,
            verification_level: None,
        }
    }
}

/// Payload reflected to the other devices in the device group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReflectEnvelope {
    /// A message this device is about to send.
    OutgoingMessage {
        /// Message id.
        message_id: MessageId,
        /// Conversation the message belongs to.
        receiver: Receiver,
        /// Application message type code.
        message_type: u8,
        /// Opaque message body.
        body: Vec<u8>,
        /// Unix timestamp (milliseconds) of creation.
        created_at: u64,
    },
    /// The message was delivered to the chat relay for all receivers.
    OutgoingMessageSent {
        /// Message id.
        message_id: MessageId,
        /// Conversation the message belongs to.
        receiver: Receiver,
    },
    /// A message this device received from the chat relay.
    IncomingMessage {
        /// Message id.
        message_id: MessageId,
        /// Sender identity.
        sender: Identity,
        /// Application message type code.
        message_type: u8,
        /// Opaque message body.
        body: Vec<u8>,
        /// Unix timestamp (milliseconds) set by the sender.
        created_at: u64,
    },
    /// Incoming messages of one conversation were read on this device.
    IncomingMessageUpdate {
        /// Conversation of the messages.
        conversation: Receiver,
        /// Messages marked as read.
        message_ids: Vec<MessageId>,
        /// Unix timestamp (milliseconds) of reading.
        read_at: u64,
    },
    /// Profile change.
    UserProfileSync(ProfileDelta),
    /// Settings change.
    SettingsSync(SettingsDelta),
    /// Contact created or updated.
    ContactSyncUpdate(ContactDelta),
    /// Contact deleted.
    ContactSyncDelete {
        /// Deleted contact.
        identity: Identity,
    },
}

impl ReflectEnvelope {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ReflectEnvelope::OutgoingMessage { .. } => "outgoing_message",
            ReflectEnvelope::OutgoingMessageSent { .. } => "outgoing_message_sent",
            ReflectEnvelope::IncomingMessage { .. } => "incoming_message",
            ReflectEnvelope::IncomingMessageUpdate { .. } => "incoming_message_update",
            ReflectEnvelope::UserProfileSync(_) => "user_profile_sync",
            ReflectEnvelope::SettingsSync(_) => "settings_sync",
            ReflectEnvelope::ContactSyncUpdate(_) => "contact_sync_update",
            ReflectEnvelope::ContactSyncDelete { .. } => "contact_sync_delete",
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}
