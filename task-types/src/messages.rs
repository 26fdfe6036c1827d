//! Protocol frames for the chat relay and the mediator.
//!
//! Encryption happens below this layer; payloads here are already opaque.

use serde::{Deserialize, Serialize};

use crate::{Identity, MessageId, Nonce, ReflectEnvelope, ReflectId, TransactionScope, WireError};

/// Current frame protocol version.
///
/// Every frame starts with this byte, followed by the MessagePack body.
pub const PROTOCOL_VERSION: u8 = 1;

fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>, WireError> {
    let mut bytes = vec![PROTOCOL_VERSION];
    rmp_serde::encode::write(&mut bytes, frame).map_err(WireError::Serialization)?;
    Ok(bytes)
}

fn decode_frame<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T, WireError> {
    match bytes.split_first() {
        Some((&PROTOCOL_VERSION, body)) => {
            rmp_serde::from_slice(body).map_err(WireError::Deserialization)
        }
        Some((&version, _)) => Err(WireError::UnsupportedVersion(version)),
        None => Err(WireError::InvalidData("empty frame".into())),
    }
}

/// An end-to-end encrypted message handed to the chat relay.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Message id, shared by all receivers of a group fan-out.
    pub message_id: MessageId,
    /// Sending identity.
    pub sender: Identity,
    /// Receiving identity.
    pub receiver: Identity,
    /// Nonce used to encrypt `payload` for this receiver.
    pub nonce: Nonce,
    /// Application message type code.
    pub message_type: u8,
    /// Encrypted payload (opaque to the relay).
    pub payload: Vec<u8>,
    /// Unix timestamp (milliseconds) of creation.
    pub created_at: u64,
}

impl std::fmt::Debug for OutgoingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingMessage")
            .field("message_id", &self.message_id)
            .field("sender", &self.sender)
            .field("receiver", &self.receiver)
            .field("message_type", &self.message_type)
            .field(
                "payload",
                &format!("[{} bytes REDACTED]", self.payload.len()),
            )
            .finish()
    }
}

/// A message delivered by the chat relay.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Message id chosen by the sender.
    pub message_id: MessageId,
    /// Sending identity.
    pub sender: Identity,
    /// Receiving identity (this device's identity).
    pub receiver: Identity,
    /// Nonce the payload was encrypted with.
    pub nonce: Nonce,
    /// Application message type code.
    pub message_type: u8,
    /// Encrypted payload.
    pub payload: Vec<u8>,
    /// Unix timestamp (milliseconds) set by the sender.
    pub created_at: u64,
}

impl std::fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("message_id", &self.message_id)
            .field("sender", &self.sender)
            .field("message_type", &self.message_type)
            .field(
                "payload",
                &format!("[{} bytes REDACTED]", self.payload.len()),
            )
            .finish()
    }
}

/// Frames exchanged with the store-and-forward chat relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatFrame {
    /// Client sends a message.
    Outgoing(OutgoingMessage),
    /// Relay stored an outgoing message.
    OutgoingAck {
        /// Acknowledged message.
        message_id: MessageId,
        /// Receiver it was stored for.
        receiver: Identity,
    },
    /// Relay delivers a message.
    Incoming(IncomingMessage),
    /// Client confirms receipt so the relay can delete its copy.
    IncomingAck {
        /// Received message.
        message_id: MessageId,
        /// Its sender.
        sender: Identity,
    },
    /// Client finished processing the delivery slot of a message.
    ProcessingComplete {
        /// Processed message.
        message_id: MessageId,
    },
}

impl ChatFrame {
    /// Serialize to a versioned MessagePack frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        encode_frame(self)
    }

    /// Deserialize a versioned MessagePack frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        decode_frame(bytes)
    }
}

/// Frames exchanged with the mediator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediatorFrame {
    /// Client reflects an envelope to its sibling devices.
    Reflect {
        /// Correlation id echoed by `ReflectAck`.
        reflect_id: ReflectId,
        /// The reflected payload.
        envelope: ReflectEnvelope,
    },
    /// Mediator stored a reflection.
    ReflectAck {
        /// Correlation id of the `Reflect`.
        reflect_id: ReflectId,
        /// Mediator timestamp (milliseconds).
        timestamp: u64,
    },
    /// Mediator delivers an envelope reflected by a sibling device.
    Reflected {
        /// Id to echo in `ReflectedAck`.
        reflect_id: ReflectId,
        /// Mediator timestamp (milliseconds).
        timestamp: u64,
        /// The reflected payload.
        envelope: ReflectEnvelope,
    },
    /// Client processed a reflected envelope.
    ReflectedAck {
        /// Id of the `Reflected` frame.
        reflect_id: ReflectId,
    },
    /// Client requests the transaction lock for a scope.
    Lock {
        /// Scope to lock.
        scope: TransactionScope,
        /// Seconds until the mediator releases the lock by itself.
        ttl_secs: u32,
    },
    /// Lock granted.
    LockAck,
    /// Client releases the transaction lock.
    Unlock,
    /// Lock released.
    UnlockAck,
    /// Lock refused because another transaction is running.
    TransactionRejected {
        /// Scope of the running transaction.
        in_progress: TransactionScope,
        /// Whether the running transaction belongs to this device.
        own_device: bool,
    },
    /// A transaction of some device ended; a new lock attempt may succeed.
    TransactionEnded {
        /// Scope of the ended transaction.
        scope: TransactionScope,
    },
    /// All reflections queued while offline have been delivered.
    ReflectionQueueDry,
}

impl MediatorFrame {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            MediatorFrame::Reflect { .. } => "reflect",
            MediatorFrame::ReflectAck { .. } => "reflect_ack",
            MediatorFrame::Reflected { .. } => "reflected",
            MediatorFrame::ReflectedAck { .. } => "reflected_ack",
            MediatorFrame::Lock { .. } => "lock",
            MediatorFrame::LockAck => "lock_ack",
            MediatorFrame::Unlock => "unlock",
            MediatorFrame::UnlockAck => "unlock_ack",
            MediatorFrame::TransactionRejected { .. } => "transaction_rejected",
            MediatorFrame::TransactionEnded { .. } => "transaction_ended",
            MediatorFrame::ReflectionQueueDry => "reflection_queue_dry",
        }
    }

    /// Serialize to a versioned MessagePack frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        encode_frame(self)
    }

    /// Deserialize a versioned MessagePack frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        decode_frame(bytes)
    }
}
