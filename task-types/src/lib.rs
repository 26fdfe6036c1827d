//! # task-types
//!
//! Wire types shared by every relaytask crate.
//!
//! This crate provides:
//! - [`Identity`], [`GroupId`], [`GroupIdentity`], [`MessageId`], [`Nonce`],
//!   [`ReflectId`], [`BlobId`] - identity and correlation types
//! - [`ChatFrame`] - frames exchanged with the store-and-forward chat relay
//! - [`MediatorFrame`] - frames exchanged with the multi-device mediator
//! - [`ReflectEnvelope`] - payloads reflected to sibling devices
//! - [`WireError`] - error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;

pub use envelope::{
    ContactDelta, PictureUpdate, ProfileDelta, ReflectEnvelope, SettingsDelta, TransactionScope,
};
pub use error::WireError;
pub use ids::{
    BlobId, GroupId, GroupIdentity, Identity, MessageId, Nonce, Receiver, ReflectId, IDENTITY_LEN,
    NONCE_LEN,
};
pub use messages::{
    ChatFrame, IncomingMessage, MediatorFrame, OutgoingMessage, PROTOCOL_VERSION,
};
