//! # task-core
//!
//! Pure logic for relaytask (no I/O, instant tests).
//!
//! This crate holds the task model and every decision that can be made
//! without touching the network or the disk: how a task is encoded for the
//! persisted queue, in which order tasks run, who receives a fan-out, what
//! changed between two snapshots, how long to back off before a retry, and
//! how cooperating processes hand over the connection.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (relay, mediator, task store) is performed by `task-client`,
//! which interprets the results produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod codec;
pub mod definition;
pub mod queue;
pub mod receivers;
pub mod retry;
pub mod snapshot;

pub use access::{
    merge, parse_topic, secret_prefix, topic_name, AccessAction, AccessEvent, AccessMachine,
    AccessState, ConnectionPhase, ProcessRole,
};
pub use codec::{decode_task, encode_task, CodecError, TaskRecord, RECORD_VERSION};
pub use definition::{
    message_type, BallotChoice, DeleteContactSyncTask, GroupAction, GroupControlTask,
    ProfileSyncTask, ReceiptType, ReceiveMessageTask, ReceiveReflectedTask,
    ReflectIncomingUpdateTask, SendBallotVoteTask, SendDeliveryReceiptsTask, SendMessageTask,
    SettingsSyncTask, TaskDefinition, TaskKind, TaskMeta, TaskState, UpdateContactSyncTask,
    TASK_KINDS,
};
pub use queue::{Lane, QueueError, QueuedTask, TaskQueue};
pub use receivers::{fan_out, is_note_group};
pub use retry::RetryPolicy;
pub use snapshot::{
    existing_contacts, merge_contact, pending_contact_deltas, ProfileSnapshot, SettingsSnapshot,
};
