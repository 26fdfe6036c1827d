//! Error types for relaytask-client.

use task_core::{CodecError, QueueError};
use task_types::{Identity, MessageId, ReflectId, TransactionScope, WireError};

use crate::context::RepositoryError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Outcome of the lock → reflect → unlock protocol other than success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    /// Nothing changed; no transaction was needed.
    #[error("nothing to synchronize")]
    ShouldSkip,

    /// The mediator did not answer a lock or unlock request in time.
    #[error("transaction lock timed out")]
    LockTimeout,

    /// The mediator answered with an unexpected frame.
    #[error("unexpected mediator response: expected {expected}, got {actual}")]
    BadResponse {
        /// Frame the client waited for.
        expected: &'static str,
        /// Frame that arrived.
        actual: &'static str,
    },

    /// A transaction of the same scope is running on some device.
    #[error("{scope} transaction already in progress")]
    SameTransactionInProgress {
        /// Scope of the running transaction.
        scope: TransactionScope,
    },

    /// A transaction of another scope is running on some device.
    #[error("other transaction in progress: {scope}")]
    OtherTransactionInProgress {
        /// Scope of the running transaction.
        scope: TransactionScope,
    },
}

/// Result of running one task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Intentionally skipped; not a failure.
    #[error("task dropped")]
    Dropped,

    /// Transaction protocol error.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Receiver is marked invalid.
    #[error("invalid contact: {identity}")]
    InvalidContact {
        /// The receiver.
        identity: Identity,
    },

    /// Receiver is blocked, unknown, or the local identity.
    #[error("receiver blocked or unknown: {identity}")]
    ReceiverBlockedOrUnknown {
        /// The receiver.
        identity: Identity,
    },

    /// Required data (blob, photo, receipt ids) is missing.
    #[error("missing data: {0}")]
    MissingData(&'static str),

    /// Task encoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Frame encoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Endpoint not connected.
    #[error("not connected")]
    NotConnected,

    /// Multi-device is enabled but this device is not registered.
    #[error("multi-device enabled but device not registered")]
    MultiDeviceNotRegistered,

    /// An incoming message could not be processed now.
    #[error("processing of message {message_id} failed")]
    ProcessingFailed {
        /// The message.
        message_id: MessageId,
    },

    /// The mediator did not acknowledge a reflection in time.
    #[error("reflect {reflect_id} not acknowledged")]
    ReflectTimeout {
        /// Correlation id of the reflection.
        reflect_id: ReflectId,
    },

    /// The relay did not acknowledge a message in time.
    #[error("message {message_id} to {receiver} not acknowledged")]
    SendTimeout {
        /// The message.
        message_id: MessageId,
        /// Its receiver.
        receiver: Identity,
    },

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Entity repository error.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// The task was removed from the queue before it completed.
    #[error("task removed before completion")]
    Removed,
}

/// What the task manager does with a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Complete as success.
    Success,
    /// Complete with the error; never retried.
    Fatal,
    /// Connection or registration missing; wait for the next spool.
    Precondition,
    /// Transient; retried under the retry policy.
    Retryable,
}

impl TaskError {
    /// How the task manager treats this error.
    pub fn disposition(&self) -> Disposition {
        match self {
            TaskError::Dropped | TaskError::Transaction(TransactionError::ShouldSkip) => {
                Disposition::Success
            }
            TaskError::InvalidContact { .. }
            | TaskError::ReceiverBlockedOrUnknown { .. }
            | TaskError::MissingData(_)
            | TaskError::Codec(_)
            | TaskError::Wire(_)
            | TaskError::Removed => Disposition::Fatal,
            TaskError::NotConnected | TaskError::MultiDeviceNotRegistered => {
                Disposition::Precondition
            }
            TaskError::Transaction(_)
            | TaskError::ProcessingFailed { .. }
            | TaskError::ReflectTimeout { .. }
            | TaskError::SendTimeout { .. }
            | TaskError::Transport(_)
            | TaskError::Repository(_) => Disposition::Retryable,
        }
    }
}

/// Task manager errors.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Enqueue before the persisted queue was loaded.
    #[error("task queue not loaded")]
    NotLoaded,

    /// Queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Task store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Task encoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    #[test]
    fn skipped_outcomes_count_as_success() {
        assert_eq!(TaskError::Dropped.disposition(), Disposition::Success);
        assert_eq!(
            TaskError::from(TransactionError::ShouldSkip).disposition(),
            Disposition::Success
        );
    }

    #[test]
    fn data_errors_are_fatal() {
        let fatal = [
            TaskError::InvalidContact {
                identity: identity("AAAAAAAA"),
            },
            TaskError::ReceiverBlockedOrUnknown {
                identity: identity("AAAAAAAA"),
            },
            TaskError::MissingData("blob id"),
            TaskError::Codec(CodecError::UnknownKind("bogus".into())),
        ];
        for error in fatal {
            assert_eq!(error.disposition(), Disposition::Fatal, "{}", error);
        }
    }

    #[test]
    fn connection_errors_wait_for_reconnect() {
        assert_eq!(TaskError::NotConnected.disposition(), Disposition::Precondition);
        assert_eq!(
            TaskError::MultiDeviceNotRegistered.disposition(),
            Disposition::Precondition
        );
    }

    #[test]
    fn protocol_errors_are_retryable() {
        let retryable = [
            TaskError::from(TransactionError::LockTimeout),
            TaskError::from(TransactionError::BadResponse {
                expected: "lock_ack",
                actual: "unlock_ack",
            }),
            TaskError::from(TransactionError::SameTransactionInProgress {
                scope: TransactionScope::UserProfileSync,
            }),
            TaskError::ProcessingFailed {
                message_id: MessageId::random(),
            },
            TaskError::ReflectTimeout {
                reflect_id: ReflectId::new(1),
            },
            TaskError::Transport(TransportError::ConnectionClosed),
        ];
        for error in retryable {
            assert_eq!(error.disposition(), Disposition::Retryable, "{}", error);
        }
    }

    #[test]
    fn error_messages() {
        let error = TaskError::from(TransactionError::OtherTransactionInProgress {
            scope: TransactionScope::ContactSync,
        });
        assert_eq!(
            error.to_string(),
            "transaction error: other transaction in progress: contact_sync"
        );
    }
}
