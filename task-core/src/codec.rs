//! Persisted encoding of task definitions.
//!
//! Each definition is stored as a [`TaskRecord`]: the variant discriminant,
//! a format version, and the MessagePack encoding of the whole definition.
//! Decoding checks the discriminant before touching the body so an
//! unrecognized or mismatched record fails loudly instead of defaulting.

use serde::{Deserialize, Serialize};

use crate::definition::{TaskDefinition, TASK_KINDS};

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

/// Errors from encoding or decoding persisted tasks.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// MessagePack serialization failed.
    #[error("task encoding failed: {0}")]
    Encode(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed.
    #[error("task decoding failed: {0}")]
    Decode(#[source] rmp_serde::decode::Error),

    /// The record names a task kind this build does not know.
    #[error("unknown task kind: {0}")]
    UnknownKind(String),

    /// The record was written by an incompatible version.
    #[error("unsupported task record version: {0}")]
    UnsupportedVersion(u8),

    /// The record discriminant disagrees with the decoded body.
    #[error("task kind mismatch: record says {record}, body is {body}")]
    KindMismatch {
        /// Discriminant stored in the record.
        record: String,
        /// Discriminant of the decoded body.
        body: String,
    },
}

/// Envelope stored for each persisted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Variant discriminant.
    pub kind: String,
    /// Record format version.
    pub version: u8,
    /// MessagePack encoding of the definition.
    pub definition: Vec<u8>,
}

impl TaskRecord {
    /// Parse only the record envelope, without decoding the definition.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        rmp_serde::from_slice(bytes).map_err(CodecError::Decode)
    }
}

/// Encode a definition for the task store.
pub fn encode_task(definition: &TaskDefinition) -> Result<Vec<u8>, CodecError> {
    let body = rmp_serde::to_vec_named(definition).map_err(CodecError::Encode)?;
    let record = TaskRecord {
        kind: definition.discriminant().to_string(),
        version: RECORD_VERSION,
        definition: body,
    };
    rmp_serde::to_vec_named(&record).map_err(CodecError::Encode)
}

/// Decode a definition from the task store.
///
/// The returned definition never carries nonces.
pub fn decode_task(bytes: &[u8]) -> Result<TaskDefinition, CodecError> {
    let record = TaskRecord::from_bytes(bytes)?;
    if record.version != RECORD_VERSION {
        return Err(CodecError::UnsupportedVersion(record.version));
    }
    if !TASK_KINDS.contains(&record.kind.as_str()) {
        return Err(CodecError::UnknownKind(record.kind));
    }

    let definition: TaskDefinition =
        rmp_serde::from_slice(&record.definition).map_err(CodecError::Decode)?;
    if definition.discriminant() != record.kind {
        return Err(CodecError::KindMismatch {
            record: record.kind,
            body: definition.discriminant().to_string(),
        });
    }
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::*;
    use crate::snapshot::{ProfileSnapshot, SettingsSnapshot};
    use std::collections::BTreeMap;
    use task_types::{
        BlobId, ContactDelta, GroupId, GroupIdentity, Identity, IncomingMessage, MessageId, Nonce,
        Receiver, ReflectEnvelope, ReflectId,
    };

    fn identity(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn group() -> GroupIdentity {
        GroupIdentity::new(GroupId::random(), identity("ECHOECHO"))
    }

    fn sent_map() -> BTreeMap<Identity, Nonce> {
        let mut map = BTreeMap::new();
        map.insert(identity("AAAAAAAA"), Nonce::random());
        map
    }

    fn every_variant() -> Vec<TaskKind> {
        let members = vec![identity("CCCCCCCC"), identity("AAAAAAAA"), identity("BBBBBBBB")];
        vec![
            TaskKind::SendMessage(SendMessageTask {
                message_id: MessageId::random(),
                receiver: Receiver::Group(group()),
                to_members: members.clone(),
                message_type: message_type::FILE,
                body: vec![1, 2, 3],
                created_at: 1_705_000_000_000,
                requires_blob: true,
                blob_id: Some(BlobId::new()),
                message_already_sent_to: sent_map(),
            }),
            TaskKind::SendBallotVote(SendBallotVoteTask {
                message_id: MessageId::random(),
                ballot_creator: identity("ECHOECHO"),
                ballot_id: [7; 8],
                receiver: Receiver::Contact(identity("AAAAAAAA")),
                to_members: vec![],
                choices: vec![BallotChoice {
                    choice_id: 2,
                    selected: true,
                }],
                created_at: 5,
                message_already_sent_to: BTreeMap::new(),
            }),
            TaskKind::SendDeliveryReceipts(SendDeliveryReceiptsTask {
                message_id: MessageId::random(),
                receipt_type: ReceiptType::Read,
                receipt_message_ids: vec![MessageId::random(), MessageId::random()],
                receiver: Receiver::Contact(identity("AAAAAAAA")),
                to_members: vec![],
                created_at: 6,
                message_already_sent_to: BTreeMap::new(),
            }),
            TaskKind::GroupControl(GroupControlTask {
                message_id: MessageId::random(),
                group: group(),
                to_members: members.clone(),
                action: GroupAction::Rename {
                    name: "Climbing".into(),
                },
                created_at: 7,
                message_already_sent_to: sent_map(),
            }),
            TaskKind::GroupControl(GroupControlTask {
                message_id: MessageId::random(),
                group: group(),
                to_members: members,
                action: GroupAction::Dissolve,
                created_at: 8,
                message_already_sent_to: BTreeMap::new(),
            }),
            TaskKind::ReceiveMessage(ReceiveMessageTask {
                message: IncomingMessage {
                    message_id: MessageId::random(),
                    sender: identity("AAAAAAAA"),
                    receiver: identity("ECHOECHO"),
                    nonce: Nonce::random(),
                    message_type: message_type::TEXT,
                    payload: vec![9; 64],
                    created_at: 9,
                },
            }),
            TaskKind::ReceiveReflected(ReceiveReflectedTask {
                reflect_id: ReflectId::new(77),
                timestamp: 10,
                envelope: ReflectEnvelope::ContactSyncDelete {
                    identity: identity("BBBBBBBB"),
                },
            }),
            TaskKind::ReflectIncomingUpdate(ReflectIncomingUpdateTask {
                conversation: Receiver::Group(group()),
                message_ids: vec![MessageId::random()],
                read_at: 11,
            }),
            TaskKind::ProfileSync(ProfileSyncTask {
                profile: ProfileSnapshot {
                    nickname: "echo".into(),
                    profile_picture: Some(BlobId::new()),
                    linked_email: Some("echo@example.com".into()),
                    linked_phone: None,
                },
            }),
            TaskKind::SettingsSync(SettingsSyncTask {
                settings: SettingsSnapshot {
                    read_receipts: false,
                    blocked_identities: vec![identity("DDDDDDDD")],
                    ..Default::default()
                },
            }),
            TaskKind::UpdateContactSync(UpdateContactSyncTask {
                delta_sync_contacts: vec![ContactDelta::new(identity("AAAAAAAA"))],
            }),
            TaskKind::DeleteContactSync(DeleteContactSyncTask {
                contacts: vec![identity("AAAAAAAA"), identity("BBBBBBBB")],
            }),
        ]
    }

    #[test]
    fn every_variant_roundtrips() {
        for kind in every_variant() {
            let mut def = TaskDefinition::new(kind).with_retry(true);
            def.meta.retry_count = 1;

            let restored = decode_task(&encode_task(&def).unwrap()).unwrap();
            assert_eq!(restored, def, "variant {}", def.discriminant());
        }
    }

    #[test]
    fn nonces_are_not_persisted() {
        let mut def = TaskDefinition::new(every_variant().remove(0));
        def.meta.nonces.insert(identity("CCCCCCCC"), Nonce::random());

        let restored = decode_task(&encode_task(&def).unwrap()).unwrap();
        assert!(restored.meta.nonces.is_empty());
        assert_eq!(restored.kind, def.kind);
    }

    #[test]
    fn large_contact_sync_preserves_order() {
        let deltas: Vec<ContactDelta> = (0..20_000u32)
            .map(|i| {
                let id = format!("{:08}", i);
                let mut delta = ContactDelta::new(identity(&id));
                delta.nickname = Some(format!("contact {}", i));
                delta
            })
            .collect();
        let def = TaskDefinition::new(TaskKind::UpdateContactSync(UpdateContactSyncTask {
            delta_sync_contacts: deltas.clone(),
        }));

        let restored = decode_task(&encode_task(&def).unwrap()).unwrap();
        match restored.kind {
            TaskKind::UpdateContactSync(task) => assert_eq!(task.delta_sync_contacts, deltas),
            other => panic!("unexpected kind {}", other.discriminant()),
        }
    }

    #[test]
    fn unknown_kind_fails_loudly() {
        let def = TaskDefinition::new(every_variant().remove(0));
        let mut record = TaskRecord::from_bytes(&encode_task(&def).unwrap()).unwrap();
        record.kind = "send_sticker".into();
        let bytes = rmp_serde::to_vec_named(&record).unwrap();

        match decode_task(&bytes) {
            Err(CodecError::UnknownKind(kind)) => assert_eq!(kind, "send_sticker"),
            other => panic!("expected UnknownKind, got {:?}", other),
        }
    }

    #[test]
    fn mismatched_kind_fails() {
        let def = TaskDefinition::new(every_variant().remove(0));
        let mut record = TaskRecord::from_bytes(&encode_task(&def).unwrap()).unwrap();
        record.kind = "profile_sync".into();
        let bytes = rmp_serde::to_vec_named(&record).unwrap();

        assert!(matches!(
            decode_task(&bytes),
            Err(CodecError::KindMismatch { .. })
        ));
    }

    #[test]
    fn future_version_fails() {
        let def = TaskDefinition::new(every_variant().remove(0));
        let mut record = TaskRecord::from_bytes(&encode_task(&def).unwrap()).unwrap();
        record.version = RECORD_VERSION + 1;
        let bytes = rmp_serde::to_vec_named(&record).unwrap();

        assert!(matches!(
            decode_task(&bytes),
            Err(CodecError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode_task(b"not a task"),
            Err(CodecError::Decode(_))
        ));
    }
}
