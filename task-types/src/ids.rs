//! Identity and correlation types for relaytask.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::WireError;

/// Length of an identity in ASCII characters.
pub const IDENTITY_LEN: usize = 8;

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    bytes
}

/// A chat identity: exactly 8 characters of `[A-Z0-9*]`.
///
/// Serialized as its string form so persisted maps keyed by identity stay
/// readable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity([u8; IDENTITY_LEN]);

impl Identity {
    /// Parse and validate an identity string.
    pub fn parse(value: &str) -> Result<Self, WireError> {
        let bytes = value.as_bytes();
        let valid = bytes.len() == IDENTITY_LEN
            && bytes
                .iter()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'*');
        if !valid {
            return Err(WireError::InvalidIdentity(value.to_string()));
        }
        let mut arr = [0u8; IDENTITY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Get the identity as a string slice.
    pub fn as_str(&self) -> &str {
        // Validated as ASCII on construction.
        std::str::from_utf8(&self.0).unwrap_or("????????")
    }

    /// Gateway identities start with `*`. They get no delivery receipts.
    pub fn is_gateway(&self) -> bool {
        self.0[0] == b'*'
    }
}

impl TryFrom<String> for Identity {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.as_str().to_string()
    }
}

impl std::str::FromStr for Identity {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.as_str())
    }
}

/// An 8-byte group identifier, unique per creator.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId([u8; 8]);

impl GroupId {
    /// Create a new random GroupId.
    pub fn random() -> Self {
        Self(random_bytes())
    }

    /// Create a GroupId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; 8]>::try_from(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this GroupId.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self)
    }
}

/// A group is identified by its id together with the identity that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupIdentity {
    /// Group id chosen by the creator.
    pub id: GroupId,
    /// Identity of the group creator.
    pub creator: Identity,
}

impl GroupIdentity {
    /// Create a new group identity.
    pub fn new(id: GroupId, creator: Identity) -> Self {
        Self { id, creator }
    }
}

impl fmt::Display for GroupIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.creator, self.id)
    }
}

/// The target of an outgoing message: a single contact or a group, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Receiver {
    /// One-to-one conversation.
    Contact(Identity),
    /// Group conversation.
    Group(GroupIdentity),
}

impl Receiver {
    /// The group identity, if this is a group receiver.
    pub fn group(&self) -> Option<&GroupIdentity> {
        match self {
            Receiver::Group(group) => Some(group),
            Receiver::Contact(_) => None,
        }
    }

    /// Whether this targets a group.
    pub fn is_group(&self) -> bool {
        matches!(self, Receiver::Group(_))
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Receiver::Contact(identity) => write!(f, "contact {}", identity),
            Receiver::Group(group) => write!(f, "group {}", group),
        }
    }
}

/// An 8-byte message identifier, displayed as hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId([u8; 8]);

impl MessageId {
    /// Create a new random MessageId.
    pub fn random() -> Self {
        Self(random_bytes())
    }

    /// Create a MessageId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; 8]>::try_from(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this MessageId.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self)
    }
}

/// Size of a nonce in bytes.
pub const NONCE_LEN: usize = 24;

/// A single-use 24-byte nonce for one encrypted send.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Generate a fresh random nonce.
    pub fn random() -> Self {
        Self(random_bytes())
    }

    /// Create a nonce from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; NONCE_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this nonce.
    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({}..)", hex::encode(&self.0[..4]))
    }
}

/// Correlation id for a reflect request and its acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReflectId(u32);

impl ReflectId {
    /// Create a new random ReflectId.
    pub fn random() -> Self {
        Self(u32::from_le_bytes(random_bytes()))
    }

    /// Create a ReflectId with the given value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the numeric value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ReflectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Identifier of an uploaded blob (file content, group photo).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobId(uuid::Uuid);

impl BlobId {
    /// Create a new random BlobId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_accepts_valid_strings() {
        let id = Identity::parse("ECHOECHO").unwrap();
        assert_eq!(id.as_str(), "ECHOECHO");
        assert_eq!(id.to_string(), "ECHOECHO");
        assert!(!id.is_gateway());

        let gateway = Identity::parse("*SUPPORT").unwrap();
        assert!(gateway.is_gateway());
    }

    #[test]
    fn identity_rejects_invalid_strings() {
        assert!(Identity::parse("SHORT").is_err());
        assert!(Identity::parse("TOOLONG99").is_err());
        assert!(Identity::parse("lowercas").is_err());
        assert!(Identity::parse("ECHO-ECH").is_err());
    }

    #[test]
    fn identity_serializes_as_string() {
        let id = Identity::parse("ABCD1234").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"ABCD1234\"");

        let restored: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, id);
    }

    #[test]
    fn identity_deserialize_validates() {
        let result: Result<Identity, _> = serde_json::from_str("\"bad\"");
        assert!(result.is_err());
    }

    #[test]
    fn identity_msgpack_roundtrip() {
        let id = Identity::parse("ZZZZ9999").unwrap();
        let bytes = rmp_serde::to_vec(&id).unwrap();
        let restored: Identity = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored, id);
    }

    #[test]
    fn group_id_hex_display() {
        let id = GroupId::from_bytes(&[0xab; 8]).unwrap();
        assert_eq!(id.to_string(), "abababababababab");
    }

    #[test]
    fn group_id_from_invalid_length_fails() {
        assert!(GroupId::from_bytes(&[0u8; 4]).is_none());
        assert!(GroupId::from_bytes(&[0u8; 16]).is_none());
    }

    #[test]
    fn group_identity_distinguishes_creator() {
        let id = GroupId::random();
        let a = GroupIdentity::new(id, Identity::parse("AAAAAAAA").unwrap());
        let b = GroupIdentity::new(id, Identity::parse("BBBBBBBB").unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn receiver_exposes_group_only_for_groups() {
        let contact = Receiver::Contact(Identity::parse("ECHOECHO").unwrap());
        assert!(contact.group().is_none());
        assert!(!contact.is_group());

        let group = GroupIdentity::new(GroupId::random(), Identity::parse("ECHOECHO").unwrap());
        let receiver = Receiver::Group(group);
        assert_eq!(receiver.group(), Some(&group));
    }

    #[test]
    fn message_id_roundtrip() {
        let original = MessageId::random();
        let restored = MessageId::from_bytes(original.as_bytes()).unwrap();
        assert_eq!(original, restored);
        assert_eq!(original.to_string().len(), 16);
    }

    #[test]
    fn random_nonces_differ() {
        assert_ne!(Nonce::random(), Nonce::random());
    }

    #[test]
    fn nonce_debug_is_truncated() {
        let nonce = Nonce::from_bytes(&[0x11; NONCE_LEN]).unwrap();
        assert_eq!(format!("{:?}", nonce), "Nonce(11111111..)");
    }

    #[test]
    fn reflect_id_display_is_fixed_width() {
        assert_eq!(ReflectId::new(0x2a).to_string(), "0000002a");
    }

    #[test]
    fn blob_id_is_uuid_v4() {
        let id = BlobId::new();
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }
}
