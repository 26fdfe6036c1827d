//! Error types for relaytask wire handling.

use thiserror::Error;

/// Errors that can occur while encoding, decoding or validating wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Invalid transaction scope discriminator
    #[error("invalid transaction scope: {0}")]
    InvalidScope(u8),

    /// Identity string is not 8 characters of `[A-Z0-9*]`
    #[error("invalid identity: {0:?}")]
    InvalidIdentity(String),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Frame written by a different protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),
}
