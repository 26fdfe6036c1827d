//! Transport abstraction for the chat relay and the mediator.
//!
//! Both endpoints are reached through the same byte-oriented trait. The
//! clients in [`crate::chat`] and [`crate::mediator`] encode frames, send
//! them, and run a reader loop over `recv()` that correlates acknowledgements
//! with outstanding requests.
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `send()` transmits one encoded frame
//! - `recv()` receives the next encoded frame
//! - `is_connected()` reports whether the connection is logged in
//!
//! Connection setup and authentication happen outside the task engine.

mod mock;

pub use mock::{FrameLog, MockMediator, MockRelay, SentFrame};

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Byte transport to one endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one encoded frame.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive the next encoded frame.
    ///
    /// Blocks until data is available or the connection closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;
}
