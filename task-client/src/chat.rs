//! Chat relay client.
//!
//! Sends messages to the store-and-forward relay and waits for the relay to
//! acknowledge each one. Acknowledgements are correlated by
//! `(message id, receiver)`, since a group message goes out once per member
//! under the same id.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use task_types::{ChatFrame, Identity, IncomingMessage, MessageId, OutgoingMessage};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::TaskError;
use crate::transport::{Transport, TransportError};

/// Client side of the chat relay connection.
pub struct ChatClient {
    transport: Arc<dyn Transport>,
    pending: DashMap<(MessageId, Identity), oneshot::Sender<()>>,
    response_timeout: Duration,
}

impl ChatClient {
    /// Create a client over `transport`.
    pub fn new(transport: Arc<dyn Transport>, response_timeout: Duration) -> Self {
        Self {
            transport,
            pending: DashMap::new(),
            response_timeout,
        }
    }

    /// Whether the relay connection is up.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Send a message and wait for the relay to store it.
    pub async fn send_message(&self, message: OutgoingMessage) -> Result<(), TaskError> {
        let key = (message.message_id, message.receiver);
        let bytes = ChatFrame::Outgoing(message).to_bytes()?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(key, tx);

        if let Err(e) = self.transport.send(&bytes).await {
            self.pending.remove(&key);
            return Err(e.into());
        }

        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TaskError::Transport(TransportError::ConnectionClosed)),
            Err(_) => {
                self.pending.remove(&key);
                tracing::warn!("No relay ack for message {} to {}", key.0, key.1);
                Err(TaskError::SendTimeout {
                    message_id: key.0,
                    receiver: key.1,
                })
            }
        }
    }

    /// Confirm receipt of an incoming message.
    pub async fn ack_incoming(
        &self,
        message_id: MessageId,
        sender: Identity,
    ) -> Result<(), TaskError> {
        let bytes = ChatFrame::IncomingAck { message_id, sender }.to_bytes()?;
        self.transport.send(&bytes).await?;
        Ok(())
    }

    /// Tell the relay the delivery slot of a message is done.
    pub async fn processing_complete(&self, message_id: MessageId) -> Result<(), TaskError> {
        let bytes = ChatFrame::ProcessingComplete { message_id }.to_bytes()?;
        self.transport.send(&bytes).await?;
        Ok(())
    }

    /// Number of messages waiting for an acknowledgement.
    pub fn pending_acks(&self) -> usize {
        self.pending.len()
    }

    /// Route one inbound frame.
    ///
    /// Acknowledgements complete their waiting send. Delivered messages are
    /// returned for the caller to enqueue.
    pub fn on_frame(&self, frame: ChatFrame) -> Option<IncomingMessage> {
        match frame {
            ChatFrame::OutgoingAck {
                message_id,
                receiver,
            } => {
                match self.pending.remove(&(message_id, receiver)) {
                    Some((_, tx)) => {
                        let _ = tx.send(());
                    }
                    None => {
                        tracing::debug!("Unexpected relay ack for {} to {}", message_id, receiver)
                    }
                }
                None
            }
            ChatFrame::Incoming(message) => Some(message),
            other => {
                tracing::warn!("Ignoring client-bound frame from relay: {:?}", other);
                None
            }
        }
    }

    /// Spawn the reader loop.
    ///
    /// Runs until the transport closes. Delivered messages go to `incoming`.
    pub fn spawn_reader(
        self: Arc<Self>,
        incoming: mpsc::UnboundedSender<IncomingMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let bytes = match self.transport.recv().await {
                    Ok(bytes) => bytes,
                    Err(TransportError::ConnectionClosed) => {
                        tracing::info!("Relay connection closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Relay receive error: {}", e);
                        break;
                    }
                };

                let frame = match ChatFrame::from_bytes(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Dropping undecodable relay frame: {}", e);
                        continue;
                    }
                };

                if let Some(message) = self.on_frame(frame) {
                    let _ = incoming.send(message);
                }
            }
        })
    }
}
