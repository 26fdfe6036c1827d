//! Mediator client: reflections and transaction locks.
//!
//! Reflections are correlated with their acknowledgement by reflect id.
//! Transaction responses (`lock_ack`, `unlock_ack`, rejections, ...) carry no
//! id; the mediator only allows one transaction per device at a time, so
//! they flow through a single ordered channel consumed by whoever holds the
//! transaction slot.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use task_core::ReceiveReflectedTask;
use task_types::{MediatorFrame, ReflectEnvelope, ReflectId, TransactionScope};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{TaskError, TransactionError};
use crate::transport::{Transport, TransportError};

/// Timeouts and limits of the mediator client.
#[derive(Debug, Clone)]
pub struct MediatorSettings {
    /// Wait for any single acknowledgement.
    pub response_timeout: Duration,
    /// Lock requests per transaction.
    pub lock_attempts: u32,
    /// Wait for `transaction_ended` after a rejection.
    pub transaction_ended_timeout: Duration,
    /// Lock lifetime on the mediator.
    pub lock_ttl_secs: u32,
}

impl Default for MediatorSettings {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(20),
            lock_attempts: 3,
            transaction_ended_timeout: Duration::from_secs(10),
            lock_ttl_secs: 60,
        }
    }
}

/// Client side of the mediator connection.
pub struct MediatorClient {
    transport: Arc<dyn Transport>,
    settings: MediatorSettings,
    pending_reflects: DashMap<ReflectId, oneshot::Sender<u64>>,
    transaction_tx: mpsc::UnboundedSender<MediatorFrame>,
    transaction_rx: Mutex<mpsc::UnboundedReceiver<MediatorFrame>>,
}

impl MediatorClient {
    /// Create a client over `transport`.
    pub fn new(transport: Arc<dyn Transport>, settings: MediatorSettings) -> Self {
        let (transaction_tx, transaction_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            settings,
            pending_reflects: DashMap::new(),
            transaction_tx,
            transaction_rx: Mutex::new(transaction_rx),
        }
    }

    /// Whether the mediator connection is up.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Reflect an envelope and wait for the mediator to store it.
    ///
    /// Returns the mediator timestamp of the reflection.
    pub async fn reflect(&self, envelope: ReflectEnvelope) -> Result<u64, TaskError> {
        let reflect_id = ReflectId::random();
        let name = envelope.name();
        let bytes = MediatorFrame::Reflect {
            reflect_id,
            envelope,
        }
        .to_bytes()?;

        let (tx, rx) = oneshot::channel();
        self.pending_reflects.insert(reflect_id, tx);

        if let Err(e) = self.transport.send(&bytes).await {
            self.pending_reflects.remove(&reflect_id);
            return Err(e.into());
        }
        tracing::debug!("Reflect {} ({}) sent", reflect_id, name);

        match tokio::time::timeout(self.settings.response_timeout, rx).await {
            Ok(Ok(timestamp)) => Ok(timestamp),
            Ok(Err(_)) => Err(TaskError::Transport(TransportError::ConnectionClosed)),
            Err(_) => {
                self.pending_reflects.remove(&reflect_id);
                tracing::warn!("No mediator ack for reflect {} ({})", reflect_id, name);
                Err(TaskError::ReflectTimeout { reflect_id })
            }
        }
    }

    /// Acknowledge an envelope reflected by a sibling device.
    pub async fn ack_reflected(&self, reflect_id: ReflectId) -> Result<(), TaskError> {
        let bytes = MediatorFrame::ReflectedAck { reflect_id }.to_bytes()?;
        self.transport.send(&bytes).await?;
        Ok(())
    }

    /// Acquire the transaction lock for `scope`.
    ///
    /// A rejection waits for the running transaction to end and tries again,
    /// up to the configured number of attempts.
    pub async fn lock(&self, scope: TransactionScope) -> Result<(), TaskError> {
        let mut rx = self.transaction_rx.lock().await;
        while rx.try_recv().is_ok() {}

        let attempts = self.settings.lock_attempts.max(1);
        for attempt in 1..=attempts {
            self.send_frame(&MediatorFrame::Lock {
                scope,
                ttl_secs: self.settings.lock_ttl_secs,
            })
            .await?;

            let response = Self::next_response(&mut rx, self.settings.response_timeout).await;
            match response {
                None => {
                    tracing::warn!("Lock {} not answered", scope);
                    return Err(TransactionError::LockTimeout.into());
                }
                Some(MediatorFrame::LockAck) => {
                    tracing::debug!("Lock {} acquired", scope);
                    return Ok(());
                }
                Some(MediatorFrame::TransactionRejected { in_progress, .. }) => {
                    let rejection = if in_progress == scope {
                        TransactionError::SameTransactionInProgress { scope: in_progress }
                    } else {
                        TransactionError::OtherTransactionInProgress { scope: in_progress }
                    };
                    tracing::info!(
                        "Lock {} rejected (attempt {}/{}): {}",
                        scope,
                        attempt,
                        attempts,
                        rejection
                    );
                    if attempt == attempts
                        || !Self::wait_for_end(&mut rx, self.settings.transaction_ended_timeout)
                            .await
                    {
                        return Err(rejection.into());
                    }
                }
                Some(other) => {
                    return Err(TransactionError::BadResponse {
                        expected: "lock_ack",
                        actual: other.name(),
                    }
                    .into());
                }
            }
        }
        Err(TransactionError::LockTimeout.into())
    }

    /// Release the transaction lock.
    pub async fn unlock(&self) -> Result<(), TaskError> {
        let mut rx = self.transaction_rx.lock().await;
        self.send_frame(&MediatorFrame::Unlock).await?;

        let deadline = Instant::now() + self.settings.response_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match Self::next_response(&mut rx, remaining).await {
                None => {
                    tracing::warn!("Unlock not answered");
                    return Err(TransactionError::LockTimeout.into());
                }
                Some(MediatorFrame::UnlockAck) => return Ok(()),
                // Another device's transaction ending says nothing about ours.
                Some(MediatorFrame::TransactionEnded { .. }) => continue,
                Some(other) => {
                    return Err(TransactionError::BadResponse {
                        expected: "unlock_ack",
                        actual: other.name(),
                    }
                    .into());
                }
            }
        }
    }

    /// Number of reflections waiting for an acknowledgement.
    pub fn pending_acks(&self) -> usize {
        self.pending_reflects.len()
    }

    /// Route one inbound frame.
    ///
    /// Reflect acks complete their waiting reflection, transaction responses
    /// go to the transaction slot, and reflected envelopes are returned for
    /// the caller to enqueue.
    pub fn on_frame(&self, frame: MediatorFrame) -> Option<ReceiveReflectedTask> {
        match frame {
            MediatorFrame::ReflectAck {
                reflect_id,
                timestamp,
            } => {
                match self.pending_reflects.remove(&reflect_id) {
                    Some((_, tx)) => {
                        let _ = tx.send(timestamp);
                    }
                    None => tracing::debug!("Unexpected reflect ack {}", reflect_id),
                }
                None
            }
            MediatorFrame::Reflected {
                reflect_id,
                timestamp,
                envelope,
            } => Some(ReceiveReflectedTask {
                reflect_id,
                timestamp,
                envelope,
            }),
            frame @ (MediatorFrame::LockAck
            | MediatorFrame::UnlockAck
            | MediatorFrame::TransactionRejected { .. }
            | MediatorFrame::TransactionEnded { .. }
            | MediatorFrame::ReflectionQueueDry) => {
                let _ = self.transaction_tx.send(frame);
                None
            }
            other => {
                tracing::warn!("Ignoring client-bound frame from mediator: {}", other.name());
                None
            }
        }
    }

    /// Spawn the reader loop.
    ///
    /// Runs until the transport closes. Reflected envelopes go to `reflected`.
    pub fn spawn_reader(
        self: Arc<Self>,
        reflected: mpsc::UnboundedSender<ReceiveReflectedTask>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let bytes = match self.transport.recv().await {
                    Ok(bytes) => bytes,
                    Err(TransportError::ConnectionClosed) => {
                        tracing::info!("Mediator connection closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Mediator receive error: {}", e);
                        break;
                    }
                };

                let frame = match MediatorFrame::from_bytes(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Dropping undecodable mediator frame: {}", e);
                        continue;
                    }
                };

                if let Some(envelope) = self.on_frame(frame) {
                    let _ = reflected.send(envelope);
                }
            }
        })
    }

    async fn send_frame(&self, frame: &MediatorFrame) -> Result<(), TaskError> {
        let bytes = frame.to_bytes()?;
        self.transport.send(&bytes).await?;
        Ok(())
    }

    async fn next_response(
        rx: &mut mpsc::UnboundedReceiver<MediatorFrame>,
        wait: Duration,
    ) -> Option<MediatorFrame> {
        tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
    }

    /// Wait for `transaction_ended`, skipping anything else.
    async fn wait_for_end(rx: &mut mpsc::UnboundedReceiver<MediatorFrame>, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match Self::next_response(rx, remaining).await {
                Some(MediatorFrame::TransactionEnded { .. }) => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    }
}
