//! Mock transports for testing.
//!
//! Both mocks decode what the client sends, record it, and answer the way a
//! well-behaved server would unless told otherwise. Answers are pushed into
//! an inbound channel that the client's reader loop drains through `recv()`.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use task_types::{
    ChatFrame, Identity, IncomingMessage, MediatorFrame, MessageId, OutgoingMessage,
    ReflectEnvelope, ReflectId,
};
use tokio::sync::mpsc;

/// Inbound side shared by both mocks.
struct Inbound {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl Inbound {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn push(&self, data: Vec<u8>) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(data);
        }
    }

    fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }
}

/// A frame the client sent to one of the mocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentFrame {
    /// Sent to the relay.
    Chat(ChatFrame),
    /// Sent to the mediator.
    Mediator(MediatorFrame),
}

/// Send order across a relay and a mediator sharing the log.
#[derive(Clone, Default)]
pub struct FrameLog(Arc<Mutex<Vec<SentFrame>>>);

impl FrameLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, frame: SentFrame) {
        self.0.lock().unwrap().push(frame);
    }

    /// Every frame sent so far, in order.
    pub fn frames(&self) -> Vec<SentFrame> {
        self.0.lock().unwrap().clone()
    }
}

// ===========================================
// Chat relay
// ===========================================

/// Mock chat relay.
///
/// Acknowledges every outgoing message unless acks are disabled or withheld
/// for a receiver.
pub struct MockRelay {
    inner: Arc<Mutex<MockRelayInner>>,
    inbound: Arc<Inbound>,
}

struct MockRelayInner {
    connected: bool,
    auto_ack: bool,
    withheld_acks: BTreeSet<Identity>,
    sent_frames: Vec<ChatFrame>,
    fail_next_send: Option<String>,
    log: FrameLog,
}

impl MockRelay {
    /// Create a connected relay that acknowledges everything.
    pub fn new() -> Self {
        Self::with_log(FrameLog::new())
    }

    /// Like [`MockRelay::new`], also recording sends into `log`.
    pub fn with_log(log: FrameLog) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockRelayInner {
                connected: true,
                auto_ack: true,
                withheld_acks: BTreeSet::new(),
                sent_frames: Vec::new(),
                fail_next_send: None,
                log,
            })),
            inbound: Arc::new(Inbound::new()),
        }
    }

    /// Set the connection state.
    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().unwrap().connected = connected;
    }

    /// Enable or disable acknowledgement of outgoing messages.
    pub fn set_auto_ack(&self, enabled: bool) {
        self.inner.lock().unwrap().auto_ack = enabled;
    }

    /// Never acknowledge messages sent to this receiver.
    pub fn withhold_ack_for(&self, receiver: Identity) {
        self.inner.lock().unwrap().withheld_acks.insert(receiver);
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    /// Deliver a message to the client.
    pub fn deliver(&self, message: IncomingMessage) {
        if let Ok(bytes) = ChatFrame::Incoming(message).to_bytes() {
            self.inbound.push(bytes);
        }
    }

    /// End the inbound stream; `recv()` fails once drained.
    pub fn close(&self) {
        self.inbound.close();
    }

    /// Every frame the client sent.
    pub fn sent_frames(&self) -> Vec<ChatFrame> {
        self.inner.lock().unwrap().sent_frames.clone()
    }

    /// Outgoing messages, in send order.
    pub fn outgoing(&self) -> Vec<OutgoingMessage> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                ChatFrame::Outgoing(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Incoming messages the client acknowledged.
    pub fn incoming_acks(&self) -> Vec<MessageId> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                ChatFrame::IncomingAck { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    /// Messages the client reported as processed.
    pub fn processing_completed(&self) -> Vec<MessageId> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                ChatFrame::ProcessingComplete { message_id } => Some(message_id),
                _ => None,
            })
            .collect()
    }
}

impl Default for MockRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockRelay {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            inbound: Arc::clone(&self.inbound),
        }
    }
}

#[async_trait]
impl Transport for MockRelay {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let frame =
            ChatFrame::from_bytes(data).map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let ack = {
            let mut inner = self.inner.lock().unwrap();

            if !inner.connected {
                return Err(TransportError::NotConnected);
            }

            // Check for forced failure
            if let Some(error) = inner.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }

            inner.sent_frames.push(frame.clone());
            inner.log.record(SentFrame::Chat(frame.clone()));
            match frame {
                ChatFrame::Outgoing(message)
                    if inner.auto_ack && !inner.withheld_acks.contains(&message.receiver) =>
                {
                    Some(ChatFrame::OutgoingAck {
                        message_id: message.message_id,
                        receiver: message.receiver,
                    })
                }
                _ => None,
            }
        };

        if let Some(Ok(bytes)) = ack.map(|frame| frame.to_bytes()) {
            self.inbound.push(bytes);
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        self.inbound.recv().await
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }
}

// ===========================================
// Mediator
// ===========================================

/// Mock mediator.
///
/// Acknowledges every reflection unless acks are disabled. Lock and unlock
/// requests are granted until a script is installed; a scripted mediator
/// answers each lock or unlock request with the next batch of frames, and
/// with nothing once the script is exhausted.
pub struct MockMediator {
    inner: Arc<Mutex<MockMediatorInner>>,
    inbound: Arc<Inbound>,
}

struct MockMediatorInner {
    connected: bool,
    auto_ack: bool,
    script: Option<VecDeque<Vec<MediatorFrame>>>,
    sent_frames: Vec<MediatorFrame>,
    next_timestamp: u64,
    fail_next_send: Option<String>,
    log: FrameLog,
}

impl MockMediator {
    /// Create a connected mediator that grants and acknowledges everything.
    pub fn new() -> Self {
        Self::with_log(FrameLog::new())
    }

    /// Like [`MockMediator::new`], also recording sends into `log`.
    pub fn with_log(log: FrameLog) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockMediatorInner {
                connected: true,
                auto_ack: true,
                script: None,
                sent_frames: Vec::new(),
                next_timestamp: 1_000,
                fail_next_send: None,
                log,
            })),
            inbound: Arc::new(Inbound::new()),
        }
    }

    /// Set the connection state.
    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().unwrap().connected = connected;
    }

    /// Enable or disable acknowledgement of reflections.
    pub fn set_auto_ack(&self, enabled: bool) {
        self.inner.lock().unwrap().auto_ack = enabled;
    }

    /// Answer lock and unlock requests with these batches, in order.
    pub fn script_transaction(&self, batches: Vec<Vec<MediatorFrame>>) {
        self.inner.lock().unwrap().script = Some(batches.into());
    }

    /// Answer lock and unlock requests with one frame each, in order.
    pub fn script_responses(&self, frames: Vec<MediatorFrame>) {
        self.script_transaction(frames.into_iter().map(|frame| vec![frame]).collect());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    /// Push an arbitrary frame to the client.
    pub fn push(&self, frame: MediatorFrame) {
        if let Ok(bytes) = frame.to_bytes() {
            self.inbound.push(bytes);
        }
    }

    /// Deliver an envelope reflected by a sibling device.
    pub fn deliver_reflected(&self, reflect_id: ReflectId, envelope: ReflectEnvelope) {
        let timestamp = {
            let mut inner = self.inner.lock().unwrap();
            inner.next_timestamp += 1;
            inner.next_timestamp
        };
        self.push(MediatorFrame::Reflected {
            reflect_id,
            timestamp,
            envelope,
        });
    }

    /// End the inbound stream; `recv()` fails once drained.
    pub fn close(&self) {
        self.inbound.close();
    }

    /// Every frame the client sent.
    pub fn sent_frames(&self) -> Vec<MediatorFrame> {
        self.inner.lock().unwrap().sent_frames.clone()
    }

    /// Envelopes the client reflected, in order.
    pub fn reflected(&self) -> Vec<ReflectEnvelope> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                MediatorFrame::Reflect { envelope, .. } => Some(envelope),
                _ => None,
            })
            .collect()
    }

    /// Reflected envelopes the client acknowledged.
    pub fn reflected_acks(&self) -> Vec<ReflectId> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                MediatorFrame::ReflectedAck { reflect_id } => Some(reflect_id),
                _ => None,
            })
            .collect()
    }

    /// Names of the lock and unlock requests, in order.
    pub fn transaction_requests(&self) -> Vec<&'static str> {
        self.sent_frames()
            .iter()
            .filter(|frame| matches!(frame, MediatorFrame::Lock { .. } | MediatorFrame::Unlock))
            .map(|frame| frame.name())
            .collect()
    }
}

impl Default for MockMediator {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockMediator {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            inbound: Arc::clone(&self.inbound),
        }
    }
}

#[async_trait]
impl Transport for MockMediator {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let frame = MediatorFrame::from_bytes(data)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let responses = {
            let mut inner = self.inner.lock().unwrap();

            if !inner.connected {
                return Err(TransportError::NotConnected);
            }

            // Check for forced failure
            if let Some(error) = inner.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }

            inner.sent_frames.push(frame.clone());
            inner.log.record(SentFrame::Mediator(frame.clone()));
            match frame {
                MediatorFrame::Reflect { reflect_id, .. } if inner.auto_ack => {
                    inner.next_timestamp += 1;
                    vec![MediatorFrame::ReflectAck {
                        reflect_id,
                        timestamp: inner.next_timestamp,
                    }]
                }
                MediatorFrame::Lock { .. } | MediatorFrame::Unlock => match inner.script.as_mut() {
                    Some(script) => script.pop_front().unwrap_or_default(),
                    None if matches!(frame, MediatorFrame::Lock { .. }) => {
                        vec![MediatorFrame::LockAck]
                    }
                    None => vec![MediatorFrame::UnlockAck],
                },
                _ => Vec::new(),
            }
        };

        for response in responses {
            self.push(response);
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        self.inbound.recv().await
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }
}
