//! Access coordinator: decides which process may use the shared connection.
//!
//! The app and its extensions share one account and one connection. Each
//! process runs an [`AccessCoordinator`] that announces its
//! [`AccessState`] on a [`BroadcastChannel`] and merges the announcements of
//! the others. The decisions themselves live in [`task_core::AccessMachine`];
//! this module only turns its actions into broadcasts and resolved requests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use task_core::{
    parse_topic, secret_prefix, topic_name, AccessAction, AccessEvent, AccessMachine, AccessState,
    ConnectionPhase, ProcessRole,
};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::AccessConfig;

/// Inter-process publish/subscribe by topic name.
///
/// Delivery is at-most-once. Posting with nobody listening is not an error.
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    /// Publish a topic.
    fn post(&self, topic: &str);

    /// Next topic posted by someone else. `None` once the channel is gone.
    async fn recv(&self) -> Option<String>;
}

/// In-process broadcast channel.
///
/// Every [`endpoint`](LocalBroadcast::endpoint) stands for one process and
/// never receives its own posts.
pub struct LocalBroadcast {
    id: u64,
    next_id: Arc<AtomicU64>,
    tx: broadcast::Sender<(u64, String)>,
    rx: Mutex<broadcast::Receiver<(u64, String)>>,
}

impl LocalBroadcast {
    /// Create a channel and its first endpoint.
    pub fn new() -> Self {
        let (tx, rx) = broadcast::channel(64);
        Self {
            id: 0,
            next_id: Arc::new(AtomicU64::new(1)),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Another endpoint on the same channel.
    pub fn endpoint(&self) -> Self {
        Self {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            next_id: Arc::clone(&self.next_id),
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
        }
    }
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastChannel for LocalBroadcast {
    fn post(&self, topic: &str) {
        let _ = self.tx.send((self.id, topic.to_string()));
    }

    async fn recv(&self) -> Option<String> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok((from, _)) if from == self.id => continue,
                Ok((_, topic)) => return Some(topic),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Access broadcast lagged, {} announcements lost", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Runtime actor around [`AccessMachine`].
pub struct AccessCoordinator {
    machine: StdMutex<AccessMachine>,
    channel: Arc<dyn BroadcastChannel>,
    app_id: String,
    secret_prefix: String,
    poll_interval: Duration,
    request_timeout: Duration,
    waiters: StdMutex<Vec<oneshot::Sender<AccessState>>>,
}

impl AccessCoordinator {
    /// Create a coordinator in state `unused`.
    pub fn new(channel: Arc<dyn BroadcastChannel>, config: &AccessConfig) -> Self {
        Self {
            machine: StdMutex::new(AccessMachine::new(config.role, AccessState::Unused)),
            channel,
            app_id: config.app_id.clone(),
            secret_prefix: secret_prefix(config.shared_secret.as_bytes()),
            poll_interval: config.poll_interval(),
            request_timeout: config.request_timeout(),
            waiters: StdMutex::new(Vec::new()),
        }
    }

    /// Current state.
    pub fn state(&self) -> AccessState {
        self.machine().state()
    }

    /// Local role.
    pub fn role(&self) -> ProcessRole {
        self.machine().role()
    }

    /// Feed one event to the machine and carry out its actions.
    pub fn handle(&self, event: AccessEvent) -> AccessState {
        let (role, state, actions) = {
            let mut machine = self.machine();
            let (next, actions) = machine.clone().on_event(event);
            *machine = next;
            (machine.role(), machine.state(), actions)
        };

        for action in actions {
            match action {
                AccessAction::Broadcast(announced) => {
                    let topic = topic_name(&self.app_id, role, &self.secret_prefix, announced);
                    tracing::debug!("Access announce {}", announced);
                    self.channel.post(&topic);
                }
                AccessAction::ResolveRequest(resolved) => {
                    let waiters = std::mem::take(&mut *self.waiters());
                    for waiter in waiters {
                        let _ = waiter.send(resolved);
                    }
                }
                AccessAction::IgnoredOwnRole(announced) => {
                    tracing::error!(
                        "Ignoring {} announcement carrying our own role {}",
                        announced,
                        role
                    );
                }
            }
        }
        state
    }

    /// Ask the other processes for the connection.
    ///
    /// Announces `requested` every poll interval until a peer answers or the
    /// request times out. Nobody answering means nobody else is using it.
    pub async fn request_access(&self) -> AccessState {
        let (tx, mut rx) = oneshot::channel();
        self.waiters().push(tx);
        self.handle(AccessEvent::RequestAccess);

        let deadline = tokio::time::sleep(self.request_timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                resolved = &mut rx => {
                    return resolved.unwrap_or_else(|_| self.state());
                }
                _ = ticker.tick() => {
                    self.handle(AccessEvent::PollTick);
                }
                _ = &mut deadline => {
                    self.handle(AccessEvent::RequestTimedOut);
                    return rx.try_recv().unwrap_or_else(|_| self.state());
                }
            }
        }
    }

    /// Report a phase change of the local connection.
    pub fn connection_changed(&self, phase: ConnectionPhase) -> AccessState {
        self.handle(AccessEvent::ConnectionChanged(phase))
    }

    /// Handle one topic received on the channel.
    pub fn on_topic(&self, topic: &str) {
        match parse_topic(&self.app_id, &self.secret_prefix, topic) {
            Some((from, state)) => {
                self.handle(AccessEvent::PeerAnnounced { from, state });
            }
            None => tracing::debug!("Ignoring foreign topic {}", topic),
        }
    }

    /// Spawn the loop that feeds announcements to the machine.
    pub fn spawn_listener(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(topic) = self.channel.recv().await {
                self.on_topic(&topic);
            }
            tracing::info!("Access broadcast channel closed");
        })
    }

    fn machine(&self) -> MutexGuard<'_, AccessMachine> {
        self.machine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn waiters(&self) -> MutexGuard<'_, Vec<oneshot::Sender<AccessState>>> {
        self.waiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
