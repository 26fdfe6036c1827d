//! Cross-process access arbitration.
//!
//! Several cooperating processes (the app and its extensions) share one
//! connection to the chat relay and the mediator, and one persisted task
//! queue. Each process holds an [`AccessState`] and announces changes to the
//! others over a broadcast channel. On receiving an announcement a process
//! recomputes its own state with [`merge`].
//!
//! [`AccessMachine`] wraps the merge table with the request/poll/timeout
//! protocol. It is pure: the runtime actor in `task-client` feeds it events
//! and performs the returned actions.

use sha2::{Digest, Sha256};
use std::fmt;

/// Access state of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccessState {
    /// Not using the shared connection.
    Unused = 0,
    /// Asking to use the shared connection.
    Requested = 1,
    /// Using the shared connection.
    Using = 2,
    /// About to hand the shared connection back.
    WillRelease = 3,
}

impl AccessState {
    /// Every state, in discriminant order.
    pub const ALL: [AccessState; 4] = [
        AccessState::Unused,
        AccessState::Requested,
        AccessState::Using,
        AccessState::WillRelease,
    ];

    /// Name used in topic strings and logs.
    pub fn name(&self) -> &'static str {
        match self {
            AccessState::Unused => "unused",
            AccessState::Requested => "requested",
            AccessState::Using => "using",
            AccessState::WillRelease => "will_release",
        }
    }
}

impl fmt::Display for AccessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Role of a cooperating process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    /// The main application.
    App,
    /// The share extension.
    ShareExtension,
    /// The notification service extension.
    NotificationExtension,
}

impl ProcessRole {
    /// Every role.
    pub const ALL: [ProcessRole; 3] = [
        ProcessRole::App,
        ProcessRole::ShareExtension,
        ProcessRole::NotificationExtension,
    ];

    /// Name used in topic strings and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ProcessRole::App => "app",
            ProcessRole::ShareExtension => "share_extension",
            ProcessRole::NotificationExtension => "notification_extension",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Recompute the local state after another process announced `received`.
///
/// An announcement from the local role itself leaves the state unchanged.
/// When two processes both claim the connection, the share extension keeps
/// it against everyone, the app keeps it against the notification extension,
/// and the notification extension always yields.
pub fn merge(
    received: AccessState,
    from: ProcessRole,
    mine: AccessState,
    my_role: ProcessRole,
) -> AccessState {
    use AccessState::*;

    if from == my_role {
        return mine;
    }

    match received {
        Unused => match mine {
            Unused => Unused,
            Requested | Using => Using,
            WillRelease => WillRelease,
        },
        Requested | Using => match mine {
            Unused => Unused,
            WillRelease => WillRelease,
            Requested | Using => match my_role {
                ProcessRole::App if from == ProcessRole::ShareExtension => WillRelease,
                ProcessRole::App | ProcessRole::ShareExtension => mine,
                ProcessRole::NotificationExtension => WillRelease,
            },
        },
        WillRelease => mine,
    }
}

/// Topic name a process posts its state on.
pub fn topic_name(
    app_id: &str,
    role: ProcessRole,
    secret_prefix: &str,
    state: AccessState,
) -> String {
    format!("{}.{}-{}-{}", app_id, role, secret_prefix, state)
}

/// Split a topic posted by [`topic_name`] into sender role and state.
///
/// Returns `None` for topics of another installation or malformed topics.
pub fn parse_topic(
    app_id: &str,
    secret_prefix: &str,
    topic: &str,
) -> Option<(ProcessRole, AccessState)> {
    let rest = topic.strip_prefix(app_id)?.strip_prefix('.')?;
    let role = ProcessRole::ALL
        .into_iter()
        .find(|role| rest.starts_with(role.name()) && rest[role.name().len()..].starts_with('-'))?;
    let rest = rest[role.name().len() + 1..].strip_prefix(secret_prefix)?.strip_prefix('-')?;
    let state = AccessState::ALL.into_iter().find(|state| state.name() == rest)?;
    Some((role, state))
}

/// Derive the topic secret prefix shared by all processes of one installation.
pub fn secret_prefix(shared_secret: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"relaytask-ipc-v1");
    hasher.update(shared_secret);
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// Phase of the shared connection, as seen by the process owning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Transport connecting.
    Connecting,
    /// Transport up, not yet authenticated.
    Connected,
    /// Authenticated; tasks may run.
    LoggedIn,
    /// Closing.
    Disconnecting,
    /// Closed.
    Disconnected,
}

/// Inputs to the access state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessEvent {
    /// This process wants the connection.
    RequestAccess,
    /// Poll interval elapsed while a request is outstanding.
    PollTick,
    /// Request timeout elapsed.
    RequestTimedOut,
    /// Another process announced its state.
    PeerAnnounced {
        /// Sender role.
        from: ProcessRole,
        /// Announced state.
        state: AccessState,
    },
    /// The local connection changed phase.
    ConnectionChanged(ConnectionPhase),
}

/// Instructions for the runtime actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessAction {
    /// Post this state on the broadcast channel.
    Broadcast(AccessState),
    /// Resolve the outstanding access request with this state.
    ResolveRequest(AccessState),
    /// An announcement carried the local role and was ignored.
    IgnoredOwnRole(AccessState),
}

/// Access state machine of one process - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessMachine {
    role: ProcessRole,
    state: AccessState,
    logged_in: bool,
    polling: bool,
    answered: bool,
}

impl AccessMachine {
    /// Create a machine for `role` starting in `state`.
    pub fn new(role: ProcessRole, state: AccessState) -> Self {
        Self {
            role,
            state,
            logged_in: false,
            polling: false,
            answered: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> AccessState {
        self.state
    }

    /// Local role.
    pub fn role(&self) -> ProcessRole {
        self.role
    }

    /// Whether an access request is outstanding.
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Process an event and return the new machine plus actions to execute.
    pub fn on_event(mut self, event: AccessEvent) -> (Self, Vec<AccessAction>) {
        let mut actions = Vec::new();
        match event {
            AccessEvent::RequestAccess => {
                if self.logged_in {
                    actions.push(AccessAction::ResolveRequest(AccessState::Using));
                } else {
                    self.polling = true;
                    self.answered = false;
                    self.update(AccessState::Requested, true, &mut actions);
                }
            }
            AccessEvent::PollTick => {
                if self.polling {
                    self.update(AccessState::Requested, true, &mut actions);
                }
            }
            AccessEvent::RequestTimedOut => {
                if self.polling {
                    self.polling = false;
                    if !self.answered {
                        self.update(AccessState::Using, false, &mut actions);
                    }
                    actions.push(AccessAction::ResolveRequest(self.state));
                }
            }
            AccessEvent::PeerAnnounced { from, state } => {
                if from == self.role {
                    actions.push(AccessAction::IgnoredOwnRole(state));
                } else {
                    self.answered = true;
                    let merged = merge(state, from, self.state, self.role);
                    self.update(merged, false, &mut actions);
                    if self.polling {
                        self.polling = false;
                        actions.push(AccessAction::ResolveRequest(self.state));
                    }
                }
            }
            AccessEvent::ConnectionChanged(phase) => {
                self.logged_in = phase == ConnectionPhase::LoggedIn;
                let next = match phase {
                    ConnectionPhase::Connecting
                    | ConnectionPhase::Connected
                    | ConnectionPhase::LoggedIn => AccessState::Using,
                    ConnectionPhase::Disconnecting => AccessState::WillRelease,
                    ConnectionPhase::Disconnected => AccessState::Unused,
                };
                self.update(next, false, &mut actions);
            }
        }
        (self, actions)
    }

    /// Set the state and announce it when it changed, when polling forces it,
    /// or whenever this process is using the connection.
    fn update(&mut self, next: AccessState, force: bool, actions: &mut Vec<AccessAction>) {
        let changed = self.state != next;
        self.state = next;
        if changed || force || next == AccessState::Using {
            actions.push(AccessAction::Broadcast(next));
        }
    }
}
