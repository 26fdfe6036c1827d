//! In-memory collaborators for tests and demos.
//!
//! Pairs the mock transports with a repository, processor, group manager
//! and account that record what executions do to them.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use task_core::{merge_contact, ProfileSnapshot, SettingsSnapshot};
use task_types::{
    ContactDelta, GroupIdentity, Identity, IncomingMessage, MessageId, Receiver, ReflectEnvelope,
};

pub use crate::access::LocalBroadcast;
pub use crate::store::MemoryTaskStore;
pub use crate::transport::{FrameLog, MockMediator, MockRelay, SentFrame};

use crate::context::{
    AccountProvider, ContactStatus, EntityRepository, GroupManager, MessageProcessor,
    ProcessError, ProcessedIncoming, ReflectedOutcome, RepositoryError,
};

/// Repository backed by in-memory maps.
#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<RepositoryState>,
}

#[derive(Default)]
struct RepositoryState {
    contacts: BTreeMap<Identity, ContactDelta>,
    invalid: Vec<Identity>,
    profile: ProfileSnapshot,
    settings: SettingsSnapshot,
    sent: Vec<MessageId>,
    failures: VecDeque<String>,
}

impl MemoryRepository {
    /// Empty repository with default profile and settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an active contact.
    pub fn add_contact(&self, identity: Identity) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .contacts
            .entry(identity)
            .or_insert_with(|| ContactDelta::new(identity));
    }

    /// Mark a stored contact invalid.
    pub fn set_invalid(&self, identity: Identity) {
        self.inner.lock().unwrap().invalid.push(identity);
    }

    /// Fail the next repository call. Repeated calls fail consecutive calls.
    pub fn fail_next(&self, error: &str) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .push_back(error.to_string());
    }

    /// Messages marked sent, in order.
    pub fn sent_messages(&self) -> Vec<MessageId> {
        self.inner.lock().unwrap().sent.clone()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, RepositoryState>, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.failures.pop_front() {
            Some(error) => Err(RepositoryError(error)),
            None => Ok(inner),
        }
    }
}

#[async_trait]
impl EntityRepository for MemoryRepository {
    async fn contact_status(
        &self,
        identity: &Identity,
    ) -> Result<Option<ContactStatus>, RepositoryError> {
        let inner = self.state()?;
        if !inner.contacts.contains_key(identity) {
            return Ok(None);
        }
        if inner.invalid.contains(identity) {
            return Ok(Some(ContactStatus::Invalid));
        }
        Ok(Some(ContactStatus::Active))
    }

    async fn mark_message_sent(
        &self,
        message_id: &MessageId,
        _receiver: &Receiver,
    ) -> Result<(), RepositoryError> {
        self.state()?.sent.push(*message_id);
        Ok(())
    }

    async fn profile(&self) -> Result<ProfileSnapshot, RepositoryError> {
        Ok(self.state()?.profile.clone())
    }

    async fn set_profile(&self, profile: ProfileSnapshot) -> Result<(), RepositoryError> {
        self.state()?.profile = profile;
        Ok(())
    }

    async fn settings(&self) -> Result<SettingsSnapshot, RepositoryError> {
        Ok(self.state()?.settings.clone())
    }

    async fn set_settings(&self, settings: SettingsSnapshot) -> Result<(), RepositoryError> {
        self.state()?.settings = settings;
        Ok(())
    }

    async fn contacts(
        &self,
        identities: &[Identity],
    ) -> Result<BTreeMap<Identity, ContactDelta>, RepositoryError> {
        let inner = self.state()?;
        Ok(identities
            .iter()
            .filter_map(|identity| {
                inner
                    .contacts
                    .get(identity)
                    .map(|contact| (*identity, contact.clone()))
            })
            .collect())
    }

    async fn upsert_contacts(&self, deltas: &[ContactDelta]) -> Result<(), RepositoryError> {
        let mut inner = self.state()?;
        for delta in deltas {
            let stored = inner
                .contacts
                .entry(delta.identity)
                .or_insert_with(|| ContactDelta::new(delta.identity));
            merge_contact(stored, delta);
        }
        Ok(())
    }

    async fn delete_contacts(&self, identities: &[Identity]) -> Result<(), RepositoryError> {
        let mut inner = self.state()?;
        for identity in identities {
            inner.contacts.remove(identity);
        }
        Ok(())
    }
}

/// Processor that returns scripted outcomes.
///
/// Without a script, every incoming message is a valid one-to-one message
/// and every reflected envelope is processed.
#[derive(Default)]
pub struct MockProcessor {
    inner: Mutex<ProcessorState>,
}

#[derive(Default)]
struct ProcessorState {
    incoming: VecDeque<Result<ProcessedIncoming, ProcessError>>,
    reflected: VecDeque<Result<ReflectedOutcome, ProcessError>>,
    incoming_seen: Vec<MessageId>,
    reflected_seen: Vec<ReflectEnvelope>,
}

impl MockProcessor {
    /// Processor with no script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome of the next incoming message.
    pub fn next_incoming(&self, outcome: Result<ProcessedIncoming, ProcessError>) {
        self.inner.lock().unwrap().incoming.push_back(outcome);
    }

    /// Outcome of the next reflected envelope.
    pub fn next_reflected(&self, outcome: Result<ReflectedOutcome, ProcessError>) {
        self.inner.lock().unwrap().reflected.push_back(outcome);
    }

    /// Ids of the incoming messages processed, in order.
    pub fn incoming_processed(&self) -> Vec<MessageId> {
        self.inner.lock().unwrap().incoming_seen.clone()
    }

    /// Reflected envelopes processed, in order.
    pub fn reflected_processed(&self) -> Vec<ReflectEnvelope> {
        self.inner.lock().unwrap().reflected_seen.clone()
    }
}

#[async_trait]
impl MessageProcessor for MockProcessor {
    async fn process_incoming(
        &self,
        message: &IncomingMessage,
    ) -> Result<ProcessedIncoming, ProcessError> {
        let mut inner = self.inner.lock().unwrap();
        inner.incoming_seen.push(message.message_id);
        inner
            .incoming
            .pop_front()
            .unwrap_or_else(|| Ok(ProcessedIncoming::default()))
    }

    async fn process_reflected(
        &self,
        envelope: &ReflectEnvelope,
        _timestamp: u64,
    ) -> Result<ReflectedOutcome, ProcessError> {
        let mut inner = self.inner.lock().unwrap();
        inner.reflected_seen.push(envelope.clone());
        inner
            .reflected
            .pop_front()
            .unwrap_or(Ok(ReflectedOutcome::Processed))
    }
}

/// Group manager that records sync checks.
#[derive(Default)]
pub struct MockGroupManager {
    checks: Mutex<Vec<GroupIdentity>>,
}

impl MockGroupManager {
    /// Manager with no recorded checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups checked, in order.
    pub fn sync_checks(&self) -> Vec<GroupIdentity> {
        self.checks.lock().unwrap().clone()
    }
}

impl GroupManager for MockGroupManager {
    fn periodic_sync_if_needed(&self, group: &GroupIdentity) {
        self.checks.lock().unwrap().push(*group);
    }
}

/// Account with switchable multi-device flags.
pub struct StaticAccount {
    identity: Identity,
    multi_device: AtomicBool,
    registered: AtomicBool,
}

impl StaticAccount {
    /// Account without multi-device.
    pub fn single_device(identity: Identity) -> Self {
        Self {
            identity,
            multi_device: AtomicBool::new(false),
            registered: AtomicBool::new(false),
        }
    }

    /// Account with multi-device enabled and this device registered.
    pub fn multi_device(identity: Identity) -> Self {
        Self {
            identity,
            multi_device: AtomicBool::new(true),
            registered: AtomicBool::new(true),
        }
    }

    /// Enable or disable multi-device.
    pub fn set_multi_device(&self, enabled: bool) {
        self.multi_device.store(enabled, Ordering::SeqCst);
    }

    /// Register or unregister this device.
    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }
}

impl AccountProvider for StaticAccount {
    fn my_identity(&self) -> Identity {
        self.identity
    }

    fn multi_device_enabled(&self) -> bool {
        self.multi_device.load(Ordering::SeqCst)
    }

    fn multi_device_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}
