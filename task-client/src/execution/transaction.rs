//! Sync transactions: lock the scope, reflect the changes, unlock, commit.
//!
//! Local state is committed only after the mediator confirmed the unlock.
//! Any failure before that leaves the repository untouched.

use async_trait::async_trait;
use task_core::{
    existing_contacts, pending_contact_deltas, DeleteContactSyncTask, ProfileSyncTask,
    SettingsSyncTask, TaskMeta, UpdateContactSyncTask,
};
use task_types::{Identity, ReflectEnvelope, TransactionScope};

use super::Execute;
use crate::context::TaskContext;
use crate::error::{TaskError, TransactionError};

#[async_trait]
trait Transaction: Send + Sync {
    const SCOPE: TransactionScope;

    /// Envelopes that bring the siblings to the desired state. Empty when
    /// nothing changed.
    async fn envelopes(&self, ctx: &TaskContext) -> Result<Vec<ReflectEnvelope>, TaskError>;

    /// Apply the desired state locally.
    async fn commit(&self, ctx: &TaskContext) -> Result<(), TaskError>;
}

#[async_trait]
impl Transaction for ProfileSyncTask {
    const SCOPE: TransactionScope = TransactionScope::UserProfileSync;

    async fn envelopes(&self, ctx: &TaskContext) -> Result<Vec<ReflectEnvelope>, TaskError> {
        let current = ctx.repository.profile().await?;
        Ok(current
            .diff(&self.profile)
            .map(ReflectEnvelope::UserProfileSync)
            .into_iter()
            .collect())
    }

    async fn commit(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        ctx.repository.set_profile(self.profile.clone()).await?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for SettingsSyncTask {
    const SCOPE: TransactionScope = TransactionScope::SettingsSync;

    async fn envelopes(&self, ctx: &TaskContext) -> Result<Vec<ReflectEnvelope>, TaskError> {
        let current = ctx.repository.settings().await?;
        Ok(current
            .diff(&self.settings)
            .map(ReflectEnvelope::SettingsSync)
            .into_iter()
            .collect())
    }

    async fn commit(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        ctx.repository.set_settings(self.settings.clone()).await?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for UpdateContactSyncTask {
    const SCOPE: TransactionScope = TransactionScope::ContactSync;

    async fn envelopes(&self, ctx: &TaskContext) -> Result<Vec<ReflectEnvelope>, TaskError> {
        let identities: Vec<Identity> = self
            .delta_sync_contacts
            .iter()
            .map(|delta| delta.identity)
            .collect();
        let current = ctx.repository.contacts(&identities).await?;
        Ok(pending_contact_deltas(&current, &self.delta_sync_contacts)
            .into_iter()
            .map(ReflectEnvelope::ContactSyncUpdate)
            .collect())
    }

    async fn commit(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        ctx.repository
            .upsert_contacts(&self.delta_sync_contacts)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for DeleteContactSyncTask {
    const SCOPE: TransactionScope = TransactionScope::ContactSync;

    async fn envelopes(&self, ctx: &TaskContext) -> Result<Vec<ReflectEnvelope>, TaskError> {
        let current = ctx.repository.contacts(&self.contacts).await?;
        Ok(existing_contacts(&current, &self.contacts)
            .into_iter()
            .map(|identity| ReflectEnvelope::ContactSyncDelete { identity })
            .collect())
    }

    async fn commit(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        ctx.repository.delete_contacts(&self.contacts).await?;
        Ok(())
    }
}

macro_rules! execute_transaction {
    ($($task:ty),*) => {
        $(
            #[async_trait]
            impl Execute for $task {
                async fn execute(
                    &mut self,
                    _meta: &mut TaskMeta,
                    ctx: &TaskContext,
                ) -> Result<(), TaskError> {
                    run_transaction(&*self, ctx).await
                }
            }
        )*
    };
}

execute_transaction!(
    ProfileSyncTask,
    SettingsSyncTask,
    UpdateContactSyncTask,
    DeleteContactSyncTask
);

async fn run_transaction<T: Transaction>(task: &T, ctx: &TaskContext) -> Result<(), TaskError> {
    ctx.require_multi_device()?;
    if !ctx.mediator.is_connected() {
        return Err(TaskError::NotConnected);
    }

    if task.envelopes(ctx).await?.is_empty() {
        return Err(TransactionError::ShouldSkip.into());
    }

    ctx.mediator.lock(T::SCOPE).await?;

    // Another device may have applied the same change while we waited.
    let envelopes = match task.envelopes(ctx).await {
        Ok(envelopes) => envelopes,
        Err(e) => {
            release(ctx, T::SCOPE).await;
            return Err(e);
        }
    };
    if envelopes.is_empty() {
        ctx.mediator.unlock().await?;
        return Err(TransactionError::ShouldSkip.into());
    }

    let count = envelopes.len();
    for envelope in envelopes {
        if let Err(e) = ctx.mediator.reflect(envelope).await {
            release(ctx, T::SCOPE).await;
            return Err(e);
        }
    }

    ctx.mediator.unlock().await?;
    tracing::debug!("Transaction {} reflected {} envelopes", T::SCOPE, count);

    task.commit(ctx).await
}

/// Best-effort unlock after a failure; the lock expires on its own otherwise.
async fn release(ctx: &TaskContext, scope: TransactionScope) {
    if let Err(e) = ctx.mediator.unlock().await {
        tracing::warn!("Unlock of {} after failure failed: {}", scope, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EntityRepository;
    use crate::execution::testing::{identity, Harness};
    use task_core::{ProfileSnapshot, SettingsSnapshot};
    use task_types::{ContactDelta, MediatorFrame};

    fn profile(nickname: &str) -> ProfileSyncTask {
        ProfileSyncTask {
            profile: ProfileSnapshot {
                nickname: nickname.to_string(),
                ..Default::default()
            },
        }
    }

    fn named(identity: Identity, first_name: &str) -> ContactDelta {
        ContactDelta {
            first_name: Some(first_name.to_string()),
            ..ContactDelta::new(identity)
        }
    }

    #[tokio::test]
    async fn profile_sync_reflects_then_commits() {
        let harness = Harness::multi_device();
        let mut task = profile("alice");

        task.execute(&mut TaskMeta::new(), &harness.ctx).await.unwrap();

        assert_eq!(harness.mediator.transaction_requests(), vec!["lock", "unlock"]);
        assert!(matches!(
            &harness.mediator.reflected()[..],
            [ReflectEnvelope::UserProfileSync(delta)] if delta.nickname.as_deref() == Some("alice")
        ));
        assert_eq!(harness.repository.profile().await.unwrap().nickname, "alice");
        assert!(harness.relay.sent_frames().is_empty());
    }

    #[tokio::test]
    async fn identical_snapshot_skips_without_traffic() {
        let harness = Harness::multi_device();
        let mut task = SettingsSyncTask {
            settings: SettingsSnapshot::default(),
        };

        let result = task.execute(&mut TaskMeta::new(), &harness.ctx).await;
        assert!(matches!(
            result,
            Err(TaskError::Transaction(TransactionError::ShouldSkip))
        ));
        assert!(harness.mediator.sent_frames().is_empty());
        assert!(harness.relay.sent_frames().is_empty());
    }

    #[tokio::test]
    async fn missing_unlock_ack_leaves_state_untouched() {
        let harness = Harness::multi_device();
        harness
            .mediator
            .script_transaction(vec![vec![MediatorFrame::LockAck], vec![]]);
        let before = harness.repository.profile().await.unwrap();

        let result = profile("alice")
            .execute(&mut TaskMeta::new(), &harness.ctx)
            .await;
        assert!(matches!(
            result,
            Err(TaskError::Transaction(TransactionError::LockTimeout))
        ));
        assert_eq!(harness.mediator.reflected().len(), 1);
        assert_eq!(harness.repository.profile().await.unwrap(), before);
    }

    #[tokio::test]
    async fn failed_reflection_unlocks_and_propagates() {
        let harness = Harness::multi_device();
        harness.mediator.set_auto_ack(false);

        let result = profile("alice")
            .execute(&mut TaskMeta::new(), &harness.ctx)
            .await;
        assert!(matches!(result, Err(TaskError::ReflectTimeout { .. })));
        assert_eq!(harness.mediator.transaction_requests(), vec!["lock", "unlock"]);
        assert_eq!(harness.repository.profile().await.unwrap().nickname, "");
    }

    #[tokio::test]
    async fn rejected_lock_reports_running_transaction() {
        let harness = Harness::multi_device();
        harness.mediator.script_responses(vec![MediatorFrame::TransactionRejected {
            in_progress: TransactionScope::ContactSync,
            own_device: false,
        }]);

        let result = profile("alice")
            .execute(&mut TaskMeta::new(), &harness.ctx)
            .await;
        assert!(matches!(
            result,
            Err(TaskError::Transaction(
                TransactionError::OtherTransactionInProgress {
                    scope: TransactionScope::ContactSync
                }
            ))
        ));
        assert!(harness.mediator.reflected().is_empty());
    }

    #[tokio::test]
    async fn contact_update_reflects_only_changes() {
        let harness = Harness::multi_device();
        harness
            .repository
            .upsert_contacts(&[named(identity("AAAAAAAA"), "Ann")])
            .await
            .unwrap();

        let mut task = UpdateContactSyncTask {
            delta_sync_contacts: vec![
                named(identity("AAAAAAAA"), "Ann"),
                named(identity("BBBBBBBB"), "Bob"),
            ],
        };
        task.execute(&mut TaskMeta::new(), &harness.ctx).await.unwrap();

        assert!(matches!(
            &harness.mediator.reflected()[..],
            [ReflectEnvelope::ContactSyncUpdate(delta)] if delta.identity == identity("BBBBBBBB")
        ));
        let stored = harness
            .repository
            .contacts(&[identity("BBBBBBBB")])
            .await
            .unwrap();
        assert_eq!(
            stored[&identity("BBBBBBBB")].first_name.as_deref(),
            Some("Bob")
        );
    }

    #[tokio::test]
    async fn contact_delete_reflects_existing_contacts() {
        let harness = Harness::multi_device();
        harness.repository.add_contact(identity("AAAAAAAA"));

        let mut task = DeleteContactSyncTask {
            contacts: vec![identity("AAAAAAAA"), identity("ZZZZZZZZ")],
        };
        task.execute(&mut TaskMeta::new(), &harness.ctx).await.unwrap();

        assert_eq!(
            harness.mediator.reflected(),
            vec![ReflectEnvelope::ContactSyncDelete {
                identity: identity("AAAAAAAA")
            }]
        );
        assert!(harness
            .repository
            .contacts(&[identity("AAAAAAAA")])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn preconditions() {
        let harness = Harness::new();
        let result = profile("alice")
            .execute(&mut TaskMeta::new(), &harness.ctx)
            .await;
        assert!(matches!(result, Err(TaskError::MultiDeviceNotRegistered)));

        let harness = Harness::multi_device();
        harness.mediator.set_connected(false);
        let result = profile("alice")
            .execute(&mut TaskMeta::new(), &harness.ctx)
            .await;
        assert!(matches!(result, Err(TaskError::NotConnected)));
    }
}
