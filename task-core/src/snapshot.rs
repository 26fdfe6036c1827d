//! Snapshots of synchronized state and the deltas between them.
//!
//! A sync task carries the desired post-sync snapshot. Diffing it against the
//! current snapshot yields only the fields that changed; an empty diff means
//! there is nothing to reflect.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use task_types::{BlobId, ContactDelta, Identity, PictureUpdate, ProfileDelta, SettingsDelta};

/// The user's own profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    /// Nickname shown to contacts.
    pub nickname: String,
    /// Uploaded profile picture.
    pub profile_picture: Option<BlobId>,
    /// Linked email address.
    pub linked_email: Option<String>,
    /// Linked phone number.
    pub linked_phone: Option<String>,
}

fn changed<T: PartialEq + Clone>(current: &T, target: &T) -> Option<T> {
    (current != target).then(|| target.clone())
}

fn linked(current: &Option<String>, target: &Option<String>) -> Option<String> {
    (current != target).then(|| target.clone().unwrap_or_default())
}

impl ProfileSnapshot {
    /// Fields that differ in `target`, or `None` if nothing changed.
    pub fn diff(&self, target: &ProfileSnapshot) -> Option<ProfileDelta> {
        let delta = ProfileDelta {
            nickname: changed(&self.nickname, &target.nickname),
            profile_picture: (self.profile_picture != target.profile_picture).then(|| {
                match target.profile_picture {
                    Some(blob_id) => PictureUpdate::Set(blob_id),
                    None => PictureUpdate::Remove,
                }
            }),
            linked_email: linked(&self.linked_email, &target.linked_email),
            linked_phone: linked(&self.linked_phone, &target.linked_phone),
        };
        (!delta.is_empty()).then_some(delta)
    }

    /// Apply a delta received from a sibling device.
    pub fn apply(&mut self, delta: &ProfileDelta) {
        if let Some(nickname) = &delta.nickname {
            self.nickname = nickname.clone();
        }
        match &delta.profile_picture {
            Some(PictureUpdate::Set(blob_id)) => self.profile_picture = Some(*blob_id),
            Some(PictureUpdate::Remove) => self.profile_picture = None,
            None => {}
        }
        if let Some(email) = &delta.linked_email {
            self.linked_email = (!email.is_empty()).then(|| email.clone());
        }
        if let Some(phone) = &delta.linked_phone {
            self.linked_phone = (!phone.is_empty()).then(|| phone.clone());
        }
    }
}

/// Application settings shared by all linked devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    /// Send read receipts.
    pub read_receipts: bool,
    /// Send typing indicators.
    pub typing_indicators: bool,
    /// Drop messages from unknown identities.
    pub block_unknown: bool,
    /// Synchronize the address book.
    pub sync_contacts: bool,
    /// Allow calls.
    pub allow_calls: bool,
    /// Blocked identities, in order.
    pub blocked_identities: Vec<Identity>,
    /// Identities excluded from address book sync, in order.
    pub excluded_from_sync: Vec<Identity>,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            read_receipts: true,
            typing_indicators: true,
            block_unknown: false,
            sync_contacts: false,
            allow_calls: true,
            blocked_identities: Vec::new(),
            excluded_from_sync: Vec::new(),
        }
    }
}

impl SettingsSnapshot {
    /// Fields that differ in `target`, or `None` if nothing changed.
    pub fn diff(&self, target: &SettingsSnapshot) -> Option<SettingsDelta> {
        let delta = SettingsDelta {
            read_receipts: changed(&self.read_receipts, &target.read_receipts),
            typing_indicators: changed(&self.typing_indicators, &target.typing_indicators),
            block_unknown: changed(&self.block_unknown, &target.block_unknown),
            sync_contacts: changed(&self.sync_contacts, &target.sync_contacts),
            allow_calls: changed(&self.allow_calls, &target.allow_calls),
            blocked_identities: changed(&self.blocked_identities, &target.blocked_identities),
            excluded_from_sync: changed(&self.excluded_from_sync, &target.excluded_from_sync),
        };
        (!delta.is_empty()).then_some(delta)
    }

    /// Apply a delta received from a sibling device.
    pub fn apply(&mut self, delta: &SettingsDelta) {
        if let Some(v) = delta.read_receipts {
            self.read_receipts = v;
        }
        if let Some(v) = delta.typing_indicators {
            self.typing_indicators = v;
        }
        if let Some(v) = delta.block_unknown {
            self.block_unknown = v;
        }
        if let Some(v) = delta.sync_contacts {
            self.sync_contacts = v;
        }
        if let Some(v) = delta.allow_calls {
            self.allow_calls = v;
        }
        if let Some(list) = &delta.blocked_identities {
            self.blocked_identities = list.clone();
        }
        if let Some(list) = &delta.excluded_from_sync {
            self.excluded_from_sync = list.clone();
        }
    }
}

fn differs<T: PartialEq>(current: &Option<T>, update: &Option<T>) -> bool {
    update.is_some() && update != current
}

/// Deltas that would change the stored contacts, in input order.
///
/// A delta for an unknown contact is always pending. A delta for a known
/// contact is pending when any field it sets differs from the stored value.
pub fn pending_contact_deltas(
    current: &BTreeMap<Identity, ContactDelta>,
    deltas: &[ContactDelta],
) -> Vec<ContactDelta> {
    deltas
        .iter()
        .filter(|delta| match current.get(&delta.identity) {
            None => true,
            Some(stored) => {
                differs(&stored.public_key, &delta.public_key)
                    || differs(&stored.first_name, &delta.first_name)
                    || differs(&stored.last_name, &delta.last_name)
                    || differs(&stored.nickname, &delta.nickname)
                    || differs(&stored.verification_level, &delta.verification_level)
            }
        })
        .cloned()
        .collect()
}

/// Apply the fields a delta sets to a stored contact.
pub fn merge_contact(stored: &mut ContactDelta, delta: &ContactDelta) {
    if delta.public_key.is_some() {
        stored.public_key = delta.public_key;
    }
    if delta.first_name.is_some() {
        stored.first_name = delta.first_name.clone();
    }
    if delta.last_name.is_some() {
        stored.last_name = delta.last_name.clone();
    }
    if delta.nickname.is_some() {
        stored.nickname = delta.nickname.clone();
    }
    if delta.verification_level.is_some() {
        stored.verification_level = delta.verification_level;
    }
}

/// Identities of `contacts` that are stored, in input order, without duplicates.
pub fn existing_contacts(
    current: &BTreeMap<Identity, ContactDelta>,
    contacts: &[Identity],
) -> Vec<Identity> {
    let mut out: Vec<Identity> = Vec::new();
    for identity in contacts {
        if current.contains_key(identity) && !out.contains(identity) {
            out.push(*identity);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn profile() -> ProfileSnapshot {
        ProfileSnapshot {
            nickname: "echo".into(),
            profile_picture: Some(BlobId::new()),
            linked_email: Some("echo@example.com".into()),
            linked_phone: Some("+41000000000".into()),
        }
    }

    #[test]
    fn identical_profiles_have_no_delta() {
        let p = profile();
        assert!(p.diff(&p.clone()).is_none());
    }

    #[test]
    fn profile_delta_contains_only_changed_fields() {
        let current = profile();
        let mut target = current.clone();
        target.nickname = "charlie".into();

        let delta = current.diff(&target).unwrap();
        assert_eq!(delta.nickname.as_deref(), Some("charlie"));
        assert!(delta.profile_picture.is_none());
        assert!(delta.linked_email.is_none());
        assert!(delta.linked_phone.is_none());
    }

    #[test]
    fn removing_picture_and_unlinking() {
        let current = profile();
        let target = ProfileSnapshot {
            profile_picture: None,
            linked_email: None,
            ..current.clone()
        };

        let delta = current.diff(&target).unwrap();
        assert_eq!(delta.profile_picture, Some(PictureUpdate::Remove));
        assert_eq!(delta.linked_email.as_deref(), Some(""));
    }

    #[test]
    fn applying_profile_delta_reaches_target() {
        let mut current = profile();
        let target = ProfileSnapshot {
            nickname: "new".into(),
            profile_picture: None,
            linked_email: None,
            linked_phone: Some("+41111111111".into()),
        };

        let delta = current.diff(&target).unwrap();
        current.apply(&delta);
        assert_eq!(current, target);
    }

    #[test]
    fn identical_settings_have_no_delta() {
        let s = SettingsSnapshot::default();
        assert!(s.diff(&SettingsSnapshot::default()).is_none());
    }

    #[test]
    fn settings_delta_replaces_lists() {
        let current = SettingsSnapshot::default();
        let target = SettingsSnapshot {
            read_receipts: false,
            blocked_identities: vec![identity("BBBBBBBB"), identity("AAAAAAAA")],
            ..Default::default()
        };

        let delta = current.diff(&target).unwrap();
        assert_eq!(delta.read_receipts, Some(false));
        assert_eq!(delta.typing_indicators, None);
        assert_eq!(
            delta.blocked_identities,
            Some(vec![identity("BBBBBBBB"), identity("AAAAAAAA")])
        );

        let mut applied = current;
        applied.apply(&delta);
        assert_eq!(applied, target);
    }

    #[test]
    fn contact_deltas_pending_only_when_changing() {
        let alice = identity("AAAAAAAA");
        let bob = identity("BBBBBBBB");
        let mut stored = ContactDelta::new(alice);
        stored.first_name = Some("Alice".into());
        let current: BTreeMap<_, _> = [(alice, stored.clone())].into_iter().collect();

        let mut same = ContactDelta::new(alice);
        same.first_name = Some("Alice".into());
        let mut renamed = ContactDelta::new(alice);
        renamed.nickname = Some("al".into());
        let new_contact = ContactDelta::new(bob);

        let pending =
            pending_contact_deltas(&current, &[same, renamed.clone(), new_contact.clone()]);
        assert_eq!(pending, vec![renamed.clone(), new_contact]);

        merge_contact(&mut stored, &renamed);
        assert_eq!(stored.first_name.as_deref(), Some("Alice"));
        assert_eq!(stored.nickname.as_deref(), Some("al"));
    }

    #[test]
    fn existing_contacts_keeps_order() {
        let a = identity("AAAAAAAA");
        let b = identity("BBBBBBBB");
        let c = identity("CCCCCCCC");
        let current: BTreeMap<_, _> = [(a, ContactDelta::new(a)), (c, ContactDelta::new(c))]
            .into_iter()
            .collect();
        assert_eq!(existing_contacts(&current, &[c, b, a, c]), vec![c, a]);
    }
}
