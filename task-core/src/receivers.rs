//! Receiver resolution for group fan-out.

use std::collections::{BTreeMap, BTreeSet};
use task_types::{Identity, Nonce};

/// A group whose only member is the local identity needs no network sync.
pub fn is_note_group(members: &[Identity], me: &Identity) -> bool {
    members.iter().all(|member| member == me)
}

/// Members that still need the message, in member order.
///
/// Drops the local identity, blocked identities, receivers the relay already
/// accepted the message for, and duplicates.
pub fn fan_out(
    members: &[Identity],
    me: &Identity,
    blocked: &BTreeSet<Identity>,
    already_sent: &BTreeMap<Identity, Nonce>,
) -> Vec<Identity> {
    let mut seen = BTreeSet::new();
    members
        .iter()
        .filter(|member| *member != me)
        .filter(|member| !blocked.contains(*member))
        .filter(|member| !already_sent.contains_key(*member))
        .filter(|member| seen.insert(**member))
        .copied()
        .collect()
}
