//! Admin policy enforcement (C8): only identities listed in a group's
//! group-data extension `admins` list may author accepted commits.

use groupwire_codec::GroupDataExtension;

use crate::config::UnverifiableCommitPolicy;
use crate::mls::credential::Identity;

/// Evaluates whether an inbound commit is allowed to advance group state.
pub struct AdminPolicy {
    on_unverifiable_commit: UnverifiableCommitPolicy,
}

impl AdminPolicy {
    /// Builds a policy that rejects commits whose sender cannot be verified
    /// when `on_unverifiable_commit` is [`UnverifiableCommitPolicy::Reject`].
    pub fn new(on_unverifiable_commit: UnverifiableCommitPolicy) -> Self {
        Self { on_unverifiable_commit }
    }

    /// True iff a commit from `sender` (resolved from the commit's leaf
    /// credential, or `None` if that resolution failed) should be applied.
    ///
    /// A commit whose sender could not be resolved at all defers to
    /// `on_unverifiable_commit`; a commit from a resolved non-admin identity
    /// is always rejected regardless of that setting.
    pub fn accepts(&self, group_data: &GroupDataExtension, sender: Option<&Identity>) -> bool {
        match sender {
            Some(identity) => group_data.is_admin(&groupwire_codec::primitives::to_hex(identity)),
            None => self.on_unverifiable_commit == UnverifiableCommitPolicy::Accept,
        }
    }
}

impl Default for AdminPolicy {
    fn default() -> Self {
        Self::new(UnverifiableCommitPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_data(admins: Vec<String>) -> GroupDataExtension {
        GroupDataExtension::new([1u8; 32], "room", "", admins, vec![])
    }

    #[test]
    fn accepts_commit_from_admin_identity() {
        let admin: Identity = [5u8; 32];
        let data = group_data(vec![groupwire_codec::primitives::to_hex(&admin)]);
        let policy = AdminPolicy::default();
        assert!(policy.accepts(&data, Some(&admin)));
    }

    #[test]
    fn rejects_commit_from_non_admin_identity() {
        let admin: Identity = [5u8; 32];
        let outsider: Identity = [6u8; 32];
        let data = group_data(vec![groupwire_codec::primitives::to_hex(&admin)]);
        let policy = AdminPolicy::default();
        assert!(!policy.accepts(&data, Some(&outsider)));
    }

    #[test]
    fn unverifiable_sender_defers_to_configured_policy() {
        let data = group_data(vec![]);

        let reject_policy = AdminPolicy::new(UnverifiableCommitPolicy::Reject);
        assert!(!reject_policy.accepts(&data, None));

        let accept_policy = AdminPolicy::new(UnverifiableCommitPolicy::Accept);
        assert!(accept_policy.accepts(&data, None));
    }
}
