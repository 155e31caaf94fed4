//! Configuration surface (§6).
//!
//! Loading configuration from a file or environment is the caller's
//! concern; this module only defines the recognized tunables and their
//! defaults. Unknown fields are rejected at deserialization time.

use serde::{Deserialize, Serialize};

/// Policy applied to a commit whose sender leaf cannot be resolved to an
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnverifiableCommitPolicy {
    /// Reject the commit (default).
    Reject,
    /// Accept the commit despite being unable to verify the sender.
    Accept,
}

impl Default for UnverifiableCommitPolicy {
    fn default() -> Self {
        Self::Reject
    }
}

/// The full set of recognized configuration tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupwireConfig {
    /// Retries of a whole ingest batch on ordering-related failures.
    #[serde(default = "default_ingest_max_retries")]
    pub ingest_max_retries: u32,

    /// Behavior when a commit's sender leaf cannot be resolved.
    #[serde(default)]
    pub on_unverifiable_commit: UnverifiableCommitPolicy,

    /// Default key package lifetime, in seconds.
    #[serde(default = "default_key_package_lifetime_secs")]
    pub key_package_lifetime_secs: u64,
}

fn default_ingest_max_retries() -> u32 {
    3
}

fn default_key_package_lifetime_secs() -> u64 {
    7_776_000
}

impl Default for GroupwireConfig {
    fn default() -> Self {
        Self {
            ingest_max_retries: default_ingest_max_retries(),
            on_unverifiable_commit: UnverifiableCommitPolicy::default(),
            key_package_lifetime_secs: default_key_package_lifetime_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = GroupwireConfig::default();
        assert_eq!(config.ingest_max_retries, 3);
        assert_eq!(config.on_unverifiable_commit, UnverifiableCommitPolicy::Reject);
        assert_eq!(config.key_package_lifetime_secs, 7_776_000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let json = r#"{"ingest_max_retries": 5, "unknown_field": true}"#;
        let result: Result<GroupwireConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: GroupwireConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, GroupwireConfig::default());
    }
}
