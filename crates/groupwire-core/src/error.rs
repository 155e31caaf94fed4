//! Error taxonomy for the group-keying core.
//!
//! Errors are grouped by *kind* rather than by one type per kind: each
//! variant maps onto a category from the error-handling design, and
//! [`CoreError::kind`] exposes that category for callers (logging,
//! propagation-policy routing) without requiring a separate type per
//! category.

use thiserror::Error;

use crate::mls::MemberId;

/// Coarse error category, shared with `groupwire-client`'s own error type so
/// that both crates route failures through the same propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed key package event, wrong-kind event, credential mismatch.
    InvalidInput,
    /// Corrupted state bytes, malformed extension, unparseable welcome.
    Decode,
    /// Unreadable envelope: wrong epoch, corrupted ciphertext, non-member sender.
    Decrypt,
    /// Commit from non-admin, commit processed against the wrong epoch.
    ProtocolViolation,
    /// Welcome references an unknown commit, commit references missing proposals.
    Ordering,
    /// Key-value backend I/O error.
    Storage,
    /// No ack from any relay, inbox discovery timeout.
    Network,
    /// Key package lacks required extension signaling.
    CapabilityViolation,
}

/// Errors produced by group creation, message pipeline, ingestion, admin
/// policy, and welcome handling.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed input that the caller must not retry unmodified.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Failed to decode persisted or wire-format bytes.
    #[error("decode failure: {0}")]
    Decode(String),

    /// An envelope could not be authenticated/decrypted under the current
    /// (or any retried) epoch secret.
    #[error("decrypt failure: {0}")]
    Decrypt(String),

    /// A commit or proposal violated protocol policy (e.g. non-admin sender).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A welcome or commit referenced state that is not (yet) known locally.
    #[error("ordering failure: {0}")]
    Ordering(String),

    /// A key package, or a member within a group, lacked a required capability.
    #[error("capability violation: {0}")]
    CapabilityViolation(String),

    /// An underlying MLS library operation failed for a reason not otherwise
    /// classified above (key generation, tree operations, storage writes
    /// internal to the MLS provider).
    #[error("mls operation failed: {0}")]
    Mls(String),

    /// A referenced group member could not be resolved to a leaf in the tree.
    #[error("member {0} not found in group")]
    MemberNotFound(MemberId),

    /// Failed to read or write the backing storage used to persist or
    /// restore client state (e.g. the temp-file round-trip through
    /// `MemoryStorage`'s persistence feature).
    #[error("storage failure: {0}")]
    Storage(String),
}

impl CoreError {
    /// Maps this error onto one of the error-handling design's eight
    /// categories.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Decrypt(_) => ErrorKind::Decrypt,
            Self::ProtocolViolation(_) | Self::MemberNotFound(_) => ErrorKind::ProtocolViolation,
            Self::Ordering(_) => ErrorKind::Ordering,
            Self::CapabilityViolation(_) => ErrorKind::CapabilityViolation,
            Self::Mls(_) => ErrorKind::ProtocolViolation,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True for categories that `ingest()` collects into its `unreadable`
    /// bucket rather than failing the whole batch (decrypt and ordering
    /// failures).
    pub fn is_batch_tolerable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Decrypt | ErrorKind::Ordering)
    }
}

impl From<groupwire_codec::CodecError> for CoreError {
    fn from(err: groupwire_codec::CodecError) -> Self {
        Self::Decode(err.to_string())
    }
}
