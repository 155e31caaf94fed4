//! Error taxonomy for the application-facing client.
//!
//! Mirrors `groupwire_core::error::CoreError`'s kind-based shape so that
//! both crates route failures through the same propagation policy: most
//! categories surface synchronously to the caller, while history-layer
//! failures (storage I/O during inbox or facade bookkeeping) are emitted as
//! non-blocking signals instead of failing the triggering call.

use thiserror::Error;

use groupwire_core::error::{CoreError, ErrorKind};

/// Errors produced by the invite inbox, group facade, and multi-group client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Malformed input the caller must not retry unmodified (wrong event
    /// kind, credential mismatch on invite, missing custody entry).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A group-keying-core operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The key-value backend failed to read or write.
    #[error("storage failure: {0}")]
    Storage(String),

    /// The event-network collaborator failed to publish or fetch.
    #[error("network failure: {0}")]
    Network(String),

    /// No loaded or stored group matched the requested id.
    #[error("group {0} not found")]
    GroupNotFound(String),
}

impl ClientError {
    /// Maps this error onto one of the error-handling design's categories.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::GroupNotFound(_) => ErrorKind::InvalidInput,
            Self::Core(err) => err.kind(),
            Self::Storage(_) => ErrorKind::Storage,
            Self::Network(_) => ErrorKind::Network,
        }
    }

    /// True for failures the inbox/facade should report as a non-blocking
    /// signal rather than fail the triggering call on (storage I/O during
    /// bookkeeping that is not itself the operation the caller asked for).
    pub fn is_history_failure(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
