//! Application-facing API over the group-keying core: the invite inbox
//! (C10), the single-group facade (C11), and the multi-group client (C12).
//!
//! This crate defines the external-collaborator traits the core treats as
//! consumed dependencies (the event-network interface, the signer, and the
//! gift-wrap privacy envelope) and wires `groupwire_core`'s components
//! (C1-C9) into the operations an application actually calls: create a
//! group, invite a member, send a message, ingest a batch of relay events,
//! and manage incoming invites.
//!
//! # Components
//!
//! - [`collaborators`]: `RelayNetwork`, `Signer`, `GiftWrap` — the traits an
//!   application implements to plug this crate into a concrete relay
//!   transport, key custody, and privacy-envelope scheme.
//! - [`custody`]: key-package custody store (C4), wrapping the `KvStore`
//!   storage interface around `groupwire_core`'s generated key packages.
//! - [`inbox`]: the invite inbox (C10) — deduplicated gift-wrap ingestion,
//!   on-demand decryption, and unread/read state.
//! - [`facade`]: [`facade::GroupHandle`] (C11) — the single-group API.
//! - [`client`]: [`client::GroupwireClient`] (C12) — the multi-group
//!   registry with load deduplication.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod client;
pub mod collaborators;
pub mod custody;
pub mod error;
pub mod facade;
pub mod inbox;

#[cfg(any(test, feature = "test-util"))]
pub mod test_support;

pub use client::GroupwireClient;
pub use collaborators::{Filter, GiftWrap, RelayNetwork, SignedEvent, Signer};
pub use custody::KeyPackageCustody;
pub use error::ClientError;
pub use facade::{GroupHandle, GroupSignal};
pub use inbox::InviteInbox;
