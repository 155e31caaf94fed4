//! External-collaborator traits (§6): the event network, the signer, and
//! the gift-wrap privacy envelope. An application implements these against
//! its own relay transport, key custody, and privacy scheme; this crate
//! only consumes them.

use std::collections::HashMap;

use async_trait::async_trait;

use groupwire_core::event::UnsignedEvent;

use crate::error::ClientError;

/// An event signed and ready to publish: the unsigned rumor plus the
/// signer's signature over its canonical serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEvent {
    /// The signed event's fields.
    pub event: UnsignedEvent,
    /// Hex-encoded signature over `event`'s canonical serialization.
    pub signature: String,
}

/// A subscription/request filter over the event network. Left deliberately
/// small: kinds, tag matches, and an optional time lower bound cover every
/// query this crate issues (welcome/gift-wrap/key-package lookups).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Restrict to these event kinds, if non-empty.
    pub kinds: Vec<u32>,
    /// Restrict to events carrying at least one of these exact `(tag_name,
    /// tag_value)` pairs as their tag's first two elements.
    pub tags: Vec<(String, String)>,
    /// Restrict to events with `created_at >= since`, if set.
    pub since: Option<u64>,
}

/// The event-network interface consumed (not provided) by this crate.
///
/// Every method is a suspension point (§5): publishing, requesting, and
/// subscribing all involve relay I/O the core has no visibility into.
#[async_trait]
pub trait RelayNetwork: Send + Sync {
    /// Publishes `event` to each of `relays`, returning each relay's
    /// acknowledgement or error.
    async fn publish(&self, relays: &[String], event: SignedEvent) -> Result<HashMap<String, Result<(), String>>, ClientError>;

    /// Fetches events from `relays` matching `filter` once.
    async fn request(&self, relays: &[String], filter: Filter) -> Result<Vec<UnsignedEvent>, ClientError>;

    /// The identity's published inbox relay list (kind 10051), used as the
    /// fallback target set when dispatching a welcome if the group's own
    /// relay hints are unavailable.
    async fn get_user_inbox_relays(&self, identity: [u8; 32]) -> Result<Vec<String>, ClientError>;
}

/// The identity signer interface consumed (not provided) by this crate.
#[async_trait]
pub trait Signer: Send + Sync {
    /// This signer's public identity.
    fn get_public_key(&self) -> [u8; 32];

    /// Signs `event`, producing a publishable [`SignedEvent`].
    async fn sign_event(&self, event: UnsignedEvent) -> Result<SignedEvent, ClientError>;
}

/// The gift-wrap privacy envelope consumed (not provided) by this crate:
/// wraps an inner rumor for a specific recipient, and unwraps an envelope
/// addressed to this signer's own identity.
#[async_trait]
pub trait GiftWrap: Send + Sync {
    /// Wraps `rumor` as a kind-1059 event addressed to `recipient`.
    async fn wrap(&self, rumor: UnsignedEvent, recipient: [u8; 32]) -> Result<SignedEvent, ClientError>;

    /// Unwraps a gift-wrap event addressed to this signer's identity,
    /// returning the inner rumor it concealed.
    async fn unwrap(&self, gift_wrap: &UnsignedEvent) -> Result<UnsignedEvent, ClientError>;
}
