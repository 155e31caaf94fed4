//! In-memory collaborator fakes shared by this crate's own tests and
//! exposed to downstream test suites via the `test-util` feature, the same
//! way `groupwire_core::env::test_support` exposes `TestEnvironment`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use async_trait::async_trait;

use groupwire_core::error::CoreError;
use groupwire_core::event::UnsignedEvent;
use groupwire_core::store::KvStore;

use crate::collaborators::{Filter, GiftWrap, RelayNetwork, SignedEvent, Signer};
use crate::error::ClientError;

/// An in-process [`KvStore`] backed by a mutex-guarded map, for tests.
pub struct MemoryKvStore<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K, V> MemoryKvStore<K, V> {
    /// Builds an empty store.
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }
}

impl<K, V> Default for MemoryKvStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> KvStore<K, V> for MemoryKvStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &K) -> Result<Option<V>, CoreError> {
        Ok(self.entries.lock().expect("lock not poisoned").get(key).cloned())
    }

    async fn set(&self, key: K, value: V) -> Result<(), CoreError> {
        self.entries.lock().expect("lock not poisoned").insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<(), CoreError> {
        self.entries.lock().expect("lock not poisoned").remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<V>, CoreError> {
        Ok(self.entries.lock().expect("lock not poisoned").values().cloned().collect())
    }

    async fn keys(&self) -> Result<Vec<K>, CoreError> {
        Ok(self.entries.lock().expect("lock not poisoned").keys().cloned().collect())
    }
}

/// A signer fake that signs by appending a fixed marker; good enough to
/// exercise every call site without a real signature scheme.
pub struct FakeSigner {
    identity: [u8; 32],
}

impl FakeSigner {
    /// Builds a fake signer for `identity`.
    pub fn new(identity: [u8; 32]) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl Signer for FakeSigner {
    fn get_public_key(&self) -> [u8; 32] {
        self.identity
    }

    async fn sign_event(&self, event: UnsignedEvent) -> Result<SignedEvent, ClientError> {
        Ok(SignedEvent { signature: format!("sig-{}", event.id), event })
    }
}

/// A gift-wrap fake that "encrypts" by embedding the inner rumor's JSON as
/// the outer event's content, tagged with the recipient's hex identity.
pub struct FakeGiftWrap;

#[async_trait]
impl GiftWrap for FakeGiftWrap {
    async fn wrap(&self, rumor: UnsignedEvent, recipient: [u8; 32]) -> Result<SignedEvent, ClientError> {
        let mut wrapper = UnsignedEvent::new(
            [0u8; 32],
            groupwire_core::event::KIND_GIFT_WRAP,
            rumor.created_at,
            rumor.to_json(),
            vec![vec!["p".to_string(), groupwire_codec::primitives::to_hex(&recipient)]],
        );
        wrapper.ensure_id();
        Ok(SignedEvent { signature: format!("sig-{}", wrapper.id), event: wrapper })
    }

    async fn unwrap(&self, gift_wrap: &UnsignedEvent) -> Result<UnsignedEvent, ClientError> {
        if gift_wrap.kind != groupwire_core::event::KIND_GIFT_WRAP {
            return Err(ClientError::InvalidInput(format!(
                "expected kind {}, got {}",
                groupwire_core::event::KIND_GIFT_WRAP,
                gift_wrap.kind
            )));
        }
        UnsignedEvent::from_json(gift_wrap.content.as_bytes()).map_err(ClientError::from)
    }
}

/// A relay network fake that records published events in memory and serves
/// `request` from that same log; good enough for facade/client tests that
/// never cross an actual network boundary.
pub struct FakeRelayNetwork {
    published: Mutex<Vec<UnsignedEvent>>,
    inbox_relays: Mutex<HashMap<[u8; 32], Vec<String>>>,
}

impl FakeRelayNetwork {
    /// Builds an empty fake network.
    pub fn new() -> Self {
        Self { published: Mutex::new(Vec::new()), inbox_relays: Mutex::new(HashMap::new()) }
    }

    /// Registers `relays` as `identity`'s discoverable inbox relay list.
    pub fn set_inbox_relays(&self, identity: [u8; 32], relays: Vec<String>) {
        self.inbox_relays.lock().expect("lock not poisoned").insert(identity, relays);
    }

    /// Every event ever published through this fake, in publish order.
    pub fn published_events(&self) -> Vec<UnsignedEvent> {
        self.published.lock().expect("lock not poisoned").clone()
    }
}

impl Default for FakeRelayNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayNetwork for FakeRelayNetwork {
    async fn publish(&self, relays: &[String], event: SignedEvent) -> Result<HashMap<String, Result<(), String>>, ClientError> {
        self.published.lock().expect("lock not poisoned").push(event.event);
        Ok(relays.iter().map(|r| (r.clone(), Ok(()))).collect())
    }

    async fn request(&self, _relays: &[String], filter: Filter) -> Result<Vec<UnsignedEvent>, ClientError> {
        let published = self.published.lock().expect("lock not poisoned");
        Ok(published
            .iter()
            .filter(|event| filter.kinds.is_empty() || filter.kinds.contains(&event.kind))
            .filter(|event| filter.since.is_none_or(|since| event.created_at >= since))
            .filter(|event| {
                filter.tags.is_empty()
                    || filter.tags.iter().any(|(name, value)| {
                        event.find_tag(name).and_then(|t| t.get(1)).is_some_and(|v| v == value)
                    })
            })
            .cloned()
            .collect())
    }

    async fn get_user_inbox_relays(&self, identity: [u8; 32]) -> Result<Vec<String>, ClientError> {
        Ok(self.inbox_relays.lock().expect("lock not poisoned").get(&identity).cloned().unwrap_or_default())
    }
}
