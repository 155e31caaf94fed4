//! Invite inbox (C10): deduplicated gift-wrap ingestion, on-demand
//! decryption, and unread/read state machine transitions (received →
//! unread → consumed).
//!
//! Backed by three [`KvStore`] namespaces per the data model in §3: `seen`
//! is a one-way ratchet (never cleared by ordinary operations), `received`
//! holds still-encrypted gift-wraps awaiting [`InviteInbox::decrypt_received`],
//! and `unread` holds decrypted welcome rumors awaiting user action.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;

use groupwire_core::event::{UnsignedEvent, KIND_GIFT_WRAP, KIND_WELCOME};
use groupwire_core::mls::welcome::extract_welcome_bytes;
use groupwire_core::store::KvStore;

use crate::collaborators::GiftWrap;
use crate::error::ClientError;

const SIGNAL_CHANNEL_CAPACITY: usize = 256;

/// A lifecycle signal emitted by the invite inbox.
#[derive(Debug, Clone)]
pub enum InboxSignal {
    /// A previously-unseen gift-wrap was recorded in `received`.
    Received {
        /// The gift-wrap's event id.
        gift_wrap_id: String,
    },
    /// A gift-wrap was unwrapped and moved into `unread`.
    NewInvite {
        /// The decrypted welcome rumor's id.
        welcome_rumor_id: String,
    },
    /// A gift-wrap could not be unwrapped or the welcome it concealed was
    /// structurally invalid; the entry was dropped from `received`.
    Error {
        /// The gift-wrap's event id.
        gift_wrap_id: String,
        /// Human-readable failure reason.
        reason: String,
    },
}

/// The invite inbox: three namespaces plus the signal/watch plumbing
/// observing their mutations.
pub struct InviteInbox<Received, Unread, Seen>
where
    Received: KvStore<String, Vec<u8>>,
    Unread: KvStore<String, Vec<u8>>,
    Seen: KvStore<String, Vec<u8>>,
{
    received: Received,
    unread: Unread,
    seen: Seen,
    signals: broadcast::Sender<InboxSignal>,
    unread_watch: watch::Sender<Vec<UnsignedEvent>>,
}

impl<Received, Unread, Seen> InviteInbox<Received, Unread, Seen>
where
    Received: KvStore<String, Vec<u8>>,
    Unread: KvStore<String, Vec<u8>>,
    Seen: KvStore<String, Vec<u8>>,
{
    /// Wraps the three backing stores as an invite inbox.
    pub fn new(received: Received, unread: Unread, seen: Seen) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        let (unread_watch, _) = watch::channel(Vec::new());
        Self { received, unread, seen, signals, unread_watch }
    }

    /// Subscribes to lifecycle signals.
    pub fn subscribe(&self) -> broadcast::Receiver<InboxSignal> {
        self.signals.subscribe()
    }

    fn emit(&self, signal: InboxSignal) {
        let _no_receivers = self.signals.send(signal);
    }

    /// Records a newly-received gift-wrap, deduplicated by event id.
    ///
    /// Returns `true` iff this gift-wrap had not been seen before. A
    /// repeat delivery of the same id is a no-op beyond the dedup check —
    /// `seen` never clears on its own.
    pub async fn ingest_event(&self, gift_wrap: UnsignedEvent) -> Result<bool, ClientError> {
        if gift_wrap.kind != KIND_GIFT_WRAP {
            return Err(ClientError::InvalidInput(format!(
                "expected kind {KIND_GIFT_WRAP}, got {}",
                gift_wrap.kind
            )));
        }

        if self.seen.get(&gift_wrap.id).await.map_err(|e| ClientError::Storage(e.to_string()))?.is_some() {
            return Ok(false);
        }

        self.seen
            .set(gift_wrap.id.clone(), vec![1])
            .await
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        self.received
            .set(gift_wrap.id.clone(), gift_wrap.to_json().into_bytes())
            .await
            .map_err(|e| ClientError::Storage(e.to_string()))?;

        self.emit(InboxSignal::Received { gift_wrap_id: gift_wrap.id.clone() });
        Ok(true)
    }

    /// Unlocks every entry in `received` via `gift_wrap`, moving each
    /// structurally-valid welcome into `unread` and dropping (from
    /// `received` only) any entry that fails to unwrap or parse.
    ///
    /// Decryption is split from ingestion because unlocking may require
    /// user interaction (a signer prompt); the caller decides when to pay
    /// that cost.
    pub async fn decrypt_received(&self, gift_wrap: &dyn GiftWrap) -> Result<(), ClientError> {
        let entries = self.received.list().await.map_err(|e| ClientError::Storage(e.to_string()))?;

        for bytes in entries {
            let wrapped = UnsignedEvent::from_json(&bytes)?;

            match self.unwrap_one(gift_wrap, &wrapped).await {
                Ok(rumor_id) => self.emit(InboxSignal::NewInvite { welcome_rumor_id: rumor_id }),
                Err(err) => {
                    self.emit(InboxSignal::Error { gift_wrap_id: wrapped.id.clone(), reason: err.to_string() });
                    self.received
                        .remove(&wrapped.id)
                        .await
                        .map_err(|e| ClientError::Storage(e.to_string()))?;
                },
            }
        }

        self.refresh_unread_watch().await?;
        Ok(())
    }

    async fn unwrap_one(&self, gift_wrap: &dyn GiftWrap, wrapped: &UnsignedEvent) -> Result<String, ClientError> {
        let rumor = gift_wrap.unwrap(wrapped).await?;
        if rumor.kind != KIND_WELCOME {
            return Err(ClientError::InvalidInput(format!("expected kind {KIND_WELCOME}, got {}", rumor.kind)));
        }
        extract_welcome_bytes(&rumor)?;

        self.unread
            .set(rumor.id.clone(), rumor.to_json().into_bytes())
            .await
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        self.received
            .remove(&wrapped.id)
            .await
            .map_err(|e| ClientError::Storage(e.to_string()))?;

        Ok(rumor.id)
    }

    /// The current set of decrypted, unread welcome rumors.
    pub async fn get_unread(&self) -> Result<Vec<UnsignedEvent>, ClientError> {
        let entries = self.unread.list().await.map_err(|e| ClientError::Storage(e.to_string()))?;
        entries.iter().map(|bytes| UnsignedEvent::from_json(bytes).map_err(ClientError::from)).collect()
    }

    /// Marks welcome rumor `id` as consumed, removing it from `unread`.
    pub async fn mark_as_read(&self, id: &str) -> Result<(), ClientError> {
        self.unread.remove(&id.to_string()).await.map_err(|e| ClientError::Storage(e.to_string()))?;
        self.refresh_unread_watch().await
    }

    /// Empties `received` and `unread`. `seen` is untouched.
    pub async fn clear(&self) -> Result<(), ClientError> {
        for key in self.received.keys().await.map_err(|e| ClientError::Storage(e.to_string()))? {
            self.received.remove(&key).await.map_err(|e| ClientError::Storage(e.to_string()))?;
        }
        for key in self.unread.keys().await.map_err(|e| ClientError::Storage(e.to_string()))? {
            self.unread.remove(&key).await.map_err(|e| ClientError::Storage(e.to_string()))?;
        }
        self.refresh_unread_watch().await
    }

    /// Empties `seen`. Explicitly destructive: re-enables replay of
    /// previously processed gift-wraps.
    pub async fn clear_seen(&self) -> Result<(), ClientError> {
        for key in self.seen.keys().await.map_err(|e| ClientError::Storage(e.to_string()))? {
            self.seen.remove(&key).await.map_err(|e| ClientError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    async fn refresh_unread_watch(&self) -> Result<(), ClientError> {
        let unread = self.get_unread().await?;
        let _no_receivers = self.unread_watch.send(unread);
        Ok(())
    }

    /// An async sequence yielding the current unread list immediately, then
    /// again on every subsequent mutation.
    pub fn watch_unread(self: &Arc<Self>) -> WatchStream<Vec<UnsignedEvent>> {
        WatchStream::new(self.unread_watch.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groupwire_core::event::{UnsignedEvent, KIND_GROUP_MESSAGE};

    use crate::test_support::{FakeGiftWrap, MemoryKvStore};

    fn new_inbox() -> InviteInbox<MemoryKvStore<String, Vec<u8>>, MemoryKvStore<String, Vec<u8>>, MemoryKvStore<String, Vec<u8>>> {
        InviteInbox::new(MemoryKvStore::new(), MemoryKvStore::new(), MemoryKvStore::new())
    }

    fn gift_wrap_for(rumor: &UnsignedEvent, recipient: [u8; 32], created_at: u64) -> UnsignedEvent {
        let mut wrapper = UnsignedEvent::new(
            [0u8; 32],
            KIND_GIFT_WRAP,
            created_at,
            rumor.to_json(),
            vec![vec!["p".to_string(), groupwire_codec::primitives::to_hex(&recipient)]],
        );
        wrapper.ensure_id();
        wrapper
    }

    #[tokio::test]
    async fn duplicate_gift_wrap_is_deduplicated() {
        let inbox = new_inbox();
        let rumor = UnsignedEvent::new([1u8; 32], KIND_WELCOME, 1, "d2VsY29tZQ==".to_string(), vec![]);
        let wrap = gift_wrap_for(&rumor, [2u8; 32], 1);

        assert!(inbox.ingest_event(wrap.clone()).await.unwrap());
        assert!(!inbox.ingest_event(wrap.clone()).await.unwrap());

        let received_keys = inbox.received.keys().await.unwrap();
        assert_eq!(received_keys.len(), 1);
    }

    #[tokio::test]
    async fn ingest_event_rejects_wrong_kind() {
        let inbox = new_inbox();
        let event = UnsignedEvent::new([1u8; 32], KIND_GROUP_MESSAGE, 1, String::new(), vec![]);
        assert!(inbox.ingest_event(event).await.is_err());
    }

    #[tokio::test]
    async fn decrypt_received_moves_valid_welcome_to_unread() {
        let inbox = new_inbox();
        let rumor = UnsignedEvent::new([1u8; 32], KIND_WELCOME, 1, "d2VsY29tZQ==".to_string(), vec![]);
        let wrap = gift_wrap_for(&rumor, [9u8; 32], 1);
        inbox.ingest_event(wrap).await.unwrap();

        inbox.decrypt_received(&FakeGiftWrap).await.unwrap();

        let unread = inbox.get_unread().await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, rumor.id);
        assert!(inbox.received.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn decrypt_received_drops_non_welcome_inner_event_from_received_only() {
        let inbox = new_inbox();
        let not_a_welcome = UnsignedEvent::new([1u8; 32], KIND_GROUP_MESSAGE, 1, String::new(), vec![]);
        let wrap = gift_wrap_for(&not_a_welcome, [9u8; 32], 1);
        inbox.ingest_event(wrap.clone()).await.unwrap();

        inbox.decrypt_received(&FakeGiftWrap).await.unwrap();

        assert!(inbox.get_unread().await.unwrap().is_empty());
        assert!(inbox.received.keys().await.unwrap().is_empty());
        assert!(inbox.seen.get(&wrap.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn mark_as_read_removes_from_unread() {
        let inbox = new_inbox();
        let rumor = UnsignedEvent::new([1u8; 32], KIND_WELCOME, 1, "d2VsY29tZQ==".to_string(), vec![]);
        let wrap = gift_wrap_for(&rumor, [9u8; 32], 1);
        inbox.ingest_event(wrap).await.unwrap();
        inbox.decrypt_received(&FakeGiftWrap).await.unwrap();

        inbox.mark_as_read(&rumor.id).await.unwrap();
        assert!(inbox.get_unread().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_empties_received_and_unread_but_not_seen() {
        let inbox = new_inbox();
        let rumor = UnsignedEvent::new([1u8; 32], KIND_WELCOME, 1, "d2VsY29tZQ==".to_string(), vec![]);
        let wrap = gift_wrap_for(&rumor, [9u8; 32], 1);
        inbox.ingest_event(wrap.clone()).await.unwrap();
        inbox.decrypt_received(&FakeGiftWrap).await.unwrap();

        inbox.clear().await.unwrap();

        assert!(inbox.get_unread().await.unwrap().is_empty());
        assert!(inbox.received.keys().await.unwrap().is_empty());
        assert!(inbox.seen.get(&wrap.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_seen_re_enables_replay() {
        let inbox = new_inbox();
        let rumor = UnsignedEvent::new([1u8; 32], KIND_WELCOME, 1, "d2VsY29tZQ==".to_string(), vec![]);
        let wrap = gift_wrap_for(&rumor, [9u8; 32], 1);
        inbox.ingest_event(wrap.clone()).await.unwrap();

        inbox.clear_seen().await.unwrap();

        assert!(inbox.ingest_event(wrap).await.unwrap());
    }
}
