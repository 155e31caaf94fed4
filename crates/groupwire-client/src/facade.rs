//! Single-group facade (C11): send, propose, commit, invite, ingest, save,
//! destroy for one group, plus the lifecycle signals an application
//! subscribes to.
//!
//! The MLS library classifies every group-message event as application,
//! proposal, or commit content only once it has been decrypted and handed
//! to [`groupwire_core::mls::group::ClientState::process_inbound`]; on the
//! way out, this facade is the only place that ever builds a kind-445
//! event, since every outbound message — application data, a standalone
//! proposal, or a commit — follows the same encrypt-sign-publish shape
//! (§4.6, §4.11).

use std::sync::Arc;

use openmls::prelude::KeyPackage;
use openmls_basic_credential::SignatureKeyPair;
use openmls_traits::signatures::Signer as MlsSigner;
use tokio::sync::{broadcast, Mutex};

use groupwire_core::config::GroupwireConfig;
use groupwire_core::env::Environment;
use groupwire_core::event::{Tag, UnsignedEvent, KIND_GROUP_MESSAGE, KIND_KEY_PACKAGE};
use groupwire_core::mls::admin::AdminPolicy;
use groupwire_core::mls::group::{ClientState, MemberId};
use groupwire_core::mls::ingest::{self, IngestOutcome};
use groupwire_core::mls::key_package::{self, CIPHERSUITE};
use groupwire_core::mls::{credential, message, welcome};
use groupwire_core::store::KvStore;

use crate::collaborators::{GiftWrap, RelayNetwork, SignedEvent, Signer};
use crate::custody::KeyPackageCustody;
use crate::error::ClientError;

const SIGNAL_CHANNEL_CAPACITY: usize = 256;

/// A lifecycle signal emitted by a group facade.
#[derive(Debug, Clone)]
pub enum GroupSignal {
    /// The group's MLS state advanced (a commit was built or merged).
    StateChanged,
    /// A decrypted application rumor is ready for the application.
    ApplicationMessage {
        /// The decoded application rumor.
        rumor: UnsignedEvent,
    },
    /// State was durably written through the group-state store.
    StateSaved,
    /// A history-layer (storage) failure occurred; message processing is
    /// not gated on it.
    HistoryError {
        /// Human-readable failure reason.
        reason: String,
    },
    /// This group was destroyed.
    Destroyed,
}

/// Builds an unsigned kind-445 event, sending it with a freshly generated,
/// one-shot signing key pair so the publisher is never the sender's real
/// identity (§4.6 "the publisher key is never the sender's identity").
fn sign_with_ephemeral_publisher(
    kind: u32,
    created_at: u64,
    content: String,
    tags: Vec<Tag>,
) -> Result<SignedEvent, ClientError> {
    let keypair = SignatureKeyPair::new(CIPHERSUITE.signature_algorithm())
        .map_err(|e| ClientError::InvalidInput(format!("failed to generate ephemeral publisher key: {e}")))?;
    let publisher: [u8; 32] = keypair
        .public()
        .try_into()
        .map_err(|_| ClientError::InvalidInput("ephemeral publisher key is not 32 bytes".to_string()))?;

    let event = UnsignedEvent::new(publisher, kind, created_at, content, tags);
    let signature = MlsSigner::sign(&keypair, event.to_json().as_bytes())
        .map_err(|e| ClientError::InvalidInput(format!("failed to sign with ephemeral publisher key: {e}")))?;

    Ok(SignedEvent { event, signature: groupwire_codec::primitives::to_hex(&signature) })
}

/// The single-group API (C11): a live [`ClientState`] plus the external
/// collaborators needed to turn its operations into published events.
pub struct GroupHandle<E: Environment> {
    env: E,
    state: Mutex<ClientState<E>>,
    admin_policy: AdminPolicy,
    ingest_max_retries: u32,
    group_store: Arc<dyn KvStore<String, Vec<u8>>>,
    custody: KeyPackageCustody<E, Arc<dyn KvStore<Vec<u8>, Vec<u8>>>>,
    network: Arc<dyn RelayNetwork>,
    signer: Arc<dyn Signer>,
    gift_wrap: Arc<dyn GiftWrap>,
    signals: broadcast::Sender<GroupSignal>,
}

impl<E: Environment> GroupHandle<E> {
    /// Wraps a live client state as a group facade.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        env: E,
        state: ClientState<E>,
        config: &GroupwireConfig,
        group_store: Arc<dyn KvStore<String, Vec<u8>>>,
        custody: KeyPackageCustody<E, Arc<dyn KvStore<Vec<u8>, Vec<u8>>>>,
        network: Arc<dyn RelayNetwork>,
        signer: Arc<dyn Signer>,
        gift_wrap: Arc<dyn GiftWrap>,
    ) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            env,
            state: Mutex::new(state),
            admin_policy: AdminPolicy::new(config.on_unverifiable_commit),
            ingest_max_retries: config.ingest_max_retries,
            group_store,
            custody,
            network,
            signer,
            gift_wrap,
            signals,
        }
    }

    /// Subscribes to this group's lifecycle signals.
    pub fn subscribe(&self) -> broadcast::Receiver<GroupSignal> {
        self.signals.subscribe()
    }

    fn emit(&self, signal: GroupSignal) {
        let _no_receivers = self.signals.send(signal);
    }

    /// The network-facing group id, hex-encoded.
    pub async fn group_id_hex(&self) -> String {
        let state = self.state.lock().await;
        groupwire_codec::primitives::to_hex(state.group_id().as_slice())
    }

    /// Current epoch.
    pub async fn epoch(&self) -> u64 {
        self.state.lock().await.epoch()
    }

    /// Count of occupied leaves in the ratchet tree.
    pub async fn member_count(&self) -> usize {
        self.state.lock().await.member_count()
    }

    /// True iff `identity` appears in this group's admin list.
    pub async fn is_admin(&self, identity: [u8; 32]) -> bool {
        let state = self.state.lock().await;
        state
            .extract_group_data()
            .is_some_and(|data| data.is_admin(&groupwire_codec::primitives::to_hex(&identity)))
    }

    /// This group's current admin list, hex-encoded.
    pub async fn admins(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.extract_group_data().map(|data| data.admins).unwrap_or_default()
    }

    async fn group_relays(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.extract_group_data().map(|data| data.relays).unwrap_or_default()
    }

    fn random_nonce(&self) -> [u8; 24] {
        let mut nonce = [0u8; 24];
        self.env.random_bytes(&mut nonce);
        nonce
    }

    /// Encrypts `payload` under `conversation_key` and publishes it as a
    /// kind-445 event, awaiting at least one relay's acknowledgement.
    async fn publish_group_event(
        &self,
        group_id_hex: &str,
        created_at: u64,
        conversation_key: &[u8; 32],
        payload: &[u8],
        relays: &[String],
    ) -> Result<SignedEvent, ClientError> {
        let envelope = message::encrypt_envelope(conversation_key, payload, self.random_nonce());
        let content = groupwire_codec::primitives::to_base64(&envelope.to_bytes());
        let tags = vec![vec!["h".to_string(), group_id_hex.to_string()]];

        let signed = sign_with_ephemeral_publisher(KIND_GROUP_MESSAGE, created_at, content, tags)?;
        self.publish_and_await_ack(relays, signed.clone()).await?;
        Ok(signed)
    }

    async fn publish_and_await_ack(&self, relays: &[String], event: SignedEvent) -> Result<(), ClientError> {
        let acks = self.network.publish(relays, event).await?;
        if relays.is_empty() || acks.values().any(Result::is_ok) {
            Ok(())
        } else {
            Err(ClientError::Network("no relay acknowledged the publish".to_string()))
        }
    }

    /// Gift-wraps `welcome_rumor` to `recipient` and publishes it, falling
    /// back to this group's own relay list if the recipient's inbox relay
    /// discovery returns nothing (§9 open question, resolved in favor of
    /// this fallback).
    async fn dispatch_welcome(&self, recipient: [u8; 32], welcome_rumor: UnsignedEvent) -> Result<(), ClientError> {
        let wrapped = self.gift_wrap.wrap(welcome_rumor, recipient).await?;

        let inbox_relays = self.network.get_user_inbox_relays(recipient).await?;
        let relays = if inbox_relays.is_empty() { self.group_relays().await } else { inbox_relays };

        self.network.publish(&relays, wrapped).await?;
        Ok(())
    }

    /// Encrypts `rumor` as MLS application data and publishes it (§4.6,
    /// §4.11 `sendApplicationRumor`).
    pub async fn send_application_rumor(&self, rumor: UnsignedEvent, created_at: u64) -> Result<(), ClientError> {
        let (mls_bytes, conversation_key, group_id_hex, relays) = {
            let mut state = self.state.lock().await;
            let mls_bytes = state.create_application_message(rumor.to_json().as_bytes())?;
            let conversation_key = state.conversation_key()?;
            let group_id_hex = groupwire_codec::primitives::to_hex(state.group_id().as_slice());
            let relays = state.extract_group_data().map(|data| data.relays).unwrap_or_default();
            (mls_bytes, conversation_key, group_id_hex, relays)
        };

        self.publish_group_event(&group_id_hex, created_at, &conversation_key, &mls_bytes, &relays).await?;
        self.emit(GroupSignal::ApplicationMessage { rumor });
        Ok(())
    }

    /// Creates this member's own leave proposal and publishes it,
    /// un-committed (§4.11 `propose`). Another member must later call
    /// [`Self::commit_pending_proposals`] to actually remove this client.
    pub async fn propose_leave(&self, created_at: u64) -> Result<(), ClientError> {
        let (proposal_bytes, conversation_key, group_id_hex, relays) = {
            let mut state = self.state.lock().await;
            let conversation_key = state.conversation_key()?;
            let proposal_bytes = state.propose_leave()?;
            let group_id_hex = groupwire_codec::primitives::to_hex(state.group_id().as_slice());
            let relays = state.extract_group_data().map(|data| data.relays).unwrap_or_default();
            (proposal_bytes, conversation_key, group_id_hex, relays)
        };

        self.publish_group_event(&group_id_hex, created_at, &conversation_key, &proposal_bytes, &relays).await?;
        Ok(())
    }

    /// Builds a commit that adds `key_packages` as new members, publishes
    /// it, waits for acknowledgement, persists, then dispatches a
    /// gift-wrapped welcome per recipient (§4.9 MIP-02 ordering, §4.11
    /// `commit`). `key_package_event_ids` must be parallel to
    /// `key_packages`, each naming the kind-443 event consumed.
    ///
    /// Returns the hex identity of every admitted recipient.
    pub async fn add_members(
        &self,
        key_packages: &[KeyPackage],
        created_at: u64,
        key_package_event_ids: &[String],
    ) -> Result<Vec<String>, ClientError> {
        if key_packages.len() != key_package_event_ids.len() {
            return Err(ClientError::InvalidInput(
                "key_packages and key_package_event_ids must be the same length".to_string(),
            ));
        }

        let (commit_bytes, welcome_bytes, conversation_key, group_id_hex, relays) = {
            let mut state = self.state.lock().await;
            let conversation_key = state.conversation_key()?;
            let result = state.add_members(key_packages)?;
            state.merge_pending_commit()?;
            let group_id_hex = groupwire_codec::primitives::to_hex(state.group_id().as_slice());
            let relays = state.extract_group_data().map(|data| data.relays).unwrap_or_default();
            (result.commit_bytes, result.welcome_bytes, conversation_key, group_id_hex, relays)
        };

        // MIP-02: the commit must be published and acknowledged before any
        // welcome is dispatched.
        self.publish_group_event(&group_id_hex, created_at, &conversation_key, &commit_bytes, &relays).await?;
        self.emit(GroupSignal::StateChanged);

        if let Err(err) = self.save().await {
            self.emit(GroupSignal::HistoryError { reason: err.to_string() });
        }

        let mut recipients = Vec::with_capacity(key_packages.len());
        for (key_package, key_package_event_id) in key_packages.iter().zip(key_package_event_ids) {
            let identity = credential::get_pubkey(key_package.leaf_node().credential())?;
            let welcome_rumor = welcome::build_welcome_rumor(
                identity,
                created_at,
                &welcome_bytes,
                &relays,
                key_package_event_id,
            );
            self.dispatch_welcome(identity, welcome_rumor).await?;
            recipients.push(groupwire_codec::primitives::to_hex(&identity));
        }

        Ok(recipients)
    }

    /// Builds a commit that removes the members at `leaf_indices` (§4.11
    /// `commit` with a `remove` proposal).
    pub async fn remove_members(&self, leaf_indices: &[MemberId], created_at: u64) -> Result<(), ClientError> {
        let (commit_bytes, conversation_key, group_id_hex, relays) = {
            let mut state = self.state.lock().await;
            let conversation_key = state.conversation_key()?;
            let commit_bytes = state.remove_members(leaf_indices)?;
            state.merge_pending_commit()?;
            let group_id_hex = groupwire_codec::primitives::to_hex(state.group_id().as_slice());
            let relays = state.extract_group_data().map(|data| data.relays).unwrap_or_default();
            (commit_bytes, conversation_key, group_id_hex, relays)
        };

        self.publish_group_event(&group_id_hex, created_at, &conversation_key, &commit_bytes, &relays).await?;
        self.emit(GroupSignal::StateChanged);

        if let Err(err) = self.save().await {
            self.emit(GroupSignal::HistoryError { reason: err.to_string() });
        }
        Ok(())
    }

    /// Commits every proposal this group currently has queued (e.g. a
    /// leave proposal received via [`Self::ingest`]), publishing the
    /// resulting commit (§4.11 `commit` with no extra proposals).
    ///
    /// A queued add proposal producing a welcome here cannot be dispatched:
    /// unlike [`Self::add_members`], a standalone proposal processed by
    /// [`groupwire_core::mls::group::ClientState::process_inbound`] does
    /// not expose the admitted key package or its publication event id.
    /// Use [`Self::add_members`] to admit new members with working welcome
    /// dispatch.
    pub async fn commit_pending_proposals(&self, created_at: u64) -> Result<(), ClientError> {
        let (commit_bytes, welcome_bytes, conversation_key, group_id_hex, relays) = {
            let mut state = self.state.lock().await;
            let conversation_key = state.conversation_key()?;
            let result = state.commit_to_pending_proposals()?;
            state.merge_pending_commit()?;
            let group_id_hex = groupwire_codec::primitives::to_hex(state.group_id().as_slice());
            let relays = state.extract_group_data().map(|data| data.relays).unwrap_or_default();
            (result.commit_bytes, result.welcome_bytes, conversation_key, group_id_hex, relays)
        };

        self.publish_group_event(&group_id_hex, created_at, &conversation_key, &commit_bytes, &relays).await?;
        self.emit(GroupSignal::StateChanged);

        if welcome_bytes.is_some() {
            tracing::warn!("commit_to_pending_proposals admitted a member but no welcome dispatch is possible from a standalone proposal; use add_members instead");
        }

        if let Err(err) = self.save().await {
            self.emit(GroupSignal::HistoryError { reason: err.to_string() });
        }
        Ok(())
    }

    /// Validates `event` (kind 443, credential identity equal to the
    /// publisher), then commits an `add` proposal admitting it (§4.11
    /// `inviteByKeyPackageEvent`). Returns the list of welcome recipients
    /// (always the invited identity alone).
    pub async fn invite_by_key_package_event(
        &self,
        event: &UnsignedEvent,
        created_at: u64,
    ) -> Result<Vec<String>, ClientError> {
        if event.kind != KIND_KEY_PACKAGE {
            return Err(ClientError::InvalidInput(format!(
                "expected kind {KIND_KEY_PACKAGE}, got {}",
                event.kind
            )));
        }

        let kp_bytes = key_package::extract_key_package_bytes(event)?;
        let key_package = key_package::deserialize_key_package(&kp_bytes)?;

        let credential_identity = credential::get_pubkey(key_package.leaf_node().credential())?;
        let publisher_identity = event.pubkey_bytes()?;
        if credential_identity != publisher_identity {
            return Err(ClientError::InvalidInput(
                "key package credential identity does not match the publishing event's pubkey".to_string(),
            ));
        }

        self.add_members(&[key_package], created_at, &[event.id.clone()]).await
    }

    /// Ingests a batch of kind-445 events (§4.7), persisting once if any
    /// commit was applied and emitting an `applicationMessage` signal per
    /// decoded rumor.
    pub async fn ingest(&self, events: &[UnsignedEvent]) -> Result<IngestOutcome, ClientError> {
        let outcome = {
            let mut state = self.state.lock().await;
            ingest::ingest(&mut state, events, &self.admin_policy, self.ingest_max_retries, |_state| Ok(()))?
        };

        if outcome.commits_applied > 0 {
            self.emit(GroupSignal::StateChanged);
            if let Err(err) = self.save().await {
                self.emit(GroupSignal::HistoryError { reason: err.to_string() });
            }
        }

        for rumor_bytes in &outcome.application_rumors {
            match UnsignedEvent::from_json(rumor_bytes) {
                Ok(rumor) => self.emit(GroupSignal::ApplicationMessage { rumor }),
                Err(err) => tracing::warn!(error = %err, "ingested application payload was not a valid rumor"),
            }
        }

        Ok(outcome)
    }

    /// Serializes and writes this group's state through the group-state
    /// store (§4.11 `save`).
    pub async fn save(&self) -> Result<(), ClientError> {
        let (group_id_hex, bytes) = {
            let state = self.state.lock().await;
            let group_id_hex = groupwire_codec::primitives::to_hex(state.group_id().as_slice());
            let bytes = state.serialize()?;
            (group_id_hex, bytes)
        };

        self.group_store.set(group_id_hex, bytes).await.map_err(|e| ClientError::Storage(e.to_string()))?;
        self.emit(GroupSignal::StateSaved);
        Ok(())
    }

    /// Removes this group's state from the store and emits `destroyed`
    /// (§4.11 `destroy`). The facade itself is dropped by the caller
    /// (typically [`crate::client::GroupwireClient::destroy_group`]).
    pub async fn destroy(&self) -> Result<(), ClientError> {
        let group_id_hex = self.group_id_hex().await;
        self.group_store.remove(&group_id_hex).await.map_err(|e| ClientError::Storage(e.to_string()))?;
        self.emit(GroupSignal::Destroyed);
        Ok(())
    }

    /// This client's own identity, as reported by the configured signer.
    pub fn own_identity(&self) -> [u8; 32] {
        self.signer.get_public_key()
    }

    /// The key-package custody namespace backing this group's joins.
    pub fn custody(&self) -> &KeyPackageCustody<E, Arc<dyn KvStore<Vec<u8>, Vec<u8>>>> {
        &self.custody
    }
}
