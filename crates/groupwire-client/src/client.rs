//! Multi-group client (C12): an in-memory registry of loaded group facades,
//! keyed by the network group id, with load deduplication, group creation
//! and joining, and async watchers over the group-id and key-package-ref
//! sets.
//!
//! The registry is the only owner of its facade table (§3 "Ownership"); it
//! never holds more than one [`GroupHandle`] per group id, and concurrent
//! [`GroupwireClient::get_group`] calls for the same id share one in-flight
//! load rather than racing to deserialize the same bytes twice.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, OnceCell};
use tokio_stream::wrappers::WatchStream;

use groupwire_codec::GroupDataExtension;
use groupwire_core::config::GroupwireConfig;
use groupwire_core::env::Environment;
use groupwire_core::event::UnsignedEvent;
use groupwire_core::mls::key_package::{self, GeneratedKeyPackage};
use groupwire_core::mls::{welcome, ClientState};
use groupwire_core::store::KvStore;

use crate::collaborators::{GiftWrap, RelayNetwork, Signer};
use crate::custody::KeyPackageCustody;
use crate::error::ClientError;
use crate::facade::GroupHandle;

type CustodyStore = Arc<dyn KvStore<Vec<u8>, Vec<u8>>>;
type GroupStore = Arc<dyn KvStore<String, Vec<u8>>>;

/// The multi-group client (C12): a registry of loaded [`GroupHandle`]s plus
/// the external collaborators every group it loads or creates needs.
pub struct GroupwireClient<E: Environment> {
    env: E,
    config: GroupwireConfig,
    group_store: GroupStore,
    custody_store: CustodyStore,
    custody: KeyPackageCustody<E, CustodyStore>,
    network: Arc<dyn RelayNetwork>,
    signer: Arc<dyn Signer>,
    gift_wrap: Arc<dyn GiftWrap>,
    groups: Mutex<HashMap<String, Arc<GroupHandle<E>>>>,
    loading: Mutex<HashMap<String, Arc<OnceCell<Arc<GroupHandle<E>>>>>>,
    groups_watch: watch::Sender<Vec<String>>,
    key_packages_watch: watch::Sender<Vec<String>>,
}

impl<E: Environment> GroupwireClient<E> {
    /// Builds a client around the given stores and external collaborators.
    /// `group_store` is keyed by the hex network group id; `custody_store`
    /// is keyed by key-package hash reference.
    pub fn new(
        env: E,
        config: GroupwireConfig,
        group_store: GroupStore,
        custody_store: CustodyStore,
        network: Arc<dyn RelayNetwork>,
        signer: Arc<dyn Signer>,
        gift_wrap: Arc<dyn GiftWrap>,
    ) -> Self {
        let custody = KeyPackageCustody::new(env.clone(), Arc::clone(&custody_store));
        let (groups_watch, _) = watch::channel(Vec::new());
        let (key_packages_watch, _) = watch::channel(Vec::new());
        Self {
            env,
            config,
            group_store,
            custody_store,
            custody,
            network,
            signer,
            gift_wrap,
            groups: Mutex::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
            groups_watch,
            key_packages_watch,
        }
    }

    /// This client's own identity, as reported by the configured signer.
    pub fn own_identity(&self) -> [u8; 32] {
        self.signer.get_public_key()
    }

    /// The key-package custody namespace this client (and every group it
    /// loads) shares.
    pub fn custody(&self) -> &KeyPackageCustody<E, CustodyStore> {
        &self.custody
    }

    fn wrap_state(&self, state: ClientState<E>) -> GroupHandle<E> {
        GroupHandle::new(
            self.env.clone(),
            state,
            &self.config,
            Arc::clone(&self.group_store),
            KeyPackageCustody::new(self.env.clone(), Arc::clone(&self.custody_store)),
            Arc::clone(&self.network),
            Arc::clone(&self.signer),
            Arc::clone(&self.gift_wrap),
        )
    }

    async fn register(&self, group_id_hex: String, handle: Arc<GroupHandle<E>>) -> Arc<GroupHandle<E>> {
        self.groups.lock().await.insert(group_id_hex, Arc::clone(&handle));
        self.refresh_groups_watch().await;
        handle
    }

    /// Constructs a new group, embedding a fresh group-data extension
    /// (§4.5), persists it, and registers the resulting facade (§4.12
    /// `createGroup`).
    pub async fn create_group(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        admin_pubkeys: Vec<String>,
        relays: Vec<String>,
    ) -> Result<Arc<GroupHandle<E>>, ClientError> {
        let mut group_id = [0u8; 32];
        self.env.random_bytes(&mut group_id);

        let creator_identity = self.own_identity();
        let generated = key_package::generate_key_package(
            self.env.clone(),
            creator_identity,
            false,
            self.config.key_package_lifetime_secs,
        )?;
        let group_data = GroupDataExtension::new(group_id, name, description, admin_pubkeys, relays);
        let state = ClientState::create(generated, group_data, vec![])?;

        let handle = Arc::new(self.wrap_state(state));
        handle.save().await?;

        let group_id_hex = handle.group_id_hex().await;
        Ok(self.register(group_id_hex, handle).await)
    }

    /// Joins a group from a decrypted welcome rumor (§4.9, §4.12
    /// `joinGroupFromWelcome`). Locates the matching private key package in
    /// custody by the reference the welcome itself names; `key_package_hint`
    /// is tried first when given (e.g. the custody key recorded alongside
    /// the originating key-package event), then every reference the welcome
    /// carries.
    pub async fn join_group_from_welcome(
        &self,
        welcome_rumor: &UnsignedEvent,
        key_package_hint: Option<&[u8]>,
    ) -> Result<Arc<GroupHandle<E>>, ClientError> {
        let welcome_bytes = welcome::extract_welcome_bytes(welcome_rumor)?;
        let mut candidate_refs = welcome::referenced_key_package_refs(&welcome_bytes)?;
        if let Some(hint) = key_package_hint {
            candidate_refs.retain(|r| r != hint);
            candidate_refs.insert(0, hint.to_vec());
        }

        let mut generated: Option<GeneratedKeyPackage<E>> = None;
        for candidate in &candidate_refs {
            if let Some(found) = self.custody.get(candidate).await? {
                generated = Some(found);
                break;
            }
        }
        let generated = generated.ok_or_else(|| {
            ClientError::InvalidInput("no custody key package matches this welcome".to_string())
        })?;

        let consumed_ref = generated.hash_ref()?;
        let reusable = generated.last_resort;

        let joined = welcome::join_from_welcome(generated, welcome_rumor)?;
        if !reusable {
            self.custody.remove(&consumed_ref).await?;
            self.refresh_key_packages_watch().await?;
        }

        let handle = Arc::new(self.wrap_state(joined.state));
        handle.save().await?;

        let group_id_hex = handle.group_id_hex().await;
        Ok(self.register(group_id_hex, handle).await)
    }

    /// Returns the cached facade for `group_id_hex`, loading it from the
    /// group-state store on first access. Concurrent calls for the same id
    /// observe the same facade instance: a by-id table of in-flight loads
    /// is shared across awaiters (§4.12, §5 "Load deduplication").
    pub async fn get_group(&self, group_id_hex: &str) -> Result<Arc<GroupHandle<E>>, ClientError> {
        if let Some(handle) = self.groups.lock().await.get(group_id_hex) {
            return Ok(Arc::clone(handle));
        }

        let cell = {
            let mut loading = self.loading.lock().await;
            Arc::clone(loading.entry(group_id_hex.to_string()).or_insert_with(|| Arc::new(OnceCell::new())))
        };

        let result = cell
            .get_or_try_init(|| async {
                let bytes = self
                    .group_store
                    .get(&group_id_hex.to_string())
                    .await
                    .map_err(|e| ClientError::Storage(e.to_string()))?
                    .ok_or_else(|| ClientError::GroupNotFound(group_id_hex.to_string()))?;
                let state = ClientState::deserialize(self.env.clone(), &bytes)?;
                let handle = Arc::new(self.wrap_state(state));
                Ok::<_, ClientError>(self.register(group_id_hex.to_string(), handle).await)
            })
            .await
            .map(Arc::clone);

        self.loading.lock().await.remove(group_id_hex);
        result
    }

    /// Iterates every key in the group-state store, loading and caching
    /// each; entries that fail to deserialize are skipped and logged, not
    /// fatal to the rest (§4.12 `loadAllGroups`, §8 boundary behavior).
    pub async fn load_all_groups(&self) -> Result<Vec<Arc<GroupHandle<E>>>, ClientError> {
        let keys = self.group_store.keys().await.map_err(|e| ClientError::Storage(e.to_string()))?;

        let mut loaded = Vec::with_capacity(keys.len());
        for group_id_hex in keys {
            match self.get_group(&group_id_hex).await {
                Ok(handle) => loaded.push(handle),
                Err(err) => {
                    tracing::warn!(group_id = %group_id_hex, error = %err, "skipping group with corrupted state");
                },
            }
        }
        Ok(loaded)
    }

    /// Wraps an already-deserialized client state (e.g. imported from
    /// another device), persists it, and registers it (§4.12
    /// `importGroupFromClientState`).
    pub async fn import_group_from_client_state(
        &self,
        state: ClientState<E>,
    ) -> Result<Arc<GroupHandle<E>>, ClientError> {
        let handle = Arc::new(self.wrap_state(state));
        handle.save().await?;

        let group_id_hex = handle.group_id_hex().await;
        Ok(self.register(group_id_hex, handle).await)
    }

    /// Drops `group_id_hex` from the in-memory cache; its state remains in
    /// the store (§4.12 `unloadGroup`).
    pub async fn unload_group(&self, group_id_hex: &str) -> Result<(), ClientError> {
        self.groups.lock().await.remove(group_id_hex);
        self.refresh_groups_watch().await;
        Ok(())
    }

    /// Destroys `group_id_hex`: removes its persisted state via the facade
    /// and drops it from the cache (§4.12 `destroyGroup`).
    pub async fn destroy_group(&self, group_id_hex: &str) -> Result<(), ClientError> {
        let handle = self.get_group(group_id_hex).await?;
        handle.destroy().await?;
        self.groups.lock().await.remove(group_id_hex);
        self.refresh_groups_watch().await;
        Ok(())
    }

    /// Generates a new key package for this client's own identity, stores
    /// it in custody, and returns its unsigned publication event (§4.4, for
    /// the application to sign and publish). `last_resort` marks the
    /// package reusable across multiple invites.
    pub async fn generate_key_package(
        &self,
        relays: Vec<String>,
        client_name: Option<String>,
        last_resort: bool,
        created_at: u64,
    ) -> Result<UnsignedEvent, ClientError> {
        let generated = key_package::generate_key_package(
            self.env.clone(),
            self.own_identity(),
            last_resort,
            self.config.key_package_lifetime_secs,
        )?;
        self.custody.add(&generated).await?;
        self.refresh_key_packages_watch().await?;

        key_package::build_publication_event(&generated.key_package, relays, client_name, created_at)
            .map_err(ClientError::from)
    }

    /// Removes a key package from custody by its hash reference, e.g. after
    /// publishing its retraction via [`groupwire_core::event::build_deletion_event`]
    /// (§4.4 "Deletion envelope").
    pub async fn remove_key_package(&self, hash_ref: &[u8]) -> Result<(), ClientError> {
        self.custody.remove(hash_ref).await?;
        self.refresh_key_packages_watch().await
    }

    async fn refresh_groups_watch(&self) {
        let ids: Vec<String> = self.groups.lock().await.keys().cloned().collect();
        let _no_receivers = self.groups_watch.send(ids);
    }

    async fn refresh_key_packages_watch(&self) -> Result<(), ClientError> {
        let refs: Vec<String> = self
            .custody
            .list()
            .await?
            .iter()
            .filter_map(|kp| key_package::hash_ref(kp, &self.wrap_state_provider()).ok())
            .map(|r| groupwire_codec::primitives::to_hex(&r))
            .collect();
        let _no_receivers = self.key_packages_watch.send(refs);
        Ok(())
    }

    /// A throwaway provider used only to compute hash references for the
    /// watcher refresh above; key-package hash references do not depend on
    /// provider-local state, only on the encoded public key package.
    fn wrap_state_provider(&self) -> groupwire_core::mls::provider::MlsProvider<E> {
        groupwire_core::mls::provider::MlsProvider::new(self.env.clone())
    }

    /// An async sequence yielding the current set of loaded group ids
    /// immediately, then again on every create/load/unload/destroy (§4.12
    /// `watchGroups`).
    pub fn watch_groups(self: &Arc<Self>) -> WatchStream<Vec<String>> {
        WatchStream::new(self.groups_watch.subscribe())
    }

    /// An async sequence yielding the current set of custody key-package
    /// hash references (hex-encoded) immediately, then again on every
    /// generate/remove (§4.12 `watchKeyPackages`).
    pub fn watch_key_packages(self: &Arc<Self>) -> WatchStream<Vec<String>> {
        WatchStream::new(self.key_packages_watch.subscribe())
    }
}
