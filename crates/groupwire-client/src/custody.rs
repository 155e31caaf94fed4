//! Key-package custody store (C4): persists generated key packages —
//! public part and private material together — keyed by their hash
//! reference, behind the generic [`KvStore`] storage seam.
//!
//! The private part never leaves this module except through [`get`], which
//! hands back a complete [`GeneratedKeyPackage`] usable to join a group; it
//! is never serialized into any published event.

use openmls::prelude::KeyPackage;

use groupwire_core::env::Environment;
use groupwire_core::mls::GeneratedKeyPackage;
use groupwire_core::store::KvStore;

use crate::error::ClientError;

/// Key-package custody, backed by a [`KvStore`] keyed by hash reference.
pub struct KeyPackageCustody<E: Environment, S: KvStore<Vec<u8>, Vec<u8>>> {
    env: E,
    store: S,
}

impl<E: Environment, S: KvStore<Vec<u8>, Vec<u8>>> KeyPackageCustody<E, S> {
    /// Wraps `store` as a key-package custody namespace.
    pub fn new(env: E, store: S) -> Self {
        Self { env, store }
    }

    /// Serializes and stores `generated`, returning its hash reference.
    pub async fn add(&self, generated: &GeneratedKeyPackage<E>) -> Result<Vec<u8>, ClientError> {
        let hash_ref = generated.hash_ref()?;
        let bytes = generated.serialize()?;
        self.store.set(hash_ref.clone(), bytes).await.map_err(|e| ClientError::Storage(e.to_string()))?;
        Ok(hash_ref)
    }

    /// Removes the custody entry for `hash_ref`, if any.
    pub async fn remove(&self, hash_ref: &[u8]) -> Result<(), ClientError> {
        self.store.remove(&hash_ref.to_vec()).await.map_err(|e| ClientError::Storage(e.to_string()))
    }

    /// Looks up the generated key package stored under `hash_ref`, if any.
    /// This is the only path by which its private material is exposed.
    pub async fn get(&self, hash_ref: &[u8]) -> Result<Option<GeneratedKeyPackage<E>>, ClientError> {
        let Some(bytes) = self.store.get(&hash_ref.to_vec()).await.map_err(|e| ClientError::Storage(e.to_string()))? else {
            return Ok(None);
        };
        let generated = GeneratedKeyPackage::deserialize(self.env.clone(), &bytes)?;
        Ok(Some(generated))
    }

    /// Lists the public part of every custody entry.
    pub async fn list(&self) -> Result<Vec<KeyPackage>, ClientError> {
        let entries = self.store.list().await.map_err(|e| ClientError::Storage(e.to_string()))?;
        entries
            .iter()
            .map(|bytes| {
                let generated = GeneratedKeyPackage::deserialize(self.env.clone(), bytes)?;
                Ok(generated.key_package)
            })
            .collect()
    }
}
