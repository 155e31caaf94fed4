//! Key package generation and publication (C4).
//!
//! A key package advertises that its owner can be invited into a group. Every
//! key package this crate generates declares the group-data and last-resort
//! extension types in its leaf capabilities so that peers running this
//! library can recognize groups created by it; "last resort" marks the
//! package as reusable once primary packages run out, per the MLS
//! specification's guidance for that extension.

use openmls::prelude::{
    Capabilities, Ciphersuite, CredentialWithKey, Extension, Extensions, KeyPackage,
    LastResortExtension, Lifetime, OpenMlsProvider,
};
use openmls_basic_credential::SignatureKeyPair;
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize};

use groupwire_codec::{is_grease, EXTENSION_TYPE_GROUP_DATA, EXTENSION_TYPE_LAST_RESORT};

use crate::env::Environment;
use crate::error::CoreError;
use crate::event::{ContentEncoding, KeyPackageEvent, UnsignedEvent};
use crate::mls::credential::{create_credential, Identity};
use crate::mls::provider::MlsProvider;

/// The ciphersuite this library always generates key packages with.
pub const CIPHERSUITE: Ciphersuite = Ciphersuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519;

/// The extension types every key package generated by this crate declares
/// support for, in its leaf-node capabilities.
pub const SUPPORTED_EXTENSIONS: [u16; 2] = [EXTENSION_TYPE_GROUP_DATA, EXTENSION_TYPE_LAST_RESORT];

/// A freshly generated key package plus the signing material required to
/// use it later when joining a group.
pub struct GeneratedKeyPackage<E: Environment> {
    /// The key package, ready to serialize and publish.
    pub key_package: KeyPackage,
    /// The identity this key package advertises.
    pub identity: Identity,
    /// Signer retained for the eventual `join_from_welcome` call.
    pub signer: SignatureKeyPair,
    /// Provider retained for the eventual `join_from_welcome` call.
    pub provider: MlsProvider<E>,
    /// Whether this package is marked last-resort (reusable, never deleted
    /// after being fetched once).
    pub last_resort: bool,
}

/// Generates a new key package for `identity`.
///
/// `last_resort` marks the package with the MLS last-resort extension; such
/// packages should be generated once and kept available indefinitely,
/// since exhausting a peer's supply of fresh packages otherwise means they
/// cannot be invited. `lifetime_secs` sets the key package's validity window
/// (`not_before` now, `not_after` now plus `lifetime_secs`), per
/// [`GroupwireConfig::key_package_lifetime_secs`](crate::config::GroupwireConfig::key_package_lifetime_secs).
pub fn generate_key_package<E: Environment>(
    env: E,
    identity: Identity,
    last_resort: bool,
    lifetime_secs: u64,
) -> Result<GeneratedKeyPackage<E>, CoreError> {
    let provider = MlsProvider::new(env);

    let signer = SignatureKeyPair::new(CIPHERSUITE.signature_algorithm())
        .map_err(|e| CoreError::Mls(format!("failed to generate signing key pair: {e}")))?;

    let credential = create_credential(identity);
    let credential_with_key = CredentialWithKey {
        credential,
        signature_key: signer.public().into(),
    };

    let capabilities = Capabilities::new(
        None,
        None,
        Some(&SUPPORTED_EXTENSIONS.map(openmls::prelude::ExtensionType::Unknown)),
        None,
        None,
    );

    let key_package_extensions = if last_resort {
        Extensions::single(Extension::LastResort(LastResortExtension::new()))
    } else {
        Extensions::default()
    };

    let bundle = KeyPackage::builder()
        .key_package_extensions(key_package_extensions)
        .key_package_lifetime(Lifetime::new(lifetime_secs))
        .leaf_node_capabilities(capabilities)
        .build(CIPHERSUITE, &provider, &signer, credential_with_key)
        .map_err(|e| CoreError::Mls(format!("failed to build key package: {e}")))?;

    Ok(GeneratedKeyPackage {
        key_package: bundle.key_package().clone(),
        identity,
        signer,
        provider,
        last_resort,
    })
}

/// Computes the hash reference identifying a key package, used as its
/// custody-store key.
pub fn hash_ref<E: Environment>(
    key_package: &KeyPackage,
    provider: &MlsProvider<E>,
) -> Result<Vec<u8>, CoreError> {
    key_package
        .hash_ref(provider.crypto())
        .map(|r| r.as_slice().to_vec())
        .map_err(|e| CoreError::Mls(format!("failed to compute key package hash: {e}")))
}

impl<E: Environment> GeneratedKeyPackage<E> {
    /// This key package's custody-store reference.
    pub fn hash_ref(&self) -> Result<Vec<u8>, CoreError> {
        hash_ref(&self.key_package, &self.provider)
    }

    /// Serializes this generated key package (identity, last-resort flag,
    /// public key package, and the provider storage holding its private
    /// material) to opaque bytes for the custody store (§3 "Key-package
    /// custody store").
    ///
    /// The private part never leaves the custody store except through a
    /// `get(ref)`-shaped lookup that hands back a full [`GeneratedKeyPackage`]
    /// (§4.4 custody invariant); it is never serialized into any published
    /// event.
    pub fn serialize(&self) -> Result<Vec<u8>, CoreError> {
        use bytes::BytesMut;
        use groupwire_codec::primitives::put_bytes;

        let kp_bytes = self
            .key_package
            .tls_serialize_detached()
            .map_err(|e| CoreError::Mls(format!("failed to serialize key package: {e}")))?;
        let storage_bytes = crate::mls::provider::persist_storage(self.provider.storage())?;

        let mut out = BytesMut::new();
        out.extend_from_slice(&[u8::from(self.last_resort)]);
        out.extend_from_slice(&self.identity);
        put_bytes(&mut out, &kp_bytes);
        put_bytes(&mut out, &storage_bytes);
        Ok(out.to_vec())
    }

    /// Restores a generated key package previously produced by
    /// [`Self::serialize`].
    pub fn deserialize(env: E, bytes: &[u8]) -> Result<Self, CoreError> {
        use bytes::Bytes;
        use groupwire_codec::primitives::get_bytes;

        if bytes.len() < 33 {
            return Err(CoreError::Decode("generated key package shorter than its header".to_string()));
        }
        let last_resort = bytes[0] != 0;
        let identity: Identity = bytes[1..33]
            .try_into()
            .map_err(|_| CoreError::Decode("generated key package identity is not 32 bytes".to_string()))?;

        let mut rest = Bytes::copy_from_slice(&bytes[33..]);
        let kp_bytes = get_bytes(&mut rest)?;
        let storage_bytes = get_bytes(&mut rest)?;

        let key_package = deserialize_key_package(&kp_bytes)?;
        let storage = crate::mls::provider::restore_storage(&storage_bytes)?;
        let provider = MlsProvider::from_storage(env, storage);

        let signer = SignatureKeyPair::read(
            provider.storage(),
            key_package.leaf_node().signature_key().as_slice(),
            CIPHERSUITE.signature_algorithm(),
        )
        .ok_or_else(|| CoreError::Decode("signer not found in restored key package storage".to_string()))?;

        Ok(Self { key_package, identity, signer, provider, last_resort })
    }
}

/// Builds the unsigned publication event (kind 443) for a key package.
///
/// Declared extension types are grease-filtered before inclusion: a peer
/// running a newer MLS stack may have emitted GREASE values in its own
/// capabilities, and this crate never republishes those as if meaningful.
pub fn build_publication_event(
    key_package: &KeyPackage,
    relays: Vec<String>,
    client: Option<String>,
    created_at: u64,
) -> Result<UnsignedEvent, CoreError> {
    let identity = crate::mls::credential::get_pubkey(key_package.leaf_node().credential())?;

    let serialized = key_package
        .tls_serialize_detached()
        .map_err(|e| CoreError::Mls(format!("failed to serialize key package: {e}")))?;

    let extensions_hex: Vec<String> = key_package
        .leaf_node()
        .capabilities()
        .extensions()
        .iter()
        .map(|ext| u16::from(*ext))
        .filter(|ty| !is_grease(*ty))
        .map(|ty| format!("{ty:04x}"))
        .collect();

    let event = KeyPackageEvent {
        content: groupwire_codec::primitives::to_base64(&serialized),
        content_encoding: ContentEncoding::Base64,
        mls_version: "1.0".to_string(),
        ciphersuite_hex: format!("{:04x}", u16::from(CIPHERSUITE)),
        extensions_hex,
        relays,
        client,
    };

    Ok(event.into_unsigned_event(identity, created_at))
}

/// Parses a kind-443 event back into TLS-serialized key package bytes,
/// decoding per the event's declared content encoding.
pub fn extract_key_package_bytes(event: &UnsignedEvent) -> Result<Vec<u8>, CoreError> {
    let encoding_tag = event.find_tag("encoding").and_then(|t| t.get(1)).map(String::as_str);
    let encoding = ContentEncoding::from_tag(encoding_tag);

    match encoding {
        ContentEncoding::Base64 => groupwire_codec::primitives::from_base64(&event.content).map_err(Into::into),
        ContentEncoding::Hex => groupwire_codec::primitives::from_hex(&event.content).map_err(Into::into),
    }
}

/// Deserializes TLS-encoded bytes (as produced by `extract_key_package_bytes`)
/// back into a validated key package.
pub fn deserialize_key_package(bytes: &[u8]) -> Result<KeyPackage, CoreError> {
    openmls::prelude::KeyPackageIn::tls_deserialize(&mut &bytes[..])
        .map_err(|e| CoreError::Decode(format!("invalid key package bytes: {e}")))?
        .validate(
            &openmls_rust_crypto::RustCrypto::default(),
            openmls::prelude::ProtocolVersion::Mls10,
        )
        .map_err(|e| CoreError::ProtocolViolation(format!("key package failed validation: {e}")))
}
