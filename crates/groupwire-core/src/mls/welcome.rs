//! Welcome construction and parsing (C9).
//!
//! Building a welcome rumor and joining from one are pure/parsing concerns
//! that live here; looking a joiner's private key package up by reference in
//! custody, and publishing the resulting rumor gift-wrapped per recipient,
//! are `groupwire-client` concerns (C9's facade-level coordination).

use openmls::prelude::{MlsMessageBodyIn, MlsMessageIn};
use tls_codec::Deserialize as TlsDeserialize;

use crate::env::Environment;
use crate::error::CoreError;
use crate::event::{UnsignedEvent, KIND_WELCOME};
use crate::mls::group::ClientState;
use crate::mls::key_package::GeneratedKeyPackage;

/// A group freshly joined from a welcome.
pub struct JoinedGroup<E: Environment> {
    /// The joined group's live client state.
    pub state: ClientState<E>,
}

/// Builds the unsigned kind-444 welcome rumor for one admitted member.
///
/// `welcome_bytes` is the TLS-serialized Welcome shared by every recipient
/// admitted in the same commit; `relays` is the group's current relay set;
/// `key_package_event_id` references the consumed key-package publication
/// event.
pub fn build_welcome_rumor(
    pubkey: [u8; 32],
    created_at: u64,
    welcome_bytes: &[u8],
    relays: &[String],
    key_package_event_id: &str,
) -> UnsignedEvent {
    let mut relay_tag = vec!["relays".to_string()];
    relay_tag.extend(relays.iter().cloned());

    let tags = vec![
        relay_tag,
        vec!["e".to_string(), key_package_event_id.to_string()],
        vec!["encoding".to_string(), "base64".to_string()],
    ];

    UnsignedEvent::new(
        pubkey,
        KIND_WELCOME,
        created_at,
        groupwire_codec::primitives::to_base64(welcome_bytes),
        tags,
    )
}

/// Extracts the TLS-serialized Welcome bytes from a kind-444 rumor.
pub fn extract_welcome_bytes(rumor: &UnsignedEvent) -> Result<Vec<u8>, CoreError> {
    if rumor.kind != KIND_WELCOME {
        return Err(CoreError::InvalidInput(format!(
            "expected kind {KIND_WELCOME}, got {}",
            rumor.kind
        )));
    }
    groupwire_codec::primitives::from_base64(&rumor.content).map_err(Into::into)
}

/// The key-package event id a welcome rumor references, if tagged.
pub fn referenced_key_package_event_id(rumor: &UnsignedEvent) -> Option<String> {
    rumor.find_tag("e").and_then(|t| t.get(1)).cloned()
}

/// The hash references of every key package a Welcome admits a recipient
/// through, in the order its encrypted group secrets are listed.
///
/// A joiner has custody of at most one of these; the caller (C9's facade-level
/// coordination, here [`crate::mls::welcome`]'s client-side counterpart in
/// `groupwire-client`) probes custody with each until one hits.
pub fn referenced_key_package_refs(welcome_bytes: &[u8]) -> Result<Vec<Vec<u8>>, CoreError> {
    let mls_message = MlsMessageIn::tls_deserialize(&mut &welcome_bytes[..])
        .map_err(|e| CoreError::Decode(format!("invalid welcome bytes: {e}")))?;

    let welcome = match mls_message.extract() {
        MlsMessageBodyIn::Welcome(welcome) => welcome,
        _ => return Err(CoreError::InvalidInput("message is not a welcome".to_string())),
    };

    Ok(welcome.secrets().iter().map(|secrets| secrets.new_member().as_slice().to_vec()).collect())
}

/// Joins a group from a welcome rumor, consuming the generated key package
/// whose private material the welcome references.
pub fn join_from_welcome<E: Environment>(
    generated: GeneratedKeyPackage<E>,
    rumor: &UnsignedEvent,
) -> Result<JoinedGroup<E>, CoreError> {
    let welcome_bytes = extract_welcome_bytes(rumor)?;
    let state = ClientState::join_from_welcome(generated, &welcome_bytes)?;
    Ok(JoinedGroup { state })
}
