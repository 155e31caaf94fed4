//! Credential module (C3): mapping an identity public key to an MLS basic
//! credential and back.

use openmls::prelude::{BasicCredential, Credential, CredentialType};
use openmls_basic_credential::SignatureKeyPair;

use crate::error::CoreError;

/// An identity is a 32-byte public key, provided by an external signer and
/// never mutated by this crate.
pub type Identity = [u8; 32];

/// Wraps an identity as an MLS basic credential.
pub fn create_credential(identity: Identity) -> Credential {
    BasicCredential::new(identity.to_vec()).into()
}

/// Extracts the 32-byte identity from a credential, failing unless the
/// credential is the basic variant with exactly 32 bytes of identity.
pub fn get_pubkey(credential: &Credential) -> Result<Identity, CoreError> {
    if credential.credential_type() != CredentialType::Basic {
        return Err(CoreError::InvalidInput("credential is not the basic variant".to_string()));
    }

    let basic = BasicCredential::try_from(credential.clone())
        .map_err(|e| CoreError::InvalidInput(format!("not a basic credential: {e}")))?;

    basic.identity().try_into().map_err(|_| {
        CoreError::InvalidInput(format!(
            "basic credential identity has length {}, expected 32",
            basic.identity().len()
        ))
    })
}

/// Authenticates a credential against a claimed signature public key.
///
/// This crate accepts a credential iff it is the basic variant with exactly
/// a 32-byte identity; the cryptographic verification that a message was
/// actually signed by `signature_public_key` is delegated to the MLS
/// library's own leaf-node signature checks.
pub struct AuthenticationPolicy;

impl AuthenticationPolicy {
    /// Returns true iff `credential` is an acceptable basic credential.
    /// `signature_public_key` is accepted for any value; its verification
    /// happens inside the MLS library, not here.
    pub fn validate_credential(
        &self,
        credential: &Credential,
        _signature_public_key: &SignatureKeyPair,
    ) -> bool {
        get_pubkey(credential).is_ok()
    }
}
