//! Message pipeline (C6): envelope key derivation and application-message
//! encrypt/decrypt.
//!
//! Every group message is an MLS application message wrapped a second time
//! in an envelope cipher, so that relays (which never see MLS ciphertext
//! directly) only ever observe opaque bytes keyed by a value derived from,
//! but distinct from, the MLS exporter secret. The derivation mirrors the
//! exporter-secret convention used elsewhere for group-message keys: label
//! `"nostr"`, context `b"nostr"`, 32 bytes.
//!
//! All functions here are pure - random bytes must be provided by the
//! caller, which keeps encryption deterministic under test.

use std::collections::VecDeque;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CoreError;

/// Exporter label used to derive the envelope secret from the MLS group.
pub const EXPORTER_LABEL: &str = "nostr";
/// Exporter context used to derive the envelope secret from the MLS group.
pub const EXPORTER_CONTEXT: &[u8] = b"nostr";
/// Length in bytes of the exported secret and the derived conversation key.
pub const EXPORTER_LENGTH: usize = 32;

const HKDF_INFO: &[u8] = b"groupwire envelope key v1";

/// Derives the symmetric envelope key for the current epoch from the raw
/// MLS exporter secret.
///
/// The exported secret is treated as the private half of an X25519 key
/// pair; the public half is derived from it, and the two halves are
/// combined via a self Diffie-Hellman (since both members of the pair are
/// known only to the local peer, this is a deterministic one-way
/// derivation rather than a real key exchange). The resulting shared
/// secret is expanded with HKDF-SHA256 into the final cipher key.
pub fn derive_conversation_key(exporter_secret: &[u8; EXPORTER_LENGTH]) -> [u8; 32] {
    let private_half = StaticSecret::from(*exporter_secret);
    let public_half = PublicKey::from(&private_half);
    let shared = private_half.diffie_hellman(&public_half);

    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key).expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

/// An encrypted envelope ready to be embedded as event content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The 24-byte `XChaCha20` nonce, prepended to `ciphertext` on the wire.
    pub nonce: [u8; 24],
    /// Ciphertext including the 16-byte Poly1305 tag.
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Concatenates nonce and ciphertext into the wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Splits a wire-format envelope back into nonce and ciphertext.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() < 24 {
            return Err(CoreError::Decrypt("envelope shorter than nonce".to_string()));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(24);
        let nonce: [u8; 24] = nonce_bytes.try_into().expect("split_at(24) guarantees length");
        Ok(Self { nonce, ciphertext: ciphertext.to_vec() })
    }
}

/// Encrypts `plaintext` (the TLS-serialized MLS message) under `conversation_key`.
pub fn encrypt_envelope(conversation_key: &[u8; 32], plaintext: &[u8], nonce: [u8; 24]) -> Envelope {
    let cipher = XChaCha20Poly1305::new(conversation_key.into());
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };
    Envelope { nonce, ciphertext }
}

/// Decrypts an envelope under `conversation_key`.
pub fn decrypt_envelope(conversation_key: &[u8; 32], envelope: &Envelope) -> Result<Vec<u8>, CoreError> {
    let cipher = XChaCha20Poly1305::new(conversation_key.into());
    cipher
        .decrypt(XNonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
        .map_err(|_| CoreError::Decrypt("envelope authentication failed".to_string()))
}

/// A bounded ring of recently-seen epoch secrets, so that a message
/// encrypted under an epoch that has since advanced (but not yet expired
/// from this history) can still be decrypted.
#[derive(Debug, Clone)]
pub struct EpochHistory {
    capacity: usize,
    entries: VecDeque<(u64, [u8; 32])>,
}

impl EpochHistory {
    /// Builds an empty history retaining at most `capacity` epochs.
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: VecDeque::new() }
    }

    /// Records the conversation key for `epoch`, evicting the oldest entry
    /// if the history is full. A repeated call for an already-recorded
    /// epoch is a no-op.
    pub fn record(&mut self, epoch: u64, conversation_key: [u8; 32]) {
        if self.entries.iter().any(|(e, _)| *e == epoch) {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((epoch, conversation_key));
    }

    /// Iterates recorded keys, most recently recorded first.
    pub fn iter(&self) -> impl Iterator<Item = &(u64, [u8; 32])> {
        self.entries.iter().rev()
    }
}
