//! Event-network data model.
//!
//! The source distinguishes events by an integer kind and a tag-tuple
//! structure; here each kind is a tagged variant carrying already-validated
//! fields, with a single parse function per kind owning the validation
//! (§9 Design Notes).

use groupwire_codec::primitives::{from_hex, to_hex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Key-package publication envelope.
pub const KIND_KEY_PACKAGE: u32 = 443;
/// Welcome inner event (unsigned rumor).
pub const KIND_WELCOME: u32 = 444;
/// Group message envelope.
pub const KIND_GROUP_MESSAGE: u32 = 445;
/// Gift-wrap privacy envelope.
pub const KIND_GIFT_WRAP: u32 = 1059;
/// Key-package relay list.
pub const KIND_KEY_PACKAGE_RELAY_LIST: u32 = 10051;
/// Generic deletion (NIP-09).
pub const KIND_DELETION: u32 = 5;

/// A single `["name", "value", ...]` tag.
pub type Tag = Vec<String>;

/// An unsigned inner event ("rumor"). Used for application messages inside
/// MLS and for the inner welcome carried by a gift-wrap.
///
/// `id` is always the hash of the canonical serialization (`ensure_id`
/// recomputes it); lack of a signature is intentional — leaked content
/// cannot be replayed as a valid network event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    /// Hash of the canonical serialization of the remaining fields.
    pub id: String,
    /// Sender identity, hex-encoded.
    pub pubkey: String,
    /// Event kind.
    pub kind: u32,
    /// Unix timestamp in seconds.
    pub created_at: u64,
    /// Event payload.
    pub content: String,
    /// Tag tuples.
    pub tags: Vec<Tag>,
}

impl UnsignedEvent {
    /// Builds an event and computes its id immediately.
    pub fn new(pubkey: [u8; 32], kind: u32, created_at: u64, content: String, tags: Vec<Tag>) -> Self {
        let mut event = Self {
            id: String::new(),
            pubkey: to_hex(&pubkey),
            kind,
            created_at,
            content,
            tags,
        };
        event.id = event.compute_id();
        event
    }

    /// Recomputes and overwrites `id` from the current field values.
    pub fn ensure_id(&mut self) {
        self.id = self.compute_id();
    }

    /// Hash of the canonical `[0, pubkey, created_at, kind, tags, content]`
    /// serialization, hex-encoded.
    fn compute_id(&self) -> String {
        let canonical = (0, &self.pubkey, self.created_at, self.kind, &self.tags, &self.content);
        let json = serde_json::to_string(&canonical).expect("tuple serialization is infallible");
        let digest = Sha256::digest(json.as_bytes());
        to_hex(&digest)
    }

    /// Serializes this event to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("UnsignedEvent serialization is infallible")
    }

    /// Parses a JSON-encoded event, validating that all required fields are
    /// present (`id`, `pubkey`, `kind`, `created_at`, `content`, `tags`).
    pub fn from_json(json: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(json)
            .map_err(|e| CoreError::Decode(format!("invalid application data: {e}")))
    }

    /// Decodes the hex-encoded `pubkey` field.
    pub fn pubkey_bytes(&self) -> Result<[u8; 32], CoreError> {
        let bytes = from_hex(&self.pubkey)?;
        bytes.try_into().map_err(|_| CoreError::InvalidInput("pubkey is not 32 bytes".to_string()))
    }

    /// Finds the first tag whose first element equals `name`, returning the
    /// remainder of that tag.
    pub fn find_tag(&self, name: &str) -> Option<&[String]> {
        self.tags.iter().find(|t| t.first().map(String::as_str) == Some(name)).map(Vec::as_slice)
    }
}

/// A fully-built key package publication event (kind 443), prior to signing.
#[derive(Debug, Clone)]
pub struct KeyPackageEvent {
    /// Base64 or hex-encoded key package bytes, per `content_encoding`.
    pub content: String,
    /// Whether `content` is `base64` or `hex` encoded.
    pub content_encoding: ContentEncoding,
    /// MLS protocol version string tag.
    pub mls_version: String,
    /// Cipher suite identifier, hex-encoded.
    pub ciphersuite_hex: String,
    /// Declared extension types, hex-encoded, grease-filtered.
    pub extensions_hex: Vec<String>,
    /// Optional relay hints.
    pub relays: Vec<String>,
    /// Optional client name.
    pub client: Option<String>,
}

/// Content encoding used for event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    /// Standard base64.
    Base64,
    /// Lowercase hex (the legacy default).
    Hex,
}

impl ContentEncoding {
    /// Parses the `encoding` tag value, defaulting to hex for legacy events
    /// that omit the tag.
    pub fn from_tag(value: Option<&str>) -> Self {
        match value {
            Some("base64") => Self::Base64,
            _ => Self::Hex,
        }
    }

    /// The tag value this encoding serializes to.
    pub fn as_tag_value(self) -> &'static str {
        match self {
            Self::Base64 => "base64",
            Self::Hex => "hex",
        }
    }
}

impl KeyPackageEvent {
    /// Builds the unsigned kind-443 event for this key package publication.
    pub fn into_unsigned_event(self, pubkey: [u8; 32], created_at: u64) -> UnsignedEvent {
        let mut tags = vec![
            vec!["mls_protocol_version".to_string(), self.mls_version],
            vec!["ciphersuite".to_string(), self.ciphersuite_hex],
            vec!["encoding".to_string(), self.content_encoding.as_tag_value().to_string()],
        ];
        for ext in self.extensions_hex {
            tags.push(vec!["extension".to_string(), ext]);
        }
        for relay in self.relays {
            tags.push(vec!["relay".to_string(), relay]);
        }
        if let Some(client) = self.client {
            tags.push(vec!["client".to_string(), client]);
        }
        UnsignedEvent::new(pubkey, KIND_KEY_PACKAGE, created_at, self.content, tags)
    }
}

/// Builds the generic-deletion event (NIP-09, kind 5) retracting previously
/// published key-package events.
pub fn build_deletion_event(pubkey: [u8; 32], created_at: u64, deleted_event_ids: &[String]) -> UnsignedEvent {
    let mut tags = vec![vec!["k".to_string(), KIND_KEY_PACKAGE.to_string()]];
    for id in deleted_event_ids {
        tags.push(vec!["e".to_string(), id.clone()]);
    }
    UnsignedEvent::new(pubkey, KIND_DELETION, created_at, String::new(), tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rumor_round_trips_through_json() {
        let rumor = UnsignedEvent::new(
            [4u8; 32],
            9,
            1_700_000_000,
            "hello".to_string(),
            vec![vec!["h".to_string(), "abc".to_string()]],
        );
        let json = rumor.to_json();
        let decoded = UnsignedEvent::from_json(json.as_bytes()).unwrap();
        assert_eq!(decoded, rumor);
    }

    #[test]
    fn ensure_id_is_stable_for_same_fields() {
        let mut a = UnsignedEvent::new([1u8; 32], 9, 5, "x".to_string(), vec![]);
        let original_id = a.id.clone();
        a.ensure_id();
        assert_eq!(a.id, original_id);
    }

    #[test]
    fn ensure_id_changes_when_content_changes() {
        let mut a = UnsignedEvent::new([1u8; 32], 9, 5, "x".to_string(), vec![]);
        let id_before = a.id.clone();
        a.content = "y".to_string();
        a.ensure_id();
        assert_ne!(a.id, id_before);
    }

    #[test]
    fn from_json_rejects_missing_required_field() {
        let json = br#"{"pubkey":"aa","kind":9,"created_at":1,"content":"x","tags":[]}"#;
        assert!(UnsignedEvent::from_json(json).is_err());
    }

    #[test]
    fn content_encoding_defaults_to_hex_for_legacy_events() {
        assert_eq!(ContentEncoding::from_tag(None), ContentEncoding::Hex);
        assert_eq!(ContentEncoding::from_tag(Some("base64")), ContentEncoding::Base64);
    }

    #[test]
    fn deletion_event_has_kind_tag_and_one_e_tag_per_id() {
        let event = build_deletion_event([1u8; 32], 100, &["id1".to_string(), "id2".to_string()]);
        assert_eq!(event.kind, KIND_DELETION);
        assert_eq!(event.find_tag("k"), Some(["k".to_string(), "443".to_string()].as_slice()));
        let e_tags: Vec<_> = event.tags.iter().filter(|t| t[0] == "e").collect();
        assert_eq!(e_tags.len(), 2);
    }
}
