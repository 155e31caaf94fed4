//! The group data extension: a binary-serialized container for group
//! metadata and the admin list, embedded as an MLS group-context extension.

use bytes::{Bytes, BytesMut};

use crate::{
    error::CodecError,
    primitives::{
        get_bytes, get_optional_fixed, get_string, get_string_array, get_u8, put_bytes,
        put_optional_fixed, put_string, put_string_array,
    },
};

/// Extension type identifier for the group data extension (§4.2).
pub const EXTENSION_TYPE_GROUP_DATA: u16 = 0xf2ee;

/// Extension type identifier for MLS's last-resort key package extension.
pub const EXTENSION_TYPE_LAST_RESORT: u16 = 0x000a;

/// Only encoding version currently understood.
pub const CURRENT_VERSION: u8 = 1;

/// Returns true if `extension_type` falls in MLS's reserved GREASE range:
/// values whose high and low byte are equal (`0x0A0A`, `0x1A1A`, ... `0xFAFA`).
pub fn is_grease(extension_type: u16) -> bool {
    let [hi, lo] = extension_type.to_be_bytes();
    hi == lo && (hi & 0x0f) == 0x0a
}

/// Decoded group metadata and admin list, as embedded in the MLS group
/// context.
///
/// # Invariants
/// - `group_id` is exactly 32 bytes.
/// - each `admins` entry is exactly 64 hex characters.
/// - each `relays` entry parses as a `ws://` or `wss://` URL.
/// - optional image fields, when present, match their declared fixed length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDataExtension {
    /// Group identifier used on the event network (32 raw bytes).
    pub group_id: [u8; 32],
    /// Human-readable group name.
    pub name: String,
    /// Human-readable group description.
    pub description: String,
    /// Hex-encoded identities (64 chars each) permitted to author commits.
    pub admins: Vec<String>,
    /// Relay URLs where group events are published.
    pub relays: Vec<String>,
    /// Optional 32-byte hash of a group image.
    pub image_hash: Option<[u8; 32]>,
    /// Optional 32-byte symmetric key to decrypt the group image.
    pub image_key: Option<[u8; 32]>,
    /// Optional 12-byte nonce used with `image_key`.
    pub image_nonce: Option<[u8; 12]>,
}

impl GroupDataExtension {
    /// Builds a new extension at the current encoding version with no image
    /// fields set.
    pub fn new(
        group_id: [u8; 32],
        name: impl Into<String>,
        description: impl Into<String>,
        admins: Vec<String>,
        relays: Vec<String>,
    ) -> Self {
        Self {
            group_id,
            name: name.into(),
            description: description.into(),
            admins,
            relays,
            image_hash: None,
            image_key: None,
            image_nonce: None,
        }
    }

    /// The MLS extension type this data is embedded under.
    pub fn extension_type(&self) -> u16 {
        EXTENSION_TYPE_GROUP_DATA
    }

    /// Case-insensitive membership check against the admin list.
    pub fn is_admin(&self, identity_hex: &str) -> bool {
        self.admins.iter().any(|a| a.eq_ignore_ascii_case(identity_hex))
    }

    /// Encodes this value to its wire representation. Encoding is total: it
    /// never fails regardless of field contents (validation happens on
    /// decode, matching the contract in §4.2).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[CURRENT_VERSION]);
        put_bytes(&mut buf, &self.group_id);
        put_string(&mut buf, &self.name);
        put_string(&mut buf, &self.description);
        put_string_array(&mut buf, &self.admins);
        put_string_array(&mut buf, &self.relays);
        put_optional_fixed(&mut buf, self.image_hash.as_ref().map(|h| h.as_slice()));
        put_optional_fixed(&mut buf, self.image_key.as_ref().map(|h| h.as_slice()));
        put_optional_fixed(&mut buf, self.image_nonce.as_ref().map(|h| h.as_slice()));
        buf.to_vec()
    }

    /// Decodes and validates a wire-encoded group data extension.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut src = Bytes::copy_from_slice(bytes);

        let version = get_u8(&mut src)?;
        if version != CURRENT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let group_id_bytes = get_bytes(&mut src)?;
        let group_id: [u8; 32] = group_id_bytes
            .try_into()
            .map_err(|v: Vec<u8>| CodecError::InvalidFieldLength {
                field: "group_id",
                expected: 32,
                got: v.len(),
            })?;

        let name = get_string(&mut src)?;
        let description = get_string(&mut src)?;

        let admins = get_string_array(&mut src)?;
        for admin in &admins {
            validate_admin_hex(admin)?;
        }

        let relays = get_string_array(&mut src)?;
        for relay in &relays {
            validate_relay_url(relay)?;
        }

        let image_hash = get_optional_fixed(&mut src, "image_hash", 32)?
            .map(|v| v.try_into().expect("length validated"));
        let image_key = get_optional_fixed(&mut src, "image_key", 32)?
            .map(|v| v.try_into().expect("length validated"));
        let image_nonce = get_optional_fixed(&mut src, "image_nonce", 12)?
            .map(|v| v.try_into().expect("length validated"));

        Ok(Self {
            group_id,
            name,
            description,
            admins,
            relays,
            image_hash,
            image_key,
            image_nonce,
        })
    }
}

fn validate_admin_hex(admin: &str) -> Result<(), CodecError> {
    if admin.len() != 64 || !admin.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CodecError::InvalidAdminHex(admin.to_string()));
    }
    Ok(())
}

fn validate_relay_url(relay: &str) -> Result<(), CodecError> {
    if relay.starts_with("ws://") || relay.starts_with("wss://") {
        Ok(())
    } else {
        Err(CodecError::InvalidRelayUrl(relay.to_string()))
    }
}
