//! Error types for the wire-format layer.
//!
//! All decode paths in this crate are bounds-checked and must never panic on
//! attacker-controlled input; malformed bytes always produce a typed
//! [`CodecError`] instead.

use thiserror::Error;

/// Errors produced while encoding or decoding wire primitives and the group
/// data extension.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A declared length prefix exceeds the remaining input.
    #[error("short input: need {needed} bytes, have {available}")]
    ShortInput {
        /// Bytes required to satisfy the declared length.
        needed: usize,
        /// Bytes actually remaining in the input.
        available: usize,
    },

    /// Bytes remained after a field that was expected to consume the rest.
    #[error("trailing bytes: {0} unconsumed")]
    TrailingBytes(usize),

    /// A string field was not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// The group data extension's version byte is not supported.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// A fixed-size field had the wrong length once decoded.
    #[error("invalid field length for {field}: expected {expected}, got {got}")]
    InvalidFieldLength {
        /// Name of the offending field.
        field: &'static str,
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        got: usize,
    },

    /// An admin entry was not exactly 64 lowercase/uppercase hex characters.
    #[error("invalid admin identity hex: {0:?}")]
    InvalidAdminHex(String),

    /// A relay hint was not a syntactically valid `ws://`/`wss://` URL.
    #[error("invalid relay url: {0:?}")]
    InvalidRelayUrl(String),

    /// Hex decoding failed.
    #[error("hex decode error: {0}")]
    Hex(String),

    /// Base64 decoding failed.
    #[error("base64 decode error: {0}")]
    Base64(String),
}

impl CodecError {
    /// True if this error stems purely from malformed/truncated input rather
    /// than a semantic validation rule (hex format, URL format, version).
    ///
    /// Useful for callers that want to distinguish "not enough bytes yet"
    /// from "these bytes will never be valid".
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::ShortInput { .. })
    }
}
