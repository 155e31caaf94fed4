//! Length-prefixed binary primitives shared by every wire-level type.
//!
//! All multi-byte integers are big-endian. Every variable-length field is
//! preceded by a 4-byte `u32` length prefix giving the byte length of what
//! follows (for byte strings) or the element count (for arrays of strings).
//! Decoding never panics: a declared length that would read past the end of
//! the input produces [`CodecError::ShortInput`] instead.

use bytes::{Buf, BufMut};

use crate::error::CodecError;

/// Appends a 4-byte big-endian length prefix followed by `bytes`.
pub fn put_bytes(dst: &mut impl BufMut, bytes: &[u8]) {
    dst.put_u32(bytes.len() as u32);
    dst.put_slice(bytes);
}

/// Reads a length-prefixed byte string, advancing `src` past it.
pub fn get_bytes(src: &mut impl Buf) -> Result<Vec<u8>, CodecError> {
    let len = get_u32(src)? as usize;
    if src.remaining() < len {
        return Err(CodecError::ShortInput { needed: len, available: src.remaining() });
    }
    let mut out = vec![0u8; len];
    src.copy_to_slice(&mut out);
    Ok(out)
}

/// Appends a length-prefixed UTF-8 string.
pub fn put_string(dst: &mut impl BufMut, s: &str) {
    put_bytes(dst, s.as_bytes());
}

/// Reads a length-prefixed UTF-8 string.
pub fn get_string(src: &mut impl Buf) -> Result<String, CodecError> {
    let bytes = get_bytes(src)?;
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
}

/// Appends a `u32` count followed by each string, individually length-prefixed.
pub fn put_string_array(dst: &mut impl BufMut, items: &[String]) {
    dst.put_u32(items.len() as u32);
    for item in items {
        put_string(dst, item);
    }
}

/// Reads a length-prefixed string array.
pub fn get_string_array(src: &mut impl Buf) -> Result<Vec<String>, CodecError> {
    let count = get_u32(src)? as usize;
    let mut out = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        out.push(get_string(src)?);
    }
    Ok(out)
}

/// Appends an optional fixed-size field: `0u32` followed by nothing when
/// absent, `len(bytes)` followed by `bytes` when present.
pub fn put_optional_fixed(dst: &mut impl BufMut, bytes: Option<&[u8]>) {
    match bytes {
        Some(b) => put_bytes(dst, b),
        None => dst.put_u32(0),
    }
}

/// Reads an optional fixed-size field, validating its length against
/// `expected` when present. A length of zero decodes to `None`.
pub fn get_optional_fixed(
    src: &mut impl Buf,
    field: &'static str,
    expected: usize,
) -> Result<Option<Vec<u8>>, CodecError> {
    let bytes = get_bytes(src)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    if bytes.len() != expected {
        return Err(CodecError::InvalidFieldLength { field, expected, got: bytes.len() });
    }
    Ok(Some(bytes))
}

/// Reads a big-endian `u32`, failing with [`CodecError::ShortInput`] if fewer
/// than 4 bytes remain.
pub fn get_u32(src: &mut impl Buf) -> Result<u32, CodecError> {
    if src.remaining() < 4 {
        return Err(CodecError::ShortInput { needed: 4, available: src.remaining() });
    }
    Ok(src.get_u32())
}

/// Reads a single `u8`, failing with [`CodecError::ShortInput`] if empty.
pub fn get_u8(src: &mut impl Buf) -> Result<u8, CodecError> {
    if src.remaining() < 1 {
        return Err(CodecError::ShortInput { needed: 1, available: src.remaining() });
    }
    Ok(src.get_u8())
}

/// Encodes bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a lowercase-or-uppercase hex string.
pub fn from_hex(s: &str) -> Result<Vec<u8>, CodecError> {
    hex::decode(s).map_err(|e| CodecError::Hex(e.to_string()))
}

/// Encodes bytes as standard base64 (with padding), the content encoding
/// used by key-package and welcome events.
pub fn to_base64(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes standard base64 content.
pub fn from_base64(s: &str) -> Result<Vec<u8>, CodecError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).map_err(|e| CodecError::Base64(e.to_string()))
}
