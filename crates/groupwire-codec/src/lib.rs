//! Wire-level binary encoding for groupwire.
//!
//! This crate has no dependency on MLS or async runtimes. It provides:
//!
//! - [`primitives`]: length-prefixed byte/string/array codecs and base64/hex
//!   content encoding, shared by every higher-level wire type.
//! - [`group_data`]: the group data extension embedded inside the MLS group
//!   context (type `0xf2ee`).

pub mod error;
pub mod group_data;
pub mod primitives;

pub use error::CodecError;
pub use group_data::{is_grease, GroupDataExtension, EXTENSION_TYPE_GROUP_DATA, EXTENSION_TYPE_LAST_RESORT};
