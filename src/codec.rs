//! Canonical, deterministic serialization.
//!
//! Every transaction id and every signature is computed over the bytes
//! produced here, and nowhere else — a second ad-hoc serializer would
//! silently split the network into two sets of ids. `minicbor`'s
//! `#[n(k)]` field indices already fix encoding order; this module is
//! the single call site that turns that property into the crate's
//! canonical form.

use crate::error::CodecError;

pub fn canonical_serialize<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, CodecError> {
    minicbor::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn canonical_deserialize<'b, T: minicbor::Decode<'b, ()>>(
    bytes: &'b [u8],
) -> Result<T, CodecError> {
    minicbor::decode(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}
