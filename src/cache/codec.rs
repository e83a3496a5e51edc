//! Value encoding shared by the byte-oriented tiers (L0 and L2).

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encode a value into the record format stored in L0 and L2
pub fn encode<V: Serialize>(value: &V) -> Result<Bytes> {
    Ok(Bytes::from(bincode::serialize(value)?))
}

/// Decode a record produced by [`encode`]
pub fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    Ok(bincode::deserialize(bytes)?)
}
