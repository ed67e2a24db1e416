use crate::error::Result;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub struct Serializer;

impl Serializer {
    fn options() -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .reject_trailing_bytes()
    }

    /// Serialize any serializable value
    pub fn serialize_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(Self::options().serialize(value)?)
    }

    /// Deserialize a value, reading no more than `bytes.len()` bytes
    pub fn deserialize_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(Self::options()
            .with_limit(bytes.len() as u64)
            .deserialize(bytes)?)
    }
}
