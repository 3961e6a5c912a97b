//! Serde adapter for fixed-size byte arrays longer than serde's built-in 32.
//!
//! Use with `#[serde(with = "crate::byte_array")]`.

use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(bytes.iter())
}

pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
where
    D: Deserializer<'de>,
{
    let bytes = Vec::<u8>::deserialize(deserializer)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| D::Error::invalid_length(len, &"a fixed-size byte array"))
}
