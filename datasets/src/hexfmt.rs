//! Serde helpers serializing byte fields as hex strings.

use serde::{Deserialize, Deserializer, Serializer};

/// `Option<[u8; N]>` as an optional hex string.
pub mod opt_array {
    use super::*;

    pub fn serialize<S, const N: usize>(
        value: &Option<[u8; N]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<Option<[u8; N]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text: Option<String> = Option::deserialize(deserializer)?;
        match text {
            None => Ok(None),
            Some(text) => {
                let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
                let array: [u8; N] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom(format!("expected {N} hex bytes")))?;
                Ok(Some(array))
            }
        }
    }
}

/// `Vec<u8>` as a hex string.
pub mod vec {
    use super::*;

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(serde::de::Error::custom)
    }
}
