//! Secret payload codec.
//!
//! On the wire, secret values are base64 text; in memory they are raw
//! bytes. The conversion happens only here, wired into `Secret::data`
//! through `#[serde(with = "codec::base64_map")]`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text.trim())
}

/// Serde adapter for `BTreeMap<String, Vec<u8>>` stored as base64 strings.
pub mod base64_map {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        data: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, String> = data
            .iter()
            .map(|(k, v)| (k.as_str(), super::encode(v)))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        // The API omits `data` (or sends null) for an empty secret.
        let encoded: Option<BTreeMap<String, String>> = Option::deserialize(deserializer)?;
        encoded
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| {
                super::decode(&v)
                    .map(|bytes| (k.clone(), bytes))
                    .map_err(|e| D::Error::custom(format!("secret key `{k}`: {e}")))
            })
            .collect()
    }
}
