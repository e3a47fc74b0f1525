use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Serialize to deterministic bincode bytes. Block identity and signing
/// payloads depend on this encoding being stable across nodes.
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from bincode bytes
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    bincode::deserialize(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Serialize to JSON (for inspection and logs)
pub fn to_json<T: Serialize>(value: &T) -> Result<String, CoreError> {
    serde_json::to_string(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from a JSON string
pub fn from_json<'a, T: Deserialize<'a>>(json: &'a str) -> Result<T, CoreError> {
    serde_json::from_str(json).map_err(|e| CoreError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Probe {
        number: u64,
        tag: String,
    }

    #[test]
    fn test_bincode_roundtrip() {
        let original = Probe {
            number: 9,
            tag: "head".to_string(),
        };
        let bytes = to_bytes(&original).unwrap();
        let back: Probe = from_bytes(&bytes).unwrap();
        assert_eq!(original, back);
    }

    #[test]
    fn test_encoding_is_stable() {
        let value = Probe {
            number: 100,
            tag: "stable".to_string(),
        };
        assert_eq!(to_bytes(&value).unwrap(), to_bytes(&value).unwrap());
    }

    #[test]
    fn test_json_roundtrip() {
        let original = Probe {
            number: 1,
            tag: "json".to_string(),
        };
        let json = to_json(&original).unwrap();
        let back: Probe = from_json(&json).unwrap();
        assert_eq!(original, back);
    }
}
