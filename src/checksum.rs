//! Content hashes for schema versions

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// SHA-256 over a schema's type, payload and properties
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Hash the identity of a schema.
    ///
    /// Every field is length-prefixed so that moving bytes between the type,
    /// the payload and the properties always changes the hash.
    pub fn of_schema(type_name: &str, data: &[u8], props: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        };
        field(type_name.as_bytes());
        field(data);
        for (key, value) in props {
            field(key.as_bytes());
            field(value.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Checksum {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_checksum_consistency() {
        let a = Checksum::of_schema("AVRO", b"{}", &props(&[("owner", "billing")]));
        let b = Checksum::of_schema("AVRO", b"{}", &props(&[("owner", "billing")]));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_checksum_covers_every_field() {
        let base = Checksum::of_schema("AVRO", b"{}", &BTreeMap::new());
        assert_ne!(base, Checksum::of_schema("JSON", b"{}", &BTreeMap::new()));
        assert_ne!(base, Checksum::of_schema("AVRO", b"{ }", &BTreeMap::new()));
        assert_ne!(base, Checksum::of_schema("AVRO", b"{}", &props(&[("k", "v")])));
    }

    #[test]
    fn test_field_boundaries_matter() {
        let a = Checksum::of_schema("AV", b"RO", &BTreeMap::new());
        let b = Checksum::of_schema("AVRO", b"", &BTreeMap::new());
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_bytes() {
        assert_eq!(
            Checksum::from_bytes(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
