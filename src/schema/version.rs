//! Schema version numbers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MetadataError, Result};

/// External stand-in for "no version"
pub const NO_SCHEMA_VERSION: i64 = -1;

/// Position of a schema in its history, starting at 0.
///
/// Exchanged with clients as an 8-byte big-endian integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(u64);

impl SchemaVersion {
    pub const INITIAL: SchemaVersion = SchemaVersion(0);

    pub fn new(version: u64) -> Self {
        Self(version)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Signed form used on the admin surface
    pub fn as_long(&self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| {
            MetadataError::InvalidSchemaData(format!(
                "schema version must be 8 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(u64::from_be_bytes(raw)))
    }

    /// Accepts the signed external form; negative values are not versions
    pub fn from_long(version: i64) -> Option<Self> {
        u64::try_from(version).ok().map(Self)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SchemaVersion {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| MetadataError::InvalidSchemaData(format!("invalid schema version '{s}'")))
    }
}

impl From<u64> for SchemaVersion {
    fn from(version: u64) -> Self {
        Self(version)
    }
}
