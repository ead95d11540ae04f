//! Versioned schema registry
//!
//! Every topic has an ordered, append-only history of schemas stored as one
//! record at `/schemas/{tenant}/{namespace}/{topic}`. Deletion appends a
//! marker rather than removing anything, so a topic can later start a new
//! generation of schemas.

pub mod compatibility;
pub mod key_value;
pub mod registry;
pub mod version;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::checksum::Checksum;
use crate::error::{MetadataError, Result};

pub use compatibility::{
    CompatibilityCheckers, SchemaCompatibilityCheck, SchemaCompatibilityStrategy,
};
pub use registry::SchemaRegistry;
pub use version::{SchemaVersion, NO_SCHEMA_VERSION};

/// Payload format of a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaType {
    None,
    String,
    Json,
    Protobuf,
    Avro,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Date,
    Time,
    Timestamp,
    KeyValue,
    Bytes,
    ProtobufNative,
    Instant,
    LocalDate,
    LocalTime,
    LocalDateTime,
}

impl SchemaType {
    pub const ALL: [SchemaType; 22] = [
        SchemaType::None,
        SchemaType::String,
        SchemaType::Json,
        SchemaType::Protobuf,
        SchemaType::Avro,
        SchemaType::Boolean,
        SchemaType::Int8,
        SchemaType::Int16,
        SchemaType::Int32,
        SchemaType::Int64,
        SchemaType::Float,
        SchemaType::Double,
        SchemaType::Date,
        SchemaType::Time,
        SchemaType::Timestamp,
        SchemaType::KeyValue,
        SchemaType::Bytes,
        SchemaType::ProtobufNative,
        SchemaType::Instant,
        SchemaType::LocalDate,
        SchemaType::LocalTime,
        SchemaType::LocalDateTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::None => "NONE",
            SchemaType::String => "STRING",
            SchemaType::Json => "JSON",
            SchemaType::Protobuf => "PROTOBUF",
            SchemaType::Avro => "AVRO",
            SchemaType::Boolean => "BOOLEAN",
            SchemaType::Int8 => "INT8",
            SchemaType::Int16 => "INT16",
            SchemaType::Int32 => "INT32",
            SchemaType::Int64 => "INT64",
            SchemaType::Float => "FLOAT",
            SchemaType::Double => "DOUBLE",
            SchemaType::Date => "DATE",
            SchemaType::Time => "TIME",
            SchemaType::Timestamp => "TIMESTAMP",
            SchemaType::KeyValue => "KEY_VALUE",
            SchemaType::Bytes => "BYTES",
            SchemaType::ProtobufNative => "PROTOBUF_NATIVE",
            SchemaType::Instant => "INSTANT",
            SchemaType::LocalDate => "LOCAL_DATE",
            SchemaType::LocalTime => "LOCAL_TIME",
            SchemaType::LocalDateTime => "LOCAL_DATE_TIME",
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaType {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| MetadataError::InvalidSchemaData(format!("unknown schema type '{s}'")))
    }
}

/// Payload bytes as a base64 string instead of a JSON number array
mod base64_payload {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(de::Error::custom)
    }
}

/// A schema as submitted, or as stored in one version slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaData {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    #[serde(with = "base64_payload")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

impl SchemaData {
    pub fn new(schema_type: SchemaType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            schema_type,
            data: data.into(),
            user: String::new(),
            timestamp: 0,
            is_deleted: false,
            props: BTreeMap::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_props(mut self, props: BTreeMap<String, String>) -> Self {
        self.props = props;
        self
    }

    /// The entry appended by a soft delete
    pub fn deletion_marker(user: impl Into<String>, timestamp: i64) -> Self {
        Self {
            is_deleted: true,
            ..Self::new(SchemaType::None, Vec::<u8>::new())
                .with_user(user)
                .with_timestamp(timestamp)
        }
    }

    pub fn checksum(&self) -> Checksum {
        Checksum::of_schema(self.schema_type.as_str(), &self.data, &self.props)
    }

    /// Identity comparison: type, payload and properties. Submitter and
    /// timestamp do not count.
    pub fn same_content(&self, other: &SchemaData) -> bool {
        self.schema_type == other.schema_type && self.data == other.data && self.props == other.props
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn data_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// One slot of a schema history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSchema {
    pub version: SchemaVersion,
    pub hash: Checksum,
    pub schema: SchemaData,
}

impl StoredSchema {
    pub fn is_deleted(&self) -> bool {
        self.schema.is_deleted
    }
}

/// The stored record for one schema id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaHistory {
    pub versions: Vec<StoredSchema>,
    /// Next version to hand out; survives a force delete
    pub next_version: u64,
}

impl SchemaHistory {
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn latest(&self) -> Option<&StoredSchema> {
        self.versions.last()
    }

    pub fn find_version(&self, version: SchemaVersion) -> Option<&StoredSchema> {
        self.versions.iter().find(|s| s.version == version)
    }

    /// Versions registered since the most recent delete marker
    pub fn live_generation(&self) -> &[StoredSchema] {
        let start = self
            .versions
            .iter()
            .rposition(StoredSchema::is_deleted)
            .map_or(0, |marker| marker + 1);
        &self.versions[start..]
    }

    /// History with trailing delete markers removed
    pub fn trimmed(&self) -> &[StoredSchema] {
        let end = self
            .versions
            .iter()
            .rposition(|s| !s.is_deleted())
            .map_or(0, |last| last + 1);
        &self.versions[..end]
    }

    /// Live version with identical content, if any
    pub fn find_matching(&self, candidate: &SchemaData) -> Option<SchemaVersion> {
        let hash = candidate.checksum();
        self.live_generation()
            .iter()
            .find(|s| s.hash == hash && s.schema.same_content(candidate))
            .map(|s| s.version)
    }

    /// Append `schema` at the next version
    pub fn append(&mut self, schema: SchemaData) -> SchemaVersion {
        let floor = self.latest().map_or(0, |s| s.version.value() + 1);
        let version = SchemaVersion::new(self.next_version.max(floor));
        self.versions.push(StoredSchema {
            version,
            hash: schema.checksum(),
            schema,
        });
        self.next_version = version.value() + 1;
        version
    }

    /// Drop every version, keeping only the version counter
    pub fn erase(&mut self) {
        self.versions.clear();
    }
}

/// A resolved schema with its id and version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaAndMetadata {
    pub id: String,
    pub version: SchemaVersion,
    pub schema: SchemaData,
}

impl SchemaAndMetadata {
    fn from_stored(id: &str, stored: &StoredSchema) -> Self {
        Self {
            id: id.to_string(),
            version: stored.version,
            schema: stored.schema.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avro(body: &str) -> SchemaData {
        SchemaData::new(SchemaType::Avro, body.as_bytes())
    }

    #[test]
    fn test_schema_type_names() {
        assert_eq!("KEY_VALUE".parse::<SchemaType>().unwrap(), SchemaType::KeyValue);
        assert_eq!("avro".parse::<SchemaType>().unwrap(), SchemaType::Avro);
        assert!("XML".parse::<SchemaType>().is_err());
        assert_eq!(
            serde_json::to_string(&SchemaType::LocalDateTime).unwrap(),
            "\"LOCAL_DATE_TIME\""
        );
        for t in SchemaType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn test_payload_is_stored_as_base64() {
        let schema = avro(r#"{"type":"string"}"#).with_user("alice");
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["data"], "eyJ0eXBlIjoic3RyaW5nIn0=");

        let back: SchemaData = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);

        let binary = SchemaData::new(SchemaType::KeyValue, vec![0u8, 0, 0, 1, 0xff]);
        let encoded = serde_json::to_vec(&binary).unwrap();
        assert_eq!(serde_json::from_slice::<SchemaData>(&encoded).unwrap(), binary);

        let err = serde_json::from_str::<SchemaData>(r#"{"type":"AVRO","data":"not base64!"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_append_numbers_from_zero() {
        let mut history = SchemaHistory::default();
        assert_eq!(history.append(avro("a")), SchemaVersion::new(0));
        assert_eq!(history.append(avro("b")), SchemaVersion::new(1));
        assert_eq!(history.next_version, 2);
    }

    #[test]
    fn test_live_generation_and_trim() {
        let mut history = SchemaHistory::default();
        history.append(avro("a"));
        history.append(SchemaData::deletion_marker("ops", 1));
        history.append(avro("b"));
        assert_eq!(history.live_generation().len(), 1);
        assert_eq!(history.trimmed().len(), 3);

        history.append(SchemaData::deletion_marker("ops", 2));
        assert!(history.live_generation().is_empty());
        assert_eq!(history.trimmed().len(), 3);
    }

    #[test]
    fn test_find_matching_ignores_submitter() {
        let mut history = SchemaHistory::default();
        history.append(avro("a").with_user("alice").with_timestamp(1));
        assert_eq!(
            history.find_matching(&avro("a").with_user("bob")),
            Some(SchemaVersion::new(0))
        );
        assert_eq!(history.find_matching(&avro("b")), None);

        history.append(SchemaData::deletion_marker("ops", 2));
        assert_eq!(history.find_matching(&avro("a")), None);
    }

    #[test]
    fn test_erase_keeps_counter() {
        let mut history = SchemaHistory::default();
        history.append(avro("a"));
        history.append(avro("b"));
        history.erase();
        assert!(history.is_empty());
        assert_eq!(history.append(avro("c")), SchemaVersion::new(2));
    }
}
