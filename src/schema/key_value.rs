//! Key-value schema transcoding
//!
//! Clients submit a key-value schema as one JSON document holding a key and a
//! value component. It is stored as `[u32 len][key schema][u32 len][value
//! schema]` (big-endian lengths) with each component's name, type and
//! properties kept in the schema properties.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::SchemaType;
use crate::error::{MetadataError, Result};

pub const KEY_SCHEMA_NAME: &str = "key.schema.name";
pub const KEY_SCHEMA_TYPE: &str = "key.schema.type";
pub const KEY_SCHEMA_PROPS: &str = "key.schema.properties";
pub const VALUE_SCHEMA_NAME: &str = "value.schema.name";
pub const VALUE_SCHEMA_TYPE: &str = "value.schema.type";
pub const VALUE_SCHEMA_PROPS: &str = "value.schema.properties";
pub const KV_ENCODING_TYPE: &str = "kv.encoding.type";

const INLINE_ENCODING: &str = "INLINE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Component {
    #[serde(default)]
    name: String,
    #[serde(default)]
    schema: Value,
    #[serde(rename = "type")]
    schema_type: SchemaType,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct KeyValueDocument {
    key: Component,
    value: Component,
}

/// Binary payload plus the properties describing its components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedKeyValue {
    pub data: Vec<u8>,
    pub props: BTreeMap<String, String>,
}

fn invalid(message: impl Into<String>) -> MetadataError {
    MetadataError::InvalidSchemaData(message.into())
}

fn component_bytes(schema: &Value) -> Result<Vec<u8>> {
    match schema {
        Value::Null => Ok(Vec::new()),
        Value::String(text) => Ok(text.as_bytes().to_vec()),
        other => Ok(serde_json::to_vec(other)?),
    }
}

fn component_value(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::String(String::new());
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(parsed @ (Value::Object(_) | Value::Array(_))) => parsed,
        _ => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn push_part(out: &mut Vec<u8>, part: &[u8]) -> Result<()> {
    let len = u32::try_from(part.len()).map_err(|_| invalid("key-value component too large"))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(part);
    Ok(())
}

fn take_part<'a>(input: &mut &'a [u8], which: &str) -> Result<&'a [u8]> {
    if input.len() < 4 {
        return Err(invalid(format!("truncated key-value schema: missing {which} length")));
    }
    let (len, rest) = input.split_at(4);
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if rest.len() < len {
        return Err(invalid(format!("truncated key-value schema: short {which} component")));
    }
    let (part, rest) = rest.split_at(len);
    *input = rest;
    Ok(part)
}

/// Turn the combined JSON document into the stored form
pub fn encode(document: &str) -> Result<EncodedKeyValue> {
    let parsed: KeyValueDocument = serde_json::from_str(document)
        .map_err(|e| invalid(format!("invalid key-value schema: {e}")))?;

    let mut data = Vec::new();
    push_part(&mut data, &component_bytes(&parsed.key.schema)?)?;
    push_part(&mut data, &component_bytes(&parsed.value.schema)?)?;

    let mut props = BTreeMap::new();
    props.insert(KEY_SCHEMA_NAME.to_string(), parsed.key.name);
    props.insert(KEY_SCHEMA_TYPE.to_string(), parsed.key.schema_type.to_string());
    props.insert(KEY_SCHEMA_PROPS.to_string(), serde_json::to_string(&parsed.key.properties)?);
    props.insert(VALUE_SCHEMA_NAME.to_string(), parsed.value.name);
    props.insert(VALUE_SCHEMA_TYPE.to_string(), parsed.value.schema_type.to_string());
    props.insert(VALUE_SCHEMA_PROPS.to_string(), serde_json::to_string(&parsed.value.properties)?);
    props.insert(KV_ENCODING_TYPE.to_string(), INLINE_ENCODING.to_string());

    Ok(EncodedKeyValue { data, props })
}

fn component(
    bytes: &[u8],
    props: &BTreeMap<String, String>,
    name_key: &str,
    type_key: &str,
    props_key: &str,
) -> Result<Component> {
    let schema_type = props
        .get(type_key)
        .ok_or_else(|| invalid(format!("key-value schema lacks '{type_key}'")))?
        .parse::<SchemaType>()?;
    let properties = match props.get(props_key) {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| invalid(format!("invalid '{props_key}': {e}")))?,
        None => BTreeMap::new(),
    };
    Ok(Component {
        name: props.get(name_key).cloned().unwrap_or_default(),
        schema: component_value(bytes),
        schema_type,
        properties,
    })
}

/// Rebuild the combined JSON document from the stored form
pub fn decode(data: &[u8], props: &BTreeMap<String, String>) -> Result<String> {
    let mut input = data;
    let key = take_part(&mut input, "key")?;
    let value = take_part(&mut input, "value")?;
    if !input.is_empty() {
        return Err(invalid("trailing bytes after key-value schema"));
    }

    let document = KeyValueDocument {
        key: component(key, props, KEY_SCHEMA_NAME, KEY_SCHEMA_TYPE, KEY_SCHEMA_PROPS)?,
        value: component(value, props, VALUE_SCHEMA_NAME, VALUE_SCHEMA_TYPE, VALUE_SCHEMA_PROPS)?,
    };
    Ok(serde_json::to_string(&document)?)
}
