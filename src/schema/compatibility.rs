//! Schema compatibility checking
//!
//! A [`SchemaCompatibilityStrategy`] decides which existing versions a
//! candidate is compared against. The comparison itself is delegated to a
//! [`SchemaCompatibilityCheck`] registered for the candidate's type.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::{SchemaData, SchemaType, StoredSchema};
use crate::error::{MetadataError, Result};

/// Changed lines quoted in an incompatibility message
const MAX_DIFF_LINES: usize = 6;

/// Which existing versions a new schema must be compatible with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaCompatibilityStrategy {
    /// Defer to the configured default
    Undefined,
    AlwaysIncompatible,
    AlwaysCompatible,
    Backward,
    Forward,
    Full,
    BackwardTransitive,
    ForwardTransitive,
    FullTransitive,
}

impl SchemaCompatibilityStrategy {
    pub const ALL: [SchemaCompatibilityStrategy; 9] = [
        SchemaCompatibilityStrategy::Undefined,
        SchemaCompatibilityStrategy::AlwaysIncompatible,
        SchemaCompatibilityStrategy::AlwaysCompatible,
        SchemaCompatibilityStrategy::Backward,
        SchemaCompatibilityStrategy::Forward,
        SchemaCompatibilityStrategy::Full,
        SchemaCompatibilityStrategy::BackwardTransitive,
        SchemaCompatibilityStrategy::ForwardTransitive,
        SchemaCompatibilityStrategy::FullTransitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaCompatibilityStrategy::Undefined => "UNDEFINED",
            SchemaCompatibilityStrategy::AlwaysIncompatible => "ALWAYS_INCOMPATIBLE",
            SchemaCompatibilityStrategy::AlwaysCompatible => "ALWAYS_COMPATIBLE",
            SchemaCompatibilityStrategy::Backward => "BACKWARD",
            SchemaCompatibilityStrategy::Forward => "FORWARD",
            SchemaCompatibilityStrategy::Full => "FULL",
            SchemaCompatibilityStrategy::BackwardTransitive => "BACKWARD_TRANSITIVE",
            SchemaCompatibilityStrategy::ForwardTransitive => "FORWARD_TRANSITIVE",
            SchemaCompatibilityStrategy::FullTransitive => "FULL_TRANSITIVE",
        }
    }

    /// Transitive strategies compare against every live version, the others
    /// only against the latest one.
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            SchemaCompatibilityStrategy::BackwardTransitive
                | SchemaCompatibilityStrategy::ForwardTransitive
                | SchemaCompatibilityStrategy::FullTransitive
        )
    }

    /// Replace `Undefined` with `default`
    pub fn resolve(self, default: SchemaCompatibilityStrategy) -> Self {
        match (self, default) {
            (SchemaCompatibilityStrategy::Undefined, SchemaCompatibilityStrategy::Undefined) => {
                SchemaCompatibilityStrategy::Full
            }
            (SchemaCompatibilityStrategy::Undefined, default) => default,
            (strategy, _) => strategy,
        }
    }
}

impl fmt::Display for SchemaCompatibilityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaCompatibilityStrategy {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                MetadataError::InvalidSchemaData(format!("unknown compatibility strategy '{s}'"))
            })
    }
}

/// Format-specific schema rules.
///
/// Errors are plain reasons; the registry turns them into
/// `InvalidSchemaData` and `IncompatibleSchema` respectively.
pub trait SchemaCompatibilityCheck: Send + Sync {
    /// Structural validation of a candidate before it is compared
    fn validate(&self, _candidate: &SchemaData) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Whether `candidate` may follow `existing` under `strategy`
    fn check(
        &self,
        existing: &SchemaData,
        candidate: &SchemaData,
        strategy: SchemaCompatibilityStrategy,
    ) -> std::result::Result<(), String>;
}

/// Accepts only a byte-identical payload
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteEqualityCheck;

impl SchemaCompatibilityCheck for ByteEqualityCheck {
    fn check(
        &self,
        existing: &SchemaData,
        candidate: &SchemaData,
        _strategy: SchemaCompatibilityStrategy,
    ) -> std::result::Result<(), String> {
        if existing.data == candidate.data {
            Ok(())
        } else {
            Err(describe_difference(&existing.data_text(), &candidate.data_text()))
        }
    }
}

/// AVRO definitions must parse; two definitions match when their parsing
/// canonical forms are equal.
///
/// This is an identity check under every strategy: `BACKWARD`, `FORWARD`,
/// `FULL` and their transitive forms all accept only the same definition.
/// Field-level evolution rules need a checker installed with
/// `SchemaRegistry::register_check`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvroSchemaCheck;

impl AvroSchemaCheck {
    fn canonical(schema: &SchemaData) -> std::result::Result<String, String> {
        let text = std::str::from_utf8(&schema.data)
            .map_err(|e| format!("AVRO definition is not UTF-8: {e}"))?;
        apache_avro::Schema::parse_str(text)
            .map(|parsed| parsed.canonical_form())
            .map_err(|e| format!("invalid AVRO definition: {e}"))
    }
}

impl SchemaCompatibilityCheck for AvroSchemaCheck {
    fn validate(&self, candidate: &SchemaData) -> std::result::Result<(), String> {
        Self::canonical(candidate).map(|_| ())
    }

    fn check(
        &self,
        existing: &SchemaData,
        candidate: &SchemaData,
        _strategy: SchemaCompatibilityStrategy,
    ) -> std::result::Result<(), String> {
        let old = Self::canonical(existing)?;
        let new = Self::canonical(candidate)?;
        if old == new {
            Ok(())
        } else {
            Err(describe_difference(&old, &new))
        }
    }
}

/// JSON definitions must parse; two definitions match when they are the
/// same JSON value, whatever the formatting. Like [`AvroSchemaCheck`], the
/// strategy does not loosen the comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaCheck;

impl JsonSchemaCheck {
    fn parse(schema: &SchemaData) -> std::result::Result<serde_json::Value, String> {
        serde_json::from_slice(&schema.data).map_err(|e| format!("invalid JSON definition: {e}"))
    }
}

impl SchemaCompatibilityCheck for JsonSchemaCheck {
    fn validate(&self, candidate: &SchemaData) -> std::result::Result<(), String> {
        Self::parse(candidate).map(|_| ())
    }

    fn check(
        &self,
        existing: &SchemaData,
        candidate: &SchemaData,
        _strategy: SchemaCompatibilityStrategy,
    ) -> std::result::Result<(), String> {
        let old = Self::parse(existing)?;
        let new = Self::parse(candidate)?;
        if old == new {
            return Ok(());
        }
        let pretty = |v: &serde_json::Value| serde_json::to_string_pretty(v).unwrap_or_default();
        Err(describe_difference(&pretty(&old), &pretty(&new)))
    }
}

/// Short line diff for an incompatibility message
pub fn describe_difference(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut lines = Vec::new();
    let mut changed = 0usize;
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => continue,
        };
        changed += 1;
        if lines.len() < MAX_DIFF_LINES {
            lines.push(format!("{sign}{}", change.value().trim_end()));
        }
    }
    if changed > MAX_DIFF_LINES {
        lines.push(format!("... {} more changed lines", changed - MAX_DIFF_LINES));
    }
    format!("schema definition differs: {}", lines.join(" | "))
}

/// The checks in use, keyed by schema type
#[derive(Clone)]
pub struct CompatibilityCheckers {
    by_type: HashMap<SchemaType, Arc<dyn SchemaCompatibilityCheck>>,
    fallback: Arc<dyn SchemaCompatibilityCheck>,
}

impl Default for CompatibilityCheckers {
    fn default() -> Self {
        let mut checkers = Self::empty();
        checkers.register(SchemaType::Avro, Arc::new(AvroSchemaCheck));
        checkers.register(SchemaType::Json, Arc::new(JsonSchemaCheck));
        checkers
    }
}

impl CompatibilityCheckers {
    /// Byte equality for every type
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
            fallback: Arc::new(ByteEqualityCheck),
        }
    }

    pub fn register(&mut self, schema_type: SchemaType, check: Arc<dyn SchemaCompatibilityCheck>) {
        self.by_type.insert(schema_type, check);
    }

    pub fn for_type(&self, schema_type: SchemaType) -> &Arc<dyn SchemaCompatibilityCheck> {
        self.by_type.get(&schema_type).unwrap_or(&self.fallback)
    }

    pub fn validate(&self, candidate: &SchemaData) -> Result<()> {
        self.for_type(candidate.schema_type)
            .validate(candidate)
            .map_err(MetadataError::InvalidSchemaData)
    }

    /// Compare `candidate` with the live generation of `history`.
    ///
    /// `strategy` must already be resolved; `Undefined` is treated as `FULL`.
    pub fn evaluate(
        &self,
        live: &[StoredSchema],
        candidate: &SchemaData,
        strategy: SchemaCompatibilityStrategy,
    ) -> Result<()> {
        let strategy = strategy.resolve(SchemaCompatibilityStrategy::Full);
        if strategy == SchemaCompatibilityStrategy::AlwaysCompatible {
            return Ok(());
        }
        let Some(latest) = live.last() else {
            return Ok(());
        };
        if strategy == SchemaCompatibilityStrategy::AlwaysIncompatible {
            return Err(MetadataError::IncompatibleSchema(format!(
                "strategy {strategy} rejects every new schema"
            )));
        }

        let targets = if strategy.is_transitive() {
            live
        } else {
            std::slice::from_ref(latest)
        };
        let check = self.for_type(candidate.schema_type);
        for existing in targets {
            if existing.schema.schema_type != candidate.schema_type {
                return Err(MetadataError::IncompatibleSchema(format!(
                    "schema type {} cannot replace {} (version {})",
                    candidate.schema_type, existing.schema.schema_type, existing.version
                )));
            }
            check
                .check(&existing.schema, candidate, strategy)
                .map_err(|reason| {
                    MetadataError::IncompatibleSchema(format!(
                        "{reason} (against version {} under {strategy})",
                        existing.version
                    ))
                })?;
        }
        Ok(())
    }
}
