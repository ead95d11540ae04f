//! The metadata store boundary
//!
//! Resources never talk to a concrete backend; they use [`MetadataStore`],
//! a path-keyed byte store with per-node version tokens and a notification
//! feed. [`MemoryStore`] is the in-process implementation.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::notification::Subscription;
use crate::path::ResourcePath;

pub use memory::{MemoryStore, StoreSnapshot};

/// Node metadata returned with every read and write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Version token, bumped on every write to the node
    pub version: u64,
    /// Epoch millis
    pub created_timestamp: i64,
    /// Epoch millis
    pub modified_timestamp: i64,
}

/// A value together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResult {
    pub value: Vec<u8>,
    pub stat: Stat,
}

/// Condition attached to a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Unconditional
    Any,
    /// Only if no value is stored at the path
    Absent,
    /// Only if the stored value is at exactly this version
    Exactly(u64),
}

/// Path-addressed store with optimistic concurrency.
///
/// Writes whose [`ExpectedVersion`] does not hold fail with
/// `MetadataError::BadVersion`. Missing ancestors are created as value-less
/// namespace nodes. Every change is published to subscribers before the
/// write returns.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Value at `path`; `None` if the node is missing or holds no value
    async fn get(&self, path: &ResourcePath) -> Result<Option<GetResult>>;

    /// Sorted names of the direct children; empty for a missing node
    async fn get_children(&self, path: &ResourcePath) -> Result<Vec<String>>;

    /// Whether the node exists, with or without a value
    async fn exists(&self, path: &ResourcePath) -> Result<bool>;

    async fn put(&self, path: &ResourcePath, value: Vec<u8>, expected: ExpectedVersion)
        -> Result<Stat>;

    /// Remove the node. Fails with `NotFound` if missing and `NotEmpty` if it
    /// still has children.
    async fn delete(&self, path: &ResourcePath, expected_version: Option<u64>) -> Result<()>;

    /// Feed of every change made after this call
    fn subscribe(&self) -> Subscription;
}
