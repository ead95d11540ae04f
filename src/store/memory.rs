//! In-process metadata store
//!
//! Keeps every node in a `BTreeMap` keyed by rendered path, which makes the
//! children of a node a contiguous key range.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{ExpectedVersion, GetResult, MetadataStore, Stat};
use crate::error::{MetadataError, Result};
use crate::notification::{Notification, NotificationHub, NotificationType, Subscription};
use crate::path::ResourcePath;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Vec<u8>>,
    stat: Stat,
}

impl Node {
    fn namespace(now: i64) -> Self {
        Self {
            value: None,
            stat: Stat {
                version: 0,
                created_timestamp: now,
                modified_timestamp: now,
            },
        }
    }
}

/// Serializable image of a [`MemoryStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    nodes: BTreeMap<String, Node>,
}

impl StoreSnapshot {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// In-memory [`MetadataStore`]
#[derive(Default)]
pub struct MemoryStore {
    nodes: RwLock<BTreeMap<String, Node>>,
    hub: NotificationHub,
}

fn children_prefix(key: &str) -> String {
    if key == "/" {
        key.to_string()
    } else {
        format!("{key}/")
    }
}

fn has_children(nodes: &BTreeMap<String, Node>, key: &str) -> bool {
    let prefix = children_prefix(key);
    nodes
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(k, _)| k.starts_with(&prefix))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose notification ring holds `capacity` entries
    pub fn with_notification_capacity(capacity: usize) -> Self {
        Self {
            nodes: RwLock::default(),
            hub: NotificationHub::with_capacity(capacity),
        }
    }

    /// Rebuild a store from a snapshot
    pub fn restore(snapshot: StoreSnapshot) -> Self {
        Self {
            nodes: RwLock::new(snapshot.nodes),
            hub: NotificationHub::new(),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            nodes: self.nodes.read().clone(),
        }
    }

    /// Number of nodes, namespace nodes included
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, path: &ResourcePath) -> Result<Option<GetResult>> {
        let nodes = self.nodes.read();
        Ok(nodes.get(&path.to_string()).and_then(|node| {
            node.value.as_ref().map(|value| GetResult {
                value: value.clone(),
                stat: node.stat,
            })
        }))
    }

    async fn get_children(&self, path: &ResourcePath) -> Result<Vec<String>> {
        let prefix = children_prefix(&path.to_string());
        let nodes = self.nodes.read();
        let children = nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        Ok(children)
    }

    async fn exists(&self, path: &ResourcePath) -> Result<bool> {
        if path.is_root() {
            return Ok(true);
        }
        Ok(self.nodes.read().contains_key(&path.to_string()))
    }

    async fn put(
        &self,
        path: &ResourcePath,
        value: Vec<u8>,
        expected: ExpectedVersion,
    ) -> Result<Stat> {
        if path.is_root() {
            return Err(MetadataError::InvalidPath("cannot write to the root".into()));
        }
        let key = path.to_string();
        let now = Utc::now().timestamp_millis();
        let mut nodes = self.nodes.write();

        let stored_version = nodes
            .get(&key)
            .and_then(|node| node.value.as_ref().map(|_| node.stat.version));
        let accepted = match (expected, stored_version) {
            (ExpectedVersion::Any, _) => true,
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Exactly(want), Some(have)) => want == have,
            _ => false,
        };
        if !accepted {
            return Err(MetadataError::BadVersion { path: key });
        }

        let mut events = Vec::new();
        for ancestor in path.ancestors() {
            let ancestor_key = ancestor.to_string();
            if !nodes.contains_key(&ancestor_key) {
                nodes.insert(ancestor_key.clone(), Node::namespace(now));
                events.push(Notification::new(ancestor_key, NotificationType::Created));
            }
        }

        let stat = match nodes.get_mut(&key) {
            Some(node) => {
                node.value = Some(value);
                node.stat.version += 1;
                node.stat.modified_timestamp = now;
                events.push(Notification::new(key.clone(), NotificationType::Modified));
                node.stat
            }
            None => {
                let node = Node {
                    value: Some(value),
                    stat: Stat {
                        version: 0,
                        created_timestamp: now,
                        modified_timestamp: now,
                    },
                };
                let stat = node.stat;
                nodes.insert(key.clone(), node);
                events.push(Notification::new(key.clone(), NotificationType::Created));
                if let Some(parent) = path.parent() {
                    events.push(Notification::new(
                        parent.to_string(),
                        NotificationType::ChildrenChanged,
                    ));
                }
                stat
            }
        };

        // Published under the write lock so subscribers see writes in commit order.
        for event in events {
            self.hub.publish(event);
        }
        Ok(stat)
    }

    async fn delete(&self, path: &ResourcePath, expected_version: Option<u64>) -> Result<()> {
        let key = path.to_string();
        let mut nodes = self.nodes.write();

        let node = nodes
            .get(&key)
            .ok_or_else(|| MetadataError::NotFound(key.clone()))?;
        if let Some(want) = expected_version {
            if node.value.is_none() || node.stat.version != want {
                return Err(MetadataError::BadVersion { path: key });
            }
        }
        if has_children(&nodes, &key) {
            return Err(MetadataError::NotEmpty(key));
        }

        nodes.remove(&key);
        self.hub
            .publish(Notification::new(key, NotificationType::Deleted));
        if let Some(parent) = path.parent() {
            self.hub.publish(Notification::new(
                parent.to_string(),
                NotificationType::ChildrenChanged,
            ));
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }
}
