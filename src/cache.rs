//! Read-through cache over a [`MetadataStore`]
//!
//! Entries are dropped when a change notification for their path (or a
//! child's path) is observed. Pending notifications are drained before every
//! read, and a fill is discarded if any invalidation happened while it was in
//! flight, so a cached entry never outlives a change the cache has seen.
//! If the notification feed reports lost notifications, everything is dropped.
//!
//! Each map holds at most `capacity` entries; a full map is cleared before the
//! next fill.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::Result;
use crate::notification::Subscription;
use crate::path::ResourcePath;
use crate::store::{MetadataStore, Stat};

pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// A decoded value with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<T> {
    pub value: T,
    pub stat: Stat,
}

pub struct MetadataCache<T> {
    store: Arc<dyn MetadataStore>,
    // `None` records a confirmed miss.
    values: RwLock<HashMap<String, Option<CachedValue<T>>>>,
    children: RwLock<HashMap<String, Vec<String>>>,
    events: Mutex<Subscription>,
    invalidations: AtomicU64,
    capacity: usize,
}

fn parent_key(key: &str) -> Option<String> {
    match key.rsplit_once('/') {
        Some(("", "")) | None => None,
        Some(("", _)) => Some("/".to_string()),
        Some((parent, _)) => Some(parent.to_string()),
    }
}

impl<T> MetadataCache<T>
where
    T: DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self::with_capacity(store, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn MetadataStore>, capacity: usize) -> Self {
        let events = store.subscribe();
        Self {
            store,
            values: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
            events: Mutex::new(events),
            invalidations: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Forget everything cached for `path` and its parent's child list
    pub fn invalidate(&self, path: &str) {
        self.values.write().remove(path);
        let mut children = self.children.write();
        children.remove(path);
        if let Some(parent) = parent_key(path) {
            children.remove(&parent);
        }
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.values.write().clear();
        self.children.write().clear();
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    /// Apply every notification queued since the last read
    fn sync(&self) {
        let mut events = self.events.lock();
        while let Some(notification) = events.try_next() {
            self.invalidate(&notification.path);
        }
        let missed = events.take_missed();
        if missed > 0 {
            warn!(missed, "cache fell behind the notification feed, clearing");
            self.clear();
        }
    }

    fn epoch(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Cache-tolerant read of the value and its version
    pub async fn get_with_stat(&self, path: &ResourcePath) -> Result<Option<CachedValue<T>>> {
        self.sync();
        let key = path.to_string();
        if let Some(hit) = self.values.read().get(&key) {
            return Ok(hit.clone());
        }

        let epoch = self.epoch();
        let entry = match self.store.get(path).await? {
            Some(found) => Some(CachedValue {
                value: serde_json::from_slice(&found.value)?,
                stat: found.stat,
            }),
            None => None,
        };

        self.sync();
        if self.epoch() == epoch {
            debug!(path = %key, present = entry.is_some(), "cache fill");
            let mut values = self.values.write();
            if values.len() >= self.capacity {
                values.clear();
            }
            values.insert(key, entry.clone());
        }
        Ok(entry)
    }

    /// Cache-tolerant read
    pub async fn get(&self, path: &ResourcePath) -> Result<Option<T>> {
        Ok(self.get_with_stat(path).await?.map(|cached| cached.value))
    }

    /// Cache-tolerant child listing
    pub async fn get_children(&self, path: &ResourcePath) -> Result<Vec<String>> {
        self.sync();
        let key = path.to_string();
        if let Some(hit) = self.children.read().get(&key) {
            return Ok(hit.clone());
        }

        let epoch = self.epoch();
        let children = self.store.get_children(path).await?;

        self.sync();
        if self.epoch() == epoch {
            let mut cached = self.children.write();
            if cached.len() >= self.capacity {
                cached.clear();
            }
            cached.insert(key, children.clone());
        }
        Ok(children)
    }

    pub fn cached_entries(&self) -> usize {
        self.values.read().len()
    }

    pub fn cached_listings(&self) -> usize {
        self.children.read().len()
    }
}
