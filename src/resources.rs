//! Typed, path-keyed resources
//!
//! [`BaseResources`] is the CRUD engine every record kind is built on. Values
//! are stored as JSON. Each operation has an `*_async` form and a blocking
//! form that runs the async form on the shared [`WorkerPool`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CachedValue, MetadataCache};
use crate::error::{MetadataError, Result};
use crate::notification::{Notification, Subscription};
use crate::path::ResourcePath;
use crate::pool::WorkerPool;
use crate::store::{ExpectedVersion, MetadataStore};

/// Outcome of one read-modify-write attempt
#[derive(Debug)]
pub enum Mutation<T, R> {
    /// Write `T` back, conditional on the version that was read, then return `R`
    Put(T, R),
    /// Leave the stored value untouched and return `R`
    Keep(R),
}

pub struct BaseResources<T> {
    store: Arc<dyn MetadataStore>,
    cache: MetadataCache<T>,
    pool: Arc<WorkerPool>,
    max_conflict_retries: u32,
}

impl<T> BaseResources<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn MetadataStore>, pool: Arc<WorkerPool>, max_conflict_retries: u32) -> Self {
        Self {
            cache: MetadataCache::new(Arc::clone(&store)),
            store,
            pool,
            max_conflict_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn cache(&self) -> &MetadataCache<T> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Async forms
    // -----------------------------------------------------------------------

    /// Cache-tolerant read
    pub async fn get_async(&self, path: &ResourcePath) -> Result<Option<T>> {
        self.cache.get(path).await
    }

    /// Cache-tolerant read that also returns the version token
    pub async fn get_with_stat_async(&self, path: &ResourcePath) -> Result<Option<CachedValue<T>>> {
        self.cache.get_with_stat(path).await
    }

    /// Read straight from the store
    pub async fn get_fresh_async(&self, path: &ResourcePath) -> Result<Option<T>> {
        match self.store.get(path).await? {
            Some(found) => Ok(Some(serde_json::from_slice(&found.value)?)),
            None => Ok(None),
        }
    }

    /// Store `value` at `path`; `AlreadyExists` if a value is present
    pub async fn create_async(&self, path: &ResourcePath, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let result = self.store.put(path, bytes, ExpectedVersion::Absent).await;
        self.cache.invalidate(&path.to_string());
        match result {
            Ok(_) => Ok(()),
            Err(MetadataError::BadVersion { path }) => Err(MetadataError::AlreadyExists(path)),
            Err(e) => Err(e),
        }
    }

    /// Compare-and-write loop shared by every update.
    ///
    /// `mutate` sees the current value (or `None`) and may run once per
    /// attempt, so it must not have side effects. A conflicting write restarts
    /// the cycle at most `max_conflict_retries` times.
    pub async fn mutate_async<F, R>(&self, path: &ResourcePath, mutate: F) -> Result<R>
    where
        F: Fn(Option<T>) -> Result<Mutation<T, R>> + Send,
        R: Send,
    {
        let attempts = self.max_conflict_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let (current, expected) = match self.store.get(path).await? {
                Some(found) => (
                    Some(serde_json::from_slice::<T>(&found.value)?),
                    ExpectedVersion::Exactly(found.stat.version),
                ),
                None => (None, ExpectedVersion::Absent),
            };

            let (next, outcome) = match mutate(current)? {
                Mutation::Keep(outcome) => return Ok(outcome),
                Mutation::Put(next, outcome) => (next, outcome),
            };

            let bytes = serde_json::to_vec(&next)?;
            match self.store.put(path, bytes, expected).await {
                Ok(_) => {
                    self.cache.invalidate(&path.to_string());
                    return Ok(outcome);
                }
                Err(MetadataError::BadVersion { .. }) => {
                    debug!(path = %path, attempt, "conflicting write, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(path = %path, attempts, "conflict retries exhausted");
        Err(MetadataError::ConflictRetriesExhausted {
            path: path.to_string(),
            attempts,
        })
    }

    /// Read-modify-write of an existing value; `NotFound` if there is none
    pub async fn set_async<F>(&self, path: &ResourcePath, modify: F) -> Result<T>
    where
        F: Fn(T) -> T + Send,
    {
        let key = path.to_string();
        self.mutate_async(path, move |current| match current {
            Some(value) => {
                let next = modify(value);
                Ok(Mutation::Put(next.clone(), next))
            }
            None => Err(MetadataError::NotFound(key.clone())),
        })
        .await
    }

    /// Read-modify-write that builds the initial value from `None`
    pub async fn set_with_create_async<F>(&self, path: &ResourcePath, create_or_modify: F) -> Result<T>
    where
        F: Fn(Option<T>) -> T + Send,
    {
        self.mutate_async(path, move |current| {
            let next = create_or_modify(current);
            Ok(Mutation::Put(next.clone(), next))
        })
        .await
    }

    pub async fn delete_async(&self, path: &ResourcePath) -> Result<()> {
        let result = self.store.delete(path, None).await;
        self.cache.invalidate(&path.to_string());
        result
    }

    /// Cache-bypassing existence check
    pub async fn exists_async(&self, path: &ResourcePath) -> Result<bool> {
        self.store.exists(path).await
    }

    /// Cache-bypassing child listing
    pub async fn get_children_async(&self, path: &ResourcePath) -> Result<Vec<String>> {
        self.store.get_children(path).await
    }

    /// Cache-tolerant child listing
    pub async fn get_children_cached_async(&self, path: &ResourcePath) -> Result<Vec<String>> {
        self.cache.get_children(path).await
    }

    // -----------------------------------------------------------------------
    // Blocking forms
    // -----------------------------------------------------------------------

    pub fn get(&self, path: &ResourcePath) -> Result<Option<T>> {
        self.pool.block_on(self.get_async(path))
    }

    pub fn create(&self, path: &ResourcePath, value: &T) -> Result<()> {
        self.pool.block_on(self.create_async(path, value))
    }

    pub fn set<F>(&self, path: &ResourcePath, modify: F) -> Result<T>
    where
        F: Fn(T) -> T + Send,
    {
        self.pool.block_on(self.set_async(path, modify))
    }

    pub fn set_with_create<F>(&self, path: &ResourcePath, create_or_modify: F) -> Result<T>
    where
        F: Fn(Option<T>) -> T + Send,
    {
        self.pool.block_on(self.set_with_create_async(path, create_or_modify))
    }

    pub fn delete(&self, path: &ResourcePath) -> Result<()> {
        self.pool.block_on(self.delete_async(path))
    }

    pub fn exists(&self, path: &ResourcePath) -> Result<bool> {
        self.pool.block_on(self.exists_async(path))
    }

    pub fn get_children(&self, path: &ResourcePath) -> Result<Vec<String>> {
        self.pool.block_on(self.get_children_async(path))
    }

    pub fn get_children_cached(&self, path: &ResourcePath) -> Result<Vec<String>> {
        self.pool.block_on(self.get_children_cached_async(path))
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Subscription to every change in the store
    pub fn subscribe(&self) -> Subscription {
        self.store.subscribe()
    }

    /// Invoke `listener` on the worker pool for every change in the store.
    ///
    /// The callback runs inside the pool's runtime, so it must only use the
    /// `*_async` forms (spawned onto the pool) and never the blocking ones.
    /// A panicking callback is logged and the listener keeps running.
    pub fn register_listener<F>(&self, listener: F) -> Result<()>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.listen(self.subscribe(), listener)
    }

    /// Invoke `listener` for every notification `subscription` lets through
    pub fn listen<F>(&self, mut subscription: Subscription, listener: F) -> Result<()>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.pool.spawn(async move {
            while let Some(notification) = subscription.next().await {
                debug!(path = %notification.path, kind = ?notification.kind, "dispatching notification");
                if catch_unwind(AssertUnwindSafe(|| listener(&notification))).is_err() {
                    warn!(path = %notification.path, "listener panicked");
                }
            }
            debug!("notification source closed, listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u64,
    }

    fn resources(retries: u32) -> BaseResources<Counter> {
        let pool = Arc::new(WorkerPool::with_defaults().unwrap());
        BaseResources::new(Arc::new(MemoryStore::new()), pool, retries)
    }

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    #[test]
    fn test_create_then_get() {
        let res = resources(4);
        let path = p("/counters/a");
        res.create(&path, &Counter { value: 1 }).unwrap();
        assert_eq!(res.get(&path).unwrap(), Some(Counter { value: 1 }));

        let err = res.create(&path, &Counter { value: 2 }).unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)));
        assert_eq!(res.get(&path).unwrap(), Some(Counter { value: 1 }));
    }

    #[test]
    fn test_set_requires_value() {
        let res = resources(4);
        let err = res.set(&p("/counters/missing"), |c| c).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_set_with_create() {
        let res = resources(4);
        let path = p("/counters/b");
        let bump = |c: Option<Counter>| Counter {
            value: c.map_or(0, |c| c.value + 1),
        };
        assert_eq!(res.set_with_create(&path, bump).unwrap().value, 0);
        assert_eq!(res.set_with_create(&path, bump).unwrap().value, 1);
        assert_eq!(res.get(&path).unwrap().unwrap().value, 1);
    }

    #[test]
    fn test_delete_and_exists() {
        let res = resources(4);
        let path = p("/counters/c");
        assert!(!res.exists(&path).unwrap());
        res.create(&path, &Counter { value: 0 }).unwrap();
        assert!(res.exists(&path).unwrap());
        res.delete(&path).unwrap();
        assert!(!res.exists(&path).unwrap());
        assert!(res.get(&path).unwrap().is_none());
        assert!(res.delete(&path).unwrap_err().is_not_found());
    }

    #[test]
    fn test_children_listings_agree() {
        let res = resources(4);
        let root = p("/counters");
        assert!(res.get_children_cached(&root).unwrap().is_empty());

        res.create(&p("/counters/y"), &Counter { value: 0 }).unwrap();
        res.create(&p("/counters/x"), &Counter { value: 0 }).unwrap();
        assert_eq!(res.get_children(&root).unwrap(), vec!["x", "y"]);
        assert_eq!(res.get_children_cached(&root).unwrap(), vec!["x", "y"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_set_loses_no_update() {
        let res = Arc::new(resources(1_000));
        let path = p("/counters/contended");
        res.create_async(&path, &Counter { value: 0 }).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let res = Arc::clone(&res);
            let path = path.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    res.set_async(&path, |c| Counter { value: c.value + 1 }).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let fresh = res.get_fresh_async(&path).await.unwrap().unwrap();
        assert_eq!(fresh.value, 160);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let res = resources(3);
        let path = p("/counters/hot");
        res.create_async(&path, &Counter { value: 0 }).await.unwrap();

        // Every attempt races with a write that lands between read and put.
        let store = Arc::clone(res.store());
        let interfering = path.clone();
        let err = res
            .mutate_async(&path, move |current| {
                let store = Arc::clone(&store);
                let interfering = interfering.clone();
                futures::executor::block_on(async move {
                    store
                        .put(&interfering, b"{\"value\":99}".to_vec(), ExpectedVersion::Any)
                        .await
                })?;
                let next = Counter {
                    value: current.map_or(0, |c| c.value) + 1,
                };
                Ok(Mutation::Put(next, ()))
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MetadataError::ConflictRetriesExhausted { attempts: 4, .. }
        ));
    }

    #[tokio::test]
    async fn test_zero_retries_still_attempts_once() {
        let res = resources(0);
        let path = p("/counters/once");
        let value = res
            .set_with_create_async(&path, |c: Option<Counter>| Counter {
                value: c.map_or(7, |c| c.value),
            })
            .await
            .unwrap();
        assert_eq!(value.value, 7);
    }

    #[tokio::test]
    async fn test_single_retry_recovers_from_one_conflict() {
        let res = resources(1);
        let path = p("/counters/racy");
        res.create_async(&path, &Counter { value: 0 }).await.unwrap();

        let store = Arc::clone(res.store());
        let interfering = path.clone();
        let raced = std::sync::atomic::AtomicBool::new(false);
        let seen = res
            .mutate_async(&path, move |current| {
                if !raced.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    let store = Arc::clone(&store);
                    let interfering = interfering.clone();
                    futures::executor::block_on(async move {
                        store
                            .put(&interfering, b"{\"value\":10}".to_vec(), ExpectedVersion::Any)
                            .await
                    })?;
                }
                let current = current.map_or(0, |c| c.value);
                Ok(Mutation::Put(Counter { value: current + 1 }, current))
            })
            .await
            .unwrap();
        assert_eq!(seen, 10);
        assert_eq!(res.get_fresh_async(&path).await.unwrap().unwrap().value, 11);
    }

    #[tokio::test]
    async fn test_keep_skips_the_write() {
        let res = resources(4);
        let path = p("/counters/d");
        res.create_async(&path, &Counter { value: 5 }).await.unwrap();
        let seen = res
            .mutate_async(&path, |current| Ok(Mutation::Keep(current.map(|c| c.value))))
            .await
            .unwrap();
        assert_eq!(seen, Some(5));
        let stat = res.get_with_stat_async(&path).await.unwrap().unwrap().stat;
        assert_eq!(stat.version, 0);
    }

    #[test]
    fn test_register_listener() {
        let res = resources(4);
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        res.register_listener(move |n| {
            let _ = tx.lock().send(n.clone());
        })
        .unwrap();

        res.create(&p("/x"), &Counter { value: 1 }).unwrap();
        let n = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(n.path, "/x");
    }

    #[test]
    fn test_listener_survives_a_panicking_callback() {
        let res = resources(4);
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        res.register_listener(move |n| {
            if n.path == "/boom" {
                panic!("callback failed");
            }
            let _ = tx.lock().send(n.path.clone());
        })
        .unwrap();

        res.create(&p("/boom"), &Counter { value: 1 }).unwrap();
        res.create(&p("/after"), &Counter { value: 2 }).unwrap();
        let path = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(path, "/after");
    }
}
