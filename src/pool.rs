//! Shared worker pool
//!
//! Listener callbacks run here, and the blocking form of every resource
//! operation drives its async form to completion on this runtime.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

use crate::config::{StoreConfig, WorkerConfig};
use crate::error::{MetadataError, Result};

pub struct WorkerPool {
    // Always `Some` until drop; taken so the runtime can shut down in the background.
    runtime: Option<Runtime>,
    operation_timeout: Duration,
}

impl WorkerPool {
    pub fn new(workers: &WorkerConfig, store: &StoreConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers.threads.max(1))
            .thread_name(workers.thread_name.clone())
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
            operation_timeout: store.operation_timeout(),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(&WorkerConfig::default(), &StoreConfig::default())
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| MetadataError::StoreUnavailable("worker pool is shut down".into()))
    }

    /// Block the calling thread until `future` completes or the operation
    /// timeout elapses.
    ///
    /// Must not be called from within an async context.
    pub fn block_on<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.operation_timeout;
        self.runtime()?.block_on(async move {
            tokio::time::timeout(timeout, future)
                .await
                .map_err(|_| MetadataError::Timeout(timeout))?
        })
    }

    /// Run `future` in the background on the pool
    pub fn spawn<F>(&self, future: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime()?.spawn(future);
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_block_on_returns_result() {
        let pool = WorkerPool::with_defaults().unwrap();
        let value = pool.block_on(async { Ok::<_, MetadataError>(7) }).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_block_on_times_out() {
        let store = StoreConfig {
            operation_timeout_secs: 0,
            ..StoreConfig::default()
        };
        let pool = WorkerPool::new(&WorkerConfig::default(), &store).unwrap();
        let err = pool
            .block_on(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, MetadataError>(())
            })
            .unwrap_err();
        assert!(matches!(err, MetadataError::Timeout(_)));
    }

    #[test]
    fn test_spawn_runs_in_background() {
        let pool = WorkerPool::with_defaults().unwrap();
        let (tx, rx) = mpsc::channel();
        pool.spawn(async move {
            tx.send(42).unwrap();
        })
        .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }
}
