use std::{collections::HashMap, sync::Arc};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{RwLock, watch};

use crate::dao::{
    log_store::LogStore,
    models::{LogKey, MarkerKey},
    storage::StorageResult,
};

#[derive(Default)]
struct Inner {
    logs: HashMap<LogKey, Vec<String>>,
    markers: HashMap<MarkerKey, String>,
}

/// In-process log store used for embedded games and tests.
#[derive(Clone)]
pub struct MemoryLogStore {
    inner: Arc<RwLock<Inner>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (revision, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            revision: Arc::new(revision),
        }
    }
}

impl LogStore for MemoryLogStore {
    fn append(&self, log: LogKey, lines: Vec<String>) -> BoxFuture<'static, StorageResult<usize>> {
        let inner = self.inner.clone();
        let revision = self.revision.clone();
        async move {
            let len = {
                let mut guard = inner.write().await;
                let entries = guard.logs.entry(log).or_default();
                entries.extend(lines);
                entries.len()
            };
            revision.send_modify(|rev| *rev += 1);
            Ok(len)
        }
        .boxed()
    }

    fn read_from(
        &self,
        log: LogKey,
        cursor: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let inner = self.inner.clone();
        async move {
            let guard = inner.read().await;
            Ok(guard
                .logs
                .get(&log)
                .map(|entries| entries.iter().skip(cursor).cloned().collect())
                .unwrap_or_default())
        }
        .boxed()
    }

    fn marker(&self, key: MarkerKey) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let inner = self.inner.clone();
        async move {
            let guard = inner.read().await;
            Ok(guard
                .markers
                .get(&key)
                .filter(|value| !value.trim().is_empty())
                .cloned())
        }
        .boxed()
    }

    fn set_marker(&self, key: MarkerKey, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let revision = self.revision.clone();
        async move {
            inner.write().await.markers.insert(key, value);
            revision.send_modify(|rev| *rev += 1);
            Ok(())
        }
        .boxed()
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        async { Ok(()) }.boxed()
    }
}
