//! Cursor-based tailing of the log store for participants without a live connection.

use std::{sync::Arc, time::Duration};

use futures::Stream;
use tokio::{
    sync::watch,
    time::{Instant, sleep_until},
};

use crate::dao::{log_store::LogStore, models::LogKey, storage::StorageResult};

/// Read cursor over one log: the number of lines already delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTail {
    log: LogKey,
    cursor: usize,
}

impl LogTail {
    /// Tail `log` from its first line.
    pub fn new(log: LogKey) -> Self {
        Self::starting_at(log, 0)
    }

    /// Tail `log` skipping the first `cursor` lines.
    pub fn starting_at(log: LogKey, cursor: usize) -> Self {
        Self { log, cursor }
    }

    /// Log being tailed.
    pub fn log(&self) -> &LogKey {
        &self.log
    }

    /// Lines delivered so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Lines appended since the cursor; the cursor advances past them.
    pub async fn poll(&mut self, store: &dyn LogStore) -> StorageResult<Vec<String>> {
        let lines = store.read_from(self.log.clone(), self.cursor).await?;
        self.cursor += lines.len();
        Ok(lines)
    }
}

/// Wait for the next store revision, but never past `until`.
pub async fn wait_for_change_until(changes: &mut watch::Receiver<u64>, until: Instant) {
    tokio::select! {
        changed = changes.changed() => {
            if changed.is_err() {
                sleep_until(until).await;
            }
        }
        _ = sleep_until(until) => {}
    }
}

/// Wait for the next store revision or `interval`, whichever comes first.
pub async fn wait_for_change(changes: &mut watch::Receiver<u64>, interval: Duration) {
    wait_for_change_until(changes, Instant::now() + interval).await;
}

/// Set of tails over one store, woken by store writes with a fixed-interval fallback.
pub struct PollingBridge {
    store: Arc<dyn LogStore>,
    tails: Vec<LogTail>,
    changes: watch::Receiver<u64>,
    interval: Duration,
}

impl PollingBridge {
    /// Tail `logs` of `store` from their beginning.
    pub fn new(
        store: Arc<dyn LogStore>,
        logs: impl IntoIterator<Item = LogKey>,
        interval: Duration,
    ) -> Self {
        let changes = store.changes();
        Self {
            store,
            tails: logs.into_iter().map(LogTail::new).collect(),
            changes,
            interval,
        }
    }

    /// Cursor of `log`, if tailed.
    pub fn cursor(&self, log: &LogKey) -> Option<usize> {
        self.tails
            .iter()
            .find(|tail| tail.log() == log)
            .map(LogTail::cursor)
    }

    /// One cycle: every line appended to the tailed logs since their cursors.
    pub async fn drain(&mut self) -> StorageResult<Vec<(LogKey, String)>> {
        self.changes.borrow_and_update();
        let mut batch = Vec::new();
        for tail in &mut self.tails {
            let lines = tail.poll(self.store.as_ref()).await?;
            batch.extend(lines.into_iter().map(|line| (tail.log().clone(), line)));
        }
        Ok(batch)
    }

    /// Block until at least one new line is available and return the batch.
    pub async fn next_batch(&mut self) -> StorageResult<Vec<(LogKey, String)>> {
        loop {
            let batch = self.drain().await?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            wait_for_change(&mut self.changes, self.interval).await;
        }
    }

    /// Lazy sequence of new lines, in per-log order.
    pub fn into_stream(mut self) -> impl Stream<Item = StorageResult<(LogKey, String)>> {
        async_stream::try_stream! {
            loop {
                for item in self.next_batch().await? {
                    yield item;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::dao::log_store::MemoryLogStore;

    #[tokio::test]
    async fn cursors_advance_by_delivered_lines() {
        let store = MemoryLogStore::new();
        store
            .append(LogKey::Daytime, vec!["a".into(), "b".into()])
            .await
            .unwrap();

        let mut tail = LogTail::new(LogKey::Daytime);
        assert_eq!(tail.poll(&store).await.unwrap(), vec!["a", "b"]);
        assert_eq!(tail.cursor(), 2);
        assert!(tail.poll(&store).await.unwrap().is_empty());

        store.append(LogKey::Daytime, vec!["c".into()]).await.unwrap();
        assert_eq!(tail.poll(&store).await.unwrap(), vec!["c"]);
        assert_eq!(tail.cursor(), 3);
    }

    #[tokio::test]
    async fn bridge_wakes_up_on_writes() {
        let store = MemoryLogStore::new();
        let mut bridge = PollingBridge::new(
            Arc::new(store.clone()),
            [LogKey::Manager, LogKey::Daytime],
            Duration::from_secs(30),
        );
        assert!(bridge.drain().await.unwrap().is_empty());

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .append(LogKey::Daytime, vec!["hello".into()])
                .await
                .unwrap();
        });

        let batch = tokio::time::timeout(Duration::from_secs(5), bridge.next_batch())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch, vec![(LogKey::Daytime, "hello".to_string())]);
        assert_eq!(bridge.cursor(&LogKey::Daytime), Some(1));
        assert_eq!(bridge.cursor(&LogKey::Nighttime), None);
    }

    #[tokio::test]
    async fn stream_yields_lines_in_log_order() {
        let store = MemoryLogStore::new();
        store
            .append(LogKey::Manager, vec!["m1".into(), "m2".into()])
            .await
            .unwrap();
        let bridge = PollingBridge::new(
            Arc::new(store.clone()),
            [LogKey::Manager],
            Duration::from_millis(10),
        );
        let mut stream = Box::pin(bridge.into_stream());

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.1, "m1");
        assert_eq!(second.1, "m2");

        store.append(LogKey::Manager, vec!["m3".into()]).await.unwrap();
        let third = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(third, (LogKey::Manager, "m3".to_string()));
    }
}
