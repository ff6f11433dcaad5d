//! File-backed log store: one directory per game, one text file per log or marker.

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::future::{BoxFuture, FutureExt};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::{Mutex, watch},
};
use uuid::Uuid;

use crate::dao::{
    log_store::LogStore,
    models::{LogKey, MarkerKey},
    storage::{StorageError, StorageResult},
};

/// Store persisting a game's logs and markers as plain text files.
///
/// Log lengths are cached after the first touch, so the store expects to be the only
/// writer of its directory.
#[derive(Clone)]
pub struct FileLogStore {
    dir: Arc<PathBuf>,
    // Line count per log file, filled on first touch. Held across appends so the
    // returned length matches the write.
    line_counts: Arc<Mutex<HashMap<String, usize>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl FileLogStore {
    /// Open the store rooted at an existing game directory.
    pub async fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        let metadata = fs::metadata(&dir)
            .await
            .map_err(|source| StorageError::io(&dir, source))?;
        if !metadata.is_dir() {
            return Err(StorageError::corrupt(
                "game directory",
                format!("`{}` is not a directory", dir.display()),
            ));
        }

        let (revision, _rx) = watch::channel(0);
        Ok(Self {
            dir: Arc::new(dir),
            line_counts: Arc::new(Mutex::new(HashMap::new())),
            revision: Arc::new(revision),
        })
    }

    /// Directory holding the game files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

async fn read_optional(path: &Path) -> StorageResult<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StorageError::io(path, err)),
    }
}

async fn count_lines(path: &Path) -> StorageResult<usize> {
    Ok(read_optional(path)
        .await?
        .map(|contents| contents.lines().count())
        .unwrap_or_default())
}

async fn write_and_rename(tmp_path: &Path, path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = File::create(tmp_path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await?;
    fs::rename(tmp_path, path).await
}

/// Replace `path` with `contents` through a temporary sibling and a rename, so readers
/// see either the old value or the new one.
async fn write_atomic(path: &Path, contents: &str) -> StorageResult<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    if let Err(source) = write_and_rename(&tmp_path, path, contents).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StorageError::io(path, source));
    }
    Ok(())
}

fn sanitize_line(line: &str) -> String {
    line.replace(['\n', '\r'], " ")
}

impl LogStore for FileLogStore {
    fn append(&self, log: LogKey, lines: Vec<String>) -> BoxFuture<'static, StorageResult<usize>> {
        let file_name = log.file_name();
        let path = self.dir.join(&file_name);
        let line_counts = self.line_counts.clone();
        let revision = self.revision.clone();
        async move {
            let mut counts = line_counts.lock().await;
            let before = match counts.get(&file_name) {
                Some(count) => *count,
                None => count_lines(&path).await?,
            };
            let mut payload = String::new();
            for line in &lines {
                payload.push_str(&sanitize_line(line));
                payload.push('\n');
            }

            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|source| StorageError::io(&path, source))?;
            file.write_all(payload.as_bytes())
                .await
                .map_err(|source| StorageError::io(&path, source))?;
            file.flush()
                .await
                .map_err(|source| StorageError::io(&path, source))?;

            let len = before + lines.len();
            counts.insert(file_name, len);
            drop(counts);
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
        let file_name = log.file_name();
        let path = self.dir.join(&file_name);
        let line_counts = self.line_counts.clone();
        async move {
            let known = line_counts.lock().await.get(&file_name).copied();
            if known.is_some_and(|count| cursor >= count) {
                return Ok(Vec::new());
            }
            Ok(read_optional(&path)
                .await?
                .map(|contents| contents.lines().skip(cursor).map(str::to_string).collect())
                .unwrap_or_default())
        }
        .boxed()
    }

    fn marker(&self, key: MarkerKey) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let path = self.dir.join(key.file_name());
        async move {
            Ok(read_optional(&path)
                .await?
                .filter(|contents| !contents.trim().is_empty()))
        }
        .boxed()
    }

    fn set_marker(&self, key: MarkerKey, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let path = self.dir.join(key.file_name());
        let revision = self.revision.clone();
        async move {
            write_atomic(&path, &value).await?;
            revision.send_modify(|rev| *rev += 1);
            Ok(())
        }
        .boxed()
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let dir = self.dir.clone();
        async move {
            fs::metadata(dir.as_path())
                .await
                .map(|_| ())
                .map_err(|source| StorageError::io(dir.as_path(), source))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> FileLogStore {
        let dir = std::env::temp_dir().join(format!("mafia-back-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).await.unwrap();
        FileLogStore::open(dir).await.unwrap()
    }

    #[tokio::test]
    async fn appended_lines_survive_a_reopen() {
        let store = temp_store().await;
        let log = LogKey::PersonalChat("Scarlet".into());
        store
            .append(log.clone(), vec!["first".into(), "multi\nline".into()])
            .await
            .unwrap();

        let reopened = FileLogStore::open(store.dir().to_path_buf()).await.unwrap();
        assert_eq!(
            reopened.read_from(log, 0).await.unwrap(),
            vec!["first".to_string(), "multi line".to_string()]
        );

        fs::remove_dir_all(store.dir()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_files_read_as_empty() {
        let store = temp_store().await;
        assert!(store.read_from(LogKey::Manager, 0).await.unwrap().is_empty());
        assert_eq!(store.marker(MarkerKey::Phase).await.unwrap(), None);

        store
            .set_marker(MarkerKey::Phase, "day_discussion".into())
            .await
            .unwrap();
        assert_eq!(
            store.marker(MarkerKey::Phase).await.unwrap().as_deref(),
            Some("day_discussion")
        );

        fs::remove_dir_all(store.dir()).await.unwrap();
    }

    #[tokio::test]
    async fn append_lengths_continue_across_reopens() {
        let store = temp_store().await;
        let log = LogKey::Daytime;
        assert_eq!(
            store
                .append(log.clone(), vec!["a".into(), "b".into()])
                .await
                .unwrap(),
            2
        );
        assert!(store.read_from(log.clone(), 2).await.unwrap().is_empty());

        let reopened = FileLogStore::open(store.dir().to_path_buf()).await.unwrap();
        assert_eq!(reopened.append(log.clone(), vec!["c".into()]).await.unwrap(), 3);
        assert_eq!(reopened.read_from(log, 1).await.unwrap(), vec!["b", "c"]);

        fs::remove_dir_all(store.dir()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn marker_readers_never_see_a_partial_write() {
        let store = temp_store().await;
        let value = "Scarlet\nMustard\nPlum\nPeacock".to_string();
        store
            .set_marker(MarkerKey::RemainingPlayers, value.clone())
            .await
            .unwrap();

        let writer = {
            let store = store.clone();
            let value = value.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    store
                        .set_marker(MarkerKey::RemainingPlayers, value.clone())
                        .await
                        .unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = store.clone();
                let value = value.clone();
                tokio::spawn(async move {
                    let mut torn = 0;
                    for _ in 0..500 {
                        let seen = store.marker(MarkerKey::RemainingPlayers).await.unwrap();
                        if seen.as_deref() != Some(value.as_str()) {
                            torn += 1;
                        }
                    }
                    torn
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), 0);
        }
        let mut entries = fs::read_dir(store.dir()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert!(!entry.file_name().to_string_lossy().ends_with(".tmp"));
        }

        fs::remove_dir_all(store.dir()).await.unwrap();
    }

    #[tokio::test]
    async fn opening_a_missing_directory_fails() {
        let dir = std::env::temp_dir().join(format!("mafia-back-missing-{}", uuid::Uuid::new_v4()));
        assert!(matches!(
            FileLogStore::open(dir).await,
            Err(StorageError::Io { .. })
        ));
    }
}
