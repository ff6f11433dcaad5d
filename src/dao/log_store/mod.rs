pub mod file;
pub mod memory;

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::dao::{
    models::{LogKey, MarkerKey},
    storage::StorageResult,
};

pub use self::{file::FileLogStore, memory::MemoryLogStore};

/// Abstraction over the persisted state of a single game.
///
/// Every log has exactly one writer (its participant, or the orchestrator for the
/// shared channels), so implementations only have to make individual appends atomic.
pub trait LogStore: Send + Sync {
    /// Append `lines` to `log`, returning the log length after the write.
    fn append(&self, log: LogKey, lines: Vec<String>) -> BoxFuture<'static, StorageResult<usize>>;
    /// Read every line of `log` at or after position `cursor`.
    fn read_from(&self, log: LogKey, cursor: usize)
    -> BoxFuture<'static, StorageResult<Vec<String>>>;
    /// Read a marker, `None` when it was never written or is empty.
    fn marker(&self, key: MarkerKey) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Overwrite a marker.
    fn set_marker(&self, key: MarkerKey, value: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Revision counter bumped after every write, used to wake pollers early.
    fn changes(&self) -> watch::Receiver<u64>;
    /// Check the backing medium is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
