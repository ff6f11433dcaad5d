/// Persisted per-game logs and markers.
pub mod log_store;
/// Keys addressing logs and markers.
pub mod models;
/// Storage error types.
pub mod storage;
