//! The coordination-store contract.
//!
//! A ZooKeeper-like hierarchical byte store with one-shot watches. The
//! store is the durable source of truth for endpoint membership and
//! configuration; the coordinator only caches it in memory.
//!
//! Watches fire at most once per registration, on whatever thread the
//! store delivers notifications on. Callbacks must stay cheap — the
//! coordinator's callbacks only enqueue a mailbox message — and the
//! coordinator re-arms a watch while processing the message it
//! produced.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store failures. All of them are treated as transient by the
/// reconciliation loop.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid store path: {0}")]
    InvalidPath(String),
}

/// One-shot notification of a node's changed child set.
pub type ChildrenCallback = Box<dyn FnOnce(Vec<String>) + Send>;

/// One-shot notification of a node's changed contents (`None` means
/// the node was deleted).
pub type ContentsCallback = Box<dyn FnOnce(Option<Vec<u8>>) + Send>;

/// Hierarchical coordination store.
pub trait CoordStore: Send + Sync {
    /// Contents of a node, or `None` if it does not exist.
    fn read(&self, path: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write a node, creating intermediate path segments as needed.
    fn write(&self, path: &str, data: &[u8]) -> StoreResult<()>;

    /// Delete a node and everything under it.
    fn delete(&self, path: &str) -> StoreResult<()>;

    /// Immediate children of a node (name segments, sorted).
    fn list_children(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Register a one-shot watch on a node's child set and return the
    /// current children.
    fn watch_children(&self, path: &str, callback: ChildrenCallback) -> StoreResult<Vec<String>>;

    /// Register a one-shot watch on a node's contents and return the
    /// current contents.
    fn watch_contents(
        &self,
        path: &str,
        callback: ContentsCallback,
    ) -> StoreResult<Option<Vec<u8>>>;
}
