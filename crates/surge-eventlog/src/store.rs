//! Persistence hooks for the ring log.
//!
//! The log hands its whole buffer to [`LogStore::store`] on every
//! append and reads it back once on load. The buffer is small and
//! fixed-size, so whole-buffer writes keep the hook trivial to
//! implement against a file, a coordination-store node, or memory.

use std::path::PathBuf;
use std::sync::Mutex;

/// Where the ring buffer lives between process restarts.
pub trait LogStore: Send + Sync {
    fn store(&self, data: &[u8]) -> anyhow::Result<()>;
    fn retrieve(&self) -> anyhow::Result<Option<Vec<u8>>>;
}

/// In-memory store, for tests and for simulated restarts.
#[derive(Default)]
pub struct MemoryLogStore {
    data: Mutex<Option<Vec<u8>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryLogStore {
    fn store(&self, data: &[u8]) -> anyhow::Result<()> {
        *self.data.lock().unwrap_or_else(|e| e.into_inner()) = Some(data.to_vec());
        Ok(())
    }

    fn retrieve(&self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.data.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

/// File-backed store used by the daemon.
pub struct FileLogStore {
    path: PathBuf,
}

impl FileLogStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl LogStore for FileLogStore {
    fn store(&self, data: &[u8]) -> anyhow::Result<()> {
        std::fs::write(&self.path, data)?;
        Ok(())
    }

    fn retrieve(&self) -> anyhow::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryLogStore::new();
        assert!(store.retrieve().unwrap().is_none());
        store.store(b"abc").unwrap();
        assert_eq!(store.retrieve().unwrap().as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLogStore::new(dir.path().join("events.bin"));
        assert!(store.retrieve().unwrap().is_none());
        store.store(b"ring").unwrap();
        assert_eq!(store.retrieve().unwrap().as_deref(), Some(&b"ring"[..]));
    }
}
