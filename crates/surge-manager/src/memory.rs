//! In-process coordination store.
//!
//! Backs tests and the standalone daemon. Watches fire synchronously
//! on the mutating thread, outside the store lock, which is exactly
//! the discipline the coordinator's callbacks are built for (they only
//! enqueue mailbox messages).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::store::{ChildrenCallback, ContentsCallback, CoordStore, StoreError, StoreResult};

#[derive(Default)]
struct MemoryInner {
    nodes: BTreeMap<String, Vec<u8>>,
    child_watches: HashMap<String, Vec<ChildrenCallback>>,
    content_watches: HashMap<String, Vec<ContentsCallback>>,
}

/// Hierarchical in-memory store with one-shot watches.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

/// Watch invocations collected under the lock, delivered after it is
/// released.
enum Fired {
    Children(ChildrenCallback, Vec<String>),
    Contents(ContentsCallback, Option<Vec<u8>>),
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn normalize(path: &str) -> StoreResult<String> {
        if !path.starts_with('/') || path.len() < 2 {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(path.trim_end_matches('/').to_string())
    }

    fn children_of(nodes: &BTreeMap<String, Vec<u8>>, path: &str) -> Vec<String> {
        let prefix = format!("{path}/");
        let mut children = BTreeSet::new();
        for key in nodes.range(prefix.clone()..) {
            let Some(rest) = key.0.strip_prefix(&prefix) else {
                break;
            };
            if let Some(segment) = rest.split('/').next()
                && !segment.is_empty()
            {
                children.insert(segment.to_string());
            }
        }
        children.into_iter().collect()
    }

    /// Ancestor prefixes of `path`, nearest first, excluding `path`.
    fn ancestors(path: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = path;
        while let Some(idx) = current.rfind('/') {
            if idx == 0 {
                break;
            }
            current = &current[..idx];
            out.push(current.to_string());
        }
        out
    }

    /// Collect the watches a mutation of `path` triggers: its own
    /// contents watches plus child watches of every ancestor whose
    /// child set actually changed.
    fn collect_fired(
        inner: &mut MemoryInner,
        path: &str,
        before: &HashMap<String, Vec<String>>,
    ) -> Vec<Fired> {
        let mut fired = Vec::new();

        if let Some(callbacks) = inner.content_watches.remove(path) {
            let data = inner.nodes.get(path).cloned();
            for cb in callbacks {
                fired.push(Fired::Contents(cb, data.clone()));
            }
        }

        for ancestor in Self::ancestors(path) {
            let now = Self::children_of(&inner.nodes, &ancestor);
            let changed = before.get(&ancestor).is_none_or(|prev| *prev != now);
            if changed && let Some(callbacks) = inner.child_watches.remove(&ancestor) {
                for cb in callbacks {
                    fired.push(Fired::Children(cb, now.clone()));
                }
            }
        }
        fired
    }

    fn deliver(fired: Vec<Fired>) {
        for f in fired {
            match f {
                Fired::Children(cb, children) => cb(children),
                Fired::Contents(cb, data) => cb(data),
            }
        }
    }

    fn snapshot_ancestor_children(
        inner: &MemoryInner,
        path: &str,
    ) -> HashMap<String, Vec<String>> {
        Self::ancestors(path)
            .into_iter()
            .map(|a| {
                let children = Self::children_of(&inner.nodes, &a);
                (a, children)
            })
            .collect()
    }
}

impl CoordStore for MemoryStore {
    fn read(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = Self::normalize(path)?;
        Ok(self.lock().nodes.get(&path).cloned())
    }

    fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let path = Self::normalize(path)?;
        let fired = {
            let mut inner = self.lock();
            let before = Self::snapshot_ancestor_children(&inner, &path);
            inner.nodes.insert(path.clone(), data.to_vec());
            Self::collect_fired(&mut inner, &path, &before)
        };
        Self::deliver(fired);
        Ok(())
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        let path = Self::normalize(path)?;
        let fired = {
            let mut inner = self.lock();
            let before = Self::snapshot_ancestor_children(&inner, &path);
            let subtree_prefix = format!("{path}/");
            let doomed: Vec<String> = inner
                .nodes
                .keys()
                .filter(|k| **k == path || k.starts_with(&subtree_prefix))
                .cloned()
                .collect();
            for key in &doomed {
                inner.nodes.remove(key);
            }
            let mut fired = Vec::new();
            for key in &doomed {
                // Content watches of every removed node fire with None.
                if let Some(callbacks) = inner.content_watches.remove(key) {
                    for cb in callbacks {
                        fired.push(Fired::Contents(cb, None));
                    }
                }
            }
            fired.extend(Self::collect_fired(&mut inner, &path, &before));
            fired
        };
        Self::deliver(fired);
        Ok(())
    }

    fn list_children(&self, path: &str) -> StoreResult<Vec<String>> {
        let path = Self::normalize(path)?;
        Ok(Self::children_of(&self.lock().nodes, &path))
    }

    fn watch_children(&self, path: &str, callback: ChildrenCallback) -> StoreResult<Vec<String>> {
        let path = Self::normalize(path)?;
        let mut inner = self.lock();
        let children = Self::children_of(&inner.nodes, &path);
        inner.child_watches.entry(path).or_default().push(callback);
        Ok(children)
    }

    fn watch_contents(
        &self,
        path: &str,
        callback: ContentsCallback,
    ) -> StoreResult<Option<Vec<u8>>> {
        let path = Self::normalize(path)?;
        let mut inner = self.lock();
        let data = inner.nodes.get(&path).cloned();
        inner
            .content_watches
            .entry(path)
            .or_default()
            .push(callback);
        Ok(data)
    }
}
