//! Persistence collaborators.
//!
//! - [`ObjectStore`]: content-addressed blob storage with put/get/list contracts;
//!   [`FsObjectStore`] keeps objects under `.masterchef/objects`.
//! - [`Collection`]: the in-memory record list every manager builds on. Reads are
//!   snapshots; writes are serialized by the collection's lock.

use crate::crypto::sha256_hex;
use crate::managers::{ManagerError, ManagerResult};
use crate::paths::{self, StateDir};
use parking_lot::RwLock;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Stored object metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub sha256: String,
}

pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> ManagerResult<ObjectInfo>;
    fn get(&self, key: &str) -> ManagerResult<Vec<u8>>;
    fn list(&self) -> ManagerResult<Vec<ObjectInfo>>;
}

/// Object store rooted at `<base>/.masterchef/objects`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            root: base_dir.join(paths::STATE_DIR).join(StateDir::Objects.as_str()),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(paths::sanitize_stem(key))
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> ManagerResult<ObjectInfo> {
        let path = self.object_path(key);
        paths::write_file(&path, bytes)?;
        Ok(ObjectInfo {
            key: paths::sanitize_stem(key),
            size: bytes.len() as u64,
            sha256: sha256_hex(bytes),
        })
    }

    fn get(&self, key: &str) -> ManagerResult<Vec<u8>> {
        let path = self.object_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ManagerError::NotFound(format!("object {key} not found")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> ManagerResult<Vec<ObjectInfo>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let bytes = fs::read(entry.path())?;
            out.push(ObjectInfo {
                key: entry.file_name().to_string_lossy().into_owned(),
                size: bytes.len() as u64,
                sha256: sha256_hex(&bytes),
            });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

/// Records addressable by a string id.
pub trait Identified {
    fn id(&self) -> &str;
}

/// Ordered in-memory record list.
pub struct Collection<T> {
    items: RwLock<Vec<T>>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Clone + Identified> Collection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest `limit` records, oldest first.
    pub fn list(&self, limit: usize) -> Vec<T> {
        self.list_filtered(limit, |_| true)
    }

    /// Newest `limit` records matching `pred`, oldest first.
    pub fn list_filtered<F: Fn(&T) -> bool>(&self, limit: usize, pred: F) -> Vec<T> {
        let items = self.items.read();
        let matching: Vec<&T> = items.iter().filter(|item| pred(item)).collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.items.read().iter().find(|item| item.id() == id).cloned()
    }

    /// First record matching `pred`.
    pub fn find<F: Fn(&T) -> bool>(&self, pred: F) -> Option<T> {
        self.items.read().iter().find(|item| pred(item)).cloned()
    }

    pub fn insert(&self, item: T) -> T {
        self.items.write().push(item.clone());
        item
    }

    /// Insert unless a record satisfying `conflict` already exists.
    pub fn insert_unique<F: Fn(&T) -> bool>(&self, item: T, conflict: F, what: &str) -> ManagerResult<T> {
        let mut items = self.items.write();
        if items.iter().any(|existing| conflict(existing)) {
            return Err(ManagerError::Conflict(format!("{what} already exists")));
        }
        items.push(item.clone());
        Ok(item)
    }

    /// Replace the record with the same id, or append. Returns true when replaced.
    pub fn upsert(&self, item: T) -> bool {
        let mut items = self.items.write();
        match items.iter_mut().find(|existing| existing.id() == item.id()) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => {
                items.push(item);
                false
            }
        }
    }

    /// Mutate one record under the write lock.
    pub fn update<R, F>(&self, id: &str, what: &str, f: F) -> ManagerResult<R>
    where
        F: FnOnce(&mut T) -> ManagerResult<R>,
    {
        let mut items = self.items.write();
        let item = items
            .iter_mut()
            .find(|item| item.id() == id)
            .ok_or_else(|| ManagerError::NotFound(format!("{what} not found")))?;
        f(item)
    }

    /// Mutate every record matching `pred`; returns the updated copies.
    pub fn update_where<P, F>(&self, pred: P, mut f: F) -> Vec<T>
    where
        P: Fn(&T) -> bool,
        F: FnMut(&mut T),
    {
        let mut items = self.items.write();
        let mut changed = Vec::new();
        for item in items.iter_mut().filter(|item| pred(item)) {
            f(item);
            changed.push(item.clone());
        }
        changed
    }

    pub fn remove(&self, id: &str) -> Option<T> {
        let mut items = self.items.write();
        let pos = items.iter().position(|item| item.id() == id)?;
        Some(items.remove(pos))
    }

    /// Run `f` over the whole list under the write lock.
    pub fn with_all<R, F: FnOnce(&mut Vec<T>) -> R>(&self, f: F) -> R {
        f(&mut self.items.write())
    }

    pub fn replace_all(&self, next: Vec<T>) {
        *self.items.write() = next;
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.read().clone()
    }

    pub fn count_where<F: Fn(&T) -> bool>(&self, pred: F) -> usize {
        self.items.read().iter().filter(|item| pred(item)).count()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Rec {
        id: String,
        n: u32,
    }

    impl Identified for Rec {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn rec(id: &str, n: u32) -> Rec {
        Rec {
            id: id.to_string(),
            n,
        }
    }

    #[test]
    fn test_list_returns_newest_in_order() {
        let c = Collection::new();
        for i in 0..5 {
            c.insert(rec(&format!("r{i}"), i));
        }
        let ids: Vec<String> = c.list(2).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["r3", "r4"]);
        assert_eq!(c.list(100).len(), 5);
    }

    #[test]
    fn test_update_and_not_found() {
        let c = Collection::new();
        c.insert(rec("a", 1));
        c.update("a", "record", |r| {
            r.n = 9;
            Ok(())
        })
        .unwrap();
        assert_eq!(c.get("a").unwrap().n, 9);
        let err = c.update("zzz", "record", |_| Ok(())).unwrap_err();
        assert!(matches!(err, ManagerError::NotFound(_)));
    }

    #[test]
    fn test_insert_unique_conflicts() {
        let c = Collection::new();
        c.insert_unique(rec("a", 1), |r| r.n == 1, "record").unwrap();
        let err = c.insert_unique(rec("b", 1), |r| r.n == 1, "record").unwrap_err();
        assert!(matches!(err, ManagerError::Conflict(_)));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_upsert_and_remove() {
        let c = Collection::new();
        assert!(!c.upsert(rec("a", 1)));
        assert!(c.upsert(rec("a", 2)));
        assert_eq!(c.len(), 1);
        assert_eq!(c.remove("a").unwrap().n, 2);
        assert!(c.is_empty());
    }

    #[test]
    fn test_fs_object_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.list().unwrap().is_empty());
        let info = store.put("backup-1.json", b"{\"a\":1}").unwrap();
        assert_eq!(info.size, 7);
        assert_eq!(info.sha256, sha256_hex(b"{\"a\":1}"));
        assert_eq!(store.get("backup-1.json").unwrap(), b"{\"a\":1}");
        assert_eq!(store.list().unwrap(), vec![info]);
        assert!(matches!(
            store.get("nope").unwrap_err(),
            ManagerError::NotFound(_)
        ));
    }
}
