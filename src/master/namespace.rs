//! Hierarchical namespace
//!
//! Each directory and file node has its own read-write lock. An operation on
//! `/a/b/c` read-locks `/`, `/a` and `/a/b` top-down and holds them for its duration,
//! then takes the lock it needs on the final node (a write lock on `/a/b` to add or
//! remove `c`, a write lock on `c` itself to allocate a chunk index).

use crate::common::{split_path, Error, FileInfo, PathEntry, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type NodeRef = Arc<RwLock<NsNode>>;
type ReadGuard = OwnedRwLockReadGuard<NsNode>;

#[derive(Debug, Default)]
struct NsNode {
    is_dir: bool,
    length: u64,
    chunks: u64,
    children: BTreeMap<String, NodeRef>,
}

impl NsNode {
    fn dir() -> Self {
        Self {
            is_dir: true,
            ..Default::default()
        }
    }

    fn file() -> Self {
        Self::default()
    }

    fn info(&self) -> FileInfo {
        FileInfo {
            is_dir: self.is_dir,
            length: self.length,
            chunks: self.chunks,
        }
    }
}

fn not_a_directory(parts: &[&str]) -> Error {
    Error::InvalidRequest(format!("/{} is not a directory", parts.join("/")))
}

pub struct NamespaceManager {
    root: NodeRef,
}

impl Default for NamespaceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceManager {
    pub fn new() -> Self {
        Self {
            root: Arc::new(RwLock::new(NsNode::dir())),
        }
    }

    /// Read-lock every directory above the last component and return the
    /// held guards together with the (unlocked) parent directory.
    async fn lock_parents(&self, parts: &[&str]) -> Result<(Vec<ReadGuard>, NodeRef)> {
        let mut held = Vec::with_capacity(parts.len());
        let mut current = self.root.clone();
        let ancestors = parts.len().saturating_sub(1);

        for i in 0..ancestors {
            let guard = current.read_owned().await;
            if !guard.is_dir {
                return Err(not_a_directory(&parts[..i]));
            }
            let next = guard
                .children
                .get(parts[i])
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("/{}", parts[..=i].join("/"))))?;
            held.push(guard);
            current = next;
        }
        Ok((held, current))
    }

    /// Read-lock every ancestor of `path` (parent included) and return the node itself.
    async fn resolve(&self, path: &str) -> Result<(Vec<ReadGuard>, NodeRef)> {
        let parts = split_path(path)?;
        let Some(name) = parts.last() else {
            return Ok((Vec::new(), self.root.clone()));
        };

        let (mut held, parent) = self.lock_parents(&parts).await?;
        let dir = parent.read_owned().await;
        if !dir.is_dir {
            return Err(not_a_directory(&parts[..parts.len() - 1]));
        }
        let node = dir
            .children
            .get(*name)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        held.push(dir);
        Ok((held, node))
    }

    async fn insert(&self, path: &str, node: NsNode) -> Result<()> {
        let parts = split_path(path)?;
        let Some(name) = parts.last() else {
            return Err(Error::AlreadyExists("/".into()));
        };

        let (_held, parent) = self.lock_parents(&parts).await?;
        let mut dir = parent.write().await;
        if !dir.is_dir {
            return Err(not_a_directory(&parts[..parts.len() - 1]));
        }
        if dir.children.contains_key(*name) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        dir.children
            .insert(name.to_string(), Arc::new(RwLock::new(node)));
        Ok(())
    }

    pub async fn create(&self, path: &str) -> Result<()> {
        self.insert(path, NsNode::file()).await
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.insert(path, NsNode::dir()).await
    }

    /// Remove a file or an empty directory.
    ///
    /// When a file is removed, `on_file_removed` runs while the parent directory is still
    /// write-locked, so nothing can recreate the path before its chunk records are gone.
    /// Returns its result, or `None` for a directory.
    pub async fn delete<F, R>(&self, path: &str, on_file_removed: F) -> Result<Option<R>>
    where
        F: FnOnce() -> R,
    {
        let parts = split_path(path)?;
        let Some(name) = parts.last() else {
            return Err(Error::InvalidRequest("cannot delete /".into()));
        };

        let (_held, parent) = self.lock_parents(&parts).await?;
        let mut dir = parent.write().await;
        if !dir.is_dir {
            return Err(not_a_directory(&parts[..parts.len() - 1]));
        }
        let node = dir
            .children
            .get(*name)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        let is_file = {
            let node = node.read().await;
            if node.is_dir && !node.children.is_empty() {
                return Err(Error::InvalidRequest(format!(
                    "directory {} is not empty",
                    path
                )));
            }
            !node.is_dir
        };
        dir.children.remove(*name);
        Ok(is_file.then(on_file_removed))
    }

    /// Entries of a directory, sorted by name
    pub async fn list(&self, path: &str) -> Result<Vec<PathEntry>> {
        let (_held, node) = self.resolve(path).await?;
        let dir = node.read().await;
        if !dir.is_dir {
            return Err(Error::InvalidRequest(format!("{} is not a directory", path)));
        }

        let mut entries = Vec::with_capacity(dir.children.len());
        for (name, child) in &dir.children {
            let child = child.read().await;
            entries.push(PathEntry {
                name: name.clone(),
                is_dir: child.is_dir,
                length: child.length,
                chunks: child.chunks,
            });
        }
        Ok(entries)
    }

    pub async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        let (_held, node) = self.resolve(path).await?;
        let info = node.read().await.info();
        Ok(info)
    }

    /// Lock a file exclusively, e.g. to allocate its next chunk index
    pub async fn lock_file(&self, path: &str) -> Result<FileGuard> {
        let (held, node) = self.resolve(path).await?;
        let node = node.write_owned().await;
        if node.is_dir {
            return Err(Error::InvalidRequest(format!("{} is a directory", path)));
        }
        Ok(FileGuard {
            _ancestors: held,
            node,
        })
    }
}

/// Exclusive access to a file node; ancestor read locks are held until drop
pub struct FileGuard {
    _ancestors: Vec<ReadGuard>,
    node: OwnedRwLockWriteGuard<NsNode>,
}

impl FileGuard {
    pub fn chunk_count(&self) -> u64 {
        self.node.chunks
    }

    pub fn set_chunk_count(&mut self, chunks: u64) {
        self.node.chunks = chunks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_create_and_info() {
        let ns = NamespaceManager::new();
        ns.mkdir("/data").await.unwrap();
        ns.create("/data/log").await.unwrap();

        let info = ns.get_file_info("/data/log").await.unwrap();
        assert_eq!(
            info,
            FileInfo {
                is_dir: false,
                length: 0,
                chunks: 0
            }
        );
        assert!(ns.get_file_info("/data").await.unwrap().is_dir);
        assert!(ns.get_file_info("/").await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_create_errors() {
        let ns = NamespaceManager::new();
        ns.create("/f").await.unwrap();

        assert!(matches!(ns.create("/f").await, Err(Error::AlreadyExists(_))));
        assert!(matches!(ns.mkdir("/f").await, Err(Error::AlreadyExists(_))));
        assert!(matches!(ns.create("/missing/f").await, Err(Error::NotFound(_))));
        assert!(matches!(ns.create("/f/g").await, Err(Error::InvalidRequest(_))));
        assert!(matches!(ns.create("f").await, Err(Error::InvalidRequest(_))));
        assert!(matches!(ns.get_file_info("/nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let ns = NamespaceManager::new();
        ns.mkdir("/d").await.unwrap();
        ns.create("/d/b").await.unwrap();
        ns.mkdir("/d/a").await.unwrap();
        ns.create("/d/c").await.unwrap();

        let entries = ns.list("/d").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(entries[0].is_dir);
        assert!(!entries[1].is_dir);

        assert_eq!(ns.list("/").await.unwrap().len(), 1);
        assert!(matches!(ns.list("/d/b").await, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_delete() {
        let ns = NamespaceManager::new();
        ns.mkdir("/d").await.unwrap();
        ns.create("/d/f").await.unwrap();

        assert!(matches!(
            ns.delete("/d", || ()).await,
            Err(Error::InvalidRequest(_))
        ));
        assert_eq!(ns.delete("/d/f", || 7).await.unwrap(), Some(7));
        assert_eq!(ns.delete("/d", || 7).await.unwrap(), None);
        assert!(matches!(ns.delete("/d", || ()).await, Err(Error::NotFound(_))));
        assert!(ns.delete("/", || ()).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_hook_runs_under_parent_lock() {
        let ns = NamespaceManager::new();
        ns.create("/f").await.unwrap();

        let parent_locked = ns
            .delete("/f", || ns.root.try_read().is_err())
            .await
            .unwrap();
        assert_eq!(parent_locked, Some(true));
        assert!(ns.root.try_read().is_ok());
        ns.create("/f").await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_file_tracks_chunk_count() {
        let ns = NamespaceManager::new();
        ns.create("/f").await.unwrap();
        {
            let mut file = ns.lock_file("/f").await.unwrap();
            assert_eq!(file.chunk_count(), 0);
            file.set_chunk_count(1);
        }
        assert_eq!(ns.get_file_info("/f").await.unwrap().chunks, 1);

        ns.mkdir("/d").await.unwrap();
        assert!(matches!(ns.lock_file("/d").await, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_lock_blocks_parent_removal() {
        let ns = Arc::new(NamespaceManager::new());
        ns.mkdir("/d").await.unwrap();
        ns.create("/d/f").await.unwrap();

        let file = ns.lock_file("/d/f").await.unwrap();
        let deleter = {
            let ns = ns.clone();
            tokio::spawn(async move { ns.delete("/d/f", || ()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!deleter.is_finished());

        drop(file);
        assert_eq!(deleter.await.unwrap().unwrap(), Some(()));
    }
}
