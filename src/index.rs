//! Workspace-scoped file and directory indexes.
//!
//! Each index maps a workspace root to its currently known references.
//! All operations serialize through one mutex per index instance — workspace
//! counts are small, so cross-workspace contention is accepted. Instances
//! are explicitly constructed and injected; there is no process-global
//! index.

use std::path::{Path, PathBuf};

use fnv::FnvHashMap;
use parking_lot::Mutex;

use crate::types::{DirectoryReference, FileReference};

/// Maximum number of files tracked per workspace.
pub const MAX_FILES_PER_WORKSPACE: usize = 1_000_000;

/// Maximum number of directories tracked per workspace.
pub const MAX_DIRECTORIES_PER_WORKSPACE: usize = 100_000;

/// Capacity-bounded map from workspace root to reference list.
#[derive(Debug)]
struct IndexStore<T> {
    entries: Mutex<FnvHashMap<PathBuf, Vec<T>>>,
    capacity: usize,
}

impl<T: Clone + PartialEq> IndexStore<T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(FnvHashMap::default()),
            capacity,
        }
    }

    /// Full replace, truncating to capacity in input order.
    fn set(&self, mut items: Vec<T>, workspace: &Path) {
        items.truncate(self.capacity);
        self.entries.lock().insert(workspace.to_path_buf(), items);
    }

    /// Snapshot of the workspace's entries, `None` if never indexed.
    fn get(&self, workspace: &Path) -> Option<Vec<T>> {
        self.entries.lock().get(workspace).cloned()
    }

    /// Appends `item` unless already present. Returns `false` only when the
    /// workspace is at capacity; a duplicate add is a successful no-op.
    fn add(&self, item: T, workspace: &Path) -> bool {
        let mut entries = self.entries.lock();
        let items = entries.entry(workspace.to_path_buf()).or_default();
        if items.len() >= self.capacity {
            return false;
        }
        if !items.contains(&item) {
            items.push(item);
        }
        true
    }

    /// Removes all entries equal to `item`; no-op if absent.
    fn remove(&self, item: &T, workspace: &Path) {
        if let Some(items) = self.entries.lock().get_mut(workspace) {
            items.retain(|existing| existing != item);
        }
    }
}

/// Per-workspace cache of known files, patched live by watcher batches.
#[derive(Debug)]
pub struct WorkspaceFileIndex {
    store: IndexStore<FileReference>,
}

impl Default for WorkspaceFileIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceFileIndex {
    pub fn new() -> Self {
        Self::with_capacity(MAX_FILES_PER_WORKSPACE)
    }

    /// Custom capacity, for test isolation.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: IndexStore::new(capacity),
        }
    }

    /// Replaces the workspace's file list, truncating to capacity.
    pub fn set_files(&self, files: Vec<FileReference>, workspace: &Path) {
        self.store.set(files, workspace);
    }

    /// Returns a snapshot of the workspace's files.
    pub fn get_files(&self, workspace: &Path) -> Option<Vec<FileReference>> {
        self.store.get(workspace)
    }

    /// Adds a file; `false` means the workspace hit
    /// [`MAX_FILES_PER_WORKSPACE`]. Adding an existing file succeeds without
    /// duplicating it.
    #[must_use = "a false return means the workspace is at capacity"]
    pub fn add_file(&self, file: FileReference, workspace: &Path) -> bool {
        self.store.add(file, workspace)
    }

    /// Removes a file; no-op if absent.
    pub fn remove_file(&self, file: &FileReference, workspace: &Path) {
        self.store.remove(file, workspace);
    }
}

/// Per-workspace cache of known directories. Mirrors
/// [`WorkspaceFileIndex`] at directory capacity.
#[derive(Debug)]
pub struct WorkspaceDirectoryIndex {
    store: IndexStore<DirectoryReference>,
}

impl Default for WorkspaceDirectoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceDirectoryIndex {
    pub fn new() -> Self {
        Self::with_capacity(MAX_DIRECTORIES_PER_WORKSPACE)
    }

    /// Custom capacity, for test isolation.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: IndexStore::new(capacity),
        }
    }

    /// Replaces the workspace's directory list, truncating to capacity.
    pub fn set_directories(&self, directories: Vec<DirectoryReference>, workspace: &Path) {
        self.store.set(directories, workspace);
    }

    /// Returns a snapshot of the workspace's directories.
    pub fn get_directories(&self, workspace: &Path) -> Option<Vec<DirectoryReference>> {
        self.store.get(workspace)
    }

    /// Adds a directory; `false` means the workspace hit
    /// [`MAX_DIRECTORIES_PER_WORKSPACE`].
    #[must_use = "a false return means the workspace is at capacity"]
    pub fn add_directory(&self, directory: DirectoryReference, workspace: &Path) -> bool {
        self.store.add(directory, workspace)
    }

    /// Removes a directory; no-op if absent.
    pub fn remove_directory(&self, directory: &DirectoryReference, workspace: &Path) {
        self.store.remove(directory, workspace);
    }
}
