//! Workspace file watching and indexing.
//!
//! This crate provides the live-update core for a multi-project workspace:
//! - Native filesystem event consumption behind an injectable stream trait
//! - Event classification with exclusion policy and fresh-stat ground truth
//! - Time-windowed batching with compression and capped publishing
//! - Project-membership watching with synthetic create/delete batches
//! - Capacity-bounded, concurrency-safe file and directory indexes

pub mod error;
pub mod index;
pub mod provider;
pub mod scope;
pub mod types;
pub mod watcher;

// Re-export main types
pub use error::{Result, WatchError};
pub use index::{
    WorkspaceDirectoryIndex, WorkspaceFileIndex, MAX_DIRECTORIES_PER_WORKSPACE,
    MAX_FILES_PER_WORKSPACE,
};
pub use provider::{FsWorkspaceFileProvider, WorkspaceFileProvider, MANIFEST_FILE_NAME};
pub use scope::SkipList;
pub use types::{DirectoryReference, FileChangeKind, FileEvent, FileReference};
pub use watcher::{
    BatchingChangeWatcher, ChangeNotifier, FileChangeWatcherService, WatcherConfig,
    WatcherServicePool,
};
