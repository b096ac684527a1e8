//! Raw event classification.
//!
//! Native flags lag reality: a rename flag may mean "content replaced", a
//! create flag may describe a path that is already gone. Classification
//! therefore re-derives ground truth with a fresh stat and emits zero or
//! more logical events per raw event.

use std::fs;
use std::path::PathBuf;

use crate::scope::SkipList;
use crate::types::FileChangeKind;
use crate::watcher::stream::{EventFlags, RawEvent};

/// A logical event ready for queueing.
///
/// `is_directory` is `None` when the path no longer exists and its kind
/// cannot be determined; such deletions are delivered to both queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub path: PathBuf,
    pub kind: FileChangeKind,
    pub is_directory: Option<bool>,
}

/// Classifies one raw event into logical events.
pub fn classify(event: &RawEvent, skip: &SkipList) -> Vec<ClassifiedEvent> {
    if skip.should_skip(&event.path) {
        return Vec::new();
    }

    let meta = fs::symlink_metadata(&event.path).ok();
    let is_directory = match &meta {
        Some(meta) if meta.is_dir() => Some(true),
        Some(meta) if meta.is_file() => Some(false),
        // Symlinks, sockets, fifos: never tracked.
        Some(_) => return Vec::new(),
        None => None,
    };
    let exists = meta.is_some();

    let mut classified = Vec::new();
    let mut push = |kind| {
        classified.push(ClassifiedEvent {
            path: event.path.clone(),
            kind,
            is_directory,
        });
    };

    if event.flags.contains(EventFlags::CREATED) && exists {
        push(FileChangeKind::Created);
    }

    if event.flags.contains(EventFlags::REMOVED) {
        push(FileChangeKind::Deleted);
    }

    // A rename flag is the native layer's proxy for "content replaced".
    if event.flags.contains(EventFlags::RENAMED) {
        push(if exists {
            FileChangeKind::Changed
        } else {
            FileChangeKind::Deleted
        });
    }

    if event.flags.contains(EventFlags::MODIFIED) {
        push(if exists {
            FileChangeKind::Changed
        } else {
            FileChangeKind::Deleted
        });
    }

    classified
}
