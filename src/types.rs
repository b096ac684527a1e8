//! Core event and reference types for workspace watching.
//!
//! `FileEvent` is the wire-adjacent type forwarded to IPC peers; the
//! reference types are what the indexes store. Reference equality is by
//! URL only — identity, not content.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The logical kind of a filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Created,
    Changed,
    Deleted,
}

impl FileChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Changed => "changed",
            Self::Deleted => "deleted",
        }
    }
}

/// A single change notification for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    /// `file://` URI of the changed path.
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: FileChangeKind,
}

impl FileEvent {
    pub fn new(path: &Path, kind: FileChangeKind) -> Self {
        Self {
            uri: path_to_uri(path),
            kind,
        }
    }

    /// The filesystem path this event refers to.
    pub fn path(&self) -> PathBuf {
        uri_to_path(&self.uri)
    }
}

/// Converts an absolute path to a `file://` URI.
///
/// The native layer hands back well-formed absolute UTF-8 paths; no percent
/// encoding is applied.
pub fn path_to_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Converts a `file://` URI back to a path. Non-URI strings pass through.
pub fn uri_to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

/// A discovered workspace file.
///
/// Equality is by URL only: two references to the same path are the same
/// file regardless of the derived name fields.
#[derive(Debug, Clone)]
pub struct FileReference {
    pub url: PathBuf,
    pub relative_path: String,
    pub file_name: String,
}

impl FileReference {
    /// Builds a reference for `url`, deriving the relative path against
    /// `project_root`.
    pub fn new(url: PathBuf, project_root: &Path) -> Self {
        let relative_path = url
            .strip_prefix(project_root)
            .unwrap_or(&url)
            .to_string_lossy()
            .into_owned();
        let file_name = url
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            url,
            relative_path,
            file_name,
        }
    }
}

impl PartialEq for FileReference {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for FileReference {}

/// A discovered workspace directory.
///
/// Equality is by URL only, matching [`FileReference`].
#[derive(Debug, Clone)]
pub struct DirectoryReference {
    pub url: PathBuf,
    /// Walk depth below the project root at discovery time.
    pub depth: usize,
    pub project_url: PathBuf,
}

impl DirectoryReference {
    pub fn new(url: PathBuf, depth: usize, project_url: PathBuf) -> Self {
        Self {
            url,
            depth,
            project_url,
        }
    }
}

impl PartialEq for DirectoryReference {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for DirectoryReference {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_round_trip() {
        let path = Path::new("/workspace/project/src/main.rs");
        let event = FileEvent::new(path, FileChangeKind::Created);
        assert_eq!(event.uri, "file:///workspace/project/src/main.rs");
        assert_eq!(event.path(), path);
    }

    #[test]
    fn uri_to_path_passes_plain_paths_through() {
        assert_eq!(uri_to_path("/plain/path"), PathBuf::from("/plain/path"));
    }

    #[test]
    fn file_reference_relative_path() {
        let file = FileReference::new(
            PathBuf::from("/workspace/project/src/lib.rs"),
            Path::new("/workspace/project"),
        );
        assert_eq!(file.relative_path, "src/lib.rs");
        assert_eq!(file.file_name, "lib.rs");
    }

    #[test]
    fn file_reference_equality_ignores_derived_fields() {
        let a = FileReference {
            url: PathBuf::from("/workspace/a.rs"),
            relative_path: "a.rs".into(),
            file_name: "a.rs".into(),
        };
        let b = FileReference {
            url: PathBuf::from("/workspace/a.rs"),
            relative_path: "different".into(),
            file_name: "different".into(),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn directory_reference_equality_is_by_url() {
        let a = DirectoryReference::new(
            PathBuf::from("/workspace/src"),
            1,
            PathBuf::from("/workspace"),
        );
        let b = DirectoryReference::new(
            PathBuf::from("/workspace/src"),
            4,
            PathBuf::from("/elsewhere"),
        );
        assert_eq!(a, b);
    }
}
