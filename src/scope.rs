//! Exclusion policy for workspace enumeration and watching.
//!
//! Both the full enumeration walk and the live event classifier go through
//! the same [`SkipList`], so organically-enumerated and watch-derived file
//! lists agree on what the workspace contains.

use std::fs;
use std::path::{Component, Path};

/// Path segments that are never tracked, plus workspace/project bundle
/// detection. Matching is per path component, never by substring, at any
/// depth including the root.
#[derive(Debug, Clone)]
pub struct SkipList {
    segments: Vec<String>,
}

/// Directory names skipped by default: VCS metadata, package manager and
/// build caches, and IDE preview scratch directories.
const DEFAULT_SKIP_SEGMENTS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".swiftpm",
    ".build",
    "node_modules",
    "Preview Content",
    "DerivedData",
];

/// Bundle extensions treated as workspace metadata containers rather than
/// project content.
const BUNDLE_EXTENSIONS: &[&str] = &["xcworkspace", "xcodeproj"];

impl Default for SkipList {
    fn default() -> Self {
        Self {
            segments: DEFAULT_SKIP_SEGMENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SkipList {
    /// Builds a skip list with a custom segment set (replaces the defaults).
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if any component of `path` is a skip segment or a
    /// workspace/project bundle.
    pub fn should_skip(&self, path: &Path) -> bool {
        path.components().any(|component| {
            let Component::Normal(name) = component else {
                return false;
            };
            let name = name.to_string_lossy();
            if self.segments.iter().any(|segment| segment.as_str() == name) {
                return true;
            }
            is_bundle_name(&name)
        })
    }

    /// A path is a valid file when it is not excluded and currently stats
    /// as a regular file.
    pub fn is_valid_file(&self, path: &Path) -> bool {
        if self.should_skip(path) {
            return false;
        }
        fs::symlink_metadata(path)
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// A path is a valid directory when it is not excluded and currently
    /// stats as a directory.
    pub fn is_valid_directory(&self, path: &Path) -> bool {
        if self.should_skip(path) {
            return false;
        }
        fs::symlink_metadata(path)
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }
}

/// Returns `true` for workspace-container bundle names (`*.xcworkspace`,
/// `*.xcodeproj`).
pub fn is_bundle_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| {
            BUNDLE_EXTENSIONS
                .iter()
                .any(|bundle| ext.eq_ignore_ascii_case(bundle))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn skips_segments_at_any_depth() {
        let skip = SkipList::default();
        assert!(skip.should_skip(Path::new("/repo/.git")));
        assert!(skip.should_skip(Path::new("/repo/.git/objects")));
        assert!(skip.should_skip(Path::new("/repo/a/node_modules/pkg")));
        assert!(skip.should_skip(Path::new("/.git")));
        assert!(skip.should_skip(Path::new("/repo/Preview Content")));
        assert!(skip.should_skip(Path::new("/repo/deps/.swiftpm")));
    }

    #[test]
    fn substring_matches_do_not_trigger() {
        let skip = SkipList::default();
        assert!(!skip.should_skip(Path::new("/repo/gitignore_handler.go")));
        assert!(!skip.should_skip(Path::new("/repo/some/valid/path")));
        assert!(!skip.should_skip(Path::new("/repo/node_modules_backup/file")));
    }

    #[test]
    fn skips_workspace_bundles() {
        let skip = SkipList::default();
        assert!(skip.should_skip(Path::new("/repo/app.xcworkspace")));
        assert!(skip.should_skip(Path::new("/repo/app.xcodeproj/project.pbxproj")));
        assert!(!skip.should_skip(Path::new("/repo/xcworkspace_notes.md")));
    }

    #[test]
    fn custom_segments_replace_defaults() {
        let skip = SkipList::new(["target"]);
        assert!(skip.should_skip(Path::new("/repo/target/debug")));
        assert!(!skip.should_skip(Path::new("/repo/node_modules/pkg")));
    }

    #[test]
    fn validity_checks_stat_the_path() {
        let skip = SkipList::default();
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("main.rs");
        std::fs::write(&file_path, "fn main() {}").unwrap();
        let sub_dir = dir.path().join("src");
        std::fs::create_dir(&sub_dir).unwrap();
        let git_dir = dir.path().join(".git");
        std::fs::create_dir(&git_dir).unwrap();

        assert!(skip.is_valid_file(&file_path));
        assert!(!skip.is_valid_file(&sub_dir));
        assert!(skip.is_valid_directory(&sub_dir));
        assert!(!skip.is_valid_directory(&file_path));
        assert!(!skip.is_valid_directory(&git_dir));
        assert!(!skip.is_valid_file(&PathBuf::from("/nonexistent/file.rs")));
    }
}
