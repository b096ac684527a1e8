//! Project-membership queries and full workspace enumeration.
//!
//! The watcher core only sees this trait; the filesystem-backed default
//! implementation resolves multi-project containers through their manifest
//! and walks project roots with the `ignore` walker, applying the same
//! [`SkipList`] as the live event classifier.

use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use log::warn;

use crate::error::canonicalize_existing_path;
use crate::scope::SkipList;
use crate::types::{DirectoryReference, FileReference};

/// Name of the manifest file enumerating a container's project references.
pub const MANIFEST_FILE_NAME: &str = "contents.xcworkspacedata";

/// Collaborator answering "which roots does this workspace contain" and
/// "what is currently on disk under a root".
pub trait WorkspaceFileProvider: Send + Sync {
    /// Whether `workspace` is a multi-project container with a manifest.
    fn is_workspace_container(&self, workspace: &Path) -> bool;

    /// Location of the container's manifest file.
    fn manifest_path(&self, workspace: &Path) -> PathBuf {
        workspace.join(MANIFEST_FILE_NAME)
    }

    /// The project roots the workspace currently references. A
    /// non-container workspace resolves to itself as the single root.
    fn project_roots(&self, workspace: &Path) -> Vec<PathBuf>;

    /// All files currently present under `project_root`.
    fn files_under(&self, project_root: &Path) -> Vec<FileReference>;

    /// All directories currently present under the workspace's roots.
    fn directories_under(&self, workspace: &Path, workspace_root: &Path)
        -> Vec<DirectoryReference>;

    fn file_exists(&self, path: &Path) -> bool;
}

/// Filesystem-backed provider.
#[derive(Debug, Default)]
pub struct FsWorkspaceFileProvider {
    skip: SkipList,
}

impl FsWorkspaceFileProvider {
    pub fn new(skip: SkipList) -> Self {
        Self { skip }
    }

    fn walk(&self, root: &Path) -> ignore::Walk {
        let skip = self.skip.clone();
        WalkBuilder::new(root)
            .standard_filters(false)
            .hidden(true)
            .filter_entry(move |entry| !skip.should_skip(entry.path()))
            .build()
    }
}

impl WorkspaceFileProvider for FsWorkspaceFileProvider {
    fn is_workspace_container(&self, workspace: &Path) -> bool {
        workspace
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("xcworkspace"))
            .unwrap_or(false)
            && self.manifest_path(workspace).is_file()
    }

    fn project_roots(&self, workspace: &Path) -> Vec<PathBuf> {
        if !self.is_workspace_container(workspace) {
            return vec![workspace.to_path_buf()];
        }

        let manifest = self.manifest_path(workspace);
        let content = match fs::read_to_string(&manifest) {
            Ok(content) => content,
            Err(error) => {
                warn!("failed to read manifest {}: {error}", manifest.display());
                return Vec::new();
            }
        };

        // References resolve against the directory containing the bundle.
        let base = workspace.parent().unwrap_or(workspace);
        let mut roots = Vec::new();
        for reference in parse_manifest_refs(&content) {
            let Some(mut resolved) = resolve_reference(base, &reference) else {
                continue;
            };
            // A project bundle reference denotes the project's directory.
            if resolved
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("xcodeproj"))
                .unwrap_or(false)
            {
                let Some(parent) = resolved.parent() else {
                    continue;
                };
                resolved = parent.to_path_buf();
            }
            let resolved = canonicalize_existing_path(resolved);
            if !roots.contains(&resolved) {
                roots.push(resolved);
            }
        }
        roots
    }

    fn files_under(&self, project_root: &Path) -> Vec<FileReference> {
        let mut files = Vec::new();
        for entry in self.walk(project_root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!("enumeration error under {}: {error}", project_root.display());
                    continue;
                }
            };
            let is_file = entry
                .file_type()
                .map(|file_type| file_type.is_file())
                .unwrap_or(false);
            if is_file {
                files.push(FileReference::new(entry.into_path(), project_root));
            }
        }
        files
    }

    fn directories_under(
        &self,
        workspace: &Path,
        workspace_root: &Path,
    ) -> Vec<DirectoryReference> {
        let roots = if self.is_workspace_container(workspace) {
            self.project_roots(workspace)
        } else {
            vec![workspace_root.to_path_buf()]
        };

        let mut directories = Vec::new();
        for root in roots {
            if !self.file_exists(&root) {
                continue;
            }
            for entry in self.walk(&root) {
                let Ok(entry) = entry else { continue };
                // Depth 0 is the project root itself.
                if entry.depth() == 0 {
                    continue;
                }
                let is_dir = entry
                    .file_type()
                    .map(|file_type| file_type.is_dir())
                    .unwrap_or(false);
                if is_dir {
                    let depth = entry.depth();
                    directories.push(DirectoryReference::new(
                        entry.into_path(),
                        depth,
                        workspace_root.to_path_buf(),
                    ));
                }
            }
        }
        directories
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Extracts `location = "scheme:relative"` references from manifest XML.
///
/// The manifest is simple enough that quote scanning beats pulling in an
/// XML parser for one attribute.
fn parse_manifest_refs(content: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let mut rest = content;
    while let Some(position) = rest.find("location") {
        rest = &rest[position + "location".len()..];
        let Some(open) = rest.find('"') else { break };
        rest = &rest[open + 1..];
        let Some(close) = rest.find('"') else { break };
        refs.push(rest[..close].to_string());
        rest = &rest[close + 1..];
    }
    refs
}

/// Resolves one manifest reference against the container's parent directory.
fn resolve_reference(base: &Path, reference: &str) -> Option<PathBuf> {
    let (scheme, relative) = reference.split_once(':')?;
    match scheme {
        "absolute" => Some(PathBuf::from(relative)),
        "group" | "container" => Some(base.join(relative)),
        // `self:` points back into the bundle; nothing to watch there.
        _ => None,
    }
}
