//! Native event-source abstraction.
//!
//! The watcher core consumes raw (path, flags) callbacks through the
//! [`EventStreamProvider`] trait; the production implementation is backed by
//! `notify`, tests inject a mock. Stream handles own their resources and
//! must halt delivery synchronously on [`EventStreamHandle::stop`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitflags::bitflags;
use log::warn;
use notify::{recommended_watcher, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{Result, WatchError};
use crate::types::FileChangeKind;

bitflags! {
    /// Raw change flags from the native layer. Several flags can be set for
    /// one path in one callback; none of them are authoritative about the
    /// path's current state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        const CREATED  = 0x01;
        const REMOVED  = 0x02;
        const RENAMED  = 0x04;
        const MODIFIED = 0x08;
    }
}

/// One raw event as delivered by the native stream.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub path: PathBuf,
    pub flags: EventFlags,
}

/// Callback invoked with each batch of raw events, on the stream's thread.
pub type RawEventHandler = Arc<dyn Fn(Vec<RawEvent>) + Send + Sync>;

/// A running native watch over a set of roots.
pub trait EventStreamHandle: Send {
    /// Synchronously stops delivery. No callbacks fire after this returns.
    fn stop(&mut self);
}

/// Creates recursive native watches.
pub trait EventStreamProvider: Send + Sync {
    fn create_stream(
        &self,
        roots: &[PathBuf],
        handler: RawEventHandler,
    ) -> Result<Box<dyn EventStreamHandle>>;
}

/// `notify`-backed event stream provider.
#[derive(Debug, Default)]
pub struct NotifyEventStreamProvider;

impl EventStreamProvider for NotifyEventStreamProvider {
    fn create_stream(
        &self,
        roots: &[PathBuf],
        handler: RawEventHandler,
    ) -> Result<Box<dyn EventStreamHandle>> {
        let mut watcher =
            recommended_watcher(move |result: notify::Result<notify::Event>| match result {
                Ok(event) => {
                    let Some(flags) = map_event_kind(&event.kind) else {
                        return;
                    };
                    let raw: Vec<RawEvent> = event
                        .paths
                        .iter()
                        .map(|path| RawEvent {
                            path: path.clone(),
                            flags,
                        })
                        .collect();
                    if !raw.is_empty() {
                        handler(raw);
                    }
                }
                Err(error) => warn!("native event stream error: {error}"),
            })
            .map_err(|error| WatchError::Stream(error.to_string()))?;

        for root in roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|error| {
                    WatchError::Stream(format!("failed to watch {}: {error}", root.display()))
                })?;
        }

        Ok(Box::new(NotifyStreamHandle {
            watcher: Some(watcher),
            roots: roots.to_vec(),
        }))
    }
}

struct NotifyStreamHandle {
    watcher: Option<RecommendedWatcher>,
    roots: Vec<PathBuf>,
}

impl EventStreamHandle for NotifyStreamHandle {
    fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            for root in &self.roots {
                let _ = watcher.unwatch(root);
            }
            // Dropping the watcher tears down its event loop.
        }
    }
}

impl Drop for NotifyStreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Maps a `notify` event kind onto raw flags. Access events carry no state
/// change and are dropped at the source.
fn map_event_kind(kind: &notify::EventKind) -> Option<EventFlags> {
    use notify::event::ModifyKind;
    use notify::EventKind;

    match kind {
        EventKind::Create(_) => Some(EventFlags::CREATED),
        EventKind::Remove(_) => Some(EventFlags::REMOVED),
        EventKind::Modify(ModifyKind::Name(_)) => Some(EventFlags::RENAMED),
        EventKind::Modify(_) => Some(EventFlags::MODIFIED),
        EventKind::Access(_) => None,
        EventKind::Any | EventKind::Other => Some(EventFlags::MODIFIED),
    }
}

/// Callback invoked when the watched single file changes.
pub type FileChangeHandler = Arc<dyn Fn(FileChangeKind) + Send + Sync>;

/// A non-recursive watch on one file (the workspace manifest).
pub trait SingleFileWatcher: Send {
    /// Begins watching; `false` means the native watch could not start.
    fn start_watching(&mut self) -> bool;
    fn stop_watching(&mut self);
}

/// Creates single-file watches; injectable for tests.
pub trait FileWatcherFactory: Send + Sync {
    fn create_file_watcher(
        &self,
        file: PathBuf,
        on_change: FileChangeHandler,
    ) -> Box<dyn SingleFileWatcher>;
}

/// `notify`-backed single-file watcher factory.
#[derive(Debug, Default)]
pub struct NotifyFileWatcherFactory;

impl FileWatcherFactory for NotifyFileWatcherFactory {
    fn create_file_watcher(
        &self,
        file: PathBuf,
        on_change: FileChangeHandler,
    ) -> Box<dyn SingleFileWatcher> {
        Box::new(NotifySingleFileWatcher {
            file,
            on_change,
            watcher: None,
        })
    }
}

struct NotifySingleFileWatcher {
    file: PathBuf,
    on_change: FileChangeHandler,
    watcher: Option<RecommendedWatcher>,
}

impl SingleFileWatcher for NotifySingleFileWatcher {
    fn start_watching(&mut self) -> bool {
        let file = self.file.clone();
        let on_change = self.on_change.clone();
        let result = recommended_watcher(move |result: notify::Result<notify::Event>| {
            let Ok(event) = result else { return };
            if !event.paths.iter().any(|path| path == &file) {
                return;
            }
            let Some(flags) = map_event_kind(&event.kind) else {
                return;
            };
            let kind = if flags.contains(EventFlags::REMOVED) {
                FileChangeKind::Deleted
            } else if flags.contains(EventFlags::CREATED) {
                FileChangeKind::Created
            } else {
                FileChangeKind::Changed
            };
            on_change(kind);
        });

        let mut watcher = match result {
            Ok(watcher) => watcher,
            Err(error) => {
                warn!("failed to create manifest watcher: {error}");
                return false;
            }
        };

        // Watch the parent so deletion and recreation of the file itself
        // are observed.
        let target = self
            .file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.file.clone());
        if let Err(error) = watcher.watch(&target, RecursiveMode::NonRecursive) {
            warn!("failed to watch manifest {}: {error}", self.file.display());
            return false;
        }

        self.watcher = Some(watcher);
        true
    }

    fn stop_watching(&mut self) {
        self.watcher = None;
    }
}

impl Drop for NotifySingleFileWatcher {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RenameMode};
    use notify::EventKind;

    #[test]
    fn event_kind_mapping() {
        assert_eq!(
            map_event_kind(&EventKind::Create(CreateKind::File)),
            Some(EventFlags::CREATED)
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Name(RenameMode::Any))),
            Some(EventFlags::RENAMED)
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Any)),
            Some(EventFlags::MODIFIED)
        );
        assert_eq!(
            map_event_kind(&EventKind::Access(notify::event::AccessKind::Any)),
            None
        );
    }
}
