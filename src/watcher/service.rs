//! Per-workspace watcher coordination.
//!
//! [`FileChangeWatcherService`] owns one [`BatchingChangeWatcher`] covering
//! the workspace's project roots plus a single-file watch on the container
//! manifest. When the manifest changes, the project-root set is
//! re-resolved: added roots get watched and their files announced as a
//! synthetic created batch, removed roots get unwatched and announced as
//! deleted. [`WatcherServicePool`] is the process-wide façade that wires a
//! service's batches into the indexes and an external notifier.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use fnv::FnvHashMap;
use log::{info, warn};
use parking_lot::Mutex;

use crate::index::{WorkspaceDirectoryIndex, WorkspaceFileIndex};
use crate::provider::WorkspaceFileProvider;
use crate::types::{DirectoryReference, FileChangeKind, FileEvent, FileReference};
use crate::watcher::batching::{
    BatchingChangeWatcher, EventPublisher, WatcherConfig, MAX_EVENT_PUBLISH_SIZE,
};
use crate::watcher::stream::{EventStreamProvider, FileWatcherFactory, SingleFileWatcher};

/// Receives each published file batch for forwarding to a remote peer.
pub trait ChangeNotifier: Send + Sync {
    fn notify_changed(&self, workspace: &Path, events: &[FileEvent]);
}

struct ServiceState {
    watcher: Option<BatchingChangeWatcher>,
    manifest_watcher: Option<Box<dyn SingleFileWatcher>>,
    known_roots: Vec<PathBuf>,
}

/// Watches one workspace: its project roots and its membership manifest.
pub struct FileChangeWatcherService {
    workspace: PathBuf,
    publisher: EventPublisher,
    directory_publisher: Option<EventPublisher>,
    provider: Arc<dyn WorkspaceFileProvider>,
    stream_provider: Arc<dyn EventStreamProvider>,
    watcher_factory: Arc<dyn FileWatcherFactory>,
    config: WatcherConfig,
    state: Mutex<ServiceState>,
}

impl FileChangeWatcherService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workspace: PathBuf,
        publisher: EventPublisher,
        directory_publisher: Option<EventPublisher>,
        provider: Arc<dyn WorkspaceFileProvider>,
        stream_provider: Arc<dyn EventStreamProvider>,
        watcher_factory: Arc<dyn FileWatcherFactory>,
        config: WatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            workspace,
            publisher,
            directory_publisher,
            provider,
            stream_provider,
            watcher_factory,
            config,
            state: Mutex::new(ServiceState {
                watcher: None,
                manifest_watcher: None,
                known_roots: Vec::new(),
            }),
        })
    }

    /// Resolves the project roots and starts watching them. A workspace
    /// rooted at the filesystem root is treated as "no active workspace".
    pub fn start_watching(self: &Arc<Self>) {
        if self.workspace == Path::new("/") {
            warn!("refusing to watch the filesystem root");
            return;
        }

        let roots = self.provider.project_roots(&self.workspace);
        let mut state = self.state.lock();
        if state.watcher.is_some() {
            return;
        }
        if roots.is_empty() {
            info!("no project roots for {}", self.workspace.display());
            return;
        }

        state.watcher = Some(BatchingChangeWatcher::new(
            roots.clone(),
            self.publisher.clone(),
            self.directory_publisher.clone(),
            self.stream_provider.clone(),
            self.config.clone(),
        ));
        state.known_roots = roots;

        if self.provider.is_workspace_container(&self.workspace) {
            let manifest = self.provider.manifest_path(&self.workspace);
            let weak: Weak<Self> = Arc::downgrade(self);
            let mut watcher = self.watcher_factory.create_file_watcher(
                manifest.clone(),
                Arc::new(move |_kind| {
                    if let Some(service) = weak.upgrade() {
                        service.project_membership_changed();
                    }
                }),
            );
            if watcher.start_watching() {
                state.manifest_watcher = Some(watcher);
            } else {
                warn!("failed to watch manifest {}", manifest.display());
            }
        }
    }

    /// Stops all watches synchronously.
    pub fn stop_watching(&self) {
        let mut state = self.state.lock();
        if let Some(watcher) = state.watcher.take() {
            watcher.stop_watching();
        }
        if let Some(mut manifest_watcher) = state.manifest_watcher.take() {
            manifest_watcher.stop_watching();
        }
        state.known_roots.clear();
    }

    /// The roots currently covered by the underlying watcher.
    pub fn watched_roots(&self) -> Option<Vec<PathBuf>> {
        self.state
            .lock()
            .watcher
            .as_ref()
            .map(BatchingChangeWatcher::watched_roots)
    }

    /// Re-resolves project membership after a manifest change and
    /// reconciles the watcher and downstream consumers.
    fn project_membership_changed(&self) {
        let new_roots = self.provider.project_roots(&self.workspace);

        // Compute the diff and update watcher state under the lock, but
        // publish synthetic batches after releasing it: publishers may call
        // back into code that takes this lock.
        let (added, removed) = {
            let mut state = self.state.lock();
            let Some(watcher) = state.watcher.as_ref() else {
                return;
            };
            let added: Vec<PathBuf> = new_roots
                .iter()
                .filter(|root| !state.known_roots.contains(root))
                .cloned()
                .collect();
            let removed: Vec<PathBuf> = state
                .known_roots
                .iter()
                .filter(|root| !new_roots.contains(root))
                .cloned()
                .collect();
            if added.is_empty() && removed.is_empty() {
                return;
            }
            watcher.add_roots(&added);
            watcher.remove_roots(&removed);
            state.known_roots = new_roots;
            (added, removed)
        };

        for root in &added {
            info!("project added to workspace: {}", root.display());
            // Enumeration needs the root on disk; a dangling manifest
            // reference contributes no synthetic batch.
            if !self.provider.file_exists(root) {
                warn!("added project missing on disk: {}", root.display());
                continue;
            }
            let events: Vec<FileEvent> = self
                .provider
                .files_under(root)
                .into_iter()
                .map(|file| FileEvent::new(&file.url, FileChangeKind::Created))
                .collect();
            self.publish_synthetic(events);
        }

        for root in &removed {
            info!("project removed from workspace: {}", root.display());
            let events: Vec<FileEvent> = self
                .provider
                .files_under(root)
                .into_iter()
                .map(|file| FileEvent::new(&file.url, FileChangeKind::Deleted))
                .collect();
            self.publish_synthetic(events);
        }
    }

    /// Delivers a synthetic batch through the organic publish channel,
    /// honoring the per-callback cap.
    fn publish_synthetic(&self, events: Vec<FileEvent>) {
        for chunk in events.chunks(MAX_EVENT_PUBLISH_SIZE) {
            (self.publisher)(chunk.to_vec());
        }
    }
}

impl Drop for FileChangeWatcherService {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

/// Process-wide pool: one watcher service per workspace, each wired into
/// the shared indexes and an external notifier.
pub struct WatcherServicePool {
    file_index: Arc<WorkspaceFileIndex>,
    directory_index: Arc<WorkspaceDirectoryIndex>,
    provider: Arc<dyn WorkspaceFileProvider>,
    stream_provider: Arc<dyn EventStreamProvider>,
    watcher_factory: Arc<dyn FileWatcherFactory>,
    config: WatcherConfig,
    services: Mutex<FnvHashMap<PathBuf, Arc<FileChangeWatcherService>>>,
}

impl WatcherServicePool {
    pub fn new(
        file_index: Arc<WorkspaceFileIndex>,
        directory_index: Arc<WorkspaceDirectoryIndex>,
        provider: Arc<dyn WorkspaceFileProvider>,
        stream_provider: Arc<dyn EventStreamProvider>,
        watcher_factory: Arc<dyn FileWatcherFactory>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            file_index,
            directory_index,
            provider,
            stream_provider,
            watcher_factory,
            config,
            services: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Starts watching `workspace`, bootstrapping both indexes with a full
    /// enumeration first so live patches land on populated state.
    /// Idempotent per workspace.
    pub fn watch(
        &self,
        workspace: &Path,
        project_root: &Path,
        notifier: Arc<dyn ChangeNotifier>,
    ) {
        if self.services.lock().contains_key(workspace) {
            return;
        }

        // Full enumeration before live watching.
        let directories = self.provider.directories_under(workspace, project_root);
        self.directory_index.set_directories(directories, workspace);
        let files: Vec<FileReference> = self
            .provider
            .project_roots(workspace)
            .iter()
            .flat_map(|root| self.provider.files_under(root))
            .collect();
        self.file_index.set_files(files, workspace);

        let publisher = self.file_batch_consumer(workspace, project_root, notifier);
        let directory_publisher = self.directory_batch_consumer(workspace, project_root);

        let service = FileChangeWatcherService::new(
            workspace.to_path_buf(),
            publisher,
            Some(directory_publisher),
            self.provider.clone(),
            self.stream_provider.clone(),
            self.watcher_factory.clone(),
            self.config.clone(),
        );
        service.start_watching();
        self.services
            .lock()
            .insert(workspace.to_path_buf(), service);
    }

    /// Stops and removes the workspace's service; no-op if not watched.
    pub fn unwatch(&self, workspace: &Path) {
        if let Some(service) = self.services.lock().remove(workspace) {
            service.stop_watching();
        }
    }

    /// Whether the workspace currently has an active service.
    pub fn is_watching(&self, workspace: &Path) -> bool {
        self.services.lock().contains_key(workspace)
    }

    /// Applies each file batch to the file index, then forwards it to the
    /// notifier. Synthetic and organic batches take the same path, so the
    /// consumer stays idempotent to their interleaving.
    fn file_batch_consumer(
        &self,
        workspace: &Path,
        project_root: &Path,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> EventPublisher {
        let file_index = self.file_index.clone();
        let workspace = workspace.to_path_buf();
        let project_root = project_root.to_path_buf();
        Arc::new(move |events: Vec<FileEvent>| {
            for event in &events {
                let file = FileReference::new(event.path(), &project_root);
                if event.kind == FileChangeKind::Deleted {
                    file_index.remove_file(&file, &workspace);
                } else if !file_index.add_file(file, &workspace) {
                    warn!(
                        "file index at capacity for {}, dropping {}",
                        workspace.display(),
                        event.uri
                    );
                }
            }
            notifier.notify_changed(&workspace, &events);
        })
    }

    /// Applies each directory batch to the directory index. Directory
    /// batches are index-only; they are not forwarded to the notifier.
    fn directory_batch_consumer(&self, workspace: &Path, project_root: &Path) -> EventPublisher {
        let directory_index = self.directory_index.clone();
        let workspace = workspace.to_path_buf();
        let project_root = project_root.to_path_buf();
        Arc::new(move |events: Vec<FileEvent>| {
            for event in &events {
                let path = event.path();
                let depth = path
                    .strip_prefix(&project_root)
                    .map(|relative| relative.components().count())
                    .unwrap_or(0);
                let directory = DirectoryReference::new(path, depth, project_root.clone());
                if event.kind == FileChangeKind::Deleted {
                    directory_index.remove_directory(&directory, &workspace);
                } else if !directory_index.add_directory(directory, &workspace) {
                    warn!(
                        "directory index at capacity for {}, dropping {}",
                        workspace.display(),
                        event.uri
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::watcher::stream::{
        EventStreamHandle, FileChangeHandler, RawEventHandler,
    };
    use std::time::Duration;

    struct MockProvider {
        roots: Mutex<Vec<PathBuf>>,
        files: Mutex<Vec<FileReference>>,
        directories: Mutex<Vec<DirectoryReference>>,
        exists: Mutex<bool>,
        container: bool,
    }

    impl MockProvider {
        fn new(container: bool) -> Arc<Self> {
            Arc::new(Self {
                roots: Mutex::new(Vec::new()),
                files: Mutex::new(Vec::new()),
                directories: Mutex::new(Vec::new()),
                exists: Mutex::new(true),
                container,
            })
        }

        fn set_roots(&self, roots: Vec<PathBuf>) {
            *self.roots.lock() = roots;
        }

        fn set_files(&self, files: Vec<FileReference>) {
            *self.files.lock() = files;
        }

        fn set_exists(&self, exists: bool) {
            *self.exists.lock() = exists;
        }
    }

    impl WorkspaceFileProvider for MockProvider {
        fn is_workspace_container(&self, _workspace: &Path) -> bool {
            self.container
        }

        fn project_roots(&self, _workspace: &Path) -> Vec<PathBuf> {
            self.roots.lock().clone()
        }

        fn files_under(&self, _project_root: &Path) -> Vec<FileReference> {
            self.files.lock().clone()
        }

        fn directories_under(
            &self,
            _workspace: &Path,
            _workspace_root: &Path,
        ) -> Vec<DirectoryReference> {
            self.directories.lock().clone()
        }

        fn file_exists(&self, _path: &Path) -> bool {
            *self.exists.lock()
        }
    }

    struct NoopStreamHandle;

    impl EventStreamHandle for NoopStreamHandle {
        fn stop(&mut self) {}
    }

    #[derive(Default)]
    struct NoopStreamProvider;

    impl EventStreamProvider for NoopStreamProvider {
        fn create_stream(
            &self,
            _roots: &[PathBuf],
            _handler: RawEventHandler,
        ) -> Result<Box<dyn EventStreamHandle>> {
            Ok(Box::new(NoopStreamHandle))
        }
    }

    /// Registers manifest-change handlers so tests can fire them.
    #[derive(Default)]
    struct MockWatcherFactory {
        handlers: Mutex<FnvHashMap<PathBuf, FileChangeHandler>>,
    }

    impl MockWatcherFactory {
        fn trigger_delete(&self, file: &Path) {
            let handler = self
                .handlers
                .lock()
                .get(file)
                .cloned()
                .expect("no watcher registered for file");
            handler(FileChangeKind::Deleted);
        }
    }

    struct MockSingleFileWatcher;

    impl SingleFileWatcher for MockSingleFileWatcher {
        fn start_watching(&mut self) -> bool {
            true
        }

        fn stop_watching(&mut self) {}
    }

    impl FileWatcherFactory for MockWatcherFactory {
        fn create_file_watcher(
            &self,
            file: PathBuf,
            on_change: FileChangeHandler,
        ) -> Box<dyn SingleFileWatcher> {
            self.handlers.lock().insert(file, on_change);
            Box::new(MockSingleFileWatcher)
        }
    }

    type Captured = Arc<Mutex<Vec<Vec<FileEvent>>>>;

    fn capturing_publisher() -> (EventPublisher, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let publisher: EventPublisher = Arc::new(move |events| sink.lock().push(events));
        (publisher, captured)
    }

    fn test_config() -> WatcherConfig {
        WatcherConfig {
            publish_interval: Duration::from_secs(3600),
            ..WatcherConfig::default()
        }
    }

    fn file_ref(path: &str) -> FileReference {
        FileReference::new(PathBuf::from(path), Path::new("/test/workspace"))
    }

    fn make_service(
        workspace: &str,
        provider: Arc<MockProvider>,
        factory: Arc<MockWatcherFactory>,
    ) -> (Arc<FileChangeWatcherService>, Captured) {
        let (publisher, captured) = capturing_publisher();
        let service = FileChangeWatcherService::new(
            PathBuf::from(workspace),
            publisher,
            None,
            provider,
            Arc::new(NoopStreamProvider),
            factory,
            test_config(),
        );
        (service, captured)
    }

    #[test]
    fn start_watching_covers_project_roots() {
        let provider = MockProvider::new(false);
        provider.set_roots(vec![
            PathBuf::from("/test/workspace/project1"),
            PathBuf::from("/test/workspace/project2"),
        ]);
        let (service, _captured) =
            make_service("/test/workspace", provider, Arc::new(MockWatcherFactory::default()));

        service.start_watching();
        assert_eq!(
            service.watched_roots(),
            Some(vec![
                PathBuf::from("/test/workspace/project1"),
                PathBuf::from("/test/workspace/project2"),
            ])
        );
    }

    #[test]
    fn filesystem_root_is_never_watched() {
        let provider = MockProvider::new(false);
        provider.set_roots(vec![PathBuf::from("/")]);
        let (service, _captured) =
            make_service("/", provider, Arc::new(MockWatcherFactory::default()));

        service.start_watching();
        assert_eq!(service.watched_roots(), None);
    }

    #[test]
    fn added_project_publishes_synthetic_created_batch() {
        let workspace = PathBuf::from("/test/workspace");
        let project1 = PathBuf::from("/test/workspace/project1");
        let project2 = PathBuf::from("/test/workspace/project2");

        let provider = MockProvider::new(true);
        provider.set_roots(vec![project1.clone()]);
        let factory = Arc::new(MockWatcherFactory::default());
        let (service, captured) =
            make_service("/test/workspace", provider.clone(), factory.clone());
        service.start_watching();

        // Unchanged membership publishes nothing.
        factory.trigger_delete(&workspace.join("contents.xcworkspacedata"));
        assert!(captured.lock().is_empty());

        provider.set_roots(vec![project1, project2]);
        provider.set_files(vec![
            file_ref("/test/workspace/project2/file1.rs"),
            file_ref("/test/workspace/project2/file2.rs"),
        ]);

        factory.trigger_delete(&workspace.join("contents.xcworkspacedata"));

        let batches = captured.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(batches[0]
            .iter()
            .all(|event| event.kind == FileChangeKind::Created));
        assert_eq!(
            service.watched_roots().unwrap(),
            vec![
                PathBuf::from("/test/workspace/project1"),
                PathBuf::from("/test/workspace/project2"),
            ]
        );
    }

    #[test]
    fn removed_project_publishes_synthetic_deleted_batch() {
        let workspace = PathBuf::from("/test/workspace");
        let project1 = PathBuf::from("/test/workspace/project1");
        let project2 = PathBuf::from("/test/workspace/project2");

        let provider = MockProvider::new(true);
        provider.set_roots(vec![project1.clone(), project2.clone()]);
        let factory = Arc::new(MockWatcherFactory::default());
        let (service, captured) =
            make_service("/test/workspace", provider.clone(), factory.clone());
        service.start_watching();

        provider.set_roots(vec![project1.clone()]);
        provider.set_files(vec![
            file_ref("/test/workspace/project2/file1.rs"),
            file_ref("/test/workspace/project2/file2.rs"),
        ]);

        factory.trigger_delete(&workspace.join("contents.xcworkspacedata"));

        let batches = captured.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(batches[0]
            .iter()
            .all(|event| event.kind == FileChangeKind::Deleted));
        assert_eq!(service.watched_roots().unwrap(), vec![project1]);
    }

    #[test]
    fn added_project_missing_on_disk_publishes_nothing() {
        let workspace = PathBuf::from("/test/workspace");
        let project1 = PathBuf::from("/test/workspace/project1");
        let project2 = PathBuf::from("/test/workspace/project2");

        let provider = MockProvider::new(true);
        provider.set_roots(vec![project1.clone()]);
        let factory = Arc::new(MockWatcherFactory::default());
        let (service, captured) =
            make_service("/test/workspace", provider.clone(), factory.clone());
        service.start_watching();

        provider.set_roots(vec![project1.clone(), project2.clone()]);
        provider.set_files(vec![file_ref("/test/workspace/project2/file1.rs")]);
        provider.set_exists(false);

        factory.trigger_delete(&workspace.join("contents.xcworkspacedata"));

        // The watcher covers the new root, but a root that is not on
        // disk contributes no synthetic batch.
        assert!(captured.lock().is_empty());
        assert_eq!(service.watched_roots().unwrap(), vec![project1, project2]);
    }

    #[test]
    fn large_synthetic_batches_are_capped() {
        let workspace = PathBuf::from("/test/workspace");
        let project1 = PathBuf::from("/test/workspace/project1");
        let project2 = PathBuf::from("/test/workspace/project2");

        let provider = MockProvider::new(true);
        provider.set_roots(vec![project1.clone()]);
        let factory = Arc::new(MockWatcherFactory::default());
        let (service, captured) =
            make_service("/test/workspace", provider.clone(), factory.clone());
        service.start_watching();

        provider.set_roots(vec![project1, project2]);
        provider.set_files(
            (0..250)
                .map(|i| file_ref(&format!("/test/workspace/project2/file{i}.rs")))
                .collect(),
        );

        factory.trigger_delete(&workspace.join("contents.xcworkspacedata"));

        let batches = captured.lock();
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn pool_bootstraps_indexes_and_patches_on_events() {
        let workspace = Path::new("/test/workspace");
        let project_root = Path::new("/test/workspace");

        let provider = MockProvider::new(false);
        provider.set_roots(vec![project_root.to_path_buf()]);
        provider.set_files(vec![file_ref("/test/workspace/a.rs")]);
        *provider.directories.lock() = vec![DirectoryReference::new(
            PathBuf::from("/test/workspace/src"),
            1,
            project_root.to_path_buf(),
        )];

        let file_index = Arc::new(WorkspaceFileIndex::new());
        let directory_index = Arc::new(WorkspaceDirectoryIndex::new());
        let pool = WatcherServicePool::new(
            file_index.clone(),
            directory_index.clone(),
            provider,
            Arc::new(NoopStreamProvider),
            Arc::new(MockWatcherFactory::default()),
            test_config(),
        );

        struct RecordingNotifier(Captured);
        impl ChangeNotifier for RecordingNotifier {
            fn notify_changed(&self, _workspace: &Path, events: &[FileEvent]) {
                self.0.lock().push(events.to_vec());
            }
        }
        let notified: Captured = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(RecordingNotifier(notified.clone()));

        pool.watch(workspace, project_root, notifier.clone());
        assert!(pool.is_watching(workspace));
        assert_eq!(file_index.get_files(workspace).unwrap().len(), 1);
        assert_eq!(directory_index.get_directories(workspace).unwrap().len(), 1);

        // Re-watching the same workspace is a no-op.
        pool.watch(workspace, project_root, notifier);

        // Drive a batch through the pool's consumer directly.
        let consumer = {
            let services = pool.services.lock();
            assert_eq!(services.len(), 1);
            drop(services);
            pool.file_batch_consumer(
                workspace,
                project_root,
                Arc::new(RecordingNotifier(notified.clone())),
            )
        };
        consumer(vec![
            FileEvent::new(Path::new("/test/workspace/b.rs"), FileChangeKind::Created),
            FileEvent::new(Path::new("/test/workspace/a.rs"), FileChangeKind::Deleted),
        ]);

        let files = file_index.get_files(workspace).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].url, PathBuf::from("/test/workspace/b.rs"));
        assert_eq!(notified.lock().len(), 1);

        pool.unwatch(workspace);
        assert!(!pool.is_watching(workspace));
    }

    #[test]
    fn directory_consumer_patches_directory_index() {
        let workspace = Path::new("/test/workspace");
        let project_root = Path::new("/test/workspace");

        let file_index = Arc::new(WorkspaceFileIndex::new());
        let directory_index = Arc::new(WorkspaceDirectoryIndex::new());
        let pool = WatcherServicePool::new(
            file_index,
            directory_index.clone(),
            MockProvider::new(false),
            Arc::new(NoopStreamProvider),
            Arc::new(MockWatcherFactory::default()),
            test_config(),
        );

        let consumer = pool.directory_batch_consumer(workspace, project_root);
        consumer(vec![FileEvent::new(
            Path::new("/test/workspace/src/nested"),
            FileChangeKind::Created,
        )]);

        let directories = directory_index.get_directories(workspace).unwrap();
        assert_eq!(directories.len(), 1);
        assert_eq!(directories[0].depth, 2);

        consumer(vec![FileEvent::new(
            Path::new("/test/workspace/src/nested"),
            FileChangeKind::Deleted,
        )]);
        assert!(directory_index.get_directories(workspace).unwrap().is_empty());
    }
}
