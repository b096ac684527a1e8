//! Timer-driven batching watcher.
//!
//! One native stream covers the current root set. Classified events land in
//! two pending queues (files, directories); a flush thread compresses each
//! queue on a fixed interval and publishes capped batches. Producers never
//! block: enqueue is a short mutex push, and flush holds the same mutex so
//! enqueue and drain for one queue are mutually exclusive while the two
//! queues stay independent.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{select, Sender};
use fnv::FnvHashMap;
use log::{info, warn};
use parking_lot::Mutex;

use crate::scope::SkipList;
use crate::types::{FileChangeKind, FileEvent};
use crate::watcher::classify::classify;
use crate::watcher::stream::{EventStreamHandle, EventStreamProvider, RawEvent};

/// Maximum number of events delivered in one publish callback.
pub const MAX_EVENT_PUBLISH_SIZE: usize = 100;

/// Default flush interval.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(3);

/// Batch consumer. Called on the watcher's flush thread with at most
/// [`MAX_EVENT_PUBLISH_SIZE`] events.
pub type EventPublisher = Arc<dyn Fn(Vec<FileEvent>) + Send + Sync>;

/// Watcher tuning shared by the watcher and its owning service.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub publish_interval: Duration,
    pub skip: SkipList,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            skip: SkipList::default(),
        }
    }
}

pub struct BatchingChangeWatcher {
    inner: Arc<WatcherInner>,
    flush_thread: Option<JoinHandle<()>>,
    stop_tx: Sender<()>,
}

struct WatcherInner {
    watched_roots: Mutex<Vec<PathBuf>>,
    pending_files: Mutex<Vec<FileEvent>>,
    pending_directories: Mutex<Vec<FileEvent>>,
    publisher: EventPublisher,
    directory_publisher: Option<EventPublisher>,
    stream_provider: Arc<dyn EventStreamProvider>,
    stream: Mutex<Option<Box<dyn EventStreamHandle>>>,
    skip: SkipList,
    is_watching: AtomicBool,
}

impl BatchingChangeWatcher {
    /// Creates the watcher and immediately attempts to start the native
    /// stream and the flush driver. A failed stream start is logged and
    /// leaves the watcher inert; the caller may reconstruct to retry.
    pub fn new(
        roots: Vec<PathBuf>,
        publisher: EventPublisher,
        directory_publisher: Option<EventPublisher>,
        stream_provider: Arc<dyn EventStreamProvider>,
        config: WatcherConfig,
    ) -> Self {
        let inner = Arc::new(WatcherInner {
            watched_roots: Mutex::new(roots),
            pending_files: Mutex::new(Vec::new()),
            pending_directories: Mutex::new(Vec::new()),
            publisher,
            directory_publisher,
            stream_provider,
            stream: Mutex::new(None),
            skip: config.skip,
            is_watching: AtomicBool::new(false),
        });

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let ticker = crossbeam_channel::tick(config.publish_interval);
        let flush_inner = Arc::downgrade(&inner);
        let flush_thread = std::thread::spawn(move || loop {
            select! {
                recv(ticker) -> _ => {
                    let Some(inner) = flush_inner.upgrade() else { break };
                    inner.flush_files();
                    inner.flush_directories();
                }
                recv(stop_rx) -> _ => break,
            }
        });

        let watcher = Self {
            inner,
            flush_thread: Some(flush_thread),
            stop_tx,
        };
        watcher.start();
        watcher
    }

    /// Starts watching if not already watching.
    pub fn start(&self) {
        if self.inner.is_watching.load(Ordering::SeqCst) {
            return;
        }
        if self.inner.start_stream() {
            self.inner.is_watching.store(true, Ordering::SeqCst);
        } else {
            warn!(
                "failed to start watching {:?}",
                self.inner.watched_roots.lock()
            );
        }
    }

    pub fn is_watching(&self) -> bool {
        self.inner.is_watching.load(Ordering::SeqCst)
    }

    /// The current root set.
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        self.inner.watched_roots.lock().clone()
    }

    /// Adds roots not already watched; restarts the stream when the set
    /// changes. Pending classified events survive the restart.
    pub fn add_roots(&self, roots: &[PathBuf]) {
        let updated = {
            let current = self.inner.watched_roots.lock();
            let new_roots: Vec<_> = roots
                .iter()
                .filter(|root| !current.contains(root))
                .cloned()
                .collect();
            if new_roots.is_empty() {
                return;
            }
            let mut updated = current.clone();
            updated.extend(new_roots);
            updated
        };
        self.update_watched_roots(updated);
    }

    /// Removes roots from the watched set; no-op if none are present.
    pub fn remove_roots(&self, roots: &[PathBuf]) {
        let updated = {
            let current = self.inner.watched_roots.lock();
            let updated: Vec<_> = current
                .iter()
                .filter(|root| !roots.contains(root))
                .cloned()
                .collect();
            if updated.len() == current.len() {
                return;
            }
            updated
        };
        self.update_watched_roots(updated);
    }

    fn update_watched_roots(&self, roots: Vec<PathBuf>) {
        if !self.inner.is_watching.load(Ordering::SeqCst) {
            *self.inner.watched_roots.lock() = roots;
            return;
        }
        // Stop-then-restart; events arriving in the gap are an accepted
        // loss, reconciled by the next full enumeration.
        self.inner.stop_stream();
        self.inner.is_watching.store(false, Ordering::SeqCst);
        *self.inner.watched_roots.lock() = roots;
        self.start();
    }

    /// Routes a classified event to the file queue, the directory queue, or
    /// both when a deletion's kind is unknown.
    pub fn on_fs_event(&self, path: &Path, kind: FileChangeKind, is_directory: Option<bool>) {
        self.inner.on_fs_event(path, kind, is_directory);
    }

    /// Stops the native stream. Pending queues are left intact; the flush
    /// driver keeps running until drop.
    pub fn stop_watching(&self) {
        if !self.inner.is_watching.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.stop_stream();
        info!(
            "stopped watching for file changes in {:?}",
            self.inner.watched_roots.lock()
        );
    }

    #[cfg(test)]
    fn flush_once(&self) {
        self.inner.flush_files();
        self.inner.flush_directories();
    }
}

impl Drop for BatchingChangeWatcher {
    fn drop(&mut self) {
        self.stop_watching();
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.flush_thread.take() {
            let _ = thread.join();
        }
    }
}

impl WatcherInner {
    /// Creates the native stream for the current root set. The handler
    /// holds a weak reference so the stream never keeps the watcher alive.
    fn start_stream(self: &Arc<Self>) -> bool {
        let weak: Weak<WatcherInner> = Arc::downgrade(self);
        let handler = Arc::new(move |events: Vec<RawEvent>| {
            let Some(inner) = weak.upgrade() else { return };
            for raw in &events {
                for classified in classify(raw, &inner.skip) {
                    inner.on_fs_event(&classified.path, classified.kind, classified.is_directory);
                }
            }
        });

        let roots = self.watched_roots.lock().clone();
        match self.stream_provider.create_stream(&roots, handler) {
            Ok(handle) => {
                *self.stream.lock() = Some(handle);
                true
            }
            Err(error) => {
                warn!("failed to create event stream for {roots:?}: {error}");
                false
            }
        }
    }

    /// Synchronously halts the stream; no callbacks fire after this.
    fn stop_stream(&self) {
        if let Some(mut handle) = self.stream.lock().take() {
            handle.stop();
        }
    }

    fn on_fs_event(&self, path: &Path, kind: FileChangeKind, is_directory: Option<bool>) {
        if kind == FileChangeKind::Deleted && is_directory.is_none() {
            // Could have been either; deliver to both queues.
            self.enqueue_file(path, kind);
            self.enqueue_directory(path, kind);
            return;
        }

        match is_directory {
            Some(true) => self.enqueue_directory(path, kind),
            Some(false) => self.enqueue_file(path, kind),
            None => {}
        }
    }

    fn enqueue_file(&self, path: &Path, kind: FileChangeKind) {
        self.pending_files.lock().push(FileEvent::new(path, kind));
    }

    fn enqueue_directory(&self, path: &Path, kind: FileChangeKind) {
        if self.directory_publisher.is_none() {
            return;
        }
        self.pending_directories
            .lock()
            .push(FileEvent::new(path, kind));
    }

    fn flush_files(&self) {
        if let Some(batch) = drain_batch(&self.pending_files) {
            (self.publisher)(batch);
        }
    }

    fn flush_directories(&self) {
        let Some(publisher) = &self.directory_publisher else {
            return;
        };
        if let Some(batch) = drain_batch(&self.pending_directories) {
            publisher(batch);
        }
    }
}

/// Compresses the queue and takes up to [`MAX_EVENT_PUBLISH_SIZE`] events;
/// the remainder is requeued for the next tick. `None` when there is
/// nothing to publish.
fn drain_batch(pending: &Mutex<Vec<FileEvent>>) -> Option<Vec<FileEvent>> {
    let mut pending = pending.lock();
    if pending.is_empty() {
        return None;
    }
    let mut compressed = compress_events(std::mem::take(&mut *pending));
    if compressed.len() > MAX_EVENT_PUBLISH_SIZE {
        *pending = compressed.split_off(MAX_EVENT_PUBLISH_SIZE);
    }
    Some(compressed)
}

/// Reduces a queue to at most one event per uri.
///
/// Deletion covers prior created/changed; creation covers prior
/// deleted/changed (removal then recreation nets out to "present"); a
/// change never demotes a created recorded in the same window.
fn compress_events(events: Vec<FileEvent>) -> Vec<FileEvent> {
    let mut compressed: FnvHashMap<String, FileEvent> = FnvHashMap::default();
    for event in events {
        match compressed.get(&event.uri) {
            None => {
                compressed.insert(event.uri.clone(), event);
            }
            Some(existing) => match event.kind {
                FileChangeKind::Deleted | FileChangeKind::Created => {
                    compressed.insert(event.uri.clone(), event);
                }
                FileChangeKind::Changed => {
                    if existing.kind != FileChangeKind::Created {
                        compressed.insert(event.uri.clone(), event);
                    }
                }
            },
        }
    }
    compressed.into_values().collect()
}
