//! File change watching pipeline.
//!
//! Event flow: native stream ([`stream`]) → classification ([`classify`])
//! → batching and capped publish ([`batching`]) → per-workspace
//! coordination and index patching ([`service`]).

pub mod batching;
pub mod classify;
pub mod service;
pub mod stream;

pub use batching::{
    BatchingChangeWatcher, EventPublisher, WatcherConfig, DEFAULT_PUBLISH_INTERVAL,
    MAX_EVENT_PUBLISH_SIZE,
};
pub use classify::{classify, ClassifiedEvent};
pub use service::{ChangeNotifier, FileChangeWatcherService, WatcherServicePool};
pub use stream::{
    EventFlags, EventStreamHandle, EventStreamProvider, FileWatcherFactory,
    NotifyEventStreamProvider, NotifyFileWatcherFactory, RawEvent, SingleFileWatcher,
};
