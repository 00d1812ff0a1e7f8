//! # podplayer
//!
//! Playback core of PodMusic: one process-wide [`PlaybackSession`] playing a
//! single episode at a time, a persistent user-ordered [`QueueStore`], the
//! [`SwipeCoordinator`] used by queue rows, and the [`SessionQueueBridge`]
//! that chains the two on completion.
//!
//! Components expose their state through snapshots and [`EventBus`]
//! subscriptions; every mutation goes through their methods.
//!
//! ```rust,ignore
//! let factory = Arc::new(SimulatedEngineFactory::new());
//! let store = Arc::new(JsonEpisodeStore::open("library.json"));
//! let session = PlaybackSession::builder(factory, store.clone()).build()?;
//! let queue = QueueStore::load(Arc::new(JsonQueueFile::new("queue.json")));
//! let bridge = SessionQueueBridge::spawn(session.clone(), queue.clone(), store)?;
//! ```

mod bridge;
#[cfg(feature = "podconfig")]
mod config_ext;

pub mod engine;
pub mod errors;
pub mod events;
pub mod model;
pub mod queue;
pub mod session;
pub mod store;
pub mod swipe;

pub use bridge::SessionQueueBridge;
#[cfg(feature = "podconfig")]
pub use config_ext::PlayerConfigExt;
pub use engine::{
    EngineFactory, EngineStatus, MediaEngine, SimulatedEngine, SimulatedEngineFactory,
};
pub use errors::{PlayerError, Result};
pub use events::{EventBus, EventReceiver};
pub use model::{
    Episode, EpisodeId, MediaSource, Podcast, PodcastId, QueueEvent, SessionEvent,
    SessionSnapshot, SessionState, SwipeEvent,
};
pub use queue::{JsonQueueFile, MemoryQueuePersistence, QueuePersistence, QueueStore};
pub use session::{LoadMode, PlaybackSession, SessionBuilder, SessionConfig};
pub use store::{
    DownloadCallback, DownloadManager, EpisodeStore, JsonEpisodeStore, Library,
    MemoryEpisodeStore, download_episode,
};
pub use swipe::{RowState, SwipeAction, SwipeCoordinator, SwipeOutcome, SwipeRow, SwipeThresholds};
