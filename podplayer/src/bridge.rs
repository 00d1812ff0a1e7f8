//! Auto-advance: when the session finishes an episode, play the head of the
//! queue.
//!
//! The bridge is the only place where the queue and the session meet. It
//! consumes the queue head *before* loading it, so a failed load never
//! re-plays the same entry, and it never reacts to failures: a broken episode
//! leaves playback stopped with the queue untouched.
//!
//! Completion events are handled asynchronously. By the time the watcher
//! sees one, the user may already have picked another episode: the advance
//! only happens while the session is still `Finished` on the episode the
//! event names, otherwise the queue is left alone.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::PlayerError;
use crate::model::{EpisodeId, SessionEvent};
use crate::queue::QueueStore;
use crate::session::{LoadMode, PlaybackSession};
use crate::store::EpisodeStore;
use crate::Result;

struct BridgeInner {
    session: PlaybackSession,
    queue: QueueStore,
    store: Arc<dyn EpisodeStore>,
    token: CancellationToken,
}

#[derive(Clone)]
pub struct SessionQueueBridge {
    inner: Arc<BridgeInner>,
}

impl SessionQueueBridge {
    /// Builds a bridge without a watcher; only [`advance`](Self::advance)
    /// moves the queue.
    pub fn new(session: PlaybackSession, queue: QueueStore, store: Arc<dyn EpisodeStore>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                session,
                queue,
                store,
                token: CancellationToken::new(),
            }),
        }
    }

    /// Builds a bridge and starts watching the session for completions.
    pub fn spawn(
        session: PlaybackSession,
        queue: QueueStore,
        store: Arc<dyn EpisodeStore>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| PlayerError::NoRuntime)?;
        let bridge = Self::new(session, queue, store);

        // Subscribe before spawning so no completion can slip in between.
        let mut events = bridge.inner.session.subscribe();
        let token = bridge.inner.token.clone();
        let worker = bridge.clone();

        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => match event {
                        Some(SessionEvent::Finished { episode_id }) => {
                            debug!(episode = %episode_id, "Episode finished, advancing queue");
                            worker.advance_from(Some(&episode_id)).await;
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            debug!("Session/queue bridge stopped");
        });

        Ok(bridge)
    }

    /// Pops the queue head and plays it.
    ///
    /// Queued ids unknown to the episode store are dropped with a warning
    /// and the next one is tried. Returns the episode handed to the session,
    /// or `None` when the queue ran out.
    pub async fn advance(&self) -> Option<EpisodeId> {
        self.advance_from(None).await
    }

    async fn advance_from(&self, finished: Option<&EpisodeId>) -> Option<EpisodeId> {
        let inner = &self.inner;
        loop {
            if let Some(finished) = finished {
                if !inner.session.is_finished_on(finished) {
                    debug!(episode = %finished, "Session moved on, queue left untouched");
                    return None;
                }
            }
            let Some(id) = inner.queue.next() else {
                debug!("Queue empty, playback stops");
                return None;
            };
            inner.queue.remove(&id);

            match inner.store.episode(&id) {
                Some(episode) => {
                    info!(episode = %id, title = %episode.title, "Auto-advancing to next queued episode");
                    match finished {
                        Some(finished) => {
                            if !inner.session.load_after_finish(finished, episode).await {
                                // Remis en tête : l'utilisateur a choisi entre-temps
                                inner.queue.add_to_top(&id);
                                return None;
                            }
                        }
                        None => inner.session.load_episode_with(episode, LoadMode::Play).await,
                    }
                    return Some(id);
                }
                None => warn!(episode = %id, "Queued episode missing from library, skipping"),
            }
        }
    }

    /// Stops the completion watcher. The session and the queue are left as
    /// they are.
    pub fn shutdown(&self) {
        self.inner.token.cancel();
    }
}
