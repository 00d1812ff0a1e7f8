//! The playback session: the single authority for "what is playing now".
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> Loading -> Ready | Paused | Playing | Failed
//! Ready <-> Playing <-> Paused
//! Ready | Playing | Paused -> Seeking -> (state before the seek)
//! Playing -> Finished
//! ```
//!
//! ## Concurrency
//!
//! All state lives behind one mutex and every transition, together with the
//! events it emits, is applied while holding it. The lock is never held
//! across an `.await`: asynchronous steps (source resolution, seek
//! completion) capture a *generation* before suspending and re-check it on
//! resumption. Loading another episode bumps the generation, which turns
//! every pending completion and tick of the previous episode into a no-op.
//!
//! At most one engine is alive at any time. An engine still being prepared
//! by a load is registered as *pending* as soon as the factory returns it, so
//! the next load releases it synchronously, before opening its own source.

mod ticker;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineFactory, MediaEngine};
use crate::errors::PlayerError;
use crate::events::{EventBus, EventReceiver};
use crate::model::{
    Episode, EpisodeId, MediaSource, SessionEvent, SessionSnapshot, SessionState,
};
use crate::store::{DownloadManager, EpisodeStore};
use crate::Result;

/// Tunables of the playback session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Step used by `seek_forward` / `seek_backward`, in seconds.
    pub skip_interval: f64,
    /// Period of the position tick while playing.
    pub tick_interval: Duration,
    /// Minimum delay between two resume-position writes during playback.
    pub persist_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            skip_interval: 15.0,
            tick_interval: Duration::from_secs(1),
            persist_interval: Duration::from_secs(1),
        }
    }
}

/// What to do once an episode is loaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadMode {
    /// Start playing if the episode starts from the beginning, otherwise wait
    /// paused at the resume position.
    #[default]
    Resume,
    /// Always start playing (auto-advance).
    Play,
    /// Never start playing.
    Prepare,
}

#[derive(Default)]
struct SessionCore {
    episode: Option<Episode>,
    state: SessionState,
    position: f64,
    duration: f64,
    loading: bool,
    engine: Option<Arc<dyn MediaEngine>>,
    /// Opened by the load in flight, not installed yet.
    pending_engine: Option<Arc<dyn MediaEngine>>,
    generation: u64,
    load_token: Option<CancellationToken>,
    ticker: Option<CancellationToken>,
    seek_id: u64,
    /// Captured when a seek starts, never re-read at completion.
    resume_after_seek: bool,
    state_before_seek: SessionState,
    last_persist: Option<Instant>,
    closed: bool,
}

impl SessionCore {
    fn episode_id(&self) -> Option<EpisodeId> {
        self.episode.as_ref().map(|episode| episode.id.clone())
    }

    fn cancel_pending(&mut self) {
        if let Some(token) = self.ticker.take() {
            token.cancel();
        }
        if let Some(token) = self.load_token.take() {
            token.cancel();
        }
        if let Some(engine) = self.pending_engine.take() {
            engine.release();
        }
    }
}

pub(crate) struct SessionInner {
    factory: Arc<dyn EngineFactory>,
    store: Arc<dyn EpisodeStore>,
    downloads: Option<Arc<dyn DownloadManager>>,
    config: SessionConfig,
    runtime: Handle,
    core: Mutex<SessionCore>,
    events: EventBus<SessionEvent>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let core = self
            .core
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        core.cancel_pending();
        if let Some(engine) = core.engine.take() {
            engine.release();
        }
    }
}

pub struct SessionBuilder {
    factory: Arc<dyn EngineFactory>,
    store: Arc<dyn EpisodeStore>,
    downloads: Option<Arc<dyn DownloadManager>>,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn downloads(mut self, downloads: Arc<dyn DownloadManager>) -> Self {
        self.downloads = Some(downloads);
        self
    }

    /// Builds the session on the current Tokio runtime.
    pub fn build(self) -> Result<PlaybackSession> {
        let runtime = Handle::try_current().map_err(|_| PlayerError::NoRuntime)?;
        Ok(PlaybackSession {
            inner: Arc::new(SessionInner {
                factory: self.factory,
                store: self.store,
                downloads: self.downloads,
                config: self.config,
                runtime,
                core: Mutex::new(SessionCore::default()),
                events: EventBus::new(),
            }),
        })
    }
}

/// Cloneable handle on the process-wide playback session.
#[derive(Clone)]
pub struct PlaybackSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl PlaybackSession {
    pub fn builder(factory: Arc<dyn EngineFactory>, store: Arc<dyn EpisodeStore>) -> SessionBuilder {
        SessionBuilder {
            factory,
            store,
            downloads: None,
            config: SessionConfig::default(),
        }
    }

    fn core(&self) -> MutexGuard<'_, SessionCore> {
        self.inner
            .core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        self.inner.events.broadcast(event);
    }

    pub fn subscribe(&self) -> EventReceiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let core = self.core();
        SessionSnapshot {
            episode: core.episode.clone(),
            state: core.state.clone(),
            position: core.position,
            duration: core.duration,
            loading: core.loading,
        }
    }

    pub fn state(&self) -> SessionState {
        self.core().state.clone()
    }

    pub fn current_episode(&self) -> Option<Episode> {
        self.core().episode.clone()
    }

    /// Artwork of the current episode, falling back to its podcast's.
    pub fn artwork(&self) -> Option<String> {
        let episode = self.current_episode()?;
        episode.artwork_url.clone().or_else(|| {
            self.inner
                .store
                .podcast(&episode.podcast_id)
                .and_then(|podcast| podcast.artwork_url)
        })
    }

    // =====================================================================
    //  LOADING
    // =====================================================================

    /// Loads `episode` with the default autoplay policy.
    pub async fn load_episode(&self, episode: Episode) {
        self.load_episode_with(episode, LoadMode::Resume).await;
    }

    /// Replaces the current episode by `episode`.
    ///
    /// The previous engine is released and its tick cancelled before the new
    /// source is resolved. Resume position, played flag and local file are
    /// taken from the episode store when it knows the episode, so a stale copy
    /// does not rewind progress. A later call cancels this one. Failures end in
    /// [`SessionState::Failed`]; nothing is returned to the caller.
    pub async fn load_episode_with(&self, episode: Episode, mode: LoadMode) {
        self.load(episode, mode, None).await;
    }

    /// Auto-advance entry point: plays `episode` only if the session is still
    /// `Finished` on `finished`. Returns false when a newer choice already
    /// replaced the finished episode.
    pub(crate) async fn load_after_finish(&self, finished: &EpisodeId, episode: Episode) -> bool {
        self.load(episode, LoadMode::Play, Some(finished)).await
    }

    /// True while `id` is the current episode and has just finished.
    pub(crate) fn is_finished_on(&self, id: &EpisodeId) -> bool {
        let core = self.core();
        core.state == SessionState::Finished && core.episode.as_ref().is_some_and(|e| &e.id == id)
    }

    /// Returns whether the load was started.
    async fn load(&self, mut episode: Episode, mode: LoadMode, after: Option<&EpisodeId>) -> bool {
        let (generation, token) = {
            let mut guard = self.core();
            let core = &mut *guard;
            if core.closed {
                warn!(episode = %episode.id, "Session is shut down; ignoring load");
                return false;
            }
            if let Some(finished) = after {
                let still_finished = core.state == SessionState::Finished
                    && core.episode.as_ref().is_some_and(|e| &e.id == finished);
                if !still_finished {
                    debug!(episode = %episode.id, "Session moved on; dropping auto-advance");
                    return false;
                }
            }
            let same_episode = core.episode.as_ref().is_some_and(|e| e.id == episode.id);
            let replaceable = matches!(
                core.state,
                SessionState::Idle | SessionState::Failed { .. } | SessionState::Finished
            );
            if same_episode && !replaceable {
                debug!(episode = %episode.id, "Episode already current; ignoring load");
                return false;
            }

            self.teardown(core);

            // The library holds the authoritative resume state.
            if let Some(stored) = self.inner.store.episode(&episode.id) {
                episode.playback_position = stored.playback_position;
                episode.played = stored.played;
                if stored.local_file.is_some() {
                    episode.local_file = stored.local_file;
                }
            }

            core.generation += 1;
            let token = CancellationToken::new();
            core.load_token = Some(token.clone());
            core.position = episode.resume_position();
            core.duration = 0.0;
            core.last_persist = None;
            core.episode = Some(episode.clone());

            info!(episode = %episode.id, title = %episode.title, "Loading episode");
            self.emit(SessionEvent::EpisodeChanged {
                episode: Some(episode.clone()),
            });
            self.set_loading(core, true);
            self.set_state(core, SessionState::Loading);
            (core.generation, token)
        };

        let source = match self.resolve_source(&episode) {
            Ok(source) => source,
            Err(err) => {
                self.fail_if_current(generation, err);
                return true;
            }
        };
        debug!(episode = %episode.id, source = %source, "Opening audio source");

        let engine = tokio::select! {
            _ = token.cancelled() => {
                debug!(episode = %episode.id, "Load superseded while opening source");
                return true;
            }
            opened = self.inner.factory.open(&source) => match opened {
                Ok(engine) => engine,
                Err(err) => {
                    self.fail_if_current(generation, err);
                    return true;
                }
            },
        };

        {
            let mut core = self.core();
            if core.generation != generation || token.is_cancelled() {
                debug!(episode = %episode.id, "Load superseded; releasing engine");
                engine.release();
                return true;
            }
            core.pending_engine = Some(engine.clone());
        }

        let mut start = episode.resume_position();
        if let Some(duration) = engine.status().duration.filter(|d| *d > 0.0) {
            start = start.min(duration);
        }
        if start > 0.0 {
            let sought = tokio::select! {
                _ = token.cancelled() => {
                    engine.release();
                    return true;
                }
                sought = engine.seek(start) => sought,
            };
            if let Err(err) = sought {
                engine.release();
                self.fail_if_current(generation, err);
                return true;
            }
        }

        let mut guard = self.core();
        let core = &mut *guard;
        if core.generation != generation || token.is_cancelled() {
            debug!(episode = %episode.id, "Load superseded; releasing engine");
            engine.release();
            return true;
        }

        core.load_token = None;
        core.pending_engine = None;
        core.duration = engine.status().duration.unwrap_or(0.0).max(0.0);
        core.position = start;
        core.engine = Some(engine);
        self.set_loading(core, false);

        let autoplay = match mode {
            LoadMode::Resume => start == 0.0,
            LoadMode::Play => true,
            LoadMode::Prepare => false,
        };
        if autoplay {
            self.start_playing(core);
        } else if start > 0.0 {
            self.set_state(core, SessionState::Paused);
        } else {
            self.set_state(core, SessionState::Ready);
        }
        self.emit_position(core);
        true
    }

    /// Prefers a downloaded local file over the remote locator.
    fn resolve_source(&self, episode: &Episode) -> Result<MediaSource> {
        if let Some(path) = &episode.local_file {
            let downloaded = self
                .inner
                .downloads
                .as_ref()
                .is_none_or(|downloads| downloads.is_downloaded(&episode.id));
            if downloaded {
                return Ok(MediaSource::LocalFile(path.clone()));
            }
        }
        match &episode.audio_url {
            Some(url) if !url.trim().is_empty() => Ok(MediaSource::Remote(url.clone())),
            _ => Err(PlayerError::source_resolution(format!(
                "episode {} has no audio source",
                episode.id
            ))),
        }
    }

    // =====================================================================
    //  TRANSPORT
    // =====================================================================

    /// Starts or resumes playback. Ignored while a seek is in flight: whether
    /// playback resumes after the seek is decided when the seek starts.
    pub fn play(&self) {
        let mut guard = self.core();
        self.play_locked(&mut guard);
    }

    /// Pauses playback. Like [`play`](Self::play), ignored during a seek.
    pub fn pause(&self) {
        let mut guard = self.core();
        self.pause_locked(&mut guard);
    }

    pub fn toggle_play_pause(&self) {
        let mut guard = self.core();
        let core = &mut *guard;
        if core.state.is_playing() {
            self.pause_locked(core);
        } else {
            self.play_locked(core);
        }
    }

    fn play_locked(&self, core: &mut SessionCore) {
        if core.episode.is_none() {
            debug!("No episode loaded; ignoring play");
            return;
        }
        match core.state.clone() {
            SessionState::Ready | SessionState::Paused => {
                self.start_playing(core);
            }
            SessionState::Playing => {}
            state => debug!(state = ?state, "Ignoring play"),
        }
    }

    fn pause_locked(&self, core: &mut SessionCore) {
        if !core.state.is_playing() {
            debug!(state = ?core.state, "Not playing; ignoring pause");
            return;
        }
        let Some(engine) = core.engine.clone() else {
            return;
        };
        self.capture_position(core);
        if let Err(err) = engine.pause() {
            self.fail_locked(core, err);
            return;
        }
        self.stop_ticker(core);
        self.set_state(core, SessionState::Paused);
        self.emit_position(core);
        self.persist_progress(core);
    }

    /// Seeks to `to` seconds, clamped to `[0, duration]`.
    ///
    /// Playback resumes after the seek only if it was playing when the seek
    /// began; seeking while paused never starts playback.
    pub async fn seek(&self, to: f64) {
        let (engine, generation, seek_id, target) = {
            let mut guard = self.core();
            let core = &mut *guard;
            let state = core.state.clone();
            if !(state.is_controllable() || state == SessionState::Seeking) {
                debug!(state = ?state, "Ignoring seek");
                return;
            }
            let Some(engine) = core.engine.clone() else {
                return;
            };
            let target = clamp_position(to, core.duration);

            if state != SessionState::Seeking {
                core.resume_after_seek = state.is_playing();
                core.state_before_seek = if state.is_playing() {
                    SessionState::Paused
                } else {
                    state.clone()
                };
                if state.is_playing() {
                    self.stop_ticker(core);
                    if let Err(err) = engine.pause() {
                        self.fail_locked(core, err);
                        return;
                    }
                }
            }

            core.seek_id += 1;
            core.position = target;
            self.set_state(core, SessionState::Seeking);
            self.emit_position(core);
            (engine, core.generation, core.seek_id, target)
        };

        let result = engine.seek(target).await;

        let mut guard = self.core();
        let core = &mut *guard;
        if core.generation != generation
            || core.seek_id != seek_id
            || core.state != SessionState::Seeking
        {
            debug!(target, "Seek completion superseded");
            return;
        }
        if let Err(err) = result {
            self.fail_locked(core, err);
            return;
        }

        core.position = target;
        if core.resume_after_seek {
            self.start_playing(core);
        } else {
            let state = core.state_before_seek.clone();
            self.set_state(core, state);
        }
        self.persist_progress(core);
    }

    pub async fn seek_forward(&self) {
        let target = self.current_position() + self.inner.config.skip_interval;
        self.seek(target).await;
    }

    pub async fn seek_backward(&self) {
        let target = self.current_position() - self.inner.config.skip_interval;
        self.seek(target).await;
    }

    fn current_position(&self) -> f64 {
        let mut guard = self.core();
        let core = &mut *guard;
        self.capture_position(core);
        core.position
    }

    /// Sets or clears the `played` flag of an episode, current or not.
    pub fn set_played(&self, id: &EpisodeId, played: bool) -> Result<()> {
        {
            let mut guard = self.core();
            let core = &mut *guard;
            let position = core.position;
            if let Some(episode) = core.episode.as_mut().filter(|e| &e.id == id) {
                episode.played = played;
                episode.playback_position = position;
                let updated = episode.clone();
                self.emit(SessionEvent::EpisodeChanged {
                    episode: Some(updated),
                });
                return self.inner.store.save_progress(id, position, played);
            }
        }
        let episode = self
            .inner
            .store
            .episode(id)
            .ok_or_else(|| PlayerError::NotFound(format!("episode {id}")))?;
        self.inner
            .store
            .save_progress(id, episode.playback_position, played)
    }

    /// Tears the session down: the position is saved, the engine released
    /// and all pending work cancelled. Later calls are ignored.
    pub fn shutdown(&self) {
        let mut guard = self.core();
        let core = &mut *guard;
        if core.closed {
            return;
        }
        self.teardown(core);
        core.generation += 1;
        core.closed = true;
        core.episode = None;
        core.position = 0.0;
        core.duration = 0.0;
        self.emit(SessionEvent::EpisodeChanged { episode: None });
        self.set_loading(core, false);
        self.set_state(core, SessionState::Idle);
        info!("Playback session shut down");
    }

    // =====================================================================
    //  TICK & COMPLETION
    // =====================================================================

    /// Called by the ticker; returns false when the ticker must stop.
    pub(crate) fn on_tick(&self, generation: u64, token: &CancellationToken) -> bool {
        let mut guard = self.core();
        let core = &mut *guard;
        if token.is_cancelled() || core.generation != generation || !core.state.is_playing() {
            return false;
        }
        let Some(engine) = core.engine.clone() else {
            return false;
        };

        let status = engine.status();
        if let Some(reason) = status.error {
            self.fail_locked(core, PlayerError::Engine(reason));
            return false;
        }
        if let Some(duration) = status.duration.filter(|d| *d > 0.0) {
            core.duration = duration;
        }
        core.position = clamp_position(status.position, core.duration);
        self.emit_position(core);

        if status.finished || (core.duration > 0.0 && core.position >= core.duration) {
            self.complete(core);
            return false;
        }

        let due = core
            .last_persist
            .is_none_or(|at| at.elapsed() >= self.inner.config.persist_interval);
        if due {
            self.persist_progress(core);
        }
        true
    }

    fn complete(&self, core: &mut SessionCore) {
        self.stop_ticker(core);
        core.position = core.duration;
        let Some(episode) = core.episode.as_mut() else {
            return;
        };
        episode.played = true;
        episode.playback_position = 0.0;
        let id = episode.id.clone();
        info!(episode = %id, "Episode finished");

        self.save_progress(core, &id, 0.0, true);
        self.set_state(core, SessionState::Finished);
        self.emit(SessionEvent::Finished { episode_id: id });
    }

    // =====================================================================
    //  LOCKED HELPERS
    // =====================================================================

    fn set_state(&self, core: &mut SessionCore, state: SessionState) {
        if core.state == state {
            return;
        }
        debug!(from = ?core.state, to = ?state, "Session state change");
        core.state = state.clone();
        self.emit(SessionEvent::StateChanged {
            episode_id: core.episode_id(),
            state,
        });
    }

    fn set_loading(&self, core: &mut SessionCore, loading: bool) {
        if core.loading != loading {
            core.loading = loading;
            self.emit(SessionEvent::LoadingChanged { loading });
        }
    }

    fn emit_position(&self, core: &SessionCore) {
        if let Some(episode_id) = core.episode_id() {
            self.emit(SessionEvent::PositionChanged {
                episode_id,
                position: core.position,
                duration: core.duration,
            });
        }
    }

    fn start_playing(&self, core: &mut SessionCore) -> bool {
        let Some(engine) = core.engine.clone() else {
            return false;
        };
        if let Err(err) = engine.play() {
            self.fail_locked(core, err);
            return false;
        }
        self.set_state(core, SessionState::Playing);
        self.start_ticker(core);
        true
    }

    fn start_ticker(&self, core: &mut SessionCore) {
        self.stop_ticker(core);
        let token = CancellationToken::new();
        core.ticker = Some(token.clone());
        ticker::spawn_ticker(
            &self.inner.runtime,
            Arc::downgrade(&self.inner),
            core.generation,
            self.inner.config.tick_interval,
            token,
        );
    }

    fn stop_ticker(&self, core: &mut SessionCore) {
        if let Some(token) = core.ticker.take() {
            token.cancel();
        }
    }

    /// Refreshes the position from the engine while playing.
    fn capture_position(&self, core: &mut SessionCore) {
        if !core.state.is_playing() {
            return;
        }
        if let Some(engine) = &core.engine {
            core.position = clamp_position(engine.status().position, core.duration);
        }
    }

    fn persist_progress(&self, core: &mut SessionCore) {
        let position = core.position;
        let Some(episode) = core.episode.as_mut() else {
            return;
        };
        episode.playback_position = position;
        let (id, played) = (episode.id.clone(), episode.played);
        self.save_progress(core, &id, position, played);
    }

    fn save_progress(&self, core: &mut SessionCore, id: &EpisodeId, position: f64, played: bool) {
        core.last_persist = Some(Instant::now());
        if let Err(err) = self.inner.store.save_progress(id, position, played) {
            warn!(episode = %id, error = %err, "Failed to persist playback position");
            self.emit(SessionEvent::PersistFailed {
                episode_id: id.clone(),
                reason: err.to_string(),
            });
        }
    }

    /// Saves the outgoing episode's position and releases its engine.
    fn teardown(&self, core: &mut SessionCore) {
        if core.engine.is_some() {
            self.capture_position(core);
            if !matches!(
                core.state,
                SessionState::Finished | SessionState::Failed { .. }
            ) {
                self.persist_progress(core);
            }
        }
        core.cancel_pending();
        if let Some(engine) = core.engine.take() {
            debug!(episode = ?core.episode_id(), "Releasing engine");
            engine.release();
        }
    }

    fn fail_if_current(&self, generation: u64, err: PlayerError) {
        let mut guard = self.core();
        if guard.generation != generation {
            debug!(error = %err, "Ignoring failure of a superseded load");
            return;
        }
        self.fail_locked(&mut guard, err);
    }

    fn fail_locked(&self, core: &mut SessionCore, err: PlayerError) {
        let reason = err.to_string();
        let Some(episode_id) = core.episode_id() else {
            return;
        };
        error!(episode = %episode_id, error = %reason, "Playback failed");

        core.cancel_pending();
        if let Some(engine) = core.engine.take() {
            engine.release();
        }
        self.set_loading(core, false);
        self.set_state(
            core,
            SessionState::Failed {
                reason: reason.clone(),
            },
        );
        self.emit(SessionEvent::Failed { episode_id, reason });
    }
}

fn clamp_position(position: f64, duration: f64) -> f64 {
    if position.is_nan() {
        return 0.0;
    }
    let upper = if duration > 0.0 { duration } else { f64::MAX };
    position.clamp(0.0, upper)
}
