//! Clock-driven engine used by the console application and the tests.
//!
//! Position advances with `tokio::time`, so tests running on a paused clock
//! get fully deterministic playback.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::{EngineFactory, EngineStatus, MediaEngine};
use crate::errors::PlayerError;
use crate::model::MediaSource;
use crate::Result;

const DEFAULT_DURATION: f64 = 1800.0;

#[derive(Debug)]
struct SimulatedState {
    base_position: f64,
    playing_since: Option<Instant>,
    released: bool,
    error: Option<String>,
}

#[derive(Debug)]
pub struct SimulatedEngine {
    source: MediaSource,
    duration: f64,
    seek_delay: Duration,
    state: Mutex<SimulatedState>,
    live: Arc<AtomicUsize>,
}

impl SimulatedEngine {
    fn new(source: MediaSource, duration: f64, seek_delay: Duration, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            source,
            duration,
            seek_delay,
            state: Mutex::new(SimulatedState {
                base_position: 0.0,
                playing_since: None,
                released: false,
                error: None,
            }),
            live,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn position_of(&self, state: &SimulatedState) -> f64 {
        let elapsed = state
            .playing_since
            .map(|since| since.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        (state.base_position + elapsed).min(self.duration)
    }

    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing_since.is_some()
    }

    /// Makes the next status report carry a mid-stream error.
    pub fn inject_error(&self, message: impl Into<String>) {
        let mut state = self.lock();
        state.error = Some(message.into());
    }
}

#[async_trait]
impl MediaEngine for SimulatedEngine {
    fn play(&self) -> Result<()> {
        let mut state = self.lock();
        if state.released {
            return Err(PlayerError::engine("engine already released"));
        }
        if state.playing_since.is_none() {
            state.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        let mut state = self.lock();
        if state.released {
            return Err(PlayerError::engine("engine already released"));
        }
        state.base_position = self.position_of(&state);
        state.playing_since = None;
        Ok(())
    }

    async fn seek(&self, position: f64) -> Result<()> {
        if !self.seek_delay.is_zero() {
            tokio::time::sleep(self.seek_delay).await;
        }
        let mut state = self.lock();
        if state.released {
            return Err(PlayerError::engine("engine already released"));
        }
        state.base_position = position.clamp(0.0, self.duration);
        if state.playing_since.is_some() {
            state.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn status(&self) -> EngineStatus {
        let state = self.lock();
        let position = self.position_of(&state);
        EngineStatus {
            position,
            duration: Some(self.duration),
            finished: position >= self.duration,
            error: state.error.clone(),
        }
    }

    fn release(&self) {
        let mut state = self.lock();
        if !state.released {
            state.released = true;
            state.playing_since = None;
            self.live.fetch_sub(1, Ordering::SeqCst);
            debug!(source = %self.source, "Simulated engine released");
        }
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        self.release();
    }
}

/// Factory for [`SimulatedEngine`]s.
///
/// Durations and failures are configured per source (the `Display` form of a
/// [`MediaSource`]). Local files must exist on disk to be opened.
#[derive(Debug, Default)]
pub struct SimulatedEngineFactory {
    durations: Mutex<HashMap<String, f64>>,
    failing: Mutex<HashSet<String>>,
    default_duration: Option<f64>,
    open_delay: Duration,
    seek_delay: Duration,
    live: Arc<AtomicUsize>,
    opened: AtomicUsize,
    engines: Mutex<Vec<Arc<SimulatedEngine>>>,
}

impl SimulatedEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_duration(mut self, seconds: f64) -> Self {
        self.default_duration = Some(seconds);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_seek_delay(mut self, delay: Duration) -> Self {
        self.seek_delay = delay;
        self
    }

    pub fn set_duration(&self, source: impl Into<String>, seconds: f64) {
        self.durations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(source.into(), seconds);
    }

    pub fn fail_source(&self, source: impl Into<String>) {
        self.failing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(source.into());
    }

    /// Number of engines opened and not yet released.
    pub fn live_engines(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Number of engines ever opened.
    pub fn opened_engines(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Most recently opened engine.
    pub fn last_engine(&self) -> Option<Arc<SimulatedEngine>> {
        self.engines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }
}

#[async_trait]
impl EngineFactory for SimulatedEngineFactory {
    async fn open(&self, source: &MediaSource) -> Result<Arc<dyn MediaEngine>> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        let key = source.to_string();
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&key);
        if failing {
            return Err(PlayerError::source_resolution(format!("{key} is unreachable")));
        }
        if let MediaSource::LocalFile(path) = source {
            if !path.exists() {
                return Err(PlayerError::source_resolution(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
        }

        let duration = self
            .durations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .copied()
            .or(self.default_duration)
            .unwrap_or(DEFAULT_DURATION);

        let engine = Arc::new(SimulatedEngine::new(
            source.clone(),
            duration,
            self.seek_delay,
            self.live.clone(),
        ));
        self.opened.fetch_add(1, Ordering::SeqCst);
        {
            let mut engines = self
                .engines
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            engines.retain(|engine| !engine.is_released());
            engines.push(engine.clone());
        }
        debug!(source = %key, duration, "Simulated engine opened");
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(url: &str) -> MediaSource {
        MediaSource::Remote(url.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn position_advances_only_while_playing() {
        let factory = SimulatedEngineFactory::new().with_default_duration(60.0);
        let engine = factory.open(&remote("http://a")).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(engine.status().position, 0.0);

        engine.play().unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        engine.pause().unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(engine.status().position, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_finished_at_duration() {
        let factory = SimulatedEngineFactory::new().with_default_duration(10.0);
        let engine = factory.open(&remote("http://a")).await.unwrap();
        engine.seek(9.0).await.unwrap();
        engine.play().unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        let status = engine.status();
        assert_eq!(status.position, 10.0);
        assert!(status.finished);
    }

    #[tokio::test]
    async fn release_decrements_live_count_once() {
        let factory = SimulatedEngineFactory::new();
        let engine = factory.open(&remote("http://a")).await.unwrap();
        assert_eq!(factory.live_engines(), 1);

        engine.release();
        engine.release();
        assert_eq!(factory.live_engines(), 0);
        assert!(engine.play().is_err());
    }

    #[tokio::test]
    async fn failing_and_missing_sources_are_rejected() {
        let factory = SimulatedEngineFactory::new();
        factory.fail_source("http://down");

        assert!(matches!(
            factory.open(&remote("http://down")).await,
            Err(PlayerError::SourceResolution(_))
        ));
        assert!(matches!(
            factory
                .open(&MediaSource::LocalFile("/nonexistent/episode.mp3".into()))
                .await,
            Err(PlayerError::SourceResolution(_))
        ));
        assert_eq!(factory.live_engines(), 0);
    }
}
