//! Media engine abstraction for the playback session.
//!
//! The session never talks to an audio backend directly. It asks an
//! [`EngineFactory`] to resolve a [`MediaSource`] into a live
//! [`MediaEngine`], drives that engine with play/pause/seek, and polls its
//! [`EngineStatus`] on every position tick.
//!
//! An engine is owned by exactly one session generation. Once
//! [`MediaEngine::release`] has been called the instance must not produce
//! audio again; the session relies on this to keep at most one live engine.

mod simulated;

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::model::MediaSource;

pub use simulated::{SimulatedEngine, SimulatedEngineFactory};

/// Snapshot of what the engine reports about the current stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineStatus {
    /// Current position in seconds.
    pub position: f64,
    /// Total duration in seconds, once the engine knows it.
    pub duration: Option<f64>,
    /// True once the stream reached its natural end.
    pub finished: bool,
    /// Decode or playback error raised mid-stream.
    pub error: Option<String>,
}

/// Transport primitives of a single loaded stream.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Starts or resumes playback.
    fn play(&self) -> Result<()>;

    /// Pauses playback, keeping the position.
    fn pause(&self) -> Result<()>;

    /// Moves the read head to `position` seconds.
    ///
    /// Completion is asynchronous: some backends need to refill buffers
    /// before the new position is effective.
    async fn seek(&self, position: f64) -> Result<()>;

    fn status(&self) -> EngineStatus;

    /// Frees the underlying resources. Idempotent.
    fn release(&self);
}

/// Resolves audio sources into live engines.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn open(&self, source: &MediaSource) -> Result<Arc<dyn MediaEngine>>;
}
