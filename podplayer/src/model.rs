use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodcastId(pub String);

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PodcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EpisodeId {
    fn from(value: &str) -> Self {
        EpisodeId(value.to_string())
    }
}

impl From<&str> for PodcastId {
    fn from(value: &str) -> Self {
        PodcastId(value.to_string())
    }
}

/// A single playable audio item belonging to a podcast.
///
/// `playback_position` is the resume point in seconds. The session and the
/// download collaborator are the only writers of the mutable fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub played: bool,
    pub podcast_id: PodcastId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_file: Option<PathBuf>,
    #[serde(default)]
    pub playback_position: f64,
}

impl Episode {
    pub fn new(id: impl Into<String>, title: impl Into<String>, podcast_id: PodcastId) -> Self {
        Self {
            id: EpisodeId(id.into()),
            title: title.into(),
            artwork_url: None,
            audio_url: None,
            description: None,
            played: false,
            podcast_id,
            published_at: None,
            local_file: None,
            playback_position: 0.0,
        }
    }

    pub fn with_audio_url(mut self, url: impl Into<String>) -> Self {
        self.audio_url = Some(url.into());
        self
    }

    /// Position the session should seek to when this episode is loaded.
    ///
    /// A played episode is never resumed.
    pub fn resume_position(&self) -> f64 {
        if self.played {
            0.0
        } else {
            self.playback_position.max(0.0)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Podcast {
    pub id: PodcastId,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    pub feed_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
}

/// Where the audio of an episode comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaSource {
    LocalFile(PathBuf),
    Remote(String),
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::LocalFile(path) => write!(f, "{}", path.display()),
            MediaSource::Remote(url) => f.write_str(url),
        }
    }
}

/// Lifecycle of the playback session.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Seeking,
    Finished,
    Failed { reason: String },
}

impl SessionState {
    /// States from which play/pause/seek are accepted.
    pub fn is_controllable(&self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Playing | SessionState::Paused
        )
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, SessionState::Playing)
    }
}

/// Atomic view of the session, safe to read from any context.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub episode: Option<Episode>,
    pub state: SessionState,
    pub position: f64,
    pub duration: f64,
    pub loading: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    EpisodeChanged {
        episode: Option<Episode>,
    },
    StateChanged {
        episode_id: Option<EpisodeId>,
        state: SessionState,
    },
    PositionChanged {
        episode_id: EpisodeId,
        position: f64,
        duration: f64,
    },
    LoadingChanged {
        loading: bool,
    },
    Failed {
        episode_id: EpisodeId,
        reason: String,
    },
    Finished {
        episode_id: EpisodeId,
    },
    PersistFailed {
        episode_id: EpisodeId,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueueEvent {
    Updated { items: Vec<EpisodeId> },
    PersistFailed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwipeEvent {
    Opened { row: EpisodeId },
    /// Sent to a row that must close because another row opened.
    CloseRequested { row: EpisodeId },
    Closed { row: EpisodeId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn played_episode_is_not_resumed() {
        let mut episode = Episode::new("e1", "Pilot", PodcastId::from("p1"));
        episode.playback_position = 120.0;
        assert_eq!(episode.resume_position(), 120.0);

        episode.played = true;
        assert_eq!(episode.resume_position(), 0.0);
    }

    #[test]
    fn episode_defaults_when_fields_missing_from_json() {
        let json = r#"{"id":"e1","title":"Pilot","podcast_id":"p1"}"#;
        let episode: Episode = serde_json::from_str(json).unwrap();
        assert_eq!(episode.id, EpisodeId::from("e1"));
        assert!(!episode.played);
        assert_eq!(episode.playback_position, 0.0);
        assert!(episode.local_file.is_none());
    }

    #[test]
    fn controllable_states() {
        assert!(SessionState::Paused.is_controllable());
        assert!(!SessionState::Finished.is_controllable());
        assert!(
            !SessionState::Failed {
                reason: "x".into()
            }
            .is_controllable()
        );
    }
}
