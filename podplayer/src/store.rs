//! Collaborators of the playback core: the episode library and the download
//! manager.
//!
//! The library is the authority for resume positions and the `played` flag.
//! The session writes through [`EpisodeStore::save_progress`]; the download
//! manager reports finished downloads through
//! [`EpisodeStore::set_local_file`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::PlayerError;
use crate::model::{Episode, EpisodeId, Podcast, PodcastId};
use crate::Result;

pub trait EpisodeStore: Send + Sync {
    fn episode(&self, id: &EpisodeId) -> Option<Episode>;

    fn episodes(&self) -> Vec<Episode>;

    fn podcast(&self, id: &PodcastId) -> Option<Podcast>;

    /// Persists the resume position and played flag of an episode.
    fn save_progress(&self, id: &EpisodeId, position: f64, played: bool) -> Result<()>;

    /// Records where a downloaded episode lives on disk.
    fn set_local_file(&self, id: &EpisodeId, path: PathBuf) -> Result<()>;
}

/// Callback invoked with the local path once a download completes.
pub type DownloadCallback = Box<dyn FnOnce(PathBuf) + Send + 'static>;

pub trait DownloadManager: Send + Sync {
    fn is_downloaded(&self, id: &EpisodeId) -> bool;

    /// Starts downloading `episode`. Never blocks on the transfer.
    fn download(&self, episode: &Episode, on_complete: DownloadCallback);
}

/// Starts a download whose completion updates the episode's local file in
/// `store`.
pub fn download_episode(
    manager: &dyn DownloadManager,
    store: Arc<dyn EpisodeStore>,
    episode: &Episode,
) {
    let id = episode.id.clone();
    manager.download(
        episode,
        Box::new(move |path| {
            info!(episode = %id, path = %path.display(), "Download completed");
            if let Err(err) = store.set_local_file(&id, path) {
                warn!(episode = %id, error = %err, "Failed to record downloaded file");
            }
        }),
    );
}

/// On-disk layout of the episode library.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Library {
    #[serde(default)]
    pub podcasts: Vec<Podcast>,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

#[derive(Default)]
struct LibraryIndex {
    podcasts: HashMap<PodcastId, Podcast>,
    episodes: Vec<Episode>,
}

impl LibraryIndex {
    fn from_library(library: Library) -> Self {
        Self {
            podcasts: library
                .podcasts
                .into_iter()
                .map(|podcast| (podcast.id.clone(), podcast))
                .collect(),
            episodes: library.episodes,
        }
    }

    fn to_library(&self) -> Library {
        let mut podcasts: Vec<Podcast> = self.podcasts.values().cloned().collect();
        podcasts.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Library {
            podcasts,
            episodes: self.episodes.clone(),
        }
    }

    fn episode_mut(&mut self, id: &EpisodeId) -> Result<&mut Episode> {
        self.episodes
            .iter_mut()
            .find(|episode| &episode.id == id)
            .ok_or_else(|| PlayerError::NotFound(format!("episode {id}")))
    }
}

/// In-memory library.
#[derive(Default)]
pub struct MemoryEpisodeStore {
    index: RwLock<LibraryIndex>,
}

impl MemoryEpisodeStore {
    pub fn new(podcasts: Vec<Podcast>, episodes: Vec<Episode>) -> Self {
        Self {
            index: RwLock::new(LibraryIndex::from_library(Library { podcasts, episodes })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LibraryIndex> {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LibraryIndex> {
        self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EpisodeStore for MemoryEpisodeStore {
    fn episode(&self, id: &EpisodeId) -> Option<Episode> {
        self.read().episodes.iter().find(|e| &e.id == id).cloned()
    }

    fn episodes(&self) -> Vec<Episode> {
        self.read().episodes.clone()
    }

    fn podcast(&self, id: &PodcastId) -> Option<Podcast> {
        self.read().podcasts.get(id).cloned()
    }

    fn save_progress(&self, id: &EpisodeId, position: f64, played: bool) -> Result<()> {
        let mut index = self.write();
        let episode = index.episode_mut(id)?;
        episode.playback_position = position.max(0.0);
        episode.played = played;
        Ok(())
    }

    fn set_local_file(&self, id: &EpisodeId, path: PathBuf) -> Result<()> {
        let mut index = self.write();
        index.episode_mut(id)?.local_file = Some(path);
        Ok(())
    }
}

/// Library backed by a JSON file, rewritten after every change.
///
/// A missing or corrupt file yields an empty library.
pub struct JsonEpisodeStore {
    path: PathBuf,
    index: RwLock<LibraryIndex>,
}

impl JsonEpisodeStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let library = load_library(&path);
        info!(
            path = %path.display(),
            podcasts = library.podcasts.len(),
            episodes = library.episodes.len(),
            "Episode library loaded"
        );
        Self {
            path,
            index: RwLock::new(LibraryIndex::from_library(library)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, LibraryIndex> {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut LibraryIndex) -> Result<()>,
    {
        let mut index = self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        mutate(&mut index)?;
        write_json_atomically(&self.path, &index.to_library())
    }
}

impl EpisodeStore for JsonEpisodeStore {
    fn episode(&self, id: &EpisodeId) -> Option<Episode> {
        self.read().episodes.iter().find(|e| &e.id == id).cloned()
    }

    fn episodes(&self) -> Vec<Episode> {
        self.read().episodes.clone()
    }

    fn podcast(&self, id: &PodcastId) -> Option<Podcast> {
        self.read().podcasts.get(id).cloned()
    }

    fn save_progress(&self, id: &EpisodeId, position: f64, played: bool) -> Result<()> {
        self.update(|index| {
            let episode = index.episode_mut(id)?;
            episode.playback_position = position.max(0.0);
            episode.played = played;
            Ok(())
        })
    }

    fn set_local_file(&self, id: &EpisodeId, path: PathBuf) -> Result<()> {
        self.update(|index| {
            index.episode_mut(id)?.local_file = Some(path);
            Ok(())
        })
    }
}

fn load_library(path: &Path) -> Library {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "No episode library, starting empty");
            return Library::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(library) => library,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Corrupt episode library, starting empty");
            Library::default()
        }
    }
}

/// Serialises `value` next to `path` then renames it over `path`, so a crash
/// never leaves a truncated file behind.
pub(crate) fn write_json_atomically<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                PlayerError::persistence(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PlayerError::persistence(format!("serialize error: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .map_err(|e| PlayerError::persistence(format!("failed to write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path).map_err(|e| {
        PlayerError::persistence(format!("failed to replace {}: {}", path.display(), e))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sample_library() -> Library {
        Library {
            podcasts: vec![Podcast {
                id: PodcastId::from("p1"),
                title: "Show".into(),
                author: "Host".into(),
                description: String::new(),
                feed_url: "http://example.com/feed.xml".into(),
                artwork_url: Some("http://example.com/show.jpg".into()),
            }],
            episodes: vec![
                Episode::new("e1", "One", PodcastId::from("p1"))
                    .with_audio_url("http://example.com/1.mp3"),
                Episode::new("e2", "Two", PodcastId::from("p1")),
            ],
        }
    }

    #[test]
    fn json_store_persists_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        write_json_atomically(&path, &sample_library()).unwrap();

        let store = JsonEpisodeStore::open(&path);
        store
            .save_progress(&EpisodeId::from("e1"), 42.5, false)
            .unwrap();

        let reopened = JsonEpisodeStore::open(&path);
        let episode = reopened.episode(&EpisodeId::from("e1")).unwrap();
        assert_eq!(episode.playback_position, 42.5);
        assert!(!episode.played);
        assert_eq!(reopened.podcast(&PodcastId::from("p1")).unwrap().title, "Show");
    }

    #[test]
    fn corrupt_library_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonEpisodeStore::open(&path);
        assert!(store.episodes().is_empty());
    }

    #[test]
    fn unknown_episode_is_not_found() {
        let store = MemoryEpisodeStore::new(vec![], vec![]);
        let err = store
            .save_progress(&EpisodeId::from("ghost"), 1.0, false)
            .unwrap_err();
        assert!(matches!(err, PlayerError::NotFound(_)));
    }

    struct InstantDownloads {
        done: Mutex<Vec<EpisodeId>>,
    }

    impl DownloadManager for InstantDownloads {
        fn is_downloaded(&self, id: &EpisodeId) -> bool {
            self.done.lock().unwrap().contains(id)
        }

        fn download(&self, episode: &Episode, on_complete: DownloadCallback) {
            self.done.lock().unwrap().push(episode.id.clone());
            on_complete(PathBuf::from(format!("/downloads/{}.mp3", episode.id)));
        }
    }

    #[test]
    fn download_completion_updates_local_file() {
        let library = sample_library();
        let store: Arc<dyn EpisodeStore> =
            Arc::new(MemoryEpisodeStore::new(library.podcasts, library.episodes));
        let manager = InstantDownloads {
            done: Mutex::new(Vec::new()),
        };
        let episode = store.episode(&EpisodeId::from("e1")).unwrap();

        download_episode(&manager, store.clone(), &episode);

        assert!(manager.is_downloaded(&episode.id));
        assert_eq!(
            store.episode(&episode.id).unwrap().local_file,
            Some(PathBuf::from("/downloads/e1.mp3"))
        );
    }
}
