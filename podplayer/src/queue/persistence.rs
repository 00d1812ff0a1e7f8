//! Persistence backends for the play queue.
//!
//! The persisted layout is a JSON array of episode ids, in play order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::errors::PlayerError;
use crate::model::EpisodeId;
use crate::store::write_json_atomically;
use crate::Result;

pub trait QueuePersistence: Send + Sync {
    /// Reads the persisted order. Missing or corrupt data yields an empty
    /// queue rather than an error.
    fn load(&self) -> Vec<EpisodeId>;

    fn save(&self, items: &[EpisodeId]) -> Result<()>;
}

/// Queue stored as a JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonQueueFile {
    path: PathBuf,
}

impl JsonQueueFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueuePersistence for JsonQueueFile {
    fn load(&self) -> Vec<EpisodeId> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "No persisted queue");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<EpisodeId>>(&raw) {
            Ok(items) => items,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Corrupt queue file, starting empty");
                Vec::new()
            }
        }
    }

    fn save(&self, items: &[EpisodeId]) -> Result<()> {
        write_json_atomically(&self.path, &items)
    }
}

/// In-memory persistence, optionally failing every save.
#[derive(Debug, Default)]
pub struct MemoryQueuePersistence {
    saved: Mutex<Vec<EpisodeId>>,
    saves: Mutex<usize>,
    fail_saves: bool,
}

impl MemoryQueuePersistence {
    pub fn new(initial: Vec<EpisodeId>) -> Self {
        Self {
            saved: Mutex::new(initial),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<EpisodeId> {
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl QueuePersistence for MemoryQueuePersistence {
    fn load(&self) -> Vec<EpisodeId> {
        self.saved()
    }

    fn save(&self, items: &[EpisodeId]) -> Result<()> {
        *self.saves.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
        if self.fail_saves {
            return Err(PlayerError::persistence("queue storage is read-only"));
        }
        *self.saved.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = items.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_file_round_trip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonQueueFile::new(dir.path().join("queue.json"));
        let items: Vec<EpisodeId> = ["b", "a", "c"].into_iter().map(EpisodeId::from).collect();

        file.save(&items).unwrap();
        assert_eq!(file.load(), items);
        assert!(!dir.path().join("queue.json.tmp").exists());
    }

    #[test]
    fn missing_or_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonQueueFile::new(dir.path().join("queue.json"));
        assert!(file.load().is_empty());

        fs::write(file.path(), "[\"a\", 12").unwrap();
        assert!(file.load().is_empty());
    }
}
