//! User-ordered play queue.
//!
//! The queue holds episode identities only, each at most once. A call that
//! changes the order persists the full new order immediately and returns
//! `true`; a failed write is reported (log + [`QueueEvent::PersistFailed`])
//! but the in-memory order stays authoritative for the running process.
//!
//! A call that would leave the order as it is returns `false` and writes
//! nothing: `add_to_top` on the current head, `move_to_end` on the last item,
//! `append` of a queued episode, `remove`/`move_to_end` of an absent one.
//! This type NEVER starts playback; chaining the queue to the session is the
//! job of [`SessionQueueBridge`](crate::SessionQueueBridge).

mod persistence;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::events::{EventBus, EventReceiver};
use crate::model::{EpisodeId, QueueEvent};

pub use persistence::{JsonQueueFile, MemoryQueuePersistence, QueuePersistence};

struct QueueInner {
    items: Mutex<Vec<EpisodeId>>,
    persistence: Arc<dyn QueuePersistence>,
    events: EventBus<QueueEvent>,
}

#[derive(Clone)]
pub struct QueueStore {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("items", &*self.lock())
            .finish()
    }
}

impl QueueStore {
    /// Restores the queue from `persistence`.
    ///
    /// Duplicated ids in the persisted data are collapsed to their first
    /// occurrence.
    pub fn load(persistence: Arc<dyn QueuePersistence>) -> Self {
        let mut seen = HashSet::new();
        let items: Vec<EpisodeId> = persistence
            .load()
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        debug!(len = items.len(), "Queue restored");

        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(items),
                persistence,
                events: EventBus::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EpisodeId>> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> EventReceiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Applies `op` and, when it reports a change, persists and broadcasts the
    /// new order while still holding the lock.
    fn mutate<F>(&self, operation: &'static str, op: F) -> bool
    where
        F: FnOnce(&mut Vec<EpisodeId>) -> bool,
    {
        let mut items = self.lock();
        if !op(&mut items) {
            debug!(operation, "Queue unchanged");
            return false;
        }

        if let Err(err) = self.inner.persistence.save(&items) {
            warn!(operation, error = %err, "Failed to persist queue; keeping in-memory order");
            self.inner.events.broadcast(QueueEvent::PersistFailed {
                reason: err.to_string(),
            });
        }
        debug!(operation, len = items.len(), "Queue updated");
        self.inner.events.broadcast(QueueEvent::Updated {
            items: items.clone(),
        });
        true
    }

    /// Adds `id` at the end unless it is already queued.
    pub fn append(&self, id: &EpisodeId) -> bool {
        self.mutate("append", |items| {
            if items.contains(id) {
                return false;
            }
            items.push(id.clone());
            true
        })
    }

    /// "Play next": moves or inserts `id` at the head of the queue.
    pub fn add_to_top(&self, id: &EpisodeId) -> bool {
        self.mutate("add_to_top", |items| {
            if items.first() == Some(id) {
                return false;
            }
            items.retain(|item| item != id);
            items.insert(0, id.clone());
            true
        })
    }

    pub fn remove(&self, id: &EpisodeId) -> bool {
        self.mutate("remove", |items| match items.iter().position(|item| item == id) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        })
    }

    /// "Keep for later": moves `id` to the end of the queue.
    pub fn move_to_end(&self, id: &EpisodeId) -> bool {
        self.mutate("move_to_end", |items| {
            match items.iter().position(|item| item == id) {
                Some(index) if index + 1 < items.len() => {
                    let item = items.remove(index);
                    items.push(item);
                    true
                }
                _ => false,
            }
        })
    }

    /// Moves the element at `from` to index `to`, keeping the relative order
    /// of the others. Out-of-range indices leave the queue untouched.
    pub fn reorder(&self, from: usize, to: usize) -> bool {
        self.mutate("reorder", |items| {
            if from >= items.len() || to >= items.len() || from == to {
                return false;
            }
            let item = items.remove(from);
            items.insert(to, item);
            true
        })
    }

    pub fn clear(&self) -> bool {
        self.mutate("clear", |items| {
            if items.is_empty() {
                return false;
            }
            items.clear();
            true
        })
    }

    /// Peeks at the head of the queue without consuming it.
    pub fn next(&self) -> Option<EpisodeId> {
        self.lock().first().cloned()
    }

    pub fn items(&self) -> Vec<EpisodeId> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: &EpisodeId) -> bool {
        self.lock().contains(id)
    }

    pub fn position(&self, id: &EpisodeId) -> Option<usize> {
        self.lock().iter().position(|item| item == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain;

    fn ids(names: &[&str]) -> Vec<EpisodeId> {
        names.iter().map(|name| EpisodeId::from(*name)).collect()
    }

    fn queue_with(names: &[&str]) -> (Arc<MemoryQueuePersistence>, QueueStore) {
        let persistence = Arc::new(MemoryQueuePersistence::new(ids(names)));
        let queue = QueueStore::load(persistence.clone());
        (persistence, queue)
    }

    #[test]
    fn append_is_idempotent() {
        let (_, queue) = queue_with(&["e1"]);
        assert!(queue.append(&EpisodeId::from("e2")));
        assert!(!queue.append(&EpisodeId::from("e2")));
        assert_eq!(queue.items(), ids(&["e1", "e2"]));
    }

    #[test]
    fn add_to_top_moves_existing_item_and_keeps_relative_order() {
        let (_, queue) = queue_with(&["e1", "e2", "e3", "e4", "e5"]);
        assert!(queue.add_to_top(&EpisodeId::from("e4")));
        assert_eq!(queue.items(), ids(&["e4", "e1", "e2", "e3", "e5"]));
    }

    #[test]
    fn add_to_top_inserts_new_item() {
        let (_, queue) = queue_with(&["e1"]);
        assert!(queue.add_to_top(&EpisodeId::from("e9")));
        assert_eq!(queue.items(), ids(&["e9", "e1"]));
        assert!(!queue.add_to_top(&EpisodeId::from("e9")));
    }

    #[test]
    fn move_to_end_sends_item_last() {
        let (_, queue) = queue_with(&["e1", "e2", "e3"]);
        assert!(queue.move_to_end(&EpisodeId::from("e1")));
        assert_eq!(queue.items(), ids(&["e2", "e3", "e1"]));
        assert!(!queue.move_to_end(&EpisodeId::from("e1")));
        assert!(!queue.move_to_end(&EpisodeId::from("ghost")));
    }

    #[test]
    fn reorder_is_a_move_not_a_swap() {
        let (_, queue) = queue_with(&["a", "b", "c", "d"]);
        assert!(queue.reorder(0, 2));
        assert_eq!(queue.items(), ids(&["b", "c", "a", "d"]));
        assert!(queue.reorder(3, 0));
        assert_eq!(queue.items(), ids(&["d", "b", "c", "a"]));
        assert!(!queue.reorder(1, 9));
    }

    #[test]
    fn unchanged_order_is_not_persisted() {
        let (persistence, queue) = queue_with(&["e1", "e2", "e3"]);
        let mut rx = queue.subscribe();

        assert!(!queue.add_to_top(&EpisodeId::from("e1")));
        assert!(!queue.move_to_end(&EpisodeId::from("e3")));
        assert!(!queue.append(&EpisodeId::from("e2")));
        assert_eq!(persistence.save_count(), 0);
        assert!(drain(&mut rx).is_empty());

        assert!(queue.move_to_end(&EpisodeId::from("e1")));
        assert_eq!(persistence.save_count(), 1);
    }

    #[test]
    fn remove_absent_episode_is_a_noop() {
        let (persistence, queue) = queue_with(&["e1"]);
        assert!(!queue.remove(&EpisodeId::from("ghost")));
        assert_eq!(persistence.save_count(), 0);
        assert!(queue.remove(&EpisodeId::from("e1")));
        assert!(queue.is_empty());
        assert!(persistence.saved().is_empty());
    }

    #[test]
    fn every_mutation_is_persisted() {
        let (persistence, queue) = queue_with(&[]);
        queue.append(&EpisodeId::from("a"));
        queue.append(&EpisodeId::from("b"));
        queue.add_to_top(&EpisodeId::from("b"));
        assert_eq!(persistence.save_count(), 3);
        assert_eq!(persistence.saved(), ids(&["b", "a"]));
    }

    #[test]
    fn next_does_not_consume() {
        let (_, queue) = queue_with(&["e1", "e2"]);
        assert_eq!(queue.next(), Some(EpisodeId::from("e1")));
        assert_eq!(queue.next(), Some(EpisodeId::from("e1")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn duplicated_persisted_ids_are_collapsed() {
        let (_, queue) = queue_with(&["a", "b", "a"]);
        assert_eq!(queue.items(), ids(&["a", "b"]));
    }

    #[test]
    fn persistence_failure_keeps_memory_order_and_is_reported() {
        let queue = QueueStore::load(Arc::new(MemoryQueuePersistence::failing()));
        let mut rx = queue.subscribe();

        assert!(queue.append(&EpisodeId::from("a")));
        assert_eq!(queue.items(), ids(&["a"]));

        let events = drain(&mut rx);
        assert!(matches!(events[0], QueueEvent::PersistFailed { .. }));
        assert_eq!(events[1], QueueEvent::Updated { items: ids(&["a"]) });
    }

    #[test]
    fn never_holds_duplicates_after_mixed_operations() {
        let (_, queue) = queue_with(&["a", "b", "c"]);
        let script: &[(&str, &str)] = &[
            ("append", "a"),
            ("top", "c"),
            ("append", "d"),
            ("top", "d"),
            ("top", "a"),
            ("append", "b"),
        ];
        for (op, id) in script {
            let id = EpisodeId::from(*id);
            match *op {
                "append" => queue.append(&id),
                _ => queue.add_to_top(&id),
            };
            queue.reorder(0, queue.len() - 1);
        }

        let items = queue.items();
        let unique: HashSet<_> = items.iter().collect();
        assert_eq!(unique.len(), items.len());
        assert_eq!(items.len(), 4);
    }
}
