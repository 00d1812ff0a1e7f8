//! Swipe gestures on queue rows.
//!
//! [`SwipeCoordinator`] is shared by every row of a queue list and records
//! which row, if any, shows its revealed actions. Each row drives its own
//! [`SwipeRow`] from gesture callbacks; a delete gesture only reaches the
//! [`QueueStore`] once the commit animation window has elapsed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::events::{EventBus, EventReceiver};
use crate::model::{EpisodeId, SwipeEvent};
use crate::queue::QueueStore;

/// Gesture thresholds, in points and points per second.
#[derive(Clone, Debug, PartialEq)]
pub struct SwipeThresholds {
    pub reveal: f64,
    pub delete: f64,
    pub velocity: f64,
    pub commit_animation: Duration,
}

impl Default for SwipeThresholds {
    fn default() -> Self {
        Self {
            reveal: 60.0,
            delete: 220.0,
            velocity: 900.0,
            commit_animation: Duration::from_millis(250),
        }
    }
}

struct CoordinatorInner {
    open_row: Mutex<Option<EpisodeId>>,
    events: EventBus<SwipeEvent>,
}

/// Keeps at most one row open at a time.
#[derive(Clone)]
pub struct SwipeCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl Default for SwipeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SwipeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwipeCoordinator")
            .field("open_row", &*self.lock())
            .finish()
    }
}

impl SwipeCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                open_row: Mutex::new(None),
                events: EventBus::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<EpisodeId>> {
        self.inner
            .open_row
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> EventReceiver<SwipeEvent> {
        self.inner.events.subscribe()
    }

    /// Records `row` as the open row, asking the previous one to close first.
    pub fn open(&self, row: &EpisodeId) {
        let mut open_row = self.lock();
        if open_row.as_ref() == Some(row) {
            return;
        }
        if let Some(previous) = open_row.replace(row.clone()) {
            debug!(row = %previous, "Closing previously open row");
            self.inner
                .events
                .broadcast(SwipeEvent::CloseRequested { row: previous });
        }
        self.inner
            .events
            .broadcast(SwipeEvent::Opened { row: row.clone() });
    }

    /// Clears the record if `row` is the open one. Returns whether it was.
    pub fn close(&self, row: &EpisodeId) -> bool {
        let mut open_row = self.lock();
        if open_row.as_ref() != Some(row) {
            return false;
        }
        *open_row = None;
        self.inner
            .events
            .broadcast(SwipeEvent::Closed { row: row.clone() });
        true
    }

    pub fn open_row(&self) -> Option<EpisodeId> {
        self.lock().clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RowState {
    Closed,
    Dragging { offset: f64 },
    Open,
    CommittingDelete,
}

/// Result of releasing a drag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwipeOutcome {
    Closed,
    Opened,
    /// The row must play its removal animation, then call
    /// [`SwipeRow::commit_delete`].
    Delete,
    Ignored,
}

/// Buttons revealed by an open row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwipeAction {
    Remove,
    MoveToEnd,
    PlayNext,
}

/// Gesture state of one queue row.
#[derive(Debug)]
pub struct SwipeRow {
    id: EpisodeId,
    state: RowState,
    coordinator: SwipeCoordinator,
    thresholds: SwipeThresholds,
}

impl SwipeRow {
    pub fn new(id: EpisodeId, coordinator: SwipeCoordinator, thresholds: SwipeThresholds) -> Self {
        Self {
            id,
            state: RowState::Closed,
            coordinator,
            thresholds,
        }
    }

    pub fn id(&self) -> &EpisodeId {
        &self.id
    }

    pub fn state(&self) -> RowState {
        self.state
    }

    pub fn begin_drag(&mut self) {
        let offset = match self.state {
            RowState::Closed => 0.0,
            RowState::Open => self.thresholds.reveal,
            RowState::Dragging { offset } => offset,
            RowState::CommittingDelete => return,
        };
        self.state = RowState::Dragging { offset };
    }

    /// Updates the drag distance. Negative distances count as zero.
    pub fn drag_to(&mut self, offset: f64) {
        if let RowState::Dragging { .. } = self.state {
            self.state = RowState::Dragging {
                offset: offset.max(0.0),
            };
        }
    }

    pub fn release(&mut self, velocity: f64) -> SwipeOutcome {
        let RowState::Dragging { offset } = self.state else {
            return SwipeOutcome::Ignored;
        };

        if offset >= self.thresholds.delete || velocity >= self.thresholds.velocity {
            debug!(row = %self.id, offset, velocity, "Swipe past delete threshold");
            self.state = RowState::CommittingDelete;
            self.coordinator.close(&self.id);
            SwipeOutcome::Delete
        } else if offset >= self.thresholds.reveal {
            self.state = RowState::Open;
            self.coordinator.open(&self.id);
            SwipeOutcome::Opened
        } else {
            self.state = RowState::Closed;
            self.coordinator.close(&self.id);
            SwipeOutcome::Closed
        }
    }

    pub fn close(&mut self) {
        if matches!(self.state, RowState::Open | RowState::Dragging { .. }) {
            self.state = RowState::Closed;
            self.coordinator.close(&self.id);
        }
    }

    /// Reacts to a coordinator event; notifications for other rows are
    /// ignored.
    pub fn handle_event(&mut self, event: &SwipeEvent) {
        if let SwipeEvent::CloseRequested { row } = event {
            if row == &self.id && self.state == RowState::Open {
                self.state = RowState::Closed;
            }
        }
    }

    /// Waits for the removal animation, then removes the episode from
    /// `queue`. Does nothing unless a delete was triggered by
    /// [`release`](Self::release).
    pub async fn commit_delete(&mut self, queue: &QueueStore) -> bool {
        if self.state != RowState::CommittingDelete {
            return false;
        }
        tokio::time::sleep(self.thresholds.commit_animation).await;
        let removed = queue.remove(&self.id);
        self.state = RowState::Closed;
        removed
    }

    /// Runs one of the revealed actions and closes the row.
    pub fn perform(&mut self, action: SwipeAction, queue: &QueueStore) -> bool {
        self.close();
        match action {
            SwipeAction::Remove => queue.remove(&self.id),
            SwipeAction::MoveToEnd => queue.move_to_end(&self.id),
            SwipeAction::PlayNext => queue.add_to_top(&self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain;
    use crate::queue::MemoryQueuePersistence;

    fn row(id: &str, coordinator: &SwipeCoordinator) -> SwipeRow {
        SwipeRow::new(EpisodeId::from(id), coordinator.clone(), SwipeThresholds::default())
    }

    fn swipe(row: &mut SwipeRow, offset: f64, velocity: f64) -> SwipeOutcome {
        row.begin_drag();
        row.drag_to(offset);
        row.release(velocity)
    }

    #[test]
    fn opening_a_row_closes_the_previous_one() {
        let coordinator = SwipeCoordinator::new();
        let mut rx = coordinator.subscribe();

        coordinator.open(&EpisodeId::from("e1"));
        coordinator.open(&EpisodeId::from("e2"));

        assert_eq!(coordinator.open_row(), Some(EpisodeId::from("e2")));
        assert_eq!(
            drain(&mut rx),
            vec![
                SwipeEvent::Opened { row: EpisodeId::from("e1") },
                SwipeEvent::CloseRequested { row: EpisodeId::from("e1") },
                SwipeEvent::Opened { row: EpisodeId::from("e2") },
            ]
        );
    }

    #[test]
    fn closing_another_row_keeps_the_open_one() {
        let coordinator = SwipeCoordinator::new();
        coordinator.open(&EpisodeId::from("e1"));
        assert!(!coordinator.close(&EpisodeId::from("e2")));
        assert_eq!(coordinator.open_row(), Some(EpisodeId::from("e1")));
        assert!(coordinator.close(&EpisodeId::from("e1")));
        assert_eq!(coordinator.open_row(), None);
    }

    #[test]
    fn short_drag_snaps_back() {
        let coordinator = SwipeCoordinator::new();
        let mut r = row("e1", &coordinator);
        assert_eq!(swipe(&mut r, 30.0, 0.0), SwipeOutcome::Closed);
        assert_eq!(r.state(), RowState::Closed);
        assert_eq!(coordinator.open_row(), None);
    }

    #[test]
    fn row_ignores_close_request_for_other_rows() {
        let coordinator = SwipeCoordinator::new();
        let mut first = row("e1", &coordinator);
        let mut second = row("e2", &coordinator);
        let mut rx = coordinator.subscribe();

        assert_eq!(swipe(&mut first, 100.0, 0.0), SwipeOutcome::Opened);
        assert_eq!(swipe(&mut second, 100.0, 0.0), SwipeOutcome::Opened);
        for event in drain(&mut rx) {
            first.handle_event(&event);
            second.handle_event(&event);
        }

        assert_eq!(first.state(), RowState::Closed);
        assert_eq!(second.state(), RowState::Open);
        assert_eq!(coordinator.open_row(), Some(EpisodeId::from("e2")));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_waits_for_the_animation() {
        let queue = QueueStore::load(Arc::new(MemoryQueuePersistence::new(vec![
            EpisodeId::from("e1"),
            EpisodeId::from("e2"),
        ])));
        let coordinator = SwipeCoordinator::new();
        let mut r = row("e1", &coordinator);

        assert_eq!(swipe(&mut r, 40.0, 1200.0), SwipeOutcome::Delete);
        assert!(queue.contains(&EpisodeId::from("e1")));

        let started = tokio::time::Instant::now();
        assert!(r.commit_delete(&queue).await);
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(queue.items(), vec![EpisodeId::from("e2")]);
        assert_eq!(r.state(), RowState::Closed);
    }

    #[tokio::test]
    async fn commit_without_delete_gesture_is_a_noop() {
        let queue = QueueStore::load(Arc::new(MemoryQueuePersistence::new(vec![
            EpisodeId::from("e1"),
        ])));
        let mut r = row("e1", &SwipeCoordinator::new());
        assert!(!r.commit_delete(&queue).await);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn revealed_actions_close_the_row() {
        let queue = QueueStore::load(Arc::new(MemoryQueuePersistence::new(vec![
            EpisodeId::from("e1"),
            EpisodeId::from("e2"),
        ])));
        let coordinator = SwipeCoordinator::new();
        let mut r = row("e2", &coordinator);

        swipe(&mut r, 100.0, 0.0);
        assert!(r.perform(SwipeAction::PlayNext, &queue));
        assert_eq!(queue.items(), vec![EpisodeId::from("e2"), EpisodeId::from("e1")]);
        assert_eq!(r.state(), RowState::Closed);
        assert_eq!(coordinator.open_row(), None);
    }
}
