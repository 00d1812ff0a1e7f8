use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use podplayer::{
    EpisodeId, JsonQueueFile, QueueEvent, QueueStore, RowState, SwipeAction, SwipeCoordinator,
    SwipeEvent, SwipeOutcome, SwipeRow, SwipeThresholds,
};

fn ids(names: &[&str]) -> Vec<EpisodeId> {
    names.iter().map(|name| EpisodeId::from(*name)).collect()
}

fn json_queue(dir: &tempfile::TempDir) -> QueueStore {
    QueueStore::load(Arc::new(JsonQueueFile::new(dir.path().join("queue.json"))))
}

#[test]
fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let queue = json_queue(&dir);
        for id in ids(&["e1", "e2", "e3"]) {
            queue.append(&id);
        }
        queue.move_to_end(&EpisodeId::from("e1"));
        assert_eq!(queue.items(), ids(&["e2", "e3", "e1"]));
    }

    let restored = json_queue(&dir);
    assert_eq!(restored.items(), ids(&["e2", "e3", "e1"]));
}

#[test]
fn test_corrupt_queue_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("queue.json"), "{\"oops\": true}").unwrap();

    let queue = json_queue(&dir);
    assert!(queue.is_empty());
    assert!(queue.append(&EpisodeId::from("e1")));
    assert_eq!(json_queue(&dir).items(), ids(&["e1"]));
}

#[test]
fn test_add_to_top_from_index_three() {
    let dir = tempfile::tempdir().unwrap();
    let queue = json_queue(&dir);
    for id in ids(&["a", "b", "c", "d", "e"]) {
        queue.append(&id);
    }

    queue.add_to_top(&EpisodeId::from("d"));
    assert_eq!(queue.items(), ids(&["d", "a", "b", "c", "e"]));
}

#[test]
fn test_no_duplicates_after_arbitrary_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let queue = json_queue(&dir);
    let names = ["a", "b", "c", "d"];

    for step in 0..40usize {
        let id = EpisodeId::from(names[(step * 7) % names.len()]);
        match step % 3 {
            0 => {
                queue.append(&id);
            }
            1 => {
                queue.add_to_top(&id);
            }
            _ => {
                let len = queue.len();
                if len > 1 {
                    queue.reorder(step % len, (step * 3) % len);
                }
            }
        }
        let items = queue.items();
        let unique: HashSet<_> = items.iter().collect();
        assert_eq!(unique.len(), items.len());
    }
}

#[test]
fn test_queue_events_carry_full_order() {
    let dir = tempfile::tempdir().unwrap();
    let queue = json_queue(&dir);
    let mut rx = queue.subscribe();

    queue.append(&EpisodeId::from("a"));
    queue.append(&EpisodeId::from("b"));
    queue.reorder(1, 0);
    queue.remove(&EpisodeId::from("ghost"));

    let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(
        events,
        vec![
            QueueEvent::Updated { items: ids(&["a"]) },
            QueueEvent::Updated { items: ids(&["a", "b"]) },
            QueueEvent::Updated { items: ids(&["b", "a"]) },
        ]
    );
}

#[test]
fn test_swipe_open_second_row_closes_first() {
    let coordinator = SwipeCoordinator::new();
    let thresholds = SwipeThresholds::default();
    let mut e1 = SwipeRow::new(EpisodeId::from("e1"), coordinator.clone(), thresholds.clone());
    let mut e2 = SwipeRow::new(EpisodeId::from("e2"), coordinator.clone(), thresholds);
    let mut rx = coordinator.subscribe();

    e1.begin_drag();
    e1.drag_to(80.0);
    assert_eq!(e1.release(0.0), SwipeOutcome::Opened);

    e2.begin_drag();
    e2.drag_to(90.0);
    assert_eq!(e2.release(0.0), SwipeOutcome::Opened);

    let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert!(events.contains(&SwipeEvent::CloseRequested {
        row: EpisodeId::from("e1")
    }));
    for event in &events {
        e1.handle_event(event);
        e2.handle_event(event);
    }

    assert_eq!(coordinator.open_row(), Some(EpisodeId::from("e2")));
    assert_eq!(e1.state(), RowState::Closed);
    assert_eq!(e2.state(), RowState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_long_swipe_removes_after_animation() {
    let dir = tempfile::tempdir().unwrap();
    let queue = json_queue(&dir);
    for id in ids(&["e1", "e2", "e3"]) {
        queue.append(&id);
    }
    let coordinator = SwipeCoordinator::new();
    let mut row = SwipeRow::new(
        EpisodeId::from("e2"),
        coordinator.clone(),
        SwipeThresholds {
            commit_animation: Duration::from_millis(400),
            ..SwipeThresholds::default()
        },
    );

    row.begin_drag();
    row.drag_to(250.0);
    assert_eq!(row.release(0.0), SwipeOutcome::Delete);
    assert_eq!(row.state(), RowState::CommittingDelete);

    let queue_for_task = queue.clone();
    let commit = tokio::spawn(async move { row.commit_delete(&queue_for_task).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(queue.contains(&EpisodeId::from("e2")));

    assert!(commit.await.unwrap());
    assert_eq!(queue.items(), ids(&["e1", "e3"]));
    assert_eq!(json_queue(&dir).items(), ids(&["e1", "e3"]));
}

#[test]
fn test_keep_for_later_from_revealed_actions() {
    let dir = tempfile::tempdir().unwrap();
    let queue = json_queue(&dir);
    for id in ids(&["e1", "e2", "e3"]) {
        queue.append(&id);
    }
    let coordinator = SwipeCoordinator::new();
    let mut row = SwipeRow::new(
        EpisodeId::from("e1"),
        coordinator.clone(),
        SwipeThresholds::default(),
    );

    row.begin_drag();
    row.drag_to(100.0);
    row.release(0.0);
    assert!(row.perform(SwipeAction::MoveToEnd, &queue));

    assert_eq!(queue.items(), ids(&["e2", "e3", "e1"]));
    assert_eq!(coordinator.open_row(), None);
}
