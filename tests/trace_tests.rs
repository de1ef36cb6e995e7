//! GPS trail recorder: ordering, source partitioning and checkpoint pruning.

use fieldtask::db::{MigrationOutcome, TraceStore};
use fieldtask::db::migrations::TRACE_SCHEMA_VERSION;
use fieldtask::paths;
use rusqlite::Connection;

fn setup_store() -> TraceStore {
    let (store, outcome) = TraceStore::open_in_memory().unwrap();
    assert_eq!(
        outcome,
        MigrationOutcome::Fresh {
            version: TRACE_SCHEMA_VERSION
        }
    );
    store
}

#[test]
fn points_come_back_in_requested_order() {
    let store = setup_store();
    store.insert_point("a", 1.0, 10.0, 100).unwrap();
    store.insert_point("a", 2.0, 20.0, 200).unwrap();
    store.insert_point("a", 3.0, 30.0, 300).unwrap();

    let ascending = store.points("a", 10, false).unwrap();
    assert_eq!(
        ascending.iter().map(|p| p.time).collect::<Vec<_>>(),
        vec![100, 200, 300]
    );

    let descending = store.points("a", 10, true).unwrap();
    assert_eq!(
        descending.iter().map(|p| p.time).collect::<Vec<_>>(),
        vec![300, 200, 100]
    );

    let capped = store.points("a", 2, false).unwrap();
    assert_eq!(capped.len(), 2);
}

#[test]
fn trails_are_partitioned_by_source() {
    let store = setup_store();
    store.insert_point("a", 1.0, 10.0, 100).unwrap();
    store.insert_point("b", 2.0, 20.0, 200).unwrap();

    assert_eq!(store.count("a").unwrap(), 1);
    assert_eq!(store.count("b").unwrap(), 1);
    assert!(store.points("c", 10, false).unwrap().is_empty());

    // Deleting one trail leaves the other alone.
    store.delete_points("a", None).unwrap();
    assert_eq!(store.count("a").unwrap(), 0);
    assert_eq!(store.count("b").unwrap(), 1);
}

#[test]
fn prune_up_to_checkpoint_keeps_later_points() {
    let store = setup_store();
    let first = store.insert_point("a", 1.0, 10.0, 100).unwrap();
    let second = store.insert_point("a", 2.0, 20.0, 200).unwrap();
    store.insert_point("a", 3.0, 30.0, 300).unwrap();

    // Everything up to the second point has been durably uploaded.
    let deleted = store.delete_points("a", Some(second)).unwrap();
    assert_eq!(deleted, 2);

    let remaining = store.points("a", 10, false).unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].id > first);
    assert_eq!(remaining[0].time, 300);
}

#[test]
fn reset_drops_every_trail() {
    let store = setup_store();
    store.insert_point("a", 1.0, 10.0, 100).unwrap();
    store.insert_point("b", 2.0, 20.0, 200).unwrap();

    store.reset().unwrap();
    assert_eq!(store.count("a").unwrap(), 0);
    assert_eq!(store.count("b").unwrap(), 0);

    // The table is usable again immediately.
    store.insert_point("a", 3.0, 30.0, 300).unwrap();
    assert_eq!(store.count("a").unwrap(), 1);
}

#[test]
fn v1_trail_gains_the_source_column_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = paths::trace_db_path(dir.path());
    std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();

    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE trace (
                _id integer primary key,
                lat double not null,
                lon double not null,
                time long not null
            );
            INSERT INTO trace (lat, lon, time) VALUES (1.0, 10.0, 100);
            PRAGMA user_version = 1;",
        )
        .unwrap();
    }

    let (store, outcome) = TraceStore::open(dir.path()).unwrap();
    match outcome {
        MigrationOutcome::Upgraded { from, to, .. } => {
            assert_eq!(from, 1);
            assert_eq!(to, TRACE_SCHEMA_VERSION);
        }
        other => panic!("expected upgrade, got {other:?}"),
    }

    // Pre-upgrade points have a null source; new points are partitioned.
    store.insert_point("a", 2.0, 20.0, 200).unwrap();
    assert_eq!(store.count("a").unwrap(), 1);
}
