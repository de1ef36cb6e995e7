//! Instance store behavior: lifecycle stamps, tombstones, lineage and
//! repeat duplication.

use fieldtask::db::InstanceStore;
use fieldtask::error::StoreError;
use fieldtask::status::{InstanceStatus, TaskStatus};
use fieldtask::types::Instance;
use tempfile::TempDir;

fn setup_store() -> (InstanceStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = InstanceStore::open_in_memory(dir.path()).unwrap();
    (store, dir)
}

fn fresh_instance(path: &str) -> Instance {
    Instance {
        display_name: "Water survey".to_string(),
        instance_file_path: path.to_string(),
        form_id: "water-form".to_string(),
        form_version: Some("3".to_string()),
        ..Instance::default()
    }
}

fn accepted_task(path: &str, assignment_id: i64) -> Instance {
    Instance {
        source: Some("field.example.org".to_string()),
        assignment_id: Some(assignment_id),
        task_status: Some(TaskStatus::Accepted),
        task_type: Some("task".to_string()),
        ..fresh_instance(path)
    }
}

#[test]
fn save_then_get_round_trips_with_defaults_filled() {
    let (store, _dir) = setup_store();

    let saved = store.save(&fresh_instance("/data/instances/w1/w1.xml")).unwrap();
    let id = saved.id.unwrap();
    assert_eq!(saved.status, Some(InstanceStatus::Incomplete));
    assert!(saved.last_status_change_date.is_some());
    assert_eq!(saved.finalization_date, None);

    let fetched = store.get(id).unwrap();
    assert_eq!(fetched, saved);
}

#[test]
fn get_unknown_id_reports_not_found() {
    let (store, _dir) = setup_store();
    assert!(matches!(
        store.get(999),
        Err(StoreError::InstanceNotFound(999))
    ));
}

#[test]
fn status_change_restamps_date_and_finalization_is_stamped_once() {
    let (store, _dir) = setup_store();
    let mut row = store.save(&fresh_instance("/data/instances/w1/w1.xml")).unwrap();
    let created_at = row.last_status_change_date.unwrap();

    row.status = Some(InstanceStatus::Complete);
    let completed = store.save(&row).unwrap();
    assert!(completed.last_status_change_date.unwrap() >= created_at);
    let finalized_at = completed.finalization_date.unwrap();

    // Moving on to submitted keeps the original finalization stamp.
    let mut row = completed;
    row.status = Some(InstanceStatus::Submitted);
    let submitted = store.save(&row).unwrap();
    assert_eq!(submitted.finalization_date, Some(finalized_at));
}

#[test]
fn edit_lineage_constraints_are_enforced() {
    let (store, _dir) = setup_store();
    let saved = store.save(&fresh_instance("/data/instances/w1/w1.xml")).unwrap();

    // An instance can never be an edit of itself.
    let mut self_edit = saved.clone();
    self_edit.edit_of = saved.id;
    self_edit.edit_number = Some(1);
    assert!(matches!(
        store.save(&self_edit),
        Err(StoreError::Integrity(_))
    ));

    // An edit number without a parent is inconsistent.
    let mut orphan_number = saved.clone();
    orphan_number.edit_number = Some(1);
    assert!(matches!(
        store.save(&orphan_number),
        Err(StoreError::Integrity(_))
    ));

    // A well-formed edit pair is accepted.
    let edit = store
        .save(&Instance {
            edit_of: saved.id,
            edit_number: Some(1),
            ..fresh_instance("/data/instances/w1-edit/w1-edit.xml")
        })
        .unwrap();
    assert_eq!(edit.edit_of, saved.id);
}

#[test]
fn one_live_row_per_file_path() {
    let (store, _dir) = setup_store();
    let first = store.save(&fresh_instance("/data/instances/w1/w1.xml")).unwrap();

    assert!(matches!(
        store.save(&fresh_instance("/data/instances/w1/w1.xml")),
        Err(StoreError::Integrity(_))
    ));

    // A tombstoned row frees the path for reuse.
    store.delete_with_logging(first.id.unwrap()).unwrap();
    store.save(&fresh_instance("/data/instances/w1/w1.xml")).unwrap();
}

#[test]
fn pre_existing_duplicate_paths_read_leniently() {
    // Stores written before path uniqueness was enforced can hold several
    // live rows for one file path; they must still open and read.
    let dir = tempfile::tempdir().unwrap();
    let db_path = fieldtask::paths::instances_db_path(dir.path());
    std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE instances (
                _id integer primary key,
                displayName text not null,
                submissionUri text,
                instanceFilePath text not null,
                jrFormId text not null,
                status text not null,
                date date not null
            );
            INSERT INTO instances (displayName, instanceFilePath, jrFormId, status, date)
                VALUES ('First copy', '/data/instances/dup/dup.xml', 'form-a', 'incomplete', 1000);
            INSERT INTO instances (displayName, instanceFilePath, jrFormId, status, date)
                VALUES ('Second copy', '/data/instances/dup/dup.xml', 'form-a', 'incomplete', 2000);",
        )
        .unwrap();
    }

    // Open succeeds even though the uniqueness index cannot be built.
    let (store, _) = InstanceStore::open(dir.path()).unwrap();
    assert_eq!(store.list_all().unwrap().len(), 2);

    // The lenient read resolves to the lowest-id row instead of erroring.
    let row = store
        .get_by_path("/data/instances/dup/dup.xml")
        .unwrap()
        .unwrap();
    assert_eq!(row.display_name, "First copy");
}

#[test]
fn tombstone_clears_geometry_and_hides_from_live_listings() {
    let (store, _dir) = setup_store();
    let saved = store
        .save(&Instance {
            geometry: Some("POINT(1 2)".to_string()),
            geometry_type: Some("Point".to_string()),
            ..fresh_instance("/data/instances/w1/w1.xml")
        })
        .unwrap();
    let id = saved.id.unwrap();

    let tombstoned = store.delete_with_logging(id).unwrap();
    assert!(tombstoned.is_deleted());
    assert_eq!(tombstoned.geometry, None);
    assert_eq!(tombstoned.geometry_type, None);
    // History fields survive for audit.
    assert_eq!(tombstoned.display_name, "Water survey");

    assert!(store.list_not_deleted().unwrap().is_empty());
    assert_eq!(store.list_all().unwrap().len(), 1);
    assert_eq!(store.get_by_path("/data/instances/w1/w1.xml").unwrap(), None);
}

#[test]
fn hard_delete_removes_the_instance_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = InstanceStore::open_in_memory(dir.path()).unwrap();

    let instance_dir = dir.path().join("instances").join("w1");
    std::fs::create_dir_all(&instance_dir).unwrap();
    let file = instance_dir.join("w1.xml");
    std::fs::write(&file, "<data/>").unwrap();

    let saved = store
        .save(&fresh_instance(file.to_str().unwrap()))
        .unwrap();
    store.delete(saved.id.unwrap()).unwrap();

    assert!(!instance_dir.exists());
    assert!(store.list_all().unwrap().is_empty());
}

#[test]
fn form_version_filter_matches_null_exactly() {
    let (store, _dir) = setup_store();
    store.save(&fresh_instance("/data/instances/a/a.xml")).unwrap();
    store
        .save(&Instance {
            form_version: None,
            ..fresh_instance("/data/instances/b/b.xml")
        })
        .unwrap();

    let versioned = store
        .list_by_form_id_and_version("water-form", Some("3"))
        .unwrap();
    assert_eq!(versioned.len(), 1);
    assert_eq!(versioned[0].form_version.as_deref(), Some("3"));

    let unversioned = store
        .list_by_form_id_and_version("water-form", None)
        .unwrap();
    assert_eq!(unversioned.len(), 1);
    assert_eq!(unversioned[0].form_version, None);

    assert_eq!(store.list_by_form_id("water-form").unwrap().len(), 2);
}

#[test]
fn count_by_status_ignores_tombstones() {
    let (store, _dir) = setup_store();
    let a = store.save(&fresh_instance("/data/instances/a/a.xml")).unwrap();
    store.save(&fresh_instance("/data/instances/b/b.xml")).unwrap();
    assert_eq!(store.count_by_status(InstanceStatus::Incomplete).unwrap(), 2);

    store.delete_with_logging(a.id.unwrap()).unwrap();
    assert_eq!(store.count_by_status(InstanceStatus::Incomplete).unwrap(), 1);
}

#[test]
fn list_by_status_accepts_multiple_statuses() {
    let (store, _dir) = setup_store();
    store.save(&fresh_instance("/data/instances/a/a.xml")).unwrap();
    store
        .save(&Instance {
            status: Some(InstanceStatus::Complete),
            ..fresh_instance("/data/instances/b/b.xml")
        })
        .unwrap();
    store
        .save(&Instance {
            status: Some(InstanceStatus::Submitted),
            ..fresh_instance("/data/instances/c/c.xml")
        })
        .unwrap();

    let finalized = store
        .list_by_status(&[InstanceStatus::Complete, InstanceStatus::Submitted])
        .unwrap();
    assert_eq!(finalized.len(), 2);
    assert!(store.list_by_status(&[]).unwrap().is_empty());
}

#[test]
fn task_transitions_are_validated() {
    let (store, _dir) = setup_store();
    let task = store
        .save(&accepted_task("/data/instances/t1/t1.xml", 7))
        .unwrap();
    let id = task.id.unwrap();

    // Accepted -> cancelled is legal.
    let cancelled = store
        .set_task_status(id, TaskStatus::Cancelled, Some("rain"))
        .unwrap();
    assert_eq!(cancelled.task_status, Some(TaskStatus::Cancelled));
    assert_eq!(cancelled.task_comment.as_deref(), Some("rain"));

    // Cancelled is closed; no further local transitions.
    assert!(matches!(
        store.set_task_status(id, TaskStatus::Accepted, None),
        Err(StoreError::Integrity(_))
    ));
}

#[test]
fn triggered_task_refuses_direct_open() {
    let (store, _dir) = setup_store();
    let task = store
        .save(&Instance {
            location_trigger: Some("tag-42".to_string()),
            ..accepted_task("/data/instances/t1/t1.xml", 7)
        })
        .unwrap();
    let id = task.id.unwrap();

    assert!(matches!(
        store.start_task(id, false),
        Err(StoreError::TriggerRequired(got)) if got == id
    ));

    let opened = store.start_task(id, true).unwrap();
    assert!(opened.act_start.is_some());
}

#[test]
fn submitted_task_cannot_be_opened() {
    let (store, _dir) = setup_store();
    let task = store
        .save(&Instance {
            task_status: Some(TaskStatus::Submitted),
            ..accepted_task("/data/instances/t1/t1.xml", 7)
        })
        .unwrap();

    assert!(matches!(
        store.start_task(task.id.unwrap(), false),
        Err(StoreError::Integrity(_))
    ));
}

#[test]
fn completing_a_repeat_task_spawns_an_accepted_duplicate() {
    let (store, _dir) = setup_store();
    let task = store
        .save(&Instance {
            repeat: true,
            uuid: Some("original-uuid".to_string()),
            ..accepted_task("/data/instances/t1/t1.xml", 7)
        })
        .unwrap();

    let (done, duplicate) = store.complete_task(task.id.unwrap()).unwrap();
    let duplicate = duplicate.expect("repeat task must duplicate");

    assert_eq!(done.task_status, Some(TaskStatus::Complete));
    assert_eq!(done.status, Some(InstanceStatus::Complete));
    assert!(done.finalization_date.is_some());

    assert_ne!(duplicate.id, done.id);
    assert_eq!(duplicate.assignment_id, done.assignment_id);
    assert_eq!(duplicate.task_status, Some(TaskStatus::Accepted));
    assert_eq!(duplicate.status, Some(InstanceStatus::Incomplete));
    assert_ne!(duplicate.instance_file_path, done.instance_file_path);
    assert_ne!(duplicate.uuid, done.uuid);
    assert_eq!(duplicate.finalization_date, None);
}

#[test]
fn completing_a_plain_task_does_not_duplicate() {
    let (store, _dir) = setup_store();
    let task = store
        .save(&accepted_task("/data/instances/t1/t1.xml", 7))
        .unwrap();

    let (done, duplicate) = store.complete_task(task.id.unwrap()).unwrap();
    assert!(duplicate.is_none());
    assert_eq!(done.task_status, Some(TaskStatus::Complete));
    assert_eq!(store.list_all().unwrap().len(), 1);
}

#[test]
fn completing_a_closed_task_is_refused() {
    let (store, _dir) = setup_store();
    let task = store
        .save(&accepted_task("/data/instances/t1/t1.xml", 7))
        .unwrap();
    store.complete_task(task.id.unwrap()).unwrap();

    assert!(matches!(
        store.complete_task(task.id.unwrap()),
        Err(StoreError::Integrity(_))
    ));
}

#[test]
fn delete_all_purges_every_row() {
    let (store, _dir) = setup_store();
    store.save(&fresh_instance("/data/instances/a/a.xml")).unwrap();
    store.save(&fresh_instance("/data/instances/b/b.xml")).unwrap();

    assert_eq!(store.delete_all().unwrap(), 2);
    assert!(store.list_all().unwrap().is_empty());
}

#[test]
fn get_by_assignment_id_is_scoped_by_source() {
    let (store, _dir) = setup_store();
    store
        .save(&accepted_task("/data/instances/a/a.xml", 7))
        .unwrap();

    let found = store
        .get_by_assignment_id("field.example.org", 7)
        .unwrap()
        .unwrap();
    assert_eq!(found.assignment_id, Some(7));

    assert_eq!(
        store.get_by_assignment_id("other.example.org", 7).unwrap(),
        None
    );
}
