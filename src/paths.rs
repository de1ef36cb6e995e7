//! Storage layout under the app-private data root.
//!
//! The root holds one `instances/` tree (one directory per form-filling
//! attempt, containing the instance file and its media) and a `metadata/`
//! directory with the SQLite databases.

use std::path::{Component, Path, PathBuf};

/// Default data root, e.g. `~/.local/share/fieldtask` on Linux.
pub fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldtask")
}

pub fn instances_dir(root: &Path) -> PathBuf {
    root.join("instances")
}

pub fn metadata_dir(root: &Path) -> PathBuf {
    root.join("metadata")
}

pub fn instances_db_path(root: &Path) -> PathBuf {
    metadata_dir(root).join("instances.db")
}

pub fn trace_db_path(root: &Path) -> PathBuf {
    metadata_dir(root).join("trace.db")
}

/// Build a fresh instance file path for a new form fill or a repeat
/// duplicate: `<root>/instances/<name>_<millis>_<token>/<same stem>.xml`.
///
/// The random token keeps two same-titled paths distinct even within one
/// millisecond; the path is unique per live row in the store.
pub fn new_instance_path(root: &Path, name: &str, now_ms: i64) -> PathBuf {
    let token = uuid::Uuid::new_v4().simple().to_string();
    let stem = format!("{}_{}_{}", sanitize(name), now_ms, &token[..8]);
    instances_dir(root).join(&stem).join(format!("{stem}.xml"))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Whether `dir` might be an externally managed attachment data directory.
///
/// Sibling products store media attachments under the same root in
/// directories that are, relative to the root, exactly four segments deep
/// with the second segment literally `instances`. Those directories must be
/// skipped during cleanup, not deleted.
pub fn is_external_attachment_dir(root: &Path, dir: &Path) -> bool {
    let Ok(relative) = dir.strip_prefix(root) else {
        return false;
    };
    let segments: Vec<String> = relative
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    segments.len() == 4 && segments[1] == "instances"
}

/// Remove the directory holding an instance file and everything in it.
///
/// Failures are logged and swallowed: the database tombstone or delete has
/// already committed and the row is the source of truth.
pub fn delete_instance_dir(root: &Path, instance_file_path: &str) {
    let file = Path::new(instance_file_path);
    let Some(dir) = file.parent() else {
        return;
    };
    if !dir.exists() {
        return;
    }
    if is_external_attachment_dir(root, dir) {
        tracing::info!(dir = %dir.display(), "skipping external attachment directory");
        return;
    }
    if let Err(err) = std::fs::remove_dir_all(dir) {
        tracing::warn!(dir = %dir.display(), %err, "failed to remove instance directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_dir_guard_matches_four_deep_instances_paths() {
        let root = Path::new("/data/app");
        assert!(is_external_attachment_dir(
            root,
            Path::new("/data/app/tables/instances/table1/row9")
        ));
        // Wrong depth
        assert!(!is_external_attachment_dir(
            root,
            Path::new("/data/app/tables/instances/table1")
        ));
        // Second segment is not "instances"
        assert!(!is_external_attachment_dir(
            root,
            Path::new("/data/app/tables/forms/table1/row9")
        ));
        // Our own instance directories are two deep and are fair game
        assert!(!is_external_attachment_dir(
            root,
            Path::new("/data/app/instances/visit_12")
        ));
        // Outside the root entirely
        assert!(!is_external_attachment_dir(
            root,
            Path::new("/elsewhere/tables/instances/table1/row9")
        ));
    }

    #[test]
    fn new_instance_paths_are_namespaced_and_sanitized() {
        let root = Path::new("/data/app");
        let path = new_instance_path(root, "Water Survey", 1700000000000);
        let s = path.to_string_lossy();
        assert!(s.starts_with("/data/app/instances/Water_Survey_1700000000000"));
        assert!(s.ends_with(".xml"));
        // Directory stem and file stem agree.
        let dir = path.parent().unwrap().file_name().unwrap().to_string_lossy();
        let file = path.file_stem().unwrap().to_string_lossy();
        assert_eq!(dir, file);
    }

    #[test]
    fn same_title_in_the_same_millisecond_yields_distinct_paths() {
        let root = Path::new("/data/app");
        let a = new_instance_path(root, "Water Survey", 1700000000000);
        let b = new_instance_path(root, "Water Survey", 1700000000000);
        assert_ne!(a, b);
    }
}
