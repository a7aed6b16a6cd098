//! Files marked for batch download. The set is an antichain under directory
//! containment: no entry may be an ancestor of another, so a bulk download
//! never archives the same bytes twice.

use std::path::Path;
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::Publisher;

/// A file or directory marked for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkedFile {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub mod_time: i64,
    pub is_dir: bool,
}

/// Event delivered to marked-files subscribers. The payload is the full
/// current list; `update` events are hints and clients may also refetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MarkedEvent {
    Init { files: Vec<MarkedFile> },
    Update { files: Vec<MarkedFile> },
}

#[derive(Debug, thiserror::Error)]
pub enum MarkedError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("cannot mark this file type")]
    NotMarkable,
    #[error("parent directory {0:?} is already marked")]
    ParentMarked(String),
    #[error("child {0:?} is already marked; unmark it first")]
    ChildMarked(String),
}

pub struct MarkedStore {
    files: Mutex<Vec<MarkedFile>>,
    events: Publisher<MarkedEvent>,
}

/// True when `child` lies strictly inside `parent` (comparison at a path
/// boundary, so "/tmp/ab" is not inside "/tmp/a").
fn is_under(child: &str, parent: &str) -> bool {
    if parent == "/" {
        return child.len() > 1 && child.starts_with('/');
    }
    child.len() > parent.len() + 1
        && child.starts_with(parent)
        && child.as_bytes()[parent.len()] == b'/'
}

impl MarkedStore {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(Vec::new()),
            events: Publisher::new(),
        }
    }

    pub fn list(&self) -> Vec<MarkedFile> {
        self.files.lock().clone()
    }

    /// Mark `path`. Stats the path, rejects non-regular non-directory
    /// entries, and enforces the antichain invariant. Returns the new list
    /// and whether the entry was actually added (re-marking an exact path is
    /// a no-op, not an error).
    pub fn add(&self, path: &Path) -> Result<(Vec<MarkedFile>, bool), MarkedError> {
        let meta = std::fs::metadata(path)
            .map_err(|e| MarkedError::NotFound(e.to_string()))?;
        if !meta.is_dir() && !meta.is_file() {
            return Err(MarkedError::NotMarkable);
        }

        let path_str = path.to_string_lossy().to_string();
        let entry = MarkedFile {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path_str.clone()),
            size: meta.len(),
            mod_time: meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            is_dir: meta.is_dir(),
            path: path_str.clone(),
        };

        let files = {
            let mut files = self.files.lock();

            if files.iter().any(|f| f.path == path_str) {
                return Ok((files.clone(), false));
            }
            if let Some(parent) = files.iter().find(|f| f.is_dir && is_under(&path_str, &f.path)) {
                return Err(MarkedError::ParentMarked(parent.name.clone()));
            }
            if entry.is_dir {
                if let Some(child) = files.iter().find(|f| is_under(&f.path, &path_str)) {
                    return Err(MarkedError::ChildMarked(child.name.clone()));
                }
            }

            files.push(entry);
            files.clone()
        };

        self.events.publish(MarkedEvent::Update { files: files.clone() });
        Ok((files, true))
    }

    /// Remove one path from the set.
    pub fn remove(&self, path: &str) -> Vec<MarkedFile> {
        let files = {
            let mut files = self.files.lock();
            files.retain(|f| f.path != path);
            files.clone()
        };
        self.events.publish(MarkedEvent::Update { files: files.clone() });
        files
    }

    /// Remove every path in `paths`; used after a bulk download succeeds.
    pub fn remove_paths(&self, paths: &[String]) -> Vec<MarkedFile> {
        let files = {
            let mut files = self.files.lock();
            files.retain(|f| !paths.contains(&f.path));
            files.clone()
        };
        self.events.publish(MarkedEvent::Update { files: files.clone() });
        files
    }

    /// Clear the whole set.
    pub fn clear(&self) -> Vec<MarkedFile> {
        self.files.lock().clear();
        self.events.publish(MarkedEvent::Update { files: Vec::new() });
        Vec::new()
    }

    /// Register a subscriber; the init snapshot is taken under the list lock.
    pub fn subscribe(&self) -> (MarkedEvent, mpsc::Receiver<MarkedEvent>) {
        let files = self.files.lock();
        let rx = self.events.subscribe();
        (MarkedEvent::Init { files: files.clone() }, rx)
    }
}

impl Default for MarkedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_tempdir() -> (MarkedStore, tempfile::TempDir) {
        (MarkedStore::new(), tempfile::tempdir().unwrap())
    }

    #[test]
    fn starts_empty() {
        assert!(MarkedStore::new().list().is_empty());
    }

    #[test]
    fn add_regular_file() {
        let (store, dir) = store_with_tempdir();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hello").unwrap();

        let (files, added) = store.add(&file).unwrap();
        assert!(added);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].size, 5);
        assert!(!files[0].is_dir);
    }

    #[test]
    fn add_missing_path_fails() {
        let (store, dir) = store_with_tempdir();
        let err = store.add(&dir.path().join("ghost")).unwrap_err();
        assert!(matches!(err, MarkedError::NotFound(_)));
    }

    #[test]
    fn re_adding_same_path_is_noop() {
        let (store, dir) = store_with_tempdir();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        store.add(&file).unwrap();
        let (files, added) = store.add(&file).unwrap();
        assert!(!added);
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn marking_child_of_marked_dir_conflicts() {
        let (store, dir) = store_with_tempdir();
        let sub = dir.path().join("a");
        std::fs::create_dir(&sub).unwrap();
        let file = sub.join("b.txt");
        std::fs::write(&file, b"x").unwrap();

        store.add(&sub).unwrap();
        let err = store.add(&file).unwrap_err();
        match err {
            MarkedError::ParentMarked(name) => assert_eq!(name, "a"),
            other => panic!("expected ParentMarked, got {other:?}"),
        }
        // The set is unchanged.
        assert_eq!(store.list().len(), 1);
        assert!(store.list()[0].is_dir);
    }

    #[test]
    fn marking_parent_of_marked_child_conflicts() {
        let (store, dir) = store_with_tempdir();
        let sub = dir.path().join("a");
        std::fs::create_dir(&sub).unwrap();
        let file = sub.join("b.txt");
        std::fs::write(&file, b"x").unwrap();

        store.add(&file).unwrap();
        let err = store.add(&sub).unwrap_err();
        match err {
            MarkedError::ChildMarked(name) => assert_eq!(name, "b.txt"),
            other => panic!("expected ChildMarked, got {other:?}"),
        }
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn sibling_with_shared_prefix_is_not_a_conflict() {
        let (store, dir) = store_with_tempdir();
        let a = dir.path().join("a");
        let ab = dir.path().join("ab");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&ab).unwrap();

        store.add(&a).unwrap();
        let (files, added) = store.add(&ab).unwrap();
        assert!(added);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn remove_and_clear() {
        let (store, dir) = store_with_tempdir();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"y").unwrap();
        store.add(&a).unwrap();
        store.add(&b).unwrap();

        let files = store.remove(&a.to_string_lossy());
        assert_eq!(files.len(), 1);
        assert!(store.clear().is_empty());
        assert!(store.list().is_empty());
    }

    #[test]
    fn remove_paths_drops_only_named_entries() {
        let (store, dir) = store_with_tempdir();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"y").unwrap();
        store.add(&a).unwrap();
        store.add(&b).unwrap();

        let remaining = store.remove_paths(&[a.to_string_lossy().to_string()]);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "b.txt");
    }

    #[tokio::test]
    async fn mutations_notify_subscribers() {
        let (store, dir) = store_with_tempdir();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        let (init, mut rx) = store.subscribe();
        assert_eq!(init, MarkedEvent::Init { files: vec![] });

        store.add(&file).unwrap();
        match rx.recv().await.unwrap() {
            MarkedEvent::Update { files } => assert_eq!(files.len(), 1),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn antichain_holds_after_any_accepted_mutation() {
        let (store, dir) = store_with_tempdir();
        let sub = dir.path().join("d");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("f.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("g.txt"), b"y").unwrap();

        let _ = store.add(&sub.join("f.txt"));
        let _ = store.add(&sub); // conflicts, rejected
        let _ = store.add(&dir.path().join("g.txt"));

        let files = store.list();
        for a in &files {
            for b in &files {
                if a.path != b.path {
                    assert!(!is_under(&a.path, &b.path), "{} under {}", a.path, b.path);
                }
            }
        }
    }
}
